//! Persistent entities and the enumerations they share.
//!
//! Every enum here is stored as its wire string (the same string the API
//! emits), so a row read back from the store always round-trips through
//! [`std::str::FromStr`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod constants;
pub use constants::*;
mod ledger;
pub use ledger::*;
mod tournament;
pub use tournament::*;
mod user;
pub use user::*;


#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub const fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = ParseEnumError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok($name::$variant),)+
                    _ => Err(ParseEnumError {
                        kind: stringify!($name),
                        value: value.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum! {
    pub enum Role {
        User => "user",
        Admin => "admin",
        Manager => "manager",
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::User
    }
}

wire_enum! {
    /// Team format of a tournament.
    pub enum Mode {
        Solo => "solo",
        Duo => "duo",
        Squad => "squad",
    }
}

impl Mode {
    /// Maximum players in one registered team.
    pub const fn capacity(&self) -> usize {
        match self {
            Mode::Solo => 1,
            Mode::Duo => 2,
            Mode::Squad => 4,
        }
    }
}

wire_enum! {
    pub enum TournamentStatus {
        Live => "live",
        End => "end",
    }
}

wire_enum! {
    pub enum RegistrationStatus {
        Pending => "pending",
        Confirmed => "confirmed",
        Cancelled => "cancelled",
    }
}

wire_enum! {
    pub enum PaymentState {
        Paid => "PAID",
        Pending => "PENDING",
        Unpaid => "UNPAID",
        Refunded => "REFUNDED",
    }
}

wire_enum! {
    pub enum TransactionKind {
        Deposit => "deposit",
        Withdraw => "withdraw",
        Join => "join",
        Win => "win",
    }
}

wire_enum! {
    pub enum TransactionStatus {
        Pending => "pending",
        Success => "success",
        Failed => "failed",
        Processing => "processing",
    }
}

wire_enum! {
    pub enum TransactionMethod {
        Cashfree => "cashfree",
        Paytm => "paytm",
        Upi => "upi",
        Bank => "bank",
        Wallet => "wallet",
        Admin => "admin",
    }
}

wire_enum! {
    pub enum OrderStatus {
        Created => "CREATED",
        Paid => "PAID",
        Failed => "FAILED",
    }
}

impl OrderStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Failed)
    }
}

wire_enum! {
    pub enum WithdrawalStatus {
        Pending => "pending",
        Processing => "processing",
        Success => "success",
        Failed => "failed",
    }
}

impl WithdrawalStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, WithdrawalStatus::Success | WithdrawalStatus::Failed)
    }
}

wire_enum! {
    pub enum WithdrawalMethod {
        Upi => "upi",
        Bank => "bank",
    }
}

impl From<WithdrawalMethod> for TransactionMethod {
    fn from(method: WithdrawalMethod) -> Self {
        match method {
            WithdrawalMethod::Upi => TransactionMethod::Upi,
            WithdrawalMethod::Bank => TransactionMethod::Bank,
        }
    }
}
