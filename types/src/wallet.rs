//! Wallet arithmetic shared by the join, deposit and withdrawal flows.

use thiserror::Error;

use crate::models::{BONUS_CAP_BPS, MIN_LEDGER_AMOUNT};
use crate::Amount;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WalletError {
    #[error("Insufficient balance.")]
    InsufficientBalance { needed: Amount, available: Amount },
    #[error("Insufficient balance for withdrawal.")]
    InsufficientForWithdrawal { requested: Amount, available: Amount },
    #[error("Amount must be a positive number.")]
    NonPositiveAmount,
    #[error("Amount must be at least {min}.")]
    BelowMinimum { min: Amount },
    #[error("Maximum Withdraw amount is {max}")]
    AboveMaximum { max: Amount },
}

/// How an entry fee is split between the bonus and main balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryCharge {
    pub entry_fee: Amount,
    pub bonus_used: Amount,
    pub balance_used: Amount,
}

impl EntryCharge {
    /// Bonus covers at most [`BONUS_CAP_BPS`] of the fee; the rest comes from
    /// the main balance.
    pub fn compute(entry_fee: Amount, bonus: Amount) -> Self {
        let entry_fee = entry_fee.max(Amount::ZERO);
        let cap = entry_fee.basis_points(BONUS_CAP_BPS);
        let bonus_used = bonus.max(Amount::ZERO).min(cap);
        let balance_used = Amount::from_paise(entry_fee.paise() - bonus_used.paise());
        Self {
            entry_fee,
            bonus_used,
            balance_used,
        }
    }

    pub fn ensure_affordable(&self, balance: Amount) -> Result<(), WalletError> {
        if balance < self.balance_used {
            return Err(WalletError::InsufficientBalance {
                needed: self.balance_used,
                available: balance,
            });
        }
        Ok(())
    }

    /// Human-readable note stored on the join ledger entry.
    pub fn description(&self) -> String {
        if self.bonus_used.is_positive() {
            format!(
                "You have joined tournament. (Used {} from bonus balance)",
                self.bonus_used
            )
        } else {
            "You have joined tournament.".to_string()
        }
    }
}

/// Request-level checks run before any balance is read.
pub fn validate_withdrawal_request(
    amount: Amount,
    max: Option<Amount>,
) -> Result<(), WalletError> {
    if !amount.is_positive() {
        return Err(WalletError::NonPositiveAmount);
    }
    if amount < MIN_LEDGER_AMOUNT {
        return Err(WalletError::BelowMinimum {
            min: MIN_LEDGER_AMOUNT,
        });
    }
    if let Some(max) = max {
        if amount > max {
            return Err(WalletError::AboveMaximum { max });
        }
    }
    Ok(())
}

pub fn ensure_withdrawable(amount: Amount, balance: Amount) -> Result<(), WalletError> {
    if balance < amount {
        return Err(WalletError::InsufficientForWithdrawal {
            requested: amount,
            available: balance,
        });
    }
    Ok(())
}

pub fn validate_deposit(amount: Amount) -> Result<(), WalletError> {
    if !amount.is_positive() {
        return Err(WalletError::NonPositiveAmount);
    }
    if amount < MIN_LEDGER_AMOUNT {
        return Err(WalletError::BelowMinimum {
            min: MIN_LEDGER_AMOUNT,
        });
    }
    Ok(())
}
