use crate::Amount;

/// Bonus credited to a referrer when someone signs up with their code.
pub const REFERRAL_BONUS: Amount = Amount::from_rupees(100);

/// Share of an entry fee that may be paid from the bonus balance (5%).
pub const BONUS_CAP_BPS: u32 = 500;

/// Default ceiling for a single withdrawal request.
pub const DEFAULT_MAX_WITHDRAWAL: Amount = Amount::from_rupees(5_000);

/// Smallest amount a ledger entry or deposit order may carry.
pub const MIN_LEDGER_AMOUNT: Amount = Amount::from_rupees(1);

/// A tournament needs room for at least this many teams.
pub const MIN_TOTAL_SPOTS: u32 = 2;

pub const MIN_NAME_LENGTH: usize = 2;
pub const MAX_NAME_LENGTH: usize = 55;
pub const MIN_PASSWORD_LENGTH: usize = 8;

/// Digits in a team id.
pub const TEAM_ID_DIGITS: usize = 10;

/// Digits in a team password.
pub const TEAM_PASSWORD_DIGITS: usize = 6;

/// Digits after the `T` prefix of a withdrawal transaction id.
pub const WITHDRAWAL_REFERENCE_DIGITS: usize = 14;
