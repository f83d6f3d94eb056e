//! Identifiers and short codes handed out to users.

use apnasquad_types::{TEAM_ID_DIGITS, TEAM_PASSWORD_DIGITS, WITHDRAWAL_REFERENCE_DIGITS};
use rand::{rngs::OsRng, Rng, RngCore};
use uuid::Uuid;

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Decimal code of exactly `digits` digits; leading zeros allowed.
pub fn numeric_code(digits: usize) -> String {
    let mut rng = OsRng;
    (0..digits)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

/// Eight uppercase hex characters.
pub fn referral_code() -> String {
    hex::encode_upper(random_bytes::<4>())
}

pub fn order_id() -> String {
    format!("order_{}", hex::encode(random_bytes::<10>()))
}

/// Customer-side reference sent to the gateway with each order.
pub fn customer_reference() -> String {
    hex::encode(random_bytes::<10>())
}

/// Ledger reference shared by a withdrawal and its transaction, also used
/// for join entries.
pub fn transaction_reference() -> String {
    format!("T{}", numeric_code(WITHDRAWAL_REFERENCE_DIGITS))
}

/// Team ids never start with zero so they keep their width as numbers.
pub fn team_id() -> u64 {
    let low = 10u64.pow(TEAM_ID_DIGITS as u32 - 1);
    OsRng.gen_range(low..low * 10)
}

pub fn team_password() -> u32 {
    let low = 10u32.pow(TEAM_PASSWORD_DIGITS as u32 - 1);
    OsRng.gen_range(low..low * 10)
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_shapes() {
        let otp = numeric_code(4);
        assert_eq!(otp.len(), 4);
        assert!(otp.chars().all(|c| c.is_ascii_digit()));

        let code = referral_code();
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));

        let order = order_id();
        assert!(order.starts_with("order_"));
        assert_eq!(order.len(), "order_".len() + 20);

        let reference = transaction_reference();
        assert!(reference.starts_with('T'));
        assert_eq!(reference.len(), 15);
    }

    #[test]
    fn test_team_credentials_width() {
        for _ in 0..100 {
            assert_eq!(team_id().to_string().len(), TEAM_ID_DIGITS);
            assert_eq!(team_password().to_string().len(), TEAM_PASSWORD_DIGITS);
        }
    }
}
