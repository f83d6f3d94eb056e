pub mod amount;
pub use amount::{Amount, AmountError};
pub mod api;
pub mod models;
pub use models::*;
pub mod wallet;
