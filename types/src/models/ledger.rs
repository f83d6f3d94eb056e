use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    OrderStatus, TransactionKind, TransactionMethod, TransactionStatus, WithdrawalMethod,
    WithdrawalStatus,
};
use crate::Amount;

/// A ledger entry recording one money movement on a user's wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "user")]
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub method: TransactionMethod,
    #[serde(rename = "tournament")]
    pub tournament_id: Option<String>,
    pub transaction_id: String,
    pub order_id: Option<String>,
    pub description: String,
    pub bonus_used: Amount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payment-gateway order backing a deposit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "_id")]
    pub id: String,
    pub order_id: String,
    pub user_id: String,
    pub amount: Amount,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payout request awaiting admin settlement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub amount: Amount,
    pub status: WithdrawalStatus,
    pub withdrawal_method: WithdrawalMethod,
    pub transaction_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
