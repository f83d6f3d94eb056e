use apnasquad_types::{
    api::Page,
    wallet::{ensure_withdrawable, validate_withdrawal_request, WalletError},
    Amount, Order, OrderStatus, Transaction, TransactionKind, TransactionMethod,
    TransactionStatus, Withdrawal, WithdrawalMethod, WithdrawalStatus,
};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

use super::{column_amount, column_enum, column_time, immediate, now_ms, users, Store, StoreError};
use crate::ids;

const TRANSACTION_COLUMNS: &str = "id, user_id, kind, amount, status, method, tournament_id, \
     transaction_id, order_id, description, bonus_used, created_at, updated_at";
const ORDER_COLUMNS: &str = "id, order_id, user_id, amount, status, created_at, updated_at";
const WITHDRAWAL_COLUMNS: &str =
    "id, user_id, amount, status, withdrawal_method, transaction_id, created_at, updated_at";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("User not found.")]
    UserNotFound,
    #[error("Order not found")]
    OrderNotFound,
    #[error("Withdrawal request not found")]
    WithdrawalNotFound,
    #[error("Cannot update a finalized withdrawal status")]
    WithdrawalFinalized,
    #[error("Failed to find transaction")]
    LedgerEntryMissing,
    #[error(transparent)]
    Wallet(#[from] WalletError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Store(err.into())
    }
}

/// Final state reported by the gateway for a deposit order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DepositOutcome {
    Paid,
    Failed { reason: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    /// This call moved the order to its terminal state.
    Applied(Order),
    /// The order was already terminal; nothing was written.
    AlreadyProcessed(Order),
}

#[derive(Clone, Debug, Default)]
pub struct WithdrawalFilter {
    pub transaction_id: Option<String>,
    pub status: Option<WithdrawalStatus>,
}

/// Admin decision on a withdrawal, addressed by id and ledger reference.
#[derive(Clone, Debug)]
pub struct WithdrawalUpdate {
    pub id: String,
    pub transaction_id: String,
    pub status: WithdrawalStatus,
}

/// Contact details of the user who requested a withdrawal.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalContact {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub upi_id: String,
    pub upi_name: String,
    pub phone: String,
    pub avatar: String,
    pub bgmi_id: String,
}

#[derive(Clone, Debug)]
pub struct WithdrawalWithUser {
    pub withdrawal: Withdrawal,
    pub user: Option<WithdrawalContact>,
}

enum StatusChange {
    Updated(Withdrawal),
    LedgerEntryMissing,
}

fn map_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        kind: column_enum(row, "kind")?,
        amount: column_amount(row, "amount")?,
        status: column_enum(row, "status")?,
        method: column_enum(row, "method")?,
        tournament_id: row.get("tournament_id")?,
        transaction_id: row.get("transaction_id")?,
        order_id: row.get("order_id")?,
        description: row.get("description")?,
        bonus_used: column_amount(row, "bonus_used")?,
        created_at: column_time(row, "created_at")?,
        updated_at: column_time(row, "updated_at")?,
    })
}

fn map_order(row: &rusqlite::Row<'_>) -> rusqlite::Result<Order> {
    Ok(Order {
        id: row.get("id")?,
        order_id: row.get("order_id")?,
        user_id: row.get("user_id")?,
        amount: column_amount(row, "amount")?,
        status: column_enum(row, "status")?,
        created_at: column_time(row, "created_at")?,
        updated_at: column_time(row, "updated_at")?,
    })
}

fn map_withdrawal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Withdrawal> {
    Ok(Withdrawal {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        amount: column_amount(row, "amount")?,
        status: column_enum(row, "status")?,
        withdrawal_method: column_enum(row, "withdrawal_method")?,
        transaction_id: row.get("transaction_id")?,
        created_at: column_time(row, "created_at")?,
        updated_at: column_time(row, "updated_at")?,
    })
}

fn find_order(conn: &Connection, order_id: &str) -> Result<Option<Order>, StoreError> {
    let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?");
    Ok(conn.query_row(&sql, [order_id], map_order).optional()?)
}

fn find_withdrawal(
    conn: &Connection,
    id: &str,
    transaction_id: &str,
) -> Result<Option<Withdrawal>, StoreError> {
    let sql =
        format!("SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE id = ? AND transaction_id = ?");
    Ok(conn
        .query_row(&sql, [id, transaction_id], map_withdrawal)
        .optional()?)
}

struct LedgerEntry<'a> {
    user_id: &'a str,
    kind: TransactionKind,
    amount: Amount,
    status: TransactionStatus,
    method: TransactionMethod,
    transaction_id: &'a str,
    order_id: Option<&'a str>,
    description: &'a str,
}

fn insert_entry(conn: &Connection, entry: LedgerEntry<'_>, now: i64) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO transactions (id, user_id, kind, amount, status, method, tournament_id, \
         transaction_id, order_id, description, bonus_used, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, NULL, ?, ?, ?, 0, ?, ?)",
        params![
            ids::new_id(),
            entry.user_id,
            entry.kind.as_str(),
            entry.amount.paise(),
            entry.status.as_str(),
            entry.method.as_str(),
            entry.transaction_id,
            entry.order_id,
            entry.description,
            now,
            now
        ],
    )?;
    Ok(())
}

/// Stores a freshly created gateway order and its pending deposit entry.
fn record_deposit_order(
    conn: &mut Connection,
    user_id: &str,
    order_id: &str,
    customer_reference: &str,
    amount: Amount,
) -> Result<Order, StoreError> {
    immediate(conn, |tx| {
        let now = now_ms();
        tx.execute(
            "INSERT INTO orders (id, order_id, user_id, amount, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                ids::new_id(),
                order_id,
                user_id,
                amount.paise(),
                OrderStatus::Created.as_str(),
                now,
                now
            ],
        )?;
        insert_entry(
            tx,
            LedgerEntry {
                user_id,
                kind: TransactionKind::Deposit,
                amount,
                status: TransactionStatus::Pending,
                method: TransactionMethod::Cashfree,
                transaction_id: customer_reference,
                order_id: Some(order_id),
                description: "",
            },
            now,
        )?;
        find_order(tx, order_id)?
            .ok_or_else(|| StoreError::Corrupt(format!("order {order_id} vanished")))
    })
}

/// Moves an order to its terminal state exactly once. A paid order credits
/// the amount recorded when the order was created.
fn settle_deposit(
    conn: &mut Connection,
    order_id: &str,
    outcome: DepositOutcome,
) -> Result<Settlement, LedgerError> {
    immediate(conn, |tx| {
        let order = find_order(tx, order_id)?.ok_or(LedgerError::OrderNotFound)?;
        if order.status.is_terminal() {
            return Ok(Settlement::AlreadyProcessed(order));
        }
        let now = now_ms();
        let target = match outcome {
            DepositOutcome::Paid => OrderStatus::Paid,
            DepositOutcome::Failed { .. } => OrderStatus::Failed,
        };
        let moved = tx.execute(
            "UPDATE orders SET status = ?, updated_at = ? WHERE order_id = ? AND status = ?",
            params![target.as_str(), now, order_id, OrderStatus::Created.as_str()],
        )?;
        if moved == 0 {
            let current = find_order(tx, order_id)?.ok_or(LedgerError::OrderNotFound)?;
            return Ok(Settlement::AlreadyProcessed(current));
        }

        match &outcome {
            DepositOutcome::Paid => {
                tx.execute(
                    "UPDATE users SET balance = balance + ?, updated_at = ? WHERE id = ?",
                    params![order.amount.paise(), now, order.user_id],
                )?;
                tx.execute(
                    "UPDATE transactions SET status = ?, updated_at = ? \
                     WHERE order_id = ? AND kind = ? AND status IN ('pending', 'processing')",
                    params![
                        TransactionStatus::Success.as_str(),
                        now,
                        order_id,
                        TransactionKind::Deposit.as_str()
                    ],
                )?;
            }
            DepositOutcome::Failed { reason } => {
                tx.execute(
                    "UPDATE transactions SET status = ?, description = ?, updated_at = ? \
                     WHERE order_id = ? AND kind = ? AND status IN ('pending', 'processing')",
                    params![
                        TransactionStatus::Failed.as_str(),
                        reason,
                        now,
                        order_id,
                        TransactionKind::Deposit.as_str()
                    ],
                )?;
            }
        }
        let settled = find_order(tx, order_id)?.ok_or(LedgerError::OrderNotFound)?;
        Ok(Settlement::Applied(settled))
    })
}

/// Debits the balance and files a pending withdrawal with its ledger entry.
fn request_withdrawal(
    conn: &mut Connection,
    user_id: &str,
    amount: Amount,
    method: WithdrawalMethod,
) -> Result<Withdrawal, LedgerError> {
    immediate(conn, |tx| {
        validate_withdrawal_request(amount, None)?;
        let user = users::find_by_id(tx, user_id)?.ok_or(LedgerError::UserNotFound)?;
        ensure_withdrawable(amount, user.balance)?;
        let now = now_ms();
        let debited = tx.execute(
            "UPDATE users SET balance = balance - ?1, updated_at = ?2 \
             WHERE id = ?3 AND balance >= ?1",
            params![amount.paise(), now, user_id],
        )?;
        if debited == 0 {
            return Err(WalletError::InsufficientForWithdrawal {
                requested: amount,
                available: user.balance,
            }
            .into());
        }

        let id = ids::new_id();
        let transaction_id = ids::transaction_reference();
        tx.execute(
            "INSERT INTO withdrawals (id, user_id, amount, status, withdrawal_method, \
             transaction_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                user_id,
                amount.paise(),
                WithdrawalStatus::Pending.as_str(),
                method.as_str(),
                transaction_id,
                now,
                now
            ],
        )?;
        insert_entry(
            tx,
            LedgerEntry {
                user_id,
                kind: TransactionKind::Withdraw,
                amount,
                status: TransactionStatus::Pending,
                method: method.into(),
                transaction_id: &transaction_id,
                order_id: None,
                description: "",
            },
            now,
        )?;
        find_withdrawal(tx, &id, &transaction_id)?
            .ok_or_else(|| StoreError::Corrupt(format!("withdrawal {id} vanished")).into())
    })
}

fn refund(tx: &Connection, withdrawal: &Withdrawal, now: i64) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE users SET balance = balance + ?, updated_at = ? WHERE id = ?",
        params![withdrawal.amount.paise(), now, withdrawal.user_id],
    )?;
    Ok(())
}

fn set_withdrawal_status(
    tx: &Connection,
    withdrawal: &Withdrawal,
    status: WithdrawalStatus,
    now: i64,
) -> Result<bool, StoreError> {
    let changed = tx.execute(
        "UPDATE withdrawals SET status = ?, updated_at = ? \
         WHERE id = ? AND status IN ('pending', 'processing')",
        params![status.as_str(), now, withdrawal.id],
    )?;
    Ok(changed > 0)
}

fn set_entry_status(
    tx: &Connection,
    withdrawal: &Withdrawal,
    status: TransactionStatus,
    now: i64,
) -> Result<bool, StoreError> {
    let changed = tx.execute(
        "UPDATE transactions SET status = ?, updated_at = ? \
         WHERE transaction_id = ? AND user_id = ? AND kind = ?",
        params![
            status.as_str(),
            now,
            withdrawal.transaction_id,
            withdrawal.user_id,
            TransactionKind::Withdraw.as_str()
        ],
    )?;
    Ok(changed > 0)
}

/// Applies an admin decision. Terminal states are final; a failed payout
/// returns the amount to the user's balance.
fn update_withdrawal_status(
    conn: &mut Connection,
    update: &WithdrawalUpdate,
) -> Result<Withdrawal, LedgerError> {
    let change = immediate(conn, |tx| {
        let withdrawal = find_withdrawal(tx, &update.id, &update.transaction_id)?
            .ok_or(LedgerError::WithdrawalNotFound)?;
        if withdrawal.status.is_terminal() {
            return Err(LedgerError::WithdrawalFinalized);
        }
        let now = now_ms();
        match update.status {
            WithdrawalStatus::Success => {
                if !set_entry_status(tx, &withdrawal, TransactionStatus::Success, now)? {
                    if set_withdrawal_status(tx, &withdrawal, WithdrawalStatus::Failed, now)? {
                        refund(tx, &withdrawal, now)?;
                    }
                    return Ok(StatusChange::LedgerEntryMissing);
                }
                if !set_withdrawal_status(tx, &withdrawal, WithdrawalStatus::Success, now)? {
                    return Err(LedgerError::WithdrawalFinalized);
                }
            }
            WithdrawalStatus::Failed => {
                if !set_withdrawal_status(tx, &withdrawal, WithdrawalStatus::Failed, now)? {
                    return Err(LedgerError::WithdrawalFinalized);
                }
                set_entry_status(tx, &withdrawal, TransactionStatus::Failed, now)?;
                refund(tx, &withdrawal, now)?;
            }
            WithdrawalStatus::Pending | WithdrawalStatus::Processing => {
                let mirrored = if update.status == WithdrawalStatus::Pending {
                    TransactionStatus::Pending
                } else {
                    TransactionStatus::Processing
                };
                set_withdrawal_status(tx, &withdrawal, update.status, now)?;
                set_entry_status(tx, &withdrawal, mirrored, now)?;
            }
        }
        let updated = find_withdrawal(tx, &update.id, &update.transaction_id)?
            .ok_or(LedgerError::WithdrawalNotFound)?;
        Ok(StatusChange::Updated(updated))
    })?;
    match change {
        StatusChange::Updated(withdrawal) => Ok(withdrawal),
        StatusChange::LedgerEntryMissing => Err(LedgerError::LedgerEntryMissing),
    }
}

fn transactions_for_user(
    conn: &Connection,
    user_id: &str,
    page: Page,
) -> Result<(Vec<Transaction>, u64), StoreError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM transactions WHERE user_id = ?",
        [user_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
    ))?;
    let transactions = stmt
        .query_map(
            params![user_id, page.limit as i64, page.offset() as i64],
            map_transaction,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((transactions, total.max(0) as u64))
}

fn list_withdrawals(
    conn: &Connection,
    filter: &WithdrawalFilter,
    page: Page,
) -> Result<(Vec<WithdrawalWithUser>, u64), StoreError> {
    let mut clauses = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    if let Some(transaction_id) = &filter.transaction_id {
        clauses.push("w.transaction_id = ?");
        values.push(Value::Text(transaction_id.clone()));
    }
    if let Some(status) = filter.status {
        clauses.push("w.status = ?");
        values.push(Value::Text(status.as_str().to_string()));
    }
    let filter_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM withdrawals w {filter_sql}"),
        params_from_iter(values.iter()),
        |row| row.get(0),
    )?;

    values.push(Value::Integer(page.limit as i64));
    values.push(Value::Integer(page.offset() as i64));
    let mut stmt = conn.prepare(&format!(
        "SELECT w.id, w.user_id, w.amount, w.status, w.withdrawal_method, w.transaction_id, \
         w.created_at, w.updated_at, u.id AS contact_id, u.name, u.email, u.upi_id, \
         u.upi_name, u.phone, u.avatar, u.bgmi_id \
         FROM withdrawals w LEFT JOIN users u ON u.id = w.user_id {filter_sql} \
         ORDER BY w.created_at DESC LIMIT ? OFFSET ?"
    ))?;
    let rows = stmt
        .query_map(params_from_iter(values.iter()), |row| {
            let withdrawal = map_withdrawal(row)?;
            let contact_id: Option<String> = row.get("contact_id")?;
            let user = match contact_id {
                Some(id) => Some(WithdrawalContact {
                    id,
                    name: row.get("name")?,
                    email: row.get("email")?,
                    upi_id: row.get("upi_id")?,
                    upi_name: row.get("upi_name")?,
                    phone: row.get("phone")?,
                    avatar: row.get("avatar")?,
                    bgmi_id: row.get("bgmi_id")?,
                }),
                None => None,
            };
            Ok(WithdrawalWithUser { withdrawal, user })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total.max(0) as u64))
}

fn withdrawals_for_user(
    conn: &Connection,
    user_id: &str,
    page: Page,
) -> Result<(Vec<Withdrawal>, u64), StoreError> {
    let total: i64 = conn.query_row(
        "SELECT COUNT(*) FROM withdrawals WHERE user_id = ?",
        [user_id],
        |row| row.get(0),
    )?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {WITHDRAWAL_COLUMNS} FROM withdrawals WHERE user_id = ? \
         ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
    ))?;
    let withdrawals = stmt
        .query_map(
            params![user_id, page.limit as i64, page.offset() as i64],
            map_withdrawal,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((withdrawals, total.max(0) as u64))
}

impl Store {
    pub async fn record_deposit_order(
        &self,
        user_id: &str,
        order_id: &str,
        customer_reference: &str,
        amount: Amount,
    ) -> Result<Order, StoreError> {
        let user_id = user_id.to_string();
        let order_id = order_id.to_string();
        let customer_reference = customer_reference.to_string();
        self.call(move |conn| {
            record_deposit_order(conn, &user_id, &order_id, &customer_reference, amount)
        })
        .await
    }

    pub async fn settle_deposit(
        &self,
        order_id: &str,
        outcome: DepositOutcome,
    ) -> Result<Settlement, LedgerError> {
        let order_id = order_id.to_string();
        self.call(move |conn| settle_deposit(conn, &order_id, outcome))
            .await
    }

    pub async fn find_order(&self, order_id: &str) -> Result<Option<Order>, StoreError> {
        let order_id = order_id.to_string();
        self.call(move |conn| find_order(conn, &order_id)).await
    }

    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        amount: Amount,
        method: WithdrawalMethod,
    ) -> Result<Withdrawal, LedgerError> {
        let user_id = user_id.to_string();
        self.call(move |conn| request_withdrawal(conn, &user_id, amount, method))
            .await
    }

    pub async fn update_withdrawal_status(
        &self,
        update: WithdrawalUpdate,
    ) -> Result<Withdrawal, LedgerError> {
        self.call(move |conn| update_withdrawal_status(conn, &update))
            .await
    }

    pub async fn transactions_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<(Vec<Transaction>, u64), StoreError> {
        let user_id = user_id.to_string();
        self.call(move |conn| transactions_for_user(conn, &user_id, page))
            .await
    }

    pub async fn list_withdrawals(
        &self,
        filter: WithdrawalFilter,
        page: Page,
    ) -> Result<(Vec<WithdrawalWithUser>, u64), StoreError> {
        self.call(move |conn| list_withdrawals(conn, &filter, page))
            .await
    }

    pub async fn withdrawals_for_user(
        &self,
        user_id: &str,
        page: Page,
    ) -> Result<(Vec<Withdrawal>, u64), StoreError> {
        let user_id = user_id.to_string();
        self.call(move |conn| withdrawals_for_user(conn, &user_id, page))
            .await
    }
}
