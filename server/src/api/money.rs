use apnasquad_types::{
    api::{PageQuery, DEFAULT_PAGE_LIMIT},
    wallet::validate_withdrawal_request,
    Amount, Withdrawal, WithdrawalMethod,
};
use axum::{extract::State as AxumState, response::Response};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{ok, parse_wire, ApiJson, ApiQuery, Pagination};
use crate::auth::AuthUser;
use crate::error::{ApiError, Result};
use crate::App;

const MISSING_WITHDRAWAL_FIELDS: &str =
    "Please provide all required fields: amount, and withdrawalMethod.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct WithdrawRequest {
    amount: Option<Amount>,
    withdrawal_method: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalCreated {
    new_withdrawal: Withdrawal,
}

pub(super) async fn withdraw(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<WithdrawRequest>,
) -> Result<Response> {
    let amount = body
        .amount
        .ok_or_else(|| ApiError::bad_request(MISSING_WITHDRAWAL_FIELDS))?;
    let method: WithdrawalMethod = parse_wire(body.withdrawal_method, "Invalid withdrawal method.")?
        .ok_or_else(|| ApiError::bad_request(MISSING_WITHDRAWAL_FIELDS))?;
    validate_withdrawal_request(amount, app.config.max_withdrawal)?;

    let withdrawal = app.store.request_withdrawal(&user.id, amount, method).await?;
    app.wallet_metrics().inc_withdrawal_requested();
    tracing::info!(
        user_id = %user.id,
        withdrawal_id = %withdrawal.id,
        transaction_id = %withdrawal.transaction_id,
        amount = %amount,
        "withdrawal requested"
    );
    Ok(ok(
        WithdrawalCreated {
            new_withdrawal: withdrawal,
        },
        "Withdrawal  success.",
    ))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalHistory {
    user_withdrawals: Vec<Withdrawal>,
    pagination: Pagination,
}

pub(super) async fn my_withdrawals(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Response> {
    let page = query.resolve(DEFAULT_PAGE_LIMIT);
    let (withdrawals, total) = app.store.withdrawals_for_user(&user.id, page).await?;
    Ok(ok(
        WithdrawalHistory {
            user_withdrawals: withdrawals,
            pagination: Pagination::new(page, total),
        },
        "User's withdrawal history fetched successfully.",
    ))
}
