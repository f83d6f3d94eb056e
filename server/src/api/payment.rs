use apnasquad_types::{wallet::validate_deposit, Amount, OrderStatus};
use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;

use super::{ok, present, ApiJson, ApiQuery};
use crate::auth::AuthUser;
use crate::error::{ApiError, Result};
use crate::gateway::{
    CreateOrderRequest, CustomerDetails, GatewayError, OrderMeta, WebhookEvent, PAYMENT_FAILED,
    PAYMENT_SUCCESS, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::ids;
use crate::store::{DepositOutcome, LedgerError, Settlement};
use crate::App;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DepositRequest {
    amount: Option<Amount>,
    /// Used when the profile has no phone number yet.
    phone: Option<String>,
}

fn gateway_failure(err: GatewayError) -> ApiError {
    let status = match err {
        GatewayError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_GATEWAY,
    };
    let mut api_error = ApiError::internal("Failed to create order", err);
    api_error.status = status;
    api_error
}

pub(super) async fn create_order(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiJson(body): ApiJson<DepositRequest>,
) -> Result<Response> {
    let amount = body
        .amount
        .ok_or_else(|| ApiError::bad_request("Amount is required"))?;
    validate_deposit(amount)?;
    let phone = present(Some(user.phone.clone()))
        .or_else(|| present(body.phone))
        .ok_or_else(|| ApiError::bad_request("Phone number missing please update your profile"))?;

    let order_id = ids::order_id();
    let customer_reference = ids::customer_reference();
    let request = CreateOrderRequest {
        order_currency: "INR",
        order_amount: amount,
        order_id: order_id.clone(),
        customer_details: CustomerDetails {
            customer_id: user.id.clone(),
            customer_phone: phone,
            customer_email: user.email.clone(),
            customer_transaction_id: customer_reference.clone(),
        },
        order_meta: OrderMeta {
            return_url: app.gateway.return_url(&order_id),
        },
    };
    let checkout = app
        .gateway
        .create_order(&request)
        .await
        .map_err(gateway_failure)?;

    app.store
        .record_deposit_order(&user.id, &order_id, &customer_reference, amount)
        .await?;
    app.wallet_metrics().inc_deposit_order();
    tracing::info!(
        user_id = %user.id,
        order_id = %order_id,
        amount = %amount,
        "deposit order created"
    );
    Ok(ok(checkout, "Order created successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct OrderStatusQuery {
    order_id: Option<String>,
}

pub(super) async fn order_status(
    AxumState(app): AxumState<Arc<App>>,
    AuthUser(user): AuthUser,
    ApiQuery(query): ApiQuery<OrderStatusQuery>,
) -> Result<Response> {
    let order_id = present(query.order_id).ok_or_else(|| ApiError::bad_request("order_id missing"))?;
    let order = app
        .store
        .find_order(&order_id)
        .await?
        .filter(|order| order.user_id == user.id || user.is_admin())
        .ok_or_else(|| ApiError::bad_request("order details not found"))?;
    Ok(ok(order, "Order fetched successfull"))
}

fn plain(status: StatusCode, body: &'static str) -> Response {
    (status, body).into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty())
}

/// Gateway callback settling a deposit order. Replies are plain text.
pub(super) async fn webhook(
    AxumState(app): AxumState<Arc<App>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let (Some(signature), Some(timestamp)) = (
        header(&headers, SIGNATURE_HEADER),
        header(&headers, TIMESTAMP_HEADER),
    ) else {
        app.wallet_metrics().inc_webhook_rejected();
        return plain(
            StatusCode::BAD_REQUEST,
            "Signature or timestamp header missing",
        );
    };
    if !app.gateway.verify_webhook(timestamp, &body, signature) {
        app.wallet_metrics().inc_webhook_rejected();
        tracing::warn!("webhook signature mismatch");
        return plain(StatusCode::BAD_REQUEST, "Invalid signature");
    }
    let event: WebhookEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(_) => {
            app.wallet_metrics().inc_webhook_rejected();
            return plain(StatusCode::BAD_REQUEST, "Invalid JSON payload");
        }
    };

    let outcome = match event.payment_status() {
        Some(PAYMENT_SUCCESS) => DepositOutcome::Paid,
        Some(PAYMENT_FAILED) => DepositOutcome::Failed {
            reason: event.failure_reason(),
        },
        // Pending and user-dropped notifications leave the order untouched.
        _ => return plain(StatusCode::OK, "OK"),
    };
    let Some(order_id) = event.order_id() else {
        return plain(StatusCode::NOT_FOUND, "Order not found");
    };

    match app.store.settle_deposit(order_id, outcome).await {
        Ok(Settlement::Applied(order)) => {
            if let Some(reported) = event.amount_mismatch(order.amount) {
                tracing::warn!(
                    order_id = %order.order_id,
                    recorded = %order.amount,
                    reported = %reported,
                    "webhook amount differs from order, credited recorded amount"
                );
            }
            if order.status == OrderStatus::Paid {
                app.wallet_metrics().inc_deposit_paid();
            } else {
                app.wallet_metrics().inc_deposit_failed();
            }
            tracing::info!(
                order_id = %order.order_id,
                user_id = %order.user_id,
                status = %order.status,
                amount = %order.amount,
                "deposit settled"
            );
            plain(StatusCode::OK, "OK")
        }
        Ok(Settlement::AlreadyProcessed(order)) => {
            app.wallet_metrics().inc_webhook_replay();
            tracing::debug!(order_id = %order.order_id, "webhook replay ignored");
            plain(StatusCode::OK, "Already processed")
        }
        Err(LedgerError::OrderNotFound) => plain(StatusCode::NOT_FOUND, "Order not found"),
        Err(err) => {
            tracing::error!(error = %err, order_id, "failed to settle deposit");
            plain(StatusCode::INTERNAL_SERVER_ERROR, "Error processing webhook")
        }
    }
}
