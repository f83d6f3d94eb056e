use axum::{
    extract::State as AxumState,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Write;
use std::sync::Arc;

use super::ok;
use crate::{App, HttpMetricsSnapshot, LatencySnapshot, WalletMetricsSnapshot};

pub(super) async fn health() -> Response {
    ok(serde_json::json!({}), "everything is fine")
}

#[derive(Serialize)]
struct MetricsResponse {
    http: HttpMetricsSnapshot,
    wallet: WalletMetricsSnapshot,
}

pub(super) async fn http_metrics(
    headers: HeaderMap,
    AxumState(app): AxumState<Arc<App>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    Json(MetricsResponse {
        http: app.http_metrics_snapshot(),
        wallet: app.wallet_metrics_snapshot(),
    })
    .into_response()
}

pub(super) async fn prometheus_metrics(
    headers: HeaderMap,
    AxumState(app): AxumState<Arc<App>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers) {
        return status.into_response();
    }
    let body = render_prometheus_metrics(&app);
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4"),
        )],
        body,
    )
        .into_response()
}

fn metrics_auth_error(headers: &HeaderMap) -> Option<StatusCode> {
    let token = std::env::var("METRICS_AUTH_TOKEN").unwrap_or_default();
    if token.is_empty() {
        return None;
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    let header_token = headers
        .get("x-metrics-token")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if bearer.as_deref() == Some(token.as_str()) || header_token.as_deref() == Some(token.as_str()) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

fn render_prometheus_metrics(app: &App) -> String {
    let http = app.http_metrics_snapshot();
    let wallet = app.wallet_metrics_snapshot();

    let mut out = String::new();

    append_histogram(&mut out, "apnasquad_http_request_latency_ms", &http.requests);
    append_histogram(&mut out, "apnasquad_http_webhook_latency_ms", &http.webhook);
    append_counter(
        &mut out,
        "apnasquad_http_reject_origin_total",
        http.reject_origin,
    );
    append_counter(
        &mut out,
        "apnasquad_http_reject_rate_limit_total",
        http.reject_rate_limit,
    );
    append_counter(
        &mut out,
        "apnasquad_http_reject_body_limit_total",
        http.reject_body_limit,
    );
    append_counter(
        &mut out,
        "apnasquad_http_server_errors_total",
        http.server_errors,
    );

    append_counter(
        &mut out,
        "apnasquad_wallet_tournament_joins_total",
        wallet.tournament_joins,
    );
    append_counter(&mut out, "apnasquad_wallet_team_joins_total", wallet.team_joins);
    append_counter(
        &mut out,
        "apnasquad_wallet_deposit_orders_total",
        wallet.deposit_orders,
    );
    append_counter(
        &mut out,
        "apnasquad_wallet_deposits_paid_total",
        wallet.deposits_paid,
    );
    append_counter(
        &mut out,
        "apnasquad_wallet_deposits_failed_total",
        wallet.deposits_failed,
    );
    append_counter(
        &mut out,
        "apnasquad_wallet_webhook_replays_total",
        wallet.webhook_replays,
    );
    append_counter(
        &mut out,
        "apnasquad_wallet_webhook_rejected_total",
        wallet.webhook_rejected,
    );
    append_counter(
        &mut out,
        "apnasquad_wallet_withdrawals_requested_total",
        wallet.withdrawals_requested,
    );
    append_counter(
        &mut out,
        "apnasquad_wallet_withdrawals_settled_total",
        wallet.withdrawals_settled,
    );
    append_gauge(
        &mut out,
        "apnasquad_http_request_max_latency_ms",
        http.requests.max_ms,
    );

    out
}

fn append_counter(out: &mut String, name: &str, value: u64) {
    let _ = writeln!(out, "# TYPE {name} counter");
    let _ = writeln!(out, "{name} {value}");
}

fn append_gauge(out: &mut String, name: &str, value: impl std::fmt::Display) {
    let _ = writeln!(out, "# TYPE {name} gauge");
    let _ = writeln!(out, "{name} {value}");
}

fn append_histogram(out: &mut String, name: &str, snapshot: &LatencySnapshot) {
    let _ = writeln!(out, "# TYPE {name} histogram");
    let mut cumulative = 0u64;
    for (bucket, count) in snapshot.buckets_ms.iter().zip(snapshot.counts.iter()) {
        cumulative = cumulative.saturating_add(*count);
        let _ = writeln!(out, "{name}_bucket{{le=\"{bucket}\"}} {cumulative}");
    }
    cumulative = cumulative.saturating_add(snapshot.overflow);
    let _ = writeln!(out, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");
    let _ = writeln!(out, "{name}_count {}", snapshot.count);
    let sum = snapshot.avg_ms * snapshot.count as f64;
    let _ = writeln!(out, "{name}_sum {sum}");
}
