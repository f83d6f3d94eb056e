use apnasquad_types::api::{Envelope, Page};
use axum::{
    extract::{DefaultBodyLimit, FromRequest, FromRequestParts, Request, State as AxumState},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use governor::middleware::NoOpMiddleware;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::ApiError;
use crate::App;

mod admin;
mod auth;
mod http;
mod money;
mod payment;
mod tournament;
mod user;

#[cfg(test)]
mod tests;

const WEBHOOK_PATH: &str = "/webhook/cashfree";

pub struct Api {
    app: Arc<App>,
}

#[derive(Clone)]
struct OriginConfig {
    allowed_origins: Arc<HashSet<String>>,
    allow_any_origin: bool,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn default_governor_config() -> Option<IpGovernorConfig> {
    GovernorConfigBuilder::default()
        .key_extractor(SmartIpKeyExtractor)
        .finish()
}

/// JSON body whose rejections render as the error envelope.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub(crate) struct ApiJson<T>(pub T);

/// Query string whose rejections render as the error envelope.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub(crate) struct ApiQuery<T>(pub T);

/// Wraps `data` in the success envelope.
pub(crate) fn reply<T: Serialize>(status: StatusCode, data: T, message: &str) -> Response {
    (status, Json(Envelope::new(status.as_u16(), data, message))).into_response()
}

pub(crate) fn ok<T: Serialize>(data: T, message: &str) -> Response {
    reply(StatusCode::OK, data, message)
}

/// Paging block of list responses.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Pagination {
    pub current_page: u32,
    pub limit: u32,
    pub total_pages: u64,
    pub total_results: u64,
}

impl Pagination {
    pub(crate) fn new(page: Page, total: u64) -> Self {
        Self {
            current_page: page.page,
            limit: page.limit,
            total_pages: page.total_pages(total),
            total_results: total,
        }
    }
}

/// Trims a request field, treating blank strings as absent.
pub(crate) fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses an optional wire value, rejecting unknown spellings.
pub(crate) fn parse_wire<T: std::str::FromStr>(
    value: Option<String>,
    message: &str,
) -> Result<Option<T>, ApiError> {
    match present(value) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| ApiError::bad_request(message)),
        None => Ok(None),
    }
}

impl Api {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    pub fn router(&self) -> Router {
        let config = &self.app.config;
        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let allow_any_origin = allowed_origins.contains("*");
        if allowed_origins.is_empty() {
            tracing::warn!("ALLOWED_HTTP_ORIGINS is empty; all browser origins will be rejected");
        }
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Invalid origin in ALLOWED_HTTP_ORIGINS: {}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();
        let origin_config = OriginConfig {
            allowed_origins: Arc::new(allowed_origins),
            allow_any_origin,
        };

        // Cookies cross origins, so the allowed origin is always echoed back
        // rather than answered with a wildcard.
        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::mirror_request())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-request-id"),
        ])
        .expose_headers([header::HeaderName::from_static("x-request-id")]);

        // Environment variables override config
        let http_rate_per_hour =
            parse_env_u64("RATE_LIMIT_HTTP_PER_HOUR").or(config.http_rate_limit_per_hour);
        let http_rate_burst =
            parse_env_u32("RATE_LIMIT_HTTP_BURST").or(config.http_rate_limit_burst);

        let governor_conf = match (http_rate_per_hour, http_rate_burst) {
            (Some(rate_per_hour), Some(burst_size)) if rate_per_hour > 0 && burst_size > 0 => {
                let nanos_per_request = (3_600_000_000_000u64 / rate_per_hour).max(1);
                let period = Duration::from_nanos(nanos_per_request);
                tracing::info!(
                    rate_per_hour,
                    burst_size,
                    period_ms = period.as_millis() as u64,
                    "http rate limit configured"
                );
                let config = GovernorConfigBuilder::default()
                    .period(period)
                    .burst_size(burst_size)
                    .key_extractor(SmartIpKeyExtractor)
                    .finish()
                    .or_else(|| {
                        tracing::warn!("invalid rate-limit config; falling back to defaults");
                        default_governor_config()
                    });
                config.map(Arc::new)
            }
            _ => None,
        };

        let upload_route = {
            let route = patch(user::update_profile);
            match config.upload_body_limit_bytes {
                Some(limit) if limit > 0 => route.layer(DefaultBodyLimit::max(limit)),
                _ => route.layer(DefaultBodyLimit::disable()),
            }
        };

        let auth_routes = Router::new()
            .route("/sign-up", post(auth::sign_up))
            .route("/verify-otp", post(auth::verify_signup))
            .route("/login", post(auth::login))
            .route("/me", get(auth::me))
            .route("/logout", post(auth::logout))
            .route("/refresh-token", post(auth::refresh_token))
            .route("/request-otp", post(auth::request_reset))
            .route("/verify-otp-for-reset-password", post(auth::verify_reset))
            .route("/reset-password", post(auth::reset_password));

        let user_routes = Router::new()
            .route("/update", upload_route)
            .route("/get-transaction", get(user::transactions))
            .route("/create-order", post(payment::create_order));

        let tournament_routes = Router::new()
            .route("/create", post(tournament::create))
            .route("/get", get(tournament::upcoming))
            .route("/get-my-tournaments", get(tournament::mine))
            .route("/get-details", get(tournament::details))
            .route("/join", post(tournament::join))
            .route("/join-team", post(tournament::join_team));

        let payment_routes = Router::new()
            .route("/create-order", post(payment::create_order))
            .route("/order-status", get(payment::order_status));

        let money_routes = Router::new()
            .route("/withdraw", post(money::withdraw))
            .route("/withdrawals", get(money::my_withdrawals));

        let admin_routes = Router::new()
            .route("/dashboard", get(admin::dashboard))
            .route("/update/:id", patch(admin::update_tournament))
            .route("/delete/:id", delete(admin::delete_tournament))
            .route("/users", get(admin::users))
            .route("/delete-user/:id", delete(admin::delete_user))
            .route("/update-user/:id", patch(admin::update_user))
            .route("/get-withdrawals", get(admin::withdrawals))
            .route("/update-withdraw", post(admin::update_withdrawal));

        let router = Router::new()
            .route("/api/v1/health", get(http::health))
            .nest("/api/v1/auth", auth_routes)
            .nest("/api/v1/user", user_routes)
            .nest("/api/v1/tournament", tournament_routes)
            .nest("/api/v1/payment", payment_routes)
            .nest("/api/v1/money", money_routes)
            .nest("/api/v1/admin", admin_routes);

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };

        // Gateway callbacks bypass the per-IP limiter.
        let webhook_routes = Router::new()
            .route(
                &format!("/api/v1/payment{WEBHOOK_PATH}"),
                post(payment::webhook),
            )
            .route(&format!("/api/v1/user{WEBHOOK_PATH}"), post(payment::webhook))
            .route("/metrics/http", get(http::http_metrics))
            .route("/metrics/prometheus", get(http::prometheus_metrics));

        let router = router.merge(webhook_routes);

        let router = router.layer(cors);
        let origin_app = self.app.clone();
        let router = router.layer(middleware::from_fn(move |req, next| {
            let origin_config = origin_config.clone();
            let app = origin_app.clone();
            async move { enforce_origin(origin_config, app, req, next).await }
        }));
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn_with_state(
            self.app.clone(),
            request_id_middleware,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.app.clone())
    }
}

fn parse_allowed_origins(var: &str) -> HashSet<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

fn parse_env_u32(var: &str) -> Option<u32> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

/// Rejects browsers from unlisted origins. Requests without an `Origin`
/// header (mobile clients, gateway callbacks) pass through.
async fn enforce_origin(
    config: OriginConfig,
    app: Arc<App>,
    req: Request,
    next: Next,
) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok());
    if let Some(origin) = origin {
        if !config.allow_any_origin && !config.allowed_origins.contains(origin) {
            app.http_metrics().inc_reject_origin();
            return ApiError::forbidden("Origin not allowed").into_response();
        }
    }
    next.run(req).await
}

async fn request_id_middleware(
    AxumState(app): AxumState<Arc<App>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(header::HeaderName::from_static("x-request-id"))
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    app.http_metrics().record_request(elapsed);
    if path.ends_with(WEBHOOK_PATH) {
        app.http_metrics().record_webhook(elapsed);
    }
    match response.status() {
        StatusCode::PAYLOAD_TOO_LARGE => app.http_metrics().inc_reject_body_limit(),
        StatusCode::TOO_MANY_REQUESTS => app.http_metrics().inc_reject_rate_limit(),
        status if status.is_server_error() => app.http_metrics().inc_server_error(),
        _ => {}
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(
            header::HeaderName::from_static("x-request-id"),
            header_value,
        );
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = elapsed.as_millis() as u64,
        "http.request"
    );
    response
}
