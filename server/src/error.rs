use apnasquad_types::{api::ErrorEnvelope, wallet::WalletError, TournamentInvariantError};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::cache::CacheError;
use crate::store::{JoinError, JoinTeamError, LedgerError, StoreError};

pub type Result<T> = std::result::Result<T, ApiError>;

/// Error returned by every handler, rendered as the JSON error envelope.
///
/// `detail` holds the internal cause for logs and never reaches clients in
/// release builds.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            detail: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn internal(message: impl Into<String>, detail: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            detail: Some(detail.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = self.status.as_u16(),
                message = %self.message,
                detail = self.detail.as_deref().unwrap_or_default(),
                "request failed"
            );
        }
        let stack = if cfg!(debug_assertions) {
            self.detail.into_iter().collect()
        } else {
            Vec::new()
        };
        let body = ErrorEnvelope {
            status: self.status.as_u16(),
            message: self.message,
            success: false,
            errors: serde_json::json!({}),
            stack,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::internal("Something went wrong. Please try again.", err)
    }
}

impl From<CacheError> for ApiError {
    fn from(err: CacheError) -> Self {
        ApiError::internal("Something went wrong. Please try again.", err)
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<TournamentInvariantError> for ApiError {
    fn from(err: TournamentInvariantError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<JoinError> for ApiError {
    fn from(err: JoinError) -> Self {
        match err {
            JoinError::Store(err) => err.into(),
            JoinError::TournamentNotFound
            | JoinError::UserNotFound
            | JoinError::MissingDetails(_) => ApiError::not_found(err.to_string()),
            JoinError::Closed
            | JoinError::Full
            | JoinError::AlreadyRegistered
            | JoinError::Wallet(_) => ApiError::bad_request(err.to_string()),
        }
    }
}

impl From<JoinTeamError> for ApiError {
    fn from(err: JoinTeamError) -> Self {
        match err {
            JoinTeamError::Store(err) => err.into(),
            JoinTeamError::UserNotFound | JoinTeamError::MissingDetails(_) => {
                ApiError::not_found(err.to_string())
            }
            JoinTeamError::InvalidCredentials
            | JoinTeamError::AlreadyInTeam
            | JoinTeamError::AlreadyInTournament
            | JoinTeamError::TeamFull { .. } => ApiError::bad_request(err.to_string()),
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Store(err) => err.into(),
            LedgerError::UserNotFound
            | LedgerError::OrderNotFound
            | LedgerError::WithdrawalNotFound => ApiError::not_found(err.to_string()),
            LedgerError::WithdrawalFinalized
            | LedgerError::LedgerEntryMissing
            | LedgerError::Wallet(_) => ApiError::bad_request(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::PAYLOAD_TOO_LARGE => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::new(err.status(), err.body_text())
    }
}
