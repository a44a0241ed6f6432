use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fila_db::DbError;
use fila_util_error::FmtCompact as _;
use serde::Serialize;
use snafu::Snafu;
use tracing::{info, warn};

use crate::routes::AppJson;

const LOG_TARGET: &str = "fila::api";

/// Error taxonomy surfaced to API callers.
///
/// Everything that does not fit here is recovered locally (snapshot write
/// failures, subscriber drops, push failures) and never reaches a caller.
#[derive(Debug, Snafu)]
pub enum ApiError {
    #[snafu(display("{msg}"))]
    #[snafu(visibility(pub(crate)))]
    Validation { msg: String },

    #[snafu(display("Host credential required"))]
    #[snafu(visibility(pub(crate)))]
    AuthRequired,

    #[snafu(display("Host credential invalid"))]
    #[snafu(visibility(pub(crate)))]
    AuthInvalid,

    #[snafu(display("Not found"))]
    #[snafu(visibility(pub(crate)))]
    NotFound,

    #[snafu(display("Session is closed"))]
    #[snafu(visibility(pub(crate)))]
    SessionClosed,

    #[snafu(display("Queue is at capacity"))]
    #[snafu(visibility(pub(crate)))]
    QueueFull,

    #[snafu(display("Could not allocate a short code"))]
    #[snafu(visibility(pub(crate)))]
    CodesExhausted,

    #[snafu(transparent)]
    Db { source: DbError },

    #[snafu(display("Internal error"))]
    #[snafu(visibility(pub(crate)))]
    Internal { msg: &'static str },
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

// How we want user errors responses to be serialized
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::AuthRequired => StatusCode::UNAUTHORIZED,
            ApiError::AuthInvalid => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::SessionClosed | ApiError::QueueFull => StatusCode::CONFLICT,
            ApiError::CodesExhausted | ApiError::Db { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();

        let message = if status_code.is_server_error() {
            warn!(target: LOG_TARGET, err = %self.fmt_compact(), "Request failed");
            "Internal error".to_owned()
        } else {
            info!(target: LOG_TARGET, err = %self, "Request rejected");
            self.to_string()
        };

        (status_code, AppJson(ErrorResponse { error: message })).into_response()
    }
}
