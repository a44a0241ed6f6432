mod connect;
mod create;
mod host;
mod party;
mod push_api;
mod snapshot;

use std::sync::Arc;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum_extra::extract::CookieJar;
use fila_core::ShortCode;
use serde::Serialize;

use crate::coordinator::Coordinator;
use crate::error::{ApiError, ApiResult, AuthInvalidSnafu, AuthRequiredSnafu, NotFoundSnafu};
use crate::{AppState, SharedAppState, auth};

#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct AppJson<T>(pub T);

impl<T> IntoResponse for AppJson<T>
where
    axum::Json<T>: IntoResponse,
{
    fn into_response(self) -> Response {
        axum::Json(self.0).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation {
            msg: rejection.body_text(),
        }
    }
}

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> AppJson<Self> {
        AppJson(Self { ok: true })
    }
}

pub fn route_handler(state: SharedAppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/queue/create", post(create::create_session))
        .route("/api/queue/{code}/join", post(party::join))
        .route("/api/queue/{code}/declare-nearby", post(party::declare_nearby))
        .route("/api/queue/{code}/leave", post(party::leave))
        .route("/api/queue/{code}/advance", post(host::advance))
        .route("/api/queue/{code}/kick", post(host::kick))
        .route("/api/queue/{code}/close", post(host::close))
        .route("/api/queue/{code}/snapshot", get(snapshot::get_snapshot))
        .route("/api/queue/{code}/connect", get(connect::connect))
        .route("/api/queue/{code}/push/subscribe", post(push_api::subscribe))
        .route("/api/queue/{code}/push/test", post(push_api::test_push))
        .fallback(not_found)
        .with_state(state)
}

async fn healthz() -> AppJson<serde_json::Value> {
    AppJson(serde_json::json!({"status": "ok"}))
}

async fn not_found(_state: State<SharedAppState>, _req: Request) -> ApiError {
    ApiError::NotFound
}

/// Resolve a path code segment to a live coordinator.
pub(crate) async fn lookup_session(
    state: &AppState,
    code: &str,
) -> ApiResult<Arc<Coordinator>> {
    let code: ShortCode = code.parse().map_err(|_| NotFoundSnafu.build())?;
    state.router.lookup(code).await
}

/// Pull the host credential from the auth cookie, the `x-host-auth`
/// header, or (for subscriber connections) an explicit query token.
pub(crate) fn host_token(
    jar: &CookieJar,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<String> {
    if let Some(cookie) = jar.get(auth::HOST_AUTH_COOKIE) {
        return Some(cookie.value().to_string());
    }
    if let Some(header) = headers.get(auth::HOST_AUTH_HEADER) {
        return header.to_str().ok().map(str::to_string);
    }
    query_token.map(str::to_string)
}

pub(crate) fn require_host(
    state: &AppState,
    coordinator: &Coordinator,
    jar: &CookieJar,
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> ApiResult<()> {
    let token = host_token(jar, headers, query_token).ok_or_else(|| AuthRequiredSnafu.build())?;
    if !state.auth.verify(&token, coordinator.session_id()) {
        return AuthInvalidSnafu.fail();
    }
    Ok(())
}
