use axum::extract::{Path, State};
use fila_core::{PartyId, SessionId, consts};
use serde::{Deserialize, Serialize};

use super::{AppJson, OkResponse, lookup_session};
use crate::SharedAppState;
use crate::error::{ApiResult, ValidationSnafu};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub name: Option<String>,
    pub size: Option<u32>,
    pub turnstile_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub party_id: PartyId,
    pub position: u32,
    pub session_id: SessionId,
    pub queue_length: u32,
    pub estimated_wait_ms: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyRequest {
    pub party_id: PartyId,
}

pub async fn join(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    AppJson(request): AppJson<JoinRequest>,
) -> ApiResult<AppJson<JoinResponse>> {
    state
        .captcha
        .verify(request.turnstile_token.as_deref())
        .await?;

    let name = request
        .name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    if name
        .as_ref()
        .is_some_and(|s| consts::EVENT_NAME_MAX_LEN < s.chars().count())
    {
        return ValidationSnafu {
            msg: format!("name must be at most {} characters", consts::EVENT_NAME_MAX_LEN),
        }
        .fail();
    }
    // Missing size counts as a single guest.
    let size = request.size.unwrap_or(1);
    if size == 0 {
        return ValidationSnafu {
            msg: "size must be a positive integer",
        }
        .fail();
    }

    let coordinator = lookup_session(&state, &code).await?;
    let outcome = coordinator.join(name, size).await?;

    Ok(AppJson(JoinResponse {
        party_id: outcome.party_id,
        position: outcome.position,
        session_id: coordinator.session_id(),
        queue_length: outcome.queue_length,
        estimated_wait_ms: outcome.estimated_wait_ms,
    }))
}

pub async fn declare_nearby(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    AppJson(request): AppJson<PartyRequest>,
) -> ApiResult<AppJson<OkResponse>> {
    let coordinator = lookup_session(&state, &code).await?;
    coordinator.declare_nearby(request.party_id).await?;
    Ok(OkResponse::ok())
}

pub async fn leave(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    AppJson(request): AppJson<PartyRequest>,
) -> ApiResult<AppJson<OkResponse>> {
    let coordinator = lookup_session(&state, &code).await?;
    coordinator.leave(request.party_id).await?;
    Ok(OkResponse::ok())
}
