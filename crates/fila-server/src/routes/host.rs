use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use fila_core::PartyId;
use fila_db::PartySnapshot;
use serde::{Deserialize, Serialize};

use super::party::PartyRequest;
use super::{AppJson, OkResponse, lookup_session, require_host};
use crate::SharedAppState;
use crate::error::ApiResult;

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub served_party: Option<PartyId>,
    pub next_party: Option<PartyId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResponse {
    pub now_serving: Option<PartySnapshot>,
}

pub async fn advance(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
    AppJson(request): AppJson<AdvanceRequest>,
) -> ApiResult<AppJson<AdvanceResponse>> {
    let coordinator = lookup_session(&state, &code).await?;
    require_host(&state, &coordinator, &jar, &headers, None)?;

    let now_serving = coordinator
        .advance(request.served_party, request.next_party)
        .await?;
    Ok(AppJson(AdvanceResponse { now_serving }))
}

pub async fn kick(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
    AppJson(request): AppJson<PartyRequest>,
) -> ApiResult<AppJson<OkResponse>> {
    let coordinator = lookup_session(&state, &code).await?;
    require_host(&state, &coordinator, &jar, &headers, None)?;

    coordinator.kick(request.party_id).await?;
    Ok(OkResponse::ok())
}

pub async fn close(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> ApiResult<AppJson<OkResponse>> {
    let coordinator = lookup_session(&state, &code).await?;
    require_host(&state, &coordinator, &jar, &headers, None)?;

    coordinator.close("host").await?;
    Ok(OkResponse::ok())
}
