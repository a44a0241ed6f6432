use std::collections::BTreeSet;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum_extra::extract::CookieJar;
use fila_core::{PartyId, Timestamp};
use fila_db::{EventKind, EventRecord, PushSubscriptionRecord};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{AppJson, OkResponse, lookup_session, require_host};
use crate::SharedAppState;
use crate::error::{ApiResult, ValidationSnafu};
use crate::push::{PushJob, PushKind};

const LOG_TARGET: &str = "fila::push";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscribeRequest {
    pub party_id: PartyId,
    pub subscription: WebPushSubscription,
}

#[derive(Deserialize)]
pub struct WebPushSubscription {
    pub endpoint: String,
    pub keys: WebPushKeys,
}

#[derive(Deserialize)]
pub struct WebPushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Serialize)]
pub struct TestPushResponse {
    pub sent: usize,
}

/// Guest push opt-in; replaces any prior subscription on the same endpoint.
pub async fn subscribe(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    AppJson(request): AppJson<PushSubscribeRequest>,
) -> ApiResult<AppJson<OkResponse>> {
    if !state.config.push_enabled() {
        return ValidationSnafu {
            msg: "Push notifications are not configured",
        }
        .fail();
    }
    if request.subscription.endpoint.is_empty() {
        return ValidationSnafu {
            msg: "subscription endpoint must not be empty",
        }
        .fail();
    }

    let coordinator = lookup_session(&state, &code).await?;
    // Validates the party is live and queues the opt-in confirmation.
    coordinator.push_opt_in(request.party_id).await?;

    state
        .db
        .upsert_push_subscription(
            request.subscription.endpoint.clone(),
            PushSubscriptionRecord {
                session: coordinator.session_id(),
                party: request.party_id,
                p256dh: request.subscription.keys.p256dh,
                auth: request.subscription.keys.auth,
                created_at: Timestamp::now(),
            },
        )
        .await?;
    state
        .db
        .append_event(
            coordinator.session_id(),
            EventRecord::new(EventKind::PushSubscribed, request.party_id),
        )
        .await?;

    Ok(OkResponse::ok())
}

/// Host-triggered test notification to every subscribed party.
pub async fn test_push(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    jar: CookieJar,
    headers: HeaderMap,
) -> ApiResult<AppJson<TestPushResponse>> {
    if !state.config.push_enabled() {
        return ValidationSnafu {
            msg: "Push notifications are not configured",
        }
        .fail();
    }

    let coordinator = lookup_session(&state, &code).await?;
    require_host(&state, &coordinator, &jar, &headers, None)?;

    let subscriptions = state
        .db
        .session_push_subscriptions(coordinator.session_id())
        .await?;
    let parties: BTreeSet<PartyId> = subscriptions.iter().map(|(_, sub)| sub.party).collect();

    let mut sent = 0;
    for party in parties {
        let job = PushJob {
            session: coordinator.session_id(),
            party,
            kind: PushKind::Test,
        };
        match state.push_tx.send(job) {
            Ok(()) => sent += 1,
            Err(err) => {
                warn!(target: LOG_TARGET, %err, "Failed to queue test push");
            }
        }
    }

    Ok(AppJson(TestPushResponse { sent }))
}
