use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum_extra::extract::CookieJar;
use fila_core::{PartyId, consts};
use serde::Deserialize;
use tracing::trace;

use super::{lookup_session, require_host};
use crate::SharedAppState;
use crate::coordinator::{Coordinator, SubscribeRole, Subscription};
use crate::error::ApiResult;
use crate::messages::SubscriberMessage;

const LOG_TARGET: &str = "fila::connect";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    pub party_id: Option<PartyId>,
    pub token: Option<String>,
}

/// Subscriber channel upgrade. Guests identify by `partyId`; anything else
/// requires the host credential (cookie, header, or query token).
pub async fn connect(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    Query(query): Query<ConnectQuery>,
    jar: CookieJar,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let coordinator = lookup_session(&state, &code).await?;

    let role = match query.party_id {
        Some(party_id) => SubscribeRole::Guest(party_id),
        None => {
            require_host(
                &state,
                &coordinator,
                &jar,
                &headers,
                query.token.as_deref(),
            )?;
            SubscribeRole::Host
        }
    };

    // Authorization and registration happen before the upgrade so failures
    // surface as proper HTTP statuses.
    let subscription = coordinator.subscribe(role).await?;

    Ok(ws.on_upgrade(move |socket| run_subscriber_socket(socket, coordinator, subscription)))
}

/// Pump registry messages into the socket until either side goes away.
///
/// Deregistration happens on every exit path; the registry closing our
/// channel (terminal transition, session close, backpressure drop) turns
/// into a code-1000 close frame carrying the last terminal reason.
async fn run_subscriber_socket(
    mut socket: WebSocket,
    coordinator: Arc<Coordinator>,
    subscription: Subscription,
) {
    let Subscription { id, mut rx } = subscription;
    let mut close_reason: Option<String> = None;
    let mut heartbeat = tokio::time::interval(consts::HEARTBEAT_INTERVAL);
    // The first tick fires immediately; the initial view already serves as
    // the hello.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            delivered = rx.recv() => match delivered {
                Some(msg) => {
                    if let Some(reason) = msg.close_reason() {
                        close_reason = Some(reason.to_string());
                    }
                    let text = serde_json::to_string(&msg).expect("Message serialization can't fail");
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: close_reason.unwrap_or_default().into(),
                    };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                }
            },
            _ = heartbeat.tick() => {
                let text = serde_json::to_string(&SubscriberMessage::Ping)
                    .expect("Message serialization can't fail");
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(SubscriberMessage::Ping) = serde_json::from_str(&text) {
                        let pong = serde_json::to_string(&SubscriberMessage::Pong)
                            .expect("Message serialization can't fail");
                        if socket.send(Message::Text(pong.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    trace!(target: LOG_TARGET, %err, "Subscriber socket error");
                    break;
                }
            },
        }
    }

    coordinator.unsubscribe(id).await;
}
