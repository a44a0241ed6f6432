use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use fila_core::PartyId;
use serde::Deserialize;
use sha2::{Digest as _, Sha256};

use super::lookup_session;
use crate::SharedAppState;
use crate::error::ApiResult;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub party_id: Option<PartyId>,
}

/// Latest host or party-scoped view, with ETag revalidation for pollers.
pub async fn get_snapshot(
    state: State<SharedAppState>,
    Path(code): Path<String>,
    Query(query): Query<SnapshotQuery>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let coordinator = lookup_session(&state, &code).await?;
    let view = coordinator.snapshot_view(query.party_id).await?;

    let body = serde_json::to_vec(&view).expect("Message serialization can't fail");
    let etag = body_etag(&body);

    if if_none_match_hit(&headers, &etag) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [(ETAG, HeaderValue::from_str(&etag).expect("Hex is ASCII"))],
        )
            .into_response());
    }

    Ok((
        [
            (ETAG, HeaderValue::from_str(&etag).expect("Hex is ASCII")),
            (CONTENT_TYPE, HeaderValue::from_static("application/json")),
        ],
        body,
    )
        .into_response())
}

/// First 16 hex chars of the body's SHA-256, quoted as a strong ETag.
fn body_etag(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut hex = String::with_capacity(16);
    for byte in &digest[..8] {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("\"{hex}\"")
}

fn if_none_match_hit(headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = headers.get(IF_NONE_MATCH).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    value
        .split(',')
        .map(str::trim)
        .map(|tag| tag.strip_prefix("W/").unwrap_or(tag))
        .any(|tag| tag == etag || tag == etag.trim_matches('"'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_is_stable_and_sensitive() {
        let a = body_etag(b"{\"type\":\"closed\"}");
        let b = body_etag(b"{\"type\":\"closed\"}");
        let c = body_etag(b"{\"type\":\"ping\"}");

        assert_eq!(a, b);
        assert_ne!(a, c);
        // 16 hex chars plus quotes
        assert_eq!(a.len(), 18);
    }

    #[test]
    fn if_none_match_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"deadbeef00112233\""));

        assert!(if_none_match_hit(&headers, "\"deadbeef00112233\""));
        assert!(!if_none_match_hit(&headers, "\"0000000000000000\""));

        headers.insert(
            IF_NONE_MATCH,
            HeaderValue::from_static("W/\"deadbeef00112233\", \"other\""),
        );
        assert!(if_none_match_hit(&headers, "\"deadbeef00112233\""));
    }
}
