use axum::extract::State;
use axum::response::IntoResponse;
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use fila_core::{SessionId, ShortCode, consts};
use serde::{Deserialize, Serialize};

use super::AppJson;
use crate::SharedAppState;
use crate::auth::HOST_AUTH_COOKIE;
use crate::error::{ApiResult, ValidationSnafu};
use crate::router::NewSession;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub event_name: String,
    pub max_guests: u32,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
    pub turnstile_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub code: ShortCode,
    pub session_id: SessionId,
    pub join_url: String,
    pub ws_url: String,
    pub host_auth_token: String,
    pub event_name: String,
    pub max_guests: u32,
    pub location: Option<String>,
    pub contact_info: Option<String>,
    pub open_time: Option<String>,
    pub close_time: Option<String>,
}

pub async fn create_session(
    state: State<SharedAppState>,
    jar: CookieJar,
    AppJson(request): AppJson<CreateSessionRequest>,
) -> ApiResult<impl IntoResponse> {
    state
        .captcha
        .verify(request.turnstile_token.as_deref())
        .await?;

    let new = validate(&request)?;
    let coordinator = state.router.create_session(new.clone()).await?;

    let session_id = coordinator.session_id();
    let code = coordinator.short_code();
    let token = state.auth.token_for(session_id);

    let cookie = Cookie::build((HOST_AUTH_COOKIE, token.clone()))
        .path("/")
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .build();

    let (join_url, ws_url) = match &state.config.app_base_url {
        Some(base) => {
            let ws_base = base
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            (
                format!("{base}/queue/{code}"),
                format!("{ws_base}/api/queue/{code}/connect"),
            )
        }
        None => (
            format!("/queue/{code}"),
            format!("/api/queue/{code}/connect"),
        ),
    };

    Ok((
        jar.add(cookie),
        AppJson(CreateSessionResponse {
            code,
            session_id,
            join_url,
            ws_url,
            host_auth_token: token,
            event_name: new.event_name,
            max_guests: new.max_guests,
            location: new.location,
            contact_info: new.contact_info,
            open_time: new.open_time,
            close_time: new.close_time,
        }),
    ))
}

fn validate(request: &CreateSessionRequest) -> ApiResult<NewSession> {
    let event_name = request.event_name.trim();
    if event_name.is_empty() {
        return ValidationSnafu {
            msg: "eventName must not be empty",
        }
        .fail();
    }
    if consts::EVENT_NAME_MAX_LEN < event_name.chars().count() {
        return ValidationSnafu {
            msg: format!("eventName must be at most {} characters", consts::EVENT_NAME_MAX_LEN),
        }
        .fail();
    }
    if !(consts::MAX_GUESTS_MIN..=consts::MAX_GUESTS_MAX).contains(&request.max_guests) {
        return ValidationSnafu {
            msg: format!(
                "maxGuests must be between {} and {}",
                consts::MAX_GUESTS_MIN,
                consts::MAX_GUESTS_MAX
            ),
        }
        .fail();
    }

    let location = trimmed_opt(&request.location);
    if location
        .as_ref()
        .is_some_and(|s| consts::LOCATION_MAX_LEN < s.chars().count())
    {
        return ValidationSnafu {
            msg: format!("location must be at most {} characters", consts::LOCATION_MAX_LEN),
        }
        .fail();
    }
    let contact_info = trimmed_opt(&request.contact_info);
    if contact_info
        .as_ref()
        .is_some_and(|s| consts::CONTACT_INFO_MAX_LEN < s.chars().count())
    {
        return ValidationSnafu {
            msg: format!(
                "contactInfo must be at most {} characters",
                consts::CONTACT_INFO_MAX_LEN
            ),
        }
        .fail();
    }

    let open_time = trimmed_opt(&request.open_time);
    let close_time = trimmed_opt(&request.close_time);
    let open_minutes = open_time.as_deref().map(parse_hhmm).transpose()?;
    let close_minutes = close_time.as_deref().map(parse_hhmm).transpose()?;
    if let (Some(open), Some(close)) = (open_minutes, close_minutes) {
        if close <= open {
            return ValidationSnafu {
                msg: "closeTime must be after openTime",
            }
            .fail();
        }
    }

    Ok(NewSession {
        event_name: event_name.to_string(),
        max_guests: request.max_guests,
        location,
        contact_info,
        open_time,
        close_time,
    })
}

/// Parse a 24h "HH:MM" into minutes since midnight.
fn parse_hhmm(s: &str) -> ApiResult<u32> {
    let parsed = s.split_once(':').and_then(|(h, m)| {
        if h.len() != 2 || m.len() != 2 || !s.bytes().all(|b| b.is_ascii_digit() || b == b':') {
            return None;
        }
        let h: u32 = h.parse().ok()?;
        let m: u32 = m.parse().ok()?;
        (h < 24 && m < 60).then_some(h * 60 + m)
    });
    match parsed {
        Some(minutes) => Ok(minutes),
        None => ValidationSnafu {
            msg: format!("Invalid time (expected HH:MM): {s}"),
        }
        .fail(),
    }
}

fn trimmed_opt(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hhmm_parsing() {
        assert_eq!(parse_hhmm("09:30").unwrap(), 9 * 60 + 30);
        assert_eq!(parse_hhmm("00:00").unwrap(), 0);
        assert_eq!(parse_hhmm("23:59").unwrap(), 23 * 60 + 59);
        assert!(parse_hhmm("24:00").is_err());
        assert!(parse_hhmm("12:60").is_err());
        assert!(parse_hhmm("9:30").is_err());
        assert!(parse_hhmm("nope").is_err());
    }
}
