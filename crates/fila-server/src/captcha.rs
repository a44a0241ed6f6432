//! Cloudflare Turnstile gate for the public create/join endpoints.
//!
//! The verification call is the only outbound HTTP this server makes; it
//! is bounded by a short timeout and skipped entirely when no secret is
//! configured or bypass is on.

use std::time::Duration;

use fila_util_error::FmtCompact as _;
use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::{ApiResult, ValidationSnafu};

const LOG_TARGET: &str = "fila::captcha";

const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct TurnstileGate {
    secret: Option<String>,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct SiteverifyResponse {
    success: bool,
}

impl TurnstileGate {
    pub fn new(config: &Config) -> Self {
        Self {
            secret: config
                .captcha_enabled()
                .then(|| config.turnstile_secret.clone())
                .flatten(),
            client: reqwest::Client::new(),
        }
    }

    pub async fn verify(&self, token: Option<&str>) -> ApiResult<()> {
        let Some(secret) = &self.secret else {
            return Ok(());
        };

        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return ValidationSnafu {
                msg: "Captcha token required",
            }
            .fail();
        };

        let response = self
            .client
            .post(SITEVERIFY_URL)
            .timeout(VERIFY_TIMEOUT)
            .form(&[("secret", secret.as_str()), ("response", token)])
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        let verified = match response {
            Ok(resp) => resp
                .json::<SiteverifyResponse>()
                .await
                .map(|v| v.success)
                .unwrap_or(false),
            Err(err) => {
                warn!(target: LOG_TARGET, err = %err.fmt_compact(), "Captcha verification request failed");
                false
            }
        };

        if !verified {
            return ValidationSnafu {
                msg: "Captcha verification failed",
            }
            .fail();
        }
        Ok(())
    }
}
