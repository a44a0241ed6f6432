//! Process configuration, read once at startup and passed around as an
//! immutable [`Config`]. No module-level globals.

use fila_util_error::WhateverResult;
use snafu::{OptionExt as _, whatever};

pub const ENV_HOST_AUTH_SECRET: &str = "HOST_AUTH_SECRET";
pub const ENV_TURNSTILE_SECRET_KEY: &str = "TURNSTILE_SECRET_KEY";
pub const ENV_TURNSTILE_BYPASS: &str = "TURNSTILE_BYPASS";
pub const ENV_ALLOWED_ORIGINS: &str = "ALLOWED_ORIGINS";
pub const ENV_VAPID_PUBLIC: &str = "VAPID_PUBLIC";
pub const ENV_VAPID_PRIVATE: &str = "VAPID_PRIVATE";
pub const ENV_VAPID_SUBJECT: &str = "VAPID_SUBJECT";
pub const ENV_TEST_MODE: &str = "TEST_MODE";
pub const ENV_APP_BASE_URL: &str = "APP_BASE_URL";

/// Web Push key material. Presence enables the push dispatcher.
#[derive(Debug, Clone)]
pub struct VapidKeys {
    pub public: String,
    pub private: String,
    pub subject: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// HMAC key for host credentials.
    pub host_auth_secret: Vec<u8>,
    pub turnstile_secret: Option<String>,
    pub turnstile_bypass: bool,
    pub allowed_origins: Vec<String>,
    pub vapid: Option<VapidKeys>,
    /// When set, the alarm treats every fire as deadline-reached. Test
    /// harness only.
    pub test_mode: bool,
    /// Base for join links and push click-through urls. Relative paths are
    /// used when unset.
    pub app_base_url: Option<String>,
}

impl Config {
    pub fn from_env() -> WhateverResult<Self> {
        let host_auth_secret = std::env::var(ENV_HOST_AUTH_SECRET)
            .ok()
            .filter(|s| !s.is_empty())
            .whatever_context(format!("{ENV_HOST_AUTH_SECRET} must be set"))?
            .into_bytes();

        let turnstile_bypass = env_flag(ENV_TURNSTILE_BYPASS);

        let vapid = match (
            env_opt(ENV_VAPID_PUBLIC),
            env_opt(ENV_VAPID_PRIVATE),
            env_opt(ENV_VAPID_SUBJECT),
        ) {
            (Some(public), Some(private), Some(subject)) => Some(VapidKeys {
                public,
                private,
                subject,
            }),
            (None, None, None) => None,
            _ => {
                whatever!(
                    "{ENV_VAPID_PUBLIC}, {ENV_VAPID_PRIVATE} and {ENV_VAPID_SUBJECT} must be set together"
                );
            }
        };

        Ok(Self {
            host_auth_secret,
            turnstile_secret: env_opt(ENV_TURNSTILE_SECRET_KEY),
            turnstile_bypass,
            allowed_origins: env_opt(ENV_ALLOWED_ORIGINS)
                .map(|csv| {
                    csv.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            vapid,
            test_mode: env_flag(ENV_TEST_MODE),
            app_base_url: env_opt(ENV_APP_BASE_URL).map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    /// Minimal config for tests and local tools.
    pub fn new(host_auth_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            host_auth_secret: host_auth_secret.into(),
            turnstile_secret: None,
            turnstile_bypass: false,
            allowed_origins: vec![],
            vapid: None,
            test_mode: false,
            app_base_url: None,
        }
    }

    pub fn push_enabled(&self) -> bool {
        self.vapid.is_some()
    }

    pub fn captcha_enabled(&self) -> bool {
        self.turnstile_secret.is_some() && !self.turnstile_bypass
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "true" || v == "1")
}
