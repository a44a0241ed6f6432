//! Host credential: `{sessionId}.{base64url(hmac_sha256(sessionId))}`.
//!
//! Stateless; any process holding the shared secret can verify a host on
//! any request or subscriber connection. The MAC comparison is
//! constant-time via [`Mac::verify_slice`].

use data_encoding::BASE64URL_NOPAD;
use fila_core::SessionId;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Config;

pub const HOST_AUTH_COOKIE: &str = "queue_host_auth";
pub const HOST_AUTH_HEADER: &str = "x-host-auth";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct HostAuth {
    secret: Vec<u8>,
}

impl HostAuth {
    pub fn new(config: &Config) -> Self {
        Self {
            secret: config.host_auth_secret.clone(),
        }
    }

    fn mac(&self, session: SessionId) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("Hmac accepts any key length");
        mac.update(session.to_string().as_bytes());
        mac
    }

    pub fn token_for(&self, session: SessionId) -> String {
        let tag = self.mac(session).finalize().into_bytes();
        format!("{session}.{}", BASE64URL_NOPAD.encode(&tag))
    }

    pub fn verify(&self, token: &str, session: SessionId) -> bool {
        let Some((sid, tag)) = token.split_once('.') else {
            return false;
        };
        if sid.parse::<SessionId>() != Ok(session) {
            return false;
        }
        let Ok(tag) = BASE64URL_NOPAD.decode(tag.as_bytes()) else {
            return false;
        };
        self.mac(session).verify_slice(&tag).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth() -> HostAuth {
        HostAuth::new(&Config::new("test-secret"))
    }

    #[test]
    fn token_roundtrip() {
        let auth = auth();
        let session = SessionId::generate();

        let token = auth.token_for(session);
        assert!(auth.verify(&token, session));
    }

    #[test]
    fn rejects_token_for_other_session() {
        let auth = auth();
        let token = auth.token_for(SessionId::generate());

        assert!(!auth.verify(&token, SessionId::generate()));
    }

    #[test]
    fn rejects_tampered_tag() {
        let auth = auth();
        let session = SessionId::generate();

        let mut token = auth.token_for(session);
        token.pop();
        assert!(!auth.verify(&token, session));
        assert!(!auth.verify("garbage", session));
        assert!(!auth.verify(&format!("{session}."), session));
    }

    #[test]
    fn rejects_other_secret() {
        let session = SessionId::generate();
        let token = HostAuth::new(&Config::new("secret-a")).token_for(session);

        assert!(!HostAuth::new(&Config::new("secret-b")).verify(&token, session));
    }
}
