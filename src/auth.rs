//! Dashboard authentication.
//!
//! The dashboard has a single admin account configured in `[auth]`. A
//! successful sign-in issues a signed session token:
//!
//! ```text
//! base64url(email) "." expiry_unix_seconds "." hex(hmac_sha256(secret, payload))
//! ```
//!
//! where `payload` is everything before the last dot. Tokens are
//! stateless; verification recomputes the MAC and compares it in constant
//! time.
//!
//! There is no sign-out or password reset: clients drop the token, and
//! rotating `session_secret` revokes every outstanding one.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

/// An authenticated dashboard session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// A freshly issued session token.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Resolves a bearer token to a session. `Ok(None)` means "not signed in".
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn get_session(&self, token: &str) -> Result<Option<Session>>;
}

/// Single-admin provider backed by HMAC-signed tokens.
pub struct SignedSessionProvider {
    admin_email: String,
    password_sha256: String,
    secret: Vec<u8>,
    ttl: Duration,
}

impl SignedSessionProvider {
    /// Build a provider from config. Returns `None` when no admin is configured.
    pub fn from_config(config: &AuthConfig) -> Result<Option<Self>> {
        let Some(admin_email) = config.admin_email.as_deref() else {
            return Ok(None);
        };
        let password_sha256 = config
            .admin_password_sha256
            .as_deref()
            .ok_or_else(|| anyhow!("auth.admin_password_sha256 is required"))?;
        let secret = config
            .session_secret
            .as_deref()
            .ok_or_else(|| anyhow!("auth.session_secret is required"))?;

        let ttl = Duration::try_hours(config.session_ttl_hours)
            .ok_or_else(|| anyhow!("auth.session_ttl_hours is out of range"))?;

        Ok(Some(Self::new(
            admin_email,
            password_sha256,
            secret.as_bytes(),
            ttl,
        )))
    }

    pub fn new(admin_email: &str, password_sha256: &str, secret: &[u8], ttl: Duration) -> Self {
        Self {
            admin_email: admin_email.trim().to_lowercase(),
            password_sha256: password_sha256.trim().to_lowercase(),
            secret: secret.to_vec(),
            ttl,
        }
    }

    /// Check credentials and issue a token valid from `now`.
    ///
    /// Returns `Ok(None)` for a wrong email or password.
    pub fn sign_in(
        &self,
        email: &str,
        password: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<IssuedToken>> {
        let email = email.trim().to_lowercase();
        let digest = hex::encode(Sha256::digest(password.as_bytes()));
        let password_ok = constant_time_eq(digest.as_bytes(), self.password_sha256.as_bytes());
        if email != self.admin_email || !password_ok {
            debug!("rejected dashboard sign-in");
            return Ok(None);
        }

        let expires_at = now
            .checked_add_signed(self.ttl)
            .ok_or_else(|| anyhow!("session expiry is out of range"))?;
        let payload = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(email.as_bytes()),
            expires_at.timestamp()
        );
        let signature = hex::encode(self.mac(payload.as_bytes())?.finalize().into_bytes());
        info!(email = %email, "dashboard session issued");

        Ok(Some(IssuedToken {
            token: format!("{}.{}", payload, signature),
            expires_at: expires_at_second(expires_at),
        }))
    }

    /// Verify a token as of `now`.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let Some((payload, signature)) = token.trim().rsplit_once('.') else {
            return Ok(None);
        };
        let Ok(signature) = hex::decode(signature) else {
            return Ok(None);
        };
        if self.mac(payload.as_bytes())?.verify_slice(&signature).is_err() {
            return Ok(None);
        }

        let Some((email_b64, expiry)) = payload.split_once('.') else {
            return Ok(None);
        };
        let Ok(expiry) = expiry.parse::<i64>() else {
            return Ok(None);
        };
        let Some(expires_at) = Utc.timestamp_opt(expiry, 0).single() else {
            return Ok(None);
        };
        if expires_at <= now {
            return Ok(None);
        }

        let email = URL_SAFE_NO_PAD
            .decode(email_b64)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        match email {
            Some(email) if email == self.admin_email => Ok(Some(Session { email, expires_at })),
            _ => Ok(None),
        }
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| anyhow!("invalid session secret"))?;
        mac.update(data);
        Ok(mac)
    }
}

#[async_trait]
impl AuthProvider for SignedSessionProvider {
    async fn get_session(&self, token: &str) -> Result<Option<Session>> {
        self.verify(token, Utc::now())
    }
}

fn expires_at_second(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_opt(ts.timestamp(), 0).single().unwrap_or(ts)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> SignedSessionProvider {
        let digest = hex::encode(Sha256::digest(b"hunter22"));
        SignedSessionProvider::new(
            "Owner@Example.com",
            &digest,
            b"0123456789abcdef-secret",
            Duration::hours(12),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_sign_in_and_verify() {
        let p = provider();
        let issued = p
            .sign_in("owner@example.com", "hunter22", now())
            .unwrap()
            .unwrap();
        assert_eq!(issued.expires_at, now() + Duration::hours(12));

        let session = p.verify(&issued.token, now()).unwrap().unwrap();
        assert_eq!(session.email, "owner@example.com");
        assert_eq!(session.expires_at, issued.expires_at);
    }

    #[test]
    fn test_wrong_credentials() {
        let p = provider();
        assert!(p.sign_in("owner@example.com", "nope", now()).unwrap().is_none());
        assert!(p.sign_in("other@example.com", "hunter22", now()).unwrap().is_none());
    }

    #[test]
    fn test_expired_token_rejected() {
        let p = provider();
        let issued = p
            .sign_in("owner@example.com", "hunter22", now())
            .unwrap()
            .unwrap();
        let later = now() + Duration::hours(13);
        assert!(p.verify(&issued.token, later).unwrap().is_none());
    }

    #[test]
    fn test_tampered_token_rejected() {
        let p = provider();
        let issued = p
            .sign_in("owner@example.com", "hunter22", now())
            .unwrap()
            .unwrap();

        let (payload, sig) = issued.token.rsplit_once('.').unwrap();
        let (email, _) = payload.split_once('.').unwrap();
        let extended = format!("{}.{}.{}", email, now().timestamp() + 999_999, sig);
        assert!(p.verify(&extended, now()).unwrap().is_none());

        for bad in ["", "abc", "a.b.c", "a.b.zz"] {
            assert!(p.verify(bad, now()).unwrap().is_none(), "{}", bad);
        }
    }

    #[test]
    fn test_token_from_other_secret_rejected() {
        let issued = provider()
            .sign_in("owner@example.com", "hunter22", now())
            .unwrap()
            .unwrap();
        let other = SignedSessionProvider::new(
            "owner@example.com",
            &hex::encode(Sha256::digest(b"hunter22")),
            b"a-completely-different-secret",
            Duration::hours(12),
        );
        assert!(other.verify(&issued.token, now()).unwrap().is_none());
    }

    #[test]
    fn test_from_config_disabled_without_admin() {
        let cfg = AuthConfig::default();
        assert!(SignedSessionProvider::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_expiry_overflow_is_an_error() {
        let p = provider();
        let issued = p.sign_in("owner@example.com", "hunter22", DateTime::<Utc>::MAX_UTC);
        assert!(issued.is_err());

        let cfg = AuthConfig {
            admin_email: Some("owner@example.com".to_string()),
            admin_password_sha256: Some("a".repeat(64)),
            session_secret: Some("0123456789abcdef0123".to_string()),
            session_ttl_hours: i64::MAX,
        };
        assert!(SignedSessionProvider::from_config(&cfg).is_err());
    }
}
