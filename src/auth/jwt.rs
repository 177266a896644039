use std::time::Duration;

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::Claims;
use crate::config::{ConfigError, JwtConfig, TOKEN_TTL_MINUTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid token. Please log in again")]
    Invalid,
    #[error("Your session token has expired. Please log in again")]
    Expired,
}

/// Signs and verifies session tokens. Built once at startup from config and
/// shared read-only; no locks are taken on either path.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl: TimeDuration,
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Result<Self, ConfigError> {
        if cfg.secret.trim().is_empty() {
            return Err(ConfigError::Missing("JWT_SECRET"));
        }
        if cfg.ttl_minutes.unsigned_abs() > TOKEN_TTL_MINUTES.end().unsigned_abs() {
            return Err(ConfigError::Invalid {
                var: "JWT_TTL_MINUTES",
                reason: format!("{} minutes is out of range", cfg.ttl_minutes),
            });
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: TimeDuration::minutes(cfg.ttl_minutes),
        })
    }

    /// Lifetime of issued tokens, used for the session cookie's Max-Age.
    pub fn ttl(&self) -> Duration {
        Duration::try_from(self.ttl).unwrap_or(Duration::ZERO)
    }

    pub fn issue_session_token(&self, user_id: Uuid) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let exp = now + self.ttl;
        let claims = Claims {
            sub: user_id,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user_id, "session token signed");
        Ok(token)
    }

    pub fn verify_session_token(&self, token: &str) -> Result<Uuid, TokenError> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            }
        })?;
        debug!(user_id = %data.claims.sub, "session token verified");
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
pub(crate) fn test_config(secret: &str, ttl_minutes: i64) -> JwtConfig {
    JwtConfig {
        secret: secret.into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        ttl_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_and_verify_session_token() {
        let keys = JwtKeys::new(&test_config("dev-secret", 5)).unwrap();
        let user_id = Uuid::new_v4();
        let token = keys.issue_session_token(user_id).expect("sign");
        assert_eq!(keys.verify_session_token(&token), Ok(user_id));
    }

    #[test]
    fn expired_token_is_reported_as_expired() {
        let keys = JwtKeys::new(&test_config("dev-secret", -10)).unwrap();
        let token = keys.issue_session_token(Uuid::new_v4()).unwrap();
        assert_eq!(keys.verify_session_token(&token), Err(TokenError::Expired));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let ours = JwtKeys::new(&test_config("dev-secret", 5)).unwrap();
        let theirs = JwtKeys::new(&test_config("other-secret", 5)).unwrap();
        let token = theirs.issue_session_token(Uuid::new_v4()).unwrap();
        assert_eq!(ours.verify_session_token(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn tampered_or_garbage_tokens_are_invalid() {
        let keys = JwtKeys::new(&test_config("dev-secret", 5)).unwrap();
        let mut token = keys.issue_session_token(Uuid::new_v4()).unwrap();
        token.push('x');
        assert_eq!(keys.verify_session_token(&token), Err(TokenError::Invalid));
        assert_eq!(keys.verify_session_token("not.a.jwt"), Err(TokenError::Invalid));
    }

    #[test]
    fn wrong_audience_is_invalid() {
        let good = JwtKeys::new(&test_config("same-secret", 5)).unwrap();
        let mut cfg = test_config("same-secret", 5);
        cfg.audience = "someone-else".into();
        let bad = JwtKeys::new(&cfg).unwrap();
        let token = good.issue_session_token(Uuid::new_v4()).unwrap();
        assert_eq!(bad.verify_session_token(&token), Err(TokenError::Invalid));
    }

    #[test]
    fn empty_secret_is_a_config_error() {
        assert!(matches!(
            JwtKeys::new(&test_config("", 5)),
            Err(ConfigError::Missing("JWT_SECRET"))
        ));
    }

    #[test]
    fn ttl_matches_config() {
        let keys = JwtKeys::new(&test_config("dev-secret", 5)).unwrap();
        assert_eq!(keys.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn oversized_ttl_is_rejected_instead_of_overflowing() {
        assert!(matches!(
            JwtKeys::new(&test_config("dev-secret", i64::MAX)),
            Err(ConfigError::Invalid { var: "JWT_TTL_MINUTES", .. })
        ));
        assert!(JwtKeys::new(&test_config("dev-secret", 525_600)).is_ok());
    }
}
