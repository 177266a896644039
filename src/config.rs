use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

#[derive(Debug, Clone)]
pub struct MailConfig {
    pub from: String,
    pub sendgrid_api_key: Option<String>,
}

/// Session token lifetime bounds, one minute to one year.
pub const TOKEN_TTL_MINUTES: std::ops::RangeInclusive<i64> = 1..=525_600;

/// Per-client request budget for the `/api/v1` routes.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub mail: MailConfig,
    pub rate_limit: RateLimitConfig,
    /// Base used to build activation and reset links.
    pub public_base_url: String,
    pub environment: Environment,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &'static str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(key))
        };

        let database_url = required("DATABASE_URL")?;
        let number = |key: &'static str, default: i64, range: std::ops::RangeInclusive<i64>| {
            let Some(raw) = lookup(key) else {
                return Ok(default);
            };
            let value = raw.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
                var: key,
                reason: e.to_string(),
            })?;
            if !range.contains(&value) {
                return Err(ConfigError::Invalid {
                    var: key,
                    reason: format!(
                        "{value} is outside {}..={}",
                        range.start(),
                        range.end()
                    ),
                });
            }
            Ok(value)
        };

        let ttl_minutes = number("JWT_TTL_MINUTES", 60 * 24 * 90, TOKEN_TTL_MINUTES)?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: lookup("JWT_ISSUER").unwrap_or_else(|| "accounts".into()),
            audience: lookup("JWT_AUDIENCE").unwrap_or_else(|| "accounts-users".into()),
            ttl_minutes,
        };

        let environment = match lookup("APP_ENV").as_deref() {
            None | Some("development") => Environment::Development,
            Some("production") => Environment::Production,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "APP_ENV",
                    reason: format!("unknown environment {other:?}"),
                })
            }
        };

        let mail = MailConfig {
            from: lookup("EMAIL_FROM").unwrap_or_else(|| "no-reply@localhost".into()),
            sendgrid_api_key: lookup("SENDGRID_API_KEY").filter(|v| !v.is_empty()),
        };

        let rate_limit = RateLimitConfig {
            max_requests: number("RATE_LIMIT_MAX", 100, 1..=1_000_000)? as u32,
            window: Duration::from_secs(
                number("RATE_LIMIT_WINDOW_MINUTES", 60, 1..=24 * 60)? as u64 * 60,
            ),
        };

        Ok(Self {
            database_url,
            jwt,
            mail,
            rate_limit,
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:8080".into()),
            environment,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }
}
