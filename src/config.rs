use std::env;
use std::net::SocketAddr;

use thiserror::Error;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_TWILIO_API_BASE: &str = "https://api.twilio.com";
pub const DEFAULT_OPENAI_API_BASE: &str = "https://api.openai.com";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value}")]
    Invalid { key: &'static str, value: String },
    #[error("CORS_ALLOWED_ORIGINS must list allowed origins when APP_ENV is '{0}'")]
    CorsRequired(String),
}

/// Process configuration, read once at startup from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    /// Scheme and host the provider uses to reach us; the canonical base for signatures.
    pub public_base_url: String,
    pub encryption_key: Option<String>,
    pub session_jwt_secret: String,
    pub app_env: String,
    pub cors_allowed_origins: Vec<String>,
    pub openai_api_key: Option<String>,
    pub twilio_api_base: String,
    pub openai_api_base: String,
    /// Originations per user per minute.
    pub voice_rate_limit: u32,
    /// Token requests per user per minute.
    pub token_rate_limit: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let bind_raw = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            key: "BIND_ADDR",
            value: bind_raw.clone(),
        })?;

        let public_base_url = require("PUBLIC_BASE_URL")?.trim_end_matches('/').to_string();
        if !public_base_url.starts_with("https://") && !public_base_url.starts_with("http://") {
            return Err(ConfigError::Invalid {
                key: "PUBLIC_BASE_URL",
                value: public_base_url,
            });
        }

        let app_env = get("APP_ENV").unwrap_or_else(|| "local".to_string());
        let cors_allowed_origins: Vec<String> = get("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        if app_env != "local" && cors_allowed_origins.is_empty() {
            return Err(ConfigError::CorsRequired(app_env));
        }
        // explicit origins only, never a wildcard
        if let Some(bad) = cors_allowed_origins
            .iter()
            .find(|o| !o.starts_with("https://") && !o.starts_with("http://"))
        {
            return Err(ConfigError::Invalid {
                key: "CORS_ALLOWED_ORIGINS",
                value: bad.clone(),
            });
        }

        Ok(Self {
            bind_addr,
            database_url: require("DATABASE_URL")?,
            public_base_url,
            encryption_key: get("ENCRYPTION_KEY"),
            session_jwt_secret: require("SESSION_JWT_SECRET")?,
            app_env,
            cors_allowed_origins,
            openai_api_key: get("OPENAI_API_KEY"),
            twilio_api_base: get("TWILIO_API_BASE")
                .unwrap_or_else(|| DEFAULT_TWILIO_API_BASE.to_string()),
            openai_api_base: get("OPENAI_API_BASE")
                .unwrap_or_else(|| DEFAULT_OPENAI_API_BASE.to_string()),
            voice_rate_limit: parse_u32(get("VOICE_RATE_LIMIT"), "VOICE_RATE_LIMIT", 10)?,
            token_rate_limit: parse_u32(get("TOKEN_RATE_LIMIT"), "TOKEN_RATE_LIMIT", 30)?,
        })
    }

    pub fn is_local(&self) -> bool {
        self.app_env == "local"
    }
}

fn parse_u32(raw: Option<String>, key: &'static str, default: u32) -> Result<u32, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: &[(&str, &str)] = &[
        ("DATABASE_URL", "postgres://localhost/dialer"),
        ("PUBLIC_BASE_URL", "https://dialer.example.com/"),
        ("SESSION_JWT_SECRET", "session-secret"),
    ];

    #[test]
    fn local_defaults() {
        let config = AppConfig::from_lookup(lookup(BASE)).unwrap();
        assert!(config.is_local());
        assert_eq!(config.public_base_url, "https://dialer.example.com");
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR.parse().unwrap());
        assert_eq!(config.voice_rate_limit, 10);
        assert_eq!(config.token_rate_limit, 30);
        assert!(config.encryption_key.is_none());
        assert!(config.cors_allowed_origins.is_empty());
    }

    #[test]
    fn non_local_deployment_requires_cors_allow_list() {
        let mut pairs = BASE.to_vec();
        pairs.push(("APP_ENV", "production"));
        assert_eq!(
            AppConfig::from_lookup(lookup(&pairs)).unwrap_err(),
            ConfigError::CorsRequired("production".to_string())
        );

        pairs.push(("CORS_ALLOWED_ORIGINS", "https://app.example.com, https://admin.example.com"));
        let config = AppConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(
            config.cors_allowed_origins,
            vec!["https://app.example.com", "https://admin.example.com"]
        );
    }

    #[test]
    fn wildcard_origin_is_refused() {
        let mut pairs = BASE.to_vec();
        pairs.push(("CORS_ALLOWED_ORIGINS", "*"));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "CORS_ALLOWED_ORIGINS", .. })
        ));
    }

    #[test]
    fn missing_required_values_are_named() {
        assert_eq!(
            AppConfig::from_lookup(lookup(&BASE[1..])).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let mut pairs = BASE.to_vec();
        pairs.push(("VOICE_RATE_LIMIT", "many"));
        assert!(matches!(
            AppConfig::from_lookup(lookup(&pairs)),
            Err(ConfigError::Invalid { key: "VOICE_RATE_LIMIT", .. })
        ));
    }
}
