use std::str::FromStr;
use tracing::Level;

pub const API_BASE_VAR: &str = "RAGCHAT_API_BASE";
pub const ENVIRONMENT_VAR: &str = "RAGCHAT_ENV";
pub const ORIGIN_VAR: &str = "RAGCHAT_ORIGIN";
pub const SESSION_SCOPE_VAR: &str = "RAGCHAT_SESSION_SCOPE";
pub const LOG_LEVEL_VAR: &str = "RAGCHAT_LOG";

pub const DEVELOPMENT_API_BASE: &str = "http://localhost:8000/api";
pub const PRODUCTION_API_PATH: &str = "/api";
pub const DEFAULT_SESSION_SCOPE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("RAGCHAT_ORIGIN must be set when RAGCHAT_ENV=production and RAGCHAT_API_BASE is not")]
    MissingOrigin,

    #[error("Unknown environment '{0}', expected 'development' or 'production'")]
    InvalidEnvironment(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "dev" | "development" => Ok(Environment::Development),
            "prod" | "production" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientConfig {
    pub api_base: String,
    pub session_scope: String,
    pub log_level: Level,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolves configuration from an arbitrary variable source.
    ///
    /// An explicit `RAGCHAT_API_BASE` wins. Otherwise development targets the
    /// local backend and production joins `RAGCHAT_ORIGIN` with `/api`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let environment = match non_empty(ENVIRONMENT_VAR) {
            Some(raw) => raw.parse()?,
            None => Environment::Development,
        };

        let api_base = match non_empty(API_BASE_VAR) {
            Some(explicit) => explicit.trim().trim_end_matches('/').to_string(),
            None => match environment {
                Environment::Development => DEVELOPMENT_API_BASE.to_string(),
                Environment::Production => {
                    let origin = non_empty(ORIGIN_VAR).ok_or(ConfigError::MissingOrigin)?;
                    format!("{}{}", origin.trim().trim_end_matches('/'), PRODUCTION_API_PATH)
                }
            },
        };

        let session_scope = non_empty(SESSION_SCOPE_VAR)
            .map(|scope| scope.trim().to_string())
            .unwrap_or_else(|| DEFAULT_SESSION_SCOPE.to_string());

        let log_level = non_empty(LOG_LEVEL_VAR)
            .and_then(|raw| Level::from_str(raw.trim()).ok())
            .unwrap_or(Level::WARN);

        Ok(Self {
            api_base,
            session_scope,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ClientConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_development_backend() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.api_base, DEVELOPMENT_API_BASE);
        assert_eq!(config.session_scope, DEFAULT_SESSION_SCOPE);
        assert_eq!(config.log_level, Level::WARN);
    }

    #[test]
    fn production_uses_relative_api_path() {
        let config = config_from(&[
            (ENVIRONMENT_VAR, "production"),
            (ORIGIN_VAR, "https://chat.example.com/"),
        ])
        .unwrap();
        assert_eq!(config.api_base, "https://chat.example.com/api");
    }

    #[test]
    fn production_requires_origin() {
        assert_eq!(
            config_from(&[(ENVIRONMENT_VAR, "production")]),
            Err(ConfigError::MissingOrigin)
        );
    }

    #[test]
    fn explicit_base_wins() {
        let config = config_from(&[
            (ENVIRONMENT_VAR, "production"),
            (API_BASE_VAR, "http://10.0.0.5:9000/api/"),
            (SESSION_SCOPE_VAR, "tab-2"),
            (LOG_LEVEL_VAR, "debug"),
        ])
        .unwrap();
        assert_eq!(config.api_base, "http://10.0.0.5:9000/api");
        assert_eq!(config.session_scope, "tab-2");
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn unknown_environment_is_rejected() {
        assert_eq!(
            config_from(&[(ENVIRONMENT_VAR, "staging")]),
            Err(ConfigError::InvalidEnvironment("staging".into()))
        );
    }
}
