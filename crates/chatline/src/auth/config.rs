//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enable development mode (accepts `dev:<id>` tokens and `X-Dev-User`).
    pub dev_mode: bool,

    /// JWT secret for HS256. Supports `env:VAR_NAME`.
    /// REQUIRED when dev_mode is false.
    pub jwt_secret: Option<String>,

    /// Name of the cookie carrying the token.
    pub cookie_name: String,

    /// Development users (only used in dev mode).
    pub dev_users: Vec<DevUser>,

    /// Allowed browser origins for CORS and WebSocket upgrades.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            dev_mode: false,
            // No default JWT secret - must be explicitly configured
            jwt_secret: None,
            cookie_name: "jwt".to_string(),
            dev_users: Vec::new(),
            allowed_origins: vec!["http://localhost:5173".to_string()],
        }
    }
}

const INSECURE_PLACEHOLDER: &str = "change-me";
const MIN_SECRET_LENGTH: usize = 32;

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        let Some(value) = &self.jwt_secret else {
            return Ok(None);
        };

        match value.strip_prefix("env:") {
            Some(var_name) => match std::env::var(var_name) {
                Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
            },
            None => Ok(Some(value.clone())),
        }
    }

    /// Validate the configuration for the current mode.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.dev_mode {
            return Ok(());
        }

        let secret = self
            .resolve_jwt_secret()?
            .ok_or(ConfigValidationError::MissingJwtSecret)?;

        if secret == INSECURE_PLACEHOLDER {
            return Err(ConfigValidationError::InsecureJwtSecret);
        }
        if secret.len() < MIN_SECRET_LENGTH {
            return Err(ConfigValidationError::JwtSecretTooShort);
        }

        Ok(())
    }

    /// Generate a random JWT secret.
    pub fn generate_jwt_secret() -> String {
        use rand::Rng;

        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        const SECRET_LENGTH: usize = 64;

        let mut rng = rand::rng();
        (0..SECRET_LENGTH)
            .map(|_| {
                let idx = rng.random_range(0..CHARSET.len());
                CHARSET[idx] as char
            })
            .collect()
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error(
        "JWT secret is required when dev_mode is false. Set CHATLINE_AUTH__JWT_SECRET or auth.jwt_secret in config."
    )]
    MissingJwtSecret,

    #[error("JWT secret cannot be the placeholder value. Please configure a secure secret.")]
    InsecureJwtSecret,

    #[error("JWT secret must be at least 32 characters long.")]
    JwtSecretTooShort,

    #[error("Environment variable '{0}' not found (referenced via env:{0} in config).")]
    EnvVarNotFound(String),

    #[error("Environment variable '{0}' is empty (referenced via env:{0} in config).")]
    EnvVarEmpty(String),
}

/// Development user configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevUser {
    /// User identity.
    pub id: String,
    /// Display name.
    pub name: String,
}

#[cfg(test)]
#[allow(clippy::field_reassign_with_default)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_default() {
        let config = AuthConfig::default();
        assert!(!config.dev_mode);
        assert!(config.jwt_secret.is_none());
        assert_eq!(config.cookie_name, "jwt");
        assert!(config.dev_users.is_empty());
    }

    #[test]
    fn test_validate_requires_secret_outside_dev_mode() {
        let config = AuthConfig::default();
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::MissingJwtSecret)
        );

        let mut config = AuthConfig::default();
        config.dev_mode = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_weak_secrets() {
        let mut config = AuthConfig::default();
        config.jwt_secret = Some(INSECURE_PLACEHOLDER.to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::InsecureJwtSecret)
        );

        config.jwt_secret = Some("short".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::JwtSecretTooShort)
        );

        config.jwt_secret = Some(AuthConfig::generate_jwt_secret());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_secret_indirection() {
        let mut config = AuthConfig::default();
        config.jwt_secret = Some("env:CHATLINE_TEST_SECRET_THAT_IS_NEVER_SET".to_string());
        assert_eq!(
            config.resolve_jwt_secret(),
            Err(ConfigValidationError::EnvVarNotFound(
                "CHATLINE_TEST_SECRET_THAT_IS_NEVER_SET".to_string()
            ))
        );

        config.jwt_secret = Some("plain-value".to_string());
        assert_eq!(
            config.resolve_jwt_secret(),
            Ok(Some("plain-value".to_string()))
        );
    }

    #[test]
    fn test_generated_secrets_differ() {
        let a = AuthConfig::generate_jwt_secret();
        let b = AuthConfig::generate_jwt_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
