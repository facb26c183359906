//! Broker credential handling
//!
//! API keys are read from the environment (optionally via `.env`) and held in
//! `Zeroizing` buffers so they are wiped from memory when dropped. They are
//! never logged or serialized.

use std::env;
use std::fmt;
use tracing::{info, warn};
use zeroize::Zeroizing;

pub const API_KEY_VAR: &str = "ALPACA_API_KEY";
pub const SECRET_KEY_VAR: &str = "ALPACA_SECRET_KEY";

/// Minimum length accepted for a key id or secret
const MIN_SECRET_LENGTH: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Environment variable not set: {0}")]
    EnvVarNotSet(String),

    #[error("Secret validation failed: {0}")]
    ValidationFailed(String),
}

/// Key id and secret for the brokerage API
#[derive(Clone)]
pub struct BrokerCredentials {
    pub key_id: Zeroizing<String>,
    pub secret_key: Zeroizing<String>,
}

impl fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("key_id", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

impl BrokerCredentials {
    pub fn new(key_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            key_id: Zeroizing::new(key_id.into()),
            secret_key: Zeroizing::new(secret_key.into()),
        }
    }

    /// Load `ALPACA_API_KEY` / `ALPACA_SECRET_KEY`
    pub fn from_env() -> Result<Self, SecretError> {
        let key_id = load_from_env(API_KEY_VAR)?;
        let secret_key = load_from_env(SECRET_KEY_VAR)?;

        validate_secret_strength(&key_id, MIN_SECRET_LENGTH)?;
        validate_secret_strength(&secret_key, MIN_SECRET_LENGTH)?;

        info!("Loaded broker credentials from environment");
        Ok(Self { key_id, secret_key })
    }
}

/// Load a secret from an environment variable (wrapped in Zeroizing)
fn load_from_env(env_var_name: &str) -> Result<Zeroizing<String>, SecretError> {
    match env::var(env_var_name) {
        Ok(value) if !value.trim().is_empty() => Ok(Zeroizing::new(value.trim().to_string())),
        _ => {
            warn!(variable = env_var_name, "Secret not set");
            Err(SecretError::EnvVarNotSet(env_var_name.to_string()))
        }
    }
}

/// Reject secrets that are too short or obviously placeholders
pub fn validate_secret_strength(secret: &str, min_length: usize) -> Result<(), SecretError> {
    if secret.len() < min_length {
        return Err(SecretError::ValidationFailed(format!(
            "Secret too short: {} characters (minimum: {})",
            secret.len(),
            min_length
        )));
    }

    let placeholders = ["your_", "changeme", "placeholder", "xxxxxxxx"];
    let secret_lower = secret.to_lowercase();
    for pattern in &placeholders {
        if secret_lower.contains(pattern) {
            return Err(SecretError::ValidationFailed(format!(
                "Secret looks like a placeholder: {}",
                pattern
            )));
        }
    }

    Ok(())
}
