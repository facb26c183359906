use thiserror::Error;

use crate::domain::repositories::broker_client::BrokerError;
use crate::domain::services::signal_scorer::AnalysisError;
use crate::persistence::DatabaseError;

/// Errors surfaced by the bot controller and the control API.
#[derive(Debug, Error)]
pub enum BotError {
    #[error("Bot is already running (session {0})")]
    AlreadyRunning(String),

    #[error("Bot is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl BotError {
    /// Whether the caller asked for something that cannot be done, as opposed
    /// to an upstream failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BotError::AlreadyRunning(_)
                | BotError::NotRunning
                | BotError::InvalidConfig(_)
                | BotError::InvalidInput(_)
                | BotError::Analysis(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("Value must be non-negative")]
    MustBeNonNegative,

    #[error("Value must be finite")]
    MustBeFinite,
}

impl From<ValidationError> for String {
    fn from(error: ValidationError) -> Self {
        error.to_string()
    }
}

/// Basic shape check for a ticker or `BASE/QUOTE` crypto pair.
pub fn validate_symbol(symbol: &str) -> Result<(), ValidationError> {
    let valid = !symbol.is_empty()
        && symbol.len() <= 15
        && symbol.split('/').count() <= 2
        && symbol.split('/').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '.')
        });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidSymbol(symbol.to_string()))
    }
}
