//! Error types for the risk analytics core.

use thiserror::Error;

use crate::record::ProducerKind;

#[derive(Error, Debug)]
pub enum RiskError {
    /// Fatal data insufficiency. The producer writes no record for this entity.
    #[error("Insufficient data for {entity} ({producer}): {reason}")]
    InsufficientData {
        entity: String,
        producer: ProducerKind,
        reason: String,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Invalid tier pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RiskError {
    pub fn insufficient(
        entity: impl Into<String>,
        producer: ProducerKind,
        reason: impl Into<String>,
    ) -> Self {
        RiskError::InsufficientData {
            entity: entity.into(),
            producer,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code for logs and run summaries
    pub fn code(&self) -> &'static str {
        match self {
            RiskError::InsufficientData { .. } => "insufficient_data",
            RiskError::Config(_) => "config",
            RiskError::InvalidPattern { .. } => "invalid_pattern",
            RiskError::Provider(_) => "provider",
            RiskError::Store(_) => "store",
            RiskError::Json(_) => "json",
            RiskError::TomlParse(_) => "toml_parse",
            RiskError::Io(_) => "io",
        }
    }

    /// True when the error means "skip this entity this run" rather than a failure
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, RiskError::InsufficientData { .. })
    }
}

pub type Result<T> = std::result::Result<T, RiskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_message_names_entity_and_producer() {
        let err = RiskError::insufficient("JOB-A", ProducerKind::Health, "12 samples < 30 required");
        assert!(err.is_insufficient_data());
        assert_eq!(err.code(), "insufficient_data");
        let msg = err.to_string();
        assert!(msg.contains("JOB-A"));
        assert!(msg.contains("health"));
        assert!(msg.contains("12 samples"));
    }

    #[test]
    fn test_config_error_is_not_insufficiency() {
        let err = RiskError::Config("weights sum to 0.9".to_string());
        assert!(!err.is_insufficient_data());
        assert_eq!(err.code(), "config");
    }
}
