use thiserror::Error;

pub type StratumResult<T> = Result<T, StratumError>;

#[derive(Error, Debug)]
pub enum StratumError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Invalid transition: cannot {action} from {from}")]
    InvalidTransition { from: String, action: String },

    #[error("Not eligible: {0}")]
    Ineligible(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl StratumError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    pub fn invalid_transition(from: impl std::fmt::Debug, action: impl std::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{:?}", from),
            action: format!("{:?}", action),
        }
    }

    /// Short machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::Validation(_) => "validation_failed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Ineligible(_) => "ineligible",
            Self::Conflict(_) => "conflict",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<config::ConfigError> for StratumError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
