use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid score: {0}")]
    InvalidScore(String),

    #[error("Invalid uncertainty: {0}")]
    InvalidUncertainty(String),

    #[error("Invalid feedback type: {0}")]
    InvalidFeedbackType(String),

    #[error("Invalid satisfaction rating: {0}")]
    InvalidSatisfaction(String),

    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Training evaluation failed: {0}")]
    TrainingEvaluation(String),

    #[error("Feature vector unavailable for property {0}")]
    FeatureUnavailable(Uuid),

    #[error("Property not found: {0}")]
    PropertyNotFound(Uuid),

    #[error("Investor not found: {0}")]
    InvestorNotFound(Uuid),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}
