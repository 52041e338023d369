use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArborError {
    /// Empty or structurally unusable training input.
    #[error("invalid training data: {reason}")]
    InvalidTrainingData { reason: String },

    /// A categorical field has more distinct values than its declared cardinality.
    #[error(
        "categorical field '{field}' has {observed} distinct values but cardinality is {cardinality}"
    )]
    FeatureCardinalityExceeded {
        field: String,
        cardinality: usize,
        observed: usize,
    },

    /// A record lacks a field the feature spec requires.
    #[error("record is missing feature field '{field}'")]
    MissingFeatureField { field: String },

    /// Model artifact is missing or unreadable.
    #[error("model '{name}' not found: {reason}")]
    ModelNotFound { name: String, reason: String },

    /// Deserialized model whose tree and encoder disagree.
    #[error("inconsistent model: {reason}")]
    InvalidModel { reason: String },

    /// Category value never seen while training.
    #[error("value {value} of categorical field '{field}' was not seen during training")]
    UnknownCategory { field: String, value: String },

    /// String value in a continuous feature field.
    #[error("continuous feature field '{field}' holds non-numeric value {value}")]
    NonNumericFeature { field: String, value: String },

    /// Prediction-time field selection disagrees with the trained model.
    #[error("feature fields {got:?} do not match model features {expected:?}")]
    FeatureSchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    /// Shape or dimensionality mismatch
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: String, got: String },

    /// Invalid Hyperparameter Value
    #[error("invalid value '{value}' for hyperparameter '{name}'")]
    InvalidHyperparameter { name: String, value: String },

    /// Invalid or contradictory configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ArborError {
    pub fn invalid_training_data(reason: impl Into<String>) -> Self {
        Self::InvalidTrainingData {
            reason: reason.into(),
        }
    }

    pub fn invalid_model(reason: impl Into<String>) -> Self {
        Self::InvalidModel {
            reason: reason.into(),
        }
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingFeatureField {
            field: field.into(),
        }
    }

    /// True for failures scoped to a single prediction record rather than a whole run.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            Self::MissingFeatureField { .. }
                | Self::UnknownCategory { .. }
                | Self::NonNumericFeature { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ArborError>;
