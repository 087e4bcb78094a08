/// Errors raised while loading templates and resolving parameters.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Workflow template '{0}' not found")]
    TemplateNotFound(String),

    #[error("Workflow template '{id}' is not a valid graph: {reason}")]
    InvalidTemplate { id: String, reason: String },

    #[error("No input slot found for parameter '{0}'")]
    InputKeyNotFound(String),

    #[error("Model '{model}' not in available models: {available:?}")]
    ModelNotAvailable {
        model: String,
        available: Vec<String>,
    },

    #[error("Template storage error: {0}")]
    Io(#[from] std::io::Error),
}
