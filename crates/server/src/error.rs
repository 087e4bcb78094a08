use comfymcp_comfyui::runner::JobError;
use comfymcp_core::error::CoreError;

/// Everything that can go wrong while serving one tool call.
///
/// Never crosses the transport: the dispatcher renders every variant as
/// an `{"error": <Display>}` envelope.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Template or parameter-resolution failure.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Backend submission, polling or output failure.
    #[error(transparent)]
    Job(#[from] JobError),

    /// The envelope named a tool this server does not provide.
    #[error("unknown tool")]
    UnknownCapability(String),

    /// The envelope or its params could not be decoded.
    #[error("malformed request: {0}")]
    MalformedPayload(String),
}

/// Convenience type alias for dispatcher return values.
pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    /// Stable machine-readable error kind, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::Core(core) => core_kind(core),
            DispatchError::Job(job) => match job {
                JobError::Core(core) => core_kind(core),
                JobError::BackendSubmission(_) => "BACKEND_SUBMISSION_ERROR",
                JobError::BackendCommunication(_) => "BACKEND_COMMUNICATION_ERROR",
                JobError::NoOutputProduced(_) => "NO_OUTPUT_PRODUCED",
                JobError::ExecutionFailed(_) => "EXECUTION_FAILED",
                JobError::PollingTimeout { .. } => "POLLING_TIMEOUT",
                JobError::Cancelled => "CANCELLED",
            },
            DispatchError::UnknownCapability(_) => "UNKNOWN_CAPABILITY",
            DispatchError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
        }
    }
}

fn core_kind(error: &CoreError) -> &'static str {
    match error {
        CoreError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
        CoreError::InvalidTemplate { .. } => "INVALID_TEMPLATE",
        CoreError::InputKeyNotFound(_) => "INPUT_KEY_NOT_FOUND",
        CoreError::ModelNotAvailable { .. } => "MODEL_NOT_AVAILABLE",
        CoreError::Io(_) => "TEMPLATE_STORAGE_ERROR",
    }
}
