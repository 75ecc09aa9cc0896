use thiserror::Error;

/// Hard failures a turn can end with. Anything not listed here is handled
/// inside the responsible component by its rule-based fallback.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("empty query text")]
    EmptyInput,

    #[error("no geocoder could resolve '{0}' to a bounding box")]
    UnresolvedLocation(String),

    #[error("unknown collection id '{0}'")]
    UnknownCollection(String),

    #[error("assembled STAC query violates invariants: {0}")]
    MalformedQuery(String),

    #[error("STAC search failed: {0}")]
    StacUpstream(String),

    #[error("language model call failed: {0}")]
    Llm(#[from] LlmError),

    #[error("turn deadline exceeded")]
    DeadlineExceeded,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("model returned invalid JSON after retry: {0}")]
    InvalidJson(String),

    #[error("endpoint returned status {0}")]
    Status(u16),
}

impl LlmError {
    /// Transient failures are worth one retry with backoff; everything
    /// else goes straight to the caller's fallback.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::Transport(_) => true,
            LlmError::Status(code) => *code >= 500,
            LlmError::InvalidJson(_) => false,
        }
    }
}
