pub type GlimpseResult<T> = Result<T, GlimpseError>;

#[derive(thiserror::Error, Debug)]
pub enum GlimpseError {
    /// Input refused before any processing (oversized file, wrong media
    /// kind, duration over the hard cap for the requested surface).
    #[error("input rejected: {0}")]
    InputRejected(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    /// Cooperative abort. Not a failure; callers must not surface this as
    /// an error message.
    #[error("cancelled")]
    Cancelled,

    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GlimpseError {
    pub fn input_rejected(msg: impl Into<String>) -> Self {
        Self::InputRejected(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
