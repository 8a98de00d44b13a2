/// Result alias that carries the crate's [`SchedulerError`] type.
pub type Result<T> = std::result::Result<T, SchedulerError>;

/// Common error type for the scheduler crate.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// Free-form failure surfaced by the host (CLI, config selection).
    #[error("{0}")]
    Message(String),
    /// The tempo source reported a BPM that cannot produce a positive,
    /// finite beat interval (zero, negative, NaN or infinite).
    #[error("invalid tempo: {bpm} BPM")]
    InvalidTempo { bpm: f64 },
    /// Drift policy parameters that would arm a nonsensical wake-up.
    #[error("invalid drift policy: {0}")]
    InvalidPolicy(String),
    /// The engine thread is gone and can no longer take commands.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub fn invalid_policy<T: Into<String>>(msg: T) -> Self {
        Self::InvalidPolicy(msg.into())
    }
}
