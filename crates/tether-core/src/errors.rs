/// Failures raised by the model transport before or while it streams a turn.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The request could not be handed to the transport at all.
    #[error("{0}")]
    Dispatch(String),
    #[error("transport unavailable: {0}")]
    Unavailable(String),
    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Dispatch(_) => "dispatch",
            Self::Unavailable(_) => "unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}
