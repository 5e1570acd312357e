use thiserror::Error;

use crate::state::ViewState;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("transport: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error("store mutated during iteration")]
    ConcurrentModification,
}

impl CacheError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self { CacheError::InvalidArgument(msg.into()) }

    pub fn invalid_state(msg: impl Into<String>) -> Self { CacheError::InvalidState(msg.into()) }

    pub fn unsupported(msg: impl Into<String>) -> Self { CacheError::Unsupported(msg.into()) }

    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self { CacheError::Transport(Box::new(err)) }

    /// Remote failures that only exist as a message once they cross the wire.
    pub fn remote(msg: impl Into<String>) -> Self {
        let message: String = msg.into();
        CacheError::Transport(message.into())
    }

    pub(crate) fn unexpected_state(expected: ViewState, actual: ViewState) -> Self {
        CacheError::InvalidState(format!("expected state {} but found {}", expected, actual))
    }
}
