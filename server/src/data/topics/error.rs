//! Topic error types

use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Error)]
pub enum TopicError {
    /// Dispatcher gone; the topic service has shut down
    #[error("topic closed")]
    ChannelClosed,

    /// Byte budget or channel capacity exhausted
    #[error("topic buffer full")]
    BufferFull,

    #[error("subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    /// The name is already registered for another message type
    #[error("topic '{0}' is registered with a different message type")]
    TypeMismatch(String),
}

impl From<RecvError> for TopicError {
    fn from(err: RecvError) -> Self {
        match err {
            RecvError::Closed => Self::ChannelClosed,
            RecvError::Lagged(skipped) => Self::Lagged(skipped),
        }
    }
}
