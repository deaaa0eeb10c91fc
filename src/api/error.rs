/// Errors raised by the chat transport.
///
/// `Request`, `Status` and `Transport` cover requests that could not be sent
/// or were rejected; `Protocol` is an `{"error": ...}` event emitted by the
/// server mid-stream.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    /// Non-success status with a structured `detail` body.
    #[error("{0}")]
    Request(String),

    /// Non-success status whose body could not be parsed.
    #[error("Failed to send message (status {status})")]
    Status { status: u16 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Protocol(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    /// The send was dropped before its stream finished.
    #[error("Response interrupted")]
    Interrupted,
}

impl ChatError {
    /// Whether the server reported the failure inside an otherwise healthy stream.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ChatError::Protocol(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Decode(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;
