use thiserror::Error;

/// Errors that can arise while encoding or decoding a binary frame (§4.1).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame payload of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("connection closed mid-frame while reading {0}")]
    ShortRead(String),

    #[error("malformed frame payload: {0}")]
    InvalidPayload(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn error_code(&self) -> &'static str {
        match self {
            FrameError::FrameTooLarge(_) => "frame_too_large",
            FrameError::ShortRead(_) => "short_read",
            FrameError::InvalidPayload(_) => "invalid_payload",
            FrameError::Io(_) => "io_error",
        }
    }
}

/// Errors that can arise while (de)serializing a WebSocket/REST JSON envelope.
#[derive(Debug, Error)]
pub enum WsProtocolError {
    #[error("unrecognized message type: {0}")]
    UnknownMessageType(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
