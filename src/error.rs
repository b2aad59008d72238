use thiserror::Error;

/// Why a buffer was not accepted as a direct-mode message
#[derive(Debug, Error, PartialEq)]
pub enum ClassifyError {
    #[error("message too short: {0} bytes")]
    TooShort(usize),
    #[error("metadata length {0} out of range")]
    BadMetadataLength(u32),
    #[error("message truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("metadata is not valid UTF-8")]
    NotUtf8,
    #[error("metadata is not a JSON object: {0}")]
    NotJson(String),
    #[error("metadata is missing the `{0}` key")]
    MissingKey(&'static str),
}

/// Errors raised by decoder backends and the adapter in front of them
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("decoder unavailable: {0}")]
    Unavailable(String),
    #[error("configure failed: {0}")]
    Configure(String),
    #[error("decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("texture upload failed: {0}")]
    Upload(String),
    #[error("draw failed: {0}")]
    Draw(String),
    #[error("pixel buffer is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    BadPixelBuffer {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("invalid websocket request: {0}")]
    Request(String),
    #[error("socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("gave up after {0} reconnection attempts")]
    RetriesExhausted(u32),
}
