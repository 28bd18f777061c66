use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("Unsupported media format: {0}")]
    UnsupportedFormat(String),

    #[error("Decoder failure: {0}")]
    Decoder(String),

    #[error("Playback sink failure: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
