use thiserror::Error;

/// Why a batch could not be converted.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The request never got a response (DNS, TLS, connection reset).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service answered with a non-2xx status.
    #[error("conversion service returned HTTP {0}")]
    Status(u16),

    /// The body was not JSON or lacked the converted text.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The background side answered with an error message.
    #[error("conversion rejected: {0}")]
    Rejected(String),

    /// The host tore down the messaging channel; no later call can succeed.
    #[error("extension context invalidated")]
    ChannelInvalidated,
}

impl ConversionError {
    pub fn is_channel_invalidated(&self) -> bool {
        matches!(self, ConversionError::ChannelInvalidated)
    }
}

pub type ConversionResult<T> = Result<T, ConversionError>;
