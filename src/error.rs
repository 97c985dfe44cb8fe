use thiserror::Error;

#[derive(Debug, Error)]
pub enum PriceTrackerError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP status {status} for {address}")]
    HttpStatus { status: u16, address: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No usable pairs for {0}")]
    NoPairs(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Startup error: {0}")]
    Startup(String),
}

impl PriceTrackerError {
    /// Whether the error means the market data was simply not available this
    /// attempt. These are the errors the scheduler retries.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::HttpStatus { .. } | Self::InvalidResponse(_) | Self::NoPairs(_)
        )
    }
}
