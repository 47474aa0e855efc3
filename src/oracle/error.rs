use thiserror::Error;

/// Failures of an oracle call. The adapter turns every one of them into a fallback estimate.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("failed to build oracle HTTP client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    #[error("oracle request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("oracle API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),
}

impl OracleError {
    /// Whether the error came from the remote side rather than from this process.
    pub fn is_remote(&self) -> bool {
        matches!(self, OracleError::Api { .. } | OracleError::InvalidResponse(_))
    }
}
