use thiserror::Error;

pub type Result<T> = std::result::Result<T, FeedError>;

/// Errors raised while talking to the upstream YouTube endpoints
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),

    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The body arrived but did not have the expected shape
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FeedError {
    /// Network failures and unexpected statuses are worth another attempt;
    /// a body we cannot decode will not improve on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, FeedError::Network(_) | FeedError::Status { .. })
    }
}

impl From<reqwest::Error> for FeedError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FeedError::Decode(err.to_string())
        } else {
            FeedError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Decode(err.to_string())
    }
}
