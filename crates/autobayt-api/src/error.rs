use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type ApiResult<T> = Result<T, ApiError>;
