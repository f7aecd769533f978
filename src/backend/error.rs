use thiserror::Error;

/// Failures surfaced by the backend. None of these escape the component
/// that hit them; they are logged and the operation is dropped.
#[derive(Debug, Error)]
pub enum Error {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
}

pub type Result<T> = std::result::Result<T, Error>;
