use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Auth error: {0}")]
    Auth(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No object stored at {0}")]
    BlobNotFound(String),

    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),
}
