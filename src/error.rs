use thiserror::Error;

/// Failure kinds surfaced by the core services. The HTTP layer maps each
/// variant to a transport status; none of these are retried.
#[derive(Debug, Error)]
pub enum Error {
    #[error("file too large ({size} bytes, max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("invalid image file: {0}")]
    InvalidImage(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("image not found")]
    NotFound,

    #[error("storage error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
