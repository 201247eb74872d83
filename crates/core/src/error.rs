#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Malformed feed message: {0}")]
    Decode(String),

    #[error("Failed to encode feed message: {0}")]
    Encode(#[from] serde_json::Error),
}
