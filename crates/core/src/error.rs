use thiserror::Error;

pub type PantryResult<T> = Result<T, PantryError>;

#[derive(Error, Debug)]
pub enum PantryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Exchange transport error: {0}")]
    Transport(String),

    #[error("Malformed exchange response: {0}")]
    MalformedResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
