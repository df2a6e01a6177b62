use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Port allocation failed: {0}")]
    Allocation(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("Protocol client init failed: {0}")]
    ClientInit(String),

    #[error("Not available: {0}")]
    NotAvailable(String),

    #[error("CDP error: {0}")]
    Cdp(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
