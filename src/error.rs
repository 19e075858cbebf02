use crate::speedtest::progress::TransferKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to gather entropy for upload payload: {0}")]
    Entropy(#[from] rand::Error),

    #[error("upload payload must not be empty")]
    EmptyPayload,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("all {workers} {kind} workers failed")]
    AllWorkersFailed { kind: TransferKind, workers: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
