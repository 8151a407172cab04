use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Malformed response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Oracle reported failure: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum BinderError {
    #[error("Document refused to create <{0}>")]
    CreationRefused(String),

    #[error("Unknown node {0}")]
    UnknownNode(usize),
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error(transparent)]
    Oracle(#[from] OracleError),
}
