use thiserror::Error;

use crate::TierKind;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt tier contents: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("{0:?} tier unavailable")]
    Unavailable(TierKind),

    #[error("No usable storage tier")]
    NoUsableTier,
}
