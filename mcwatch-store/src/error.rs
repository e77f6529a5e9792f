use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create data directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to list data directory {path}: {source}")]
    ListDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to read shard {file}: {source}")]
    Read {
        file: String,
        source: std::io::Error,
    },

    #[error("failed to write shard {file}, save aborted: {source}")]
    Write {
        file: String,
        source: std::io::Error,
    },

    #[error("failed to remove stale shard {file}, save aborted: {source}")]
    Remove {
        file: String,
        source: std::io::Error,
    },

    #[error("failed to encode shard {file}: {source}")]
    Encode {
        file: String,
        source: serde_json::Error,
    },

    #[error("shard {file} could not be decoded: {source}")]
    Decode {
        file: String,
        source: serde_json::Error,
    },

    #[error("shard {file} uses unknown format tag {fmt}")]
    UnknownFormat { file: String, fmt: i64 },

    #[error("shard loader task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
