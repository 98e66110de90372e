//! Shared error types, configuration, and the ASR model-size table used
//! across the whisper-api-rs workspace.

pub mod config;
pub mod logging;
pub mod model_size;

pub use config::Config;
pub use logging::{WireLogRecord, mask_uuids_in, privacy_mask_uuid};
pub use model_size::{ModelSize, SIZES};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WApiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid audio: {0}")]
    InvalidAudio(String),

    #[error("queue is full (capacity {0})")]
    QueueFull(usize),

    #[error("queue is empty")]
    QueueEmpty,

    #[error("task_id not valid")]
    UnknownTask,

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("inference failed: {0}")]
    InferenceError(String),

    #[error("channel closed")]
    ChannelClosed,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

pub type Result<T> = std::result::Result<T, WApiError>;
