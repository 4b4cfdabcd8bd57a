use thiserror::Error;

/// Errors raised inside the tracker.
///
/// None of these ever cross a pipeline callback: the coordinator logs and
/// discards them. They surface only from setup code (config, Redis connect,
/// binding the listener) and from sink implementations.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Host state unavailable: {0}")]
    HostState(String),

    #[error("Metric sink closed")]
    SinkClosed,

    #[error("Metric sink queue full, page hit dropped")]
    SinkFull,

    #[error("Metric sink error: {0}")]
    Sink(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;
