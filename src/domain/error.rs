use thiserror::Error;

/// Top-level error type for the relay pipeline.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::app::ConfigError),

    #[error("Decode error: {0}")]
    Decode(#[from] crate::codec::DecodeError),

    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),

    #[error("Stream error: {0}")]
    Stream(#[from] crate::stream::StreamError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    #[error("Logging initialization error: {0}")]
    Logging(#[from] crate::app::LoggingError),
}
