use thiserror::Error;

/// Main error type for the Vigil supervisor
#[derive(Debug, Error)]
pub enum VigilError {
    // Process-related errors
    #[error("Invalid process spec: {0}")]
    InvalidSpec(String),

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Supervisor for '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Restart budget exhausted for {0}")]
    RestartBudgetExhausted(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // System errors
    #[error("Signal error: {0}")]
    SignalError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
