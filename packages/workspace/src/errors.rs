use quire_editor::OperationError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Operation rejected: {0}")]
    Rejected(#[from] OperationError),

    #[error("Session is closed")]
    Closed,

    #[error("Expected event {expected}, received {received}")]
    OutOfOrder { expected: u64, received: u64 },

    #[error("Operation log error: {0}")]
    Log(#[from] LogError),

    #[error("An operation log must start from an empty notebook")]
    UnloggedInitialState,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Channel capacities must be greater than zero")]
    ZeroCapacity,
}

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid entry on line {line}: {source}")]
    Parse {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Failed to encode entry: {0}")]
    Encode(serde_json::Error),
}
