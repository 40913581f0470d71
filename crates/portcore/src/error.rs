use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Process terminated")]
    ProcessTerminated,

    #[error("Cancelled")]
    Cancelled,

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Invalid input type for '{field}': expected {expected}, got {actual}")]
    InvalidInputType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Unknown node kind: {0}")]
    UnknownKind(String),

    #[error("Unknown language: {0}")]
    UnknownLanguage(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Port closed")]
    Closed,

    #[error("Cancelled")]
    Cancelled,
}

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("Rollback failed: {}", join_errors(.0))]
    Rollback(Vec<FlowError>),
}

fn join_errors(errors: &[FlowError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
