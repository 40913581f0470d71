use portcore::{FlowError, NodeError};
use thiserror::Error;
use uuid::Uuid;

/// Structural failures reported by table mutations
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Duplicate symbol id: {0}")]
    DuplicateId(Uuid),

    #[error("Duplicate symbol name '{name}' in namespace '{namespace}'")]
    DuplicateName { namespace: String, name: String },

    #[error("Failed to compile '{kind}': {source}")]
    Compile {
        kind: String,
        #[source]
        source: NodeError,
    },

    #[error("Link target {target} lives in namespace '{found}', expected '{expected}'")]
    NamespaceMismatch {
        target: Uuid,
        expected: String,
        found: String,
    },

    #[error("Invalid link location for port '{port}': neither id nor name given")]
    InvalidLocation { port: String },

    #[error("Port '{port}' not found on symbol {symbol}")]
    PortNotFound { symbol: Uuid, port: String },

    #[error("Load hook failed: {0}")]
    LoadHook(#[source] FlowError),

    #[error("Unload hook failed: {0}")]
    UnloadHook(#[source] FlowError),

    #[error("Failed to close symbol {id}: {source}")]
    Close {
        id: Uuid,
        #[source]
        source: NodeError,
    },
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Timeout after {millis}ms")]
    Timeout { millis: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
