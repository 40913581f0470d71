//! Core abstractions for the packet flow engine
//!
//! Packets, ports, nodes, processes and transactions. Everything above this
//! crate (symbol table, node library, CLI) builds on these types.

mod error;
pub mod node;
pub mod packet;
pub mod port;
pub mod process;
mod spec;
pub mod transaction;
mod value;

pub use error::{FlowError, NodeError, TransactionError};
pub use node::{Node, OneToManyAction, OneToManyNode, OneToOneAction, OneToOneNode};
pub use packet::Packet;
pub use port::{InPort, Listener, OutPort, Reader, Reply, Ticket, Writer};
pub use process::{Process, ProcessId, Status};
pub use spec::{Flow, PortLocation, Spec, DEFAULT_NAMESPACE};
pub use transaction::Transaction;
pub use value::Value;

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
