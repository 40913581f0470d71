//! Flow runtime
//!
//! This crate compiles specs into live nodes, keeps them in a symbol table
//! that wires declared links as endpoints appear, and drives one-shot calls
//! into the resulting network.

mod error;
pub mod loader;
mod runtime;
mod scheme;
mod symbol;
mod table;

pub use error::{RuntimeError, TableError};
pub use runtime::{Runtime, RuntimeConfig};
pub use scheme::{Codec, NodeFactory, NodeMetadata, PortDefinition, Scheme};
pub use symbol::Symbol;
pub use table::{LoadHook, Table, TableOptions, UnloadHook};
