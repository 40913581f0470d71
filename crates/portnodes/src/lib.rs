//! Standard node library
//!
//! Built-in nodes on top of the one-to-one and one-to-many adapters, plus
//! the language registry their predicates and transforms are compiled with.

mod branch;
mod config;
pub mod language;
mod log;
mod snippet;
mod switch;

pub use branch::{if_node, IfNodeFactory};
pub use language::{Compiler, LanguageRegistry, Program};
pub use log::{log_node, LogNodeFactory};
pub use snippet::{snippet_node, SnippetNodeFactory};
pub use switch::{switch_node, Branch, SwitchNodeFactory};
use portruntime::Scheme;

use std::sync::Arc;

/// Register all standard nodes with a scheme
pub fn register_all(scheme: &mut Scheme, languages: Arc<LanguageRegistry>) {
    scheme.register(Arc::new(LogNodeFactory));
    scheme.register(Arc::new(SnippetNodeFactory::new(languages.clone())));
    scheme.register(Arc::new(IfNodeFactory::new(languages.clone())));
    scheme.register(Arc::new(SwitchNodeFactory::new(languages)));
}
