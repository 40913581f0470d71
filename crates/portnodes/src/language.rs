// crates/portnodes/src/language.rs
//! Predicate/transform compilers.
//!
//! Nodes never parse expressions themselves: they ask a [`LanguageRegistry`]
//! to turn `(language, code)` into a [`Program`]. The registry is an ordinary
//! value handed to whoever builds the node factories.

use async_trait::async_trait;
use portcore::{NodeError, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub const JSON: &str = "json";
pub const POINTER: &str = "pointer";

/// A compiled transform
#[async_trait]
pub trait Program: Send + Sync {
    async fn run(&self, input: &Value) -> Result<Value, NodeError>;
}

pub trait Compiler: Send + Sync {
    fn compile(&self, code: &str) -> Result<Arc<dyn Program>, NodeError>;
}

pub struct LanguageRegistry {
    compilers: HashMap<String, Arc<dyn Compiler>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self {
            compilers: HashMap::new(),
        }
    }

    /// Registry preloaded with `json` and `pointer`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(JSON, Arc::new(JsonCompiler));
        registry.register(POINTER, Arc::new(PointerCompiler));
        registry
    }

    pub fn register(&mut self, language: impl Into<String>, compiler: Arc<dyn Compiler>) {
        self.compilers.insert(language.into(), compiler);
    }

    pub fn compile(&self, language: &str, code: &str) -> Result<Arc<dyn Program>, NodeError> {
        let compiler = self
            .compilers
            .get(language)
            .ok_or_else(|| NodeError::UnknownLanguage(language.to_string()))?;
        compiler.compile(code)
    }

    pub fn languages(&self) -> Vec<String> {
        let mut languages: Vec<String> = self.compilers.keys().cloned().collect();
        languages.sort();
        languages
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Runs `program`, giving up after `timeout` if one is set
pub async fn run_with_timeout(
    program: &dyn Program,
    input: &Value,
    timeout: Option<Duration>,
) -> Result<Value, NodeError> {
    match timeout {
        Some(limit) => tokio::time::timeout(limit, program.run(input))
            .await
            .map_err(|_| NodeError::Timeout {
                millis: limit.as_millis() as u64,
            })?,
        None => program.run(input).await,
    }
}

/// `json`: the code is a JSON literal and the program always returns it
struct JsonCompiler;

impl Compiler for JsonCompiler {
    fn compile(&self, code: &str) -> Result<Arc<dyn Program>, NodeError> {
        let literal: serde_json::Value = serde_json::from_str(code)
            .map_err(|e| NodeError::Configuration(format!("JSON parse error: {}", e)))?;
        Ok(Arc::new(Constant(Value::from_json(literal))))
    }
}

struct Constant(Value);

#[async_trait]
impl Program for Constant {
    async fn run(&self, _input: &Value) -> Result<Value, NodeError> {
        Ok(self.0.clone())
    }
}

/// `pointer`: the code is an RFC 6901 JSON pointer into the input
struct PointerCompiler;

impl Compiler for PointerCompiler {
    fn compile(&self, code: &str) -> Result<Arc<dyn Program>, NodeError> {
        if !code.is_empty() && !code.starts_with('/') {
            return Err(NodeError::Configuration(format!(
                "JSON pointer must be empty or start with '/': {}",
                code
            )));
        }
        Ok(Arc::new(Pointer(code.to_string())))
    }
}

struct Pointer(String);

#[async_trait]
impl Program for Pointer {
    async fn run(&self, input: &Value) -> Result<Value, NodeError> {
        let json = input.to_json();
        Ok(json
            .pointer(&self.0)
            .cloned()
            .map(Value::from_json)
            .unwrap_or(Value::Null))
    }
}
