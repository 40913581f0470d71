use portcore::{Node, NodeError, Spec};
use std::collections::HashMap;
use std::sync::Arc;

/// Compiles a spec into a live node
pub trait Codec: Send + Sync {
    fn compile(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError>;
}

impl<F> Codec for F
where
    F: Fn(&Spec) -> Result<Box<dyn Node>, NodeError> + Send + Sync,
{
    fn compile(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        self(spec)
    }
}

/// Factory trait for creating node instances of one kind
pub trait NodeFactory: Send + Sync {
    /// Create a new node from its spec
    fn create(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError>;

    /// Kind identifier matched against `Spec::kind`
    fn kind(&self) -> &str;

    /// Optional: description and port layout for tooling
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node kind
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDefinition {
    pub name: String,
    pub description: String,
}

impl PortDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Registry of node kinds; dispatches compilation on `Spec::kind`
pub struct Scheme {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl Scheme {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let kind = factory.kind().to_string();
        tracing::info!("Registering node kind: {}", kind);
        self.factories.insert(kind, factory);
    }

    /// Get all registered kinds, sorted
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn metadata(&self, kind: &str) -> Option<NodeMetadata> {
        self.factories.get(kind).map(|f| f.metadata())
    }
}

impl Codec for Scheme {
    fn compile(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| NodeError::UnknownKind(spec.kind.clone()))?;
        factory.create(spec)
    }
}

impl Default for Scheme {
    fn default() -> Self {
        Self::new()
    }
}
