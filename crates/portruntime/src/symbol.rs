use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use portcore::{InPort, Node, NodeError, OutPort, PortLocation, Spec};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// A compiled node bound to the spec it came from.
///
/// Port lookups are memoized. Closing releases the node exactly once; after
/// that every port lookup reports "not found".
#[derive(Clone)]
pub struct Symbol {
    inner: Arc<SymbolInner>,
}

struct SymbolInner {
    spec: Arc<Spec>,
    node: RwLock<Option<Arc<dyn Node>>>,
    ins: Mutex<HashMap<String, InPort>>,
    outs: Mutex<HashMap<String, OutPort>>,
}

impl Symbol {
    pub fn new(spec: impl Into<Arc<Spec>>, node: Box<dyn Node>) -> Self {
        Self {
            inner: Arc::new(SymbolInner {
                spec: spec.into(),
                node: RwLock::new(Some(Arc::from(node))),
                ins: Mutex::new(HashMap::new()),
                outs: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn spec(&self) -> &Spec {
        &self.inner.spec
    }

    pub fn id(&self) -> Uuid {
        self.inner.spec.id
    }

    pub fn kind(&self) -> &str {
        &self.inner.spec.kind
    }

    pub fn namespace(&self) -> &str {
        &self.inner.spec.namespace
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.spec.name.as_deref()
    }

    pub fn links(&self) -> &BTreeMap<String, Vec<PortLocation>> {
        &self.inner.spec.links
    }

    /// The underlying node, `None` once closed.
    pub fn node(&self) -> Option<Arc<dyn Node>> {
        self.inner.node.read().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.node.read().is_none()
    }
}

#[async_trait]
impl Node for Symbol {
    fn in_port(&self, name: &str) -> Option<InPort> {
        let node = self.node()?;
        if let Some(port) = self.inner.ins.lock().get(name) {
            return Some(port.clone());
        }
        let port = node.in_port(name)?;
        self.inner.ins.lock().insert(name.to_string(), port.clone());
        Some(port)
    }

    fn out_port(&self, name: &str) -> Option<OutPort> {
        let node = self.node()?;
        if let Some(port) = self.inner.outs.lock().get(name) {
            return Some(port.clone());
        }
        let port = node.out_port(name)?;
        self.inner.outs.lock().insert(name.to_string(), port.clone());
        Some(port)
    }

    async fn close(&self) -> Result<(), NodeError> {
        let node = self.inner.node.write().take();
        self.inner.ins.lock().clear();
        self.inner.outs.lock().clear();
        match node {
            Some(node) => node.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Symbol")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("namespace", &self.namespace())
            .field("name", &self.name())
            .finish()
    }
}
