//! The symbol table: owns live symbols and materializes declared links.
//!
//! Link intentions are resolved lazily. A link is wired with
//! `OutPort::link` only once both of its endpoints are present, regardless
//! of which endpoint was inserted first. Materialized links are mirrored as
//! edges of a graph over the symbols, which is also what load activation
//! sweeps: a symbol is loaded once nothing reachable from it still has an
//! unresolved link.

use crate::scheme::Codec;
use crate::symbol::Symbol;
use crate::TableError;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{Dfs, EdgeRef, Reversed};
use petgraph::Direction;
use portcore::{FlowError, Node, PortLocation, Spec};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Fired once a symbol's link closure is fully present.
pub trait LoadHook: Send + Sync {
    fn load(&self, symbol: &Symbol) -> Result<(), FlowError>;
}

/// Fired when a loaded symbol is freed.
pub trait UnloadHook: Send + Sync {
    fn unload(&self, symbol: &Symbol) -> Result<(), FlowError>;
}

impl<F> LoadHook for F
where
    F: Fn(&Symbol) -> Result<(), FlowError> + Send + Sync,
{
    fn load(&self, symbol: &Symbol) -> Result<(), FlowError> {
        self(symbol)
    }
}

impl<F> UnloadHook for F
where
    F: Fn(&Symbol) -> Result<(), FlowError> + Send + Sync,
{
    fn unload(&self, symbol: &Symbol) -> Result<(), FlowError> {
        self(symbol)
    }
}

#[derive(Default, Clone)]
pub struct TableOptions {
    pub load_hooks: Vec<Arc<dyn LoadHook>>,
    pub unload_hooks: Vec<Arc<dyn UnloadHook>>,
}

impl TableOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_load<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Symbol) -> Result<(), FlowError> + Send + Sync + 'static,
    {
        self.load_hooks.push(Arc::new(hook));
        self
    }

    pub fn on_unload<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Symbol) -> Result<(), FlowError> + Send + Sync + 'static,
    {
        self.unload_hooks.push(Arc::new(hook));
        self
    }
}

pub struct Table {
    codec: Arc<dyn Codec>,
    load_hooks: Vec<Arc<dyn LoadHook>>,
    unload_hooks: Vec<Arc<dyn UnloadHook>>,
    state: Mutex<TableState>,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<Uuid, Entry>,
    names: HashMap<(String, String), Uuid>,
    graph: StableDiGraph<Uuid, Wire>,
    next_seq: u64,
}

struct Entry {
    symbol: Symbol,
    index: NodeIndex,
    seq: u64,
    loaded: bool,
}

/// One materialized link: `source.out` feeds `target.port`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Wire {
    out: String,
    port: String,
}

impl Table {
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self::with_options(codec, TableOptions::default())
    }

    pub fn with_options(codec: Arc<dyn Codec>, options: TableOptions) -> Self {
        Self {
            codec,
            load_hooks: options.load_hooks,
            unload_hooks: options.unload_hooks,
            state: Mutex::new(TableState::default()),
        }
    }

    /// Compiles `spec`, registers the symbol, wires every link whose two
    /// endpoints are now present and fires load hooks for symbols that just
    /// became fully resolvable.
    ///
    /// On any failure the new symbol is removed again, with its links undone.
    pub async fn insert(&self, spec: impl Into<Arc<Spec>>) -> Result<Symbol, TableError> {
        let spec: Arc<Spec> = spec.into();
        let mut state = self.state.lock().await;

        if state.entries.contains_key(&spec.id) {
            return Err(TableError::DuplicateId(spec.id));
        }
        if let Some(name) = &spec.name {
            if state.names.contains_key(&(spec.namespace.clone(), name.clone())) {
                return Err(TableError::DuplicateName {
                    namespace: spec.namespace.clone(),
                    name: name.clone(),
                });
            }
        }

        let node = self
            .codec
            .compile(&spec)
            .map_err(|source| TableError::Compile {
                kind: spec.kind.clone(),
                source,
            })?;
        let symbol = Symbol::new(spec, node);
        let id = symbol.id();
        state.register(symbol.clone());

        if let Err(err) = state.link(&symbol) {
            self.discard(&mut state, &symbol).await;
            return Err(err);
        }
        tracing::debug!(symbol = %id, kind = symbol.kind(), "inserted symbol");

        let ready = state.activations();
        if let Err(err) = self.load(&mut state, &ready) {
            self.discard(&mut state, &symbol).await;
            return Err(err);
        }
        Ok(symbol)
    }

    /// Unlinks the symbol from everything it is wired to, fires unload hooks
    /// if it was loaded, removes and closes it. `Ok(false)` for unknown ids.
    pub async fn free(&self, id: Uuid) -> Result<bool, TableError> {
        let mut state = self.state.lock().await;
        let (symbol, loaded) = match state.entries.get(&id) {
            Some(entry) => (entry.symbol.clone(), entry.loaded),
            None => return Ok(false),
        };

        if loaded {
            for hook in self.unload_hooks.iter().rev() {
                hook.unload(&symbol).map_err(TableError::UnloadHook)?;
            }
            tracing::info!(symbol = %id, "unloaded symbol");
        }

        state.remove(id);
        symbol
            .close()
            .await
            .map_err(|source| TableError::Close { id, source })?;
        tracing::debug!(symbol = %id, "freed symbol");
        Ok(true)
    }

    pub async fn lookup(&self, id: Uuid) -> Option<Symbol> {
        let state = self.state.lock().await;
        state.entries.get(&id).map(|e| e.symbol.clone())
    }

    pub async fn lookup_by_name(&self, namespace: &str, name: &str) -> Option<Symbol> {
        let state = self.state.lock().await;
        state
            .names
            .get(&(namespace.to_string(), name.to_string()))
            .and_then(|id| state.entries.get(id))
            .map(|e| e.symbol.clone())
    }

    /// Ids in insertion order.
    pub async fn keys(&self) -> Vec<Uuid> {
        let state = self.state.lock().await;
        state.ordered().iter().map(|e| e.symbol.id()).collect()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Frees every symbol, newest first. Stops at the first failure.
    pub async fn close(&self) -> Result<(), TableError> {
        for id in self.keys().await.into_iter().rev() {
            self.free(id).await?;
        }
        Ok(())
    }

    /// Runs load hooks for `ready` in order. If a hook fails, every symbol
    /// loaded by this call is unloaded again, newest first.
    fn load(&self, state: &mut TableState, ready: &[Symbol]) -> Result<(), TableError> {
        let mut loaded: Vec<&Symbol> = Vec::new();
        for symbol in ready {
            let result = self.load_hooks.iter().try_for_each(|hook| hook.load(symbol));
            if let Err(err) = result {
                for symbol in loaded.into_iter().rev() {
                    for hook in self.unload_hooks.iter().rev() {
                        if let Err(e) = hook.unload(symbol) {
                            tracing::warn!(symbol = %symbol.id(), "unload during rollback failed: {}", e);
                        }
                    }
                    if let Some(entry) = state.entries.get_mut(&symbol.id()) {
                        entry.loaded = false;
                    }
                }
                return Err(TableError::LoadHook(err));
            }

            if let Some(entry) = state.entries.get_mut(&symbol.id()) {
                entry.loaded = true;
            }
            loaded.push(symbol);
            tracing::info!(symbol = %symbol.id(), kind = symbol.kind(), "loaded symbol");
        }
        Ok(())
    }

    async fn discard(&self, state: &mut TableState, symbol: &Symbol) {
        state.remove(symbol.id());
        if let Err(e) = symbol.close().await {
            tracing::warn!(symbol = %symbol.id(), "failed to close discarded symbol: {}", e);
        }
    }
}

impl TableState {
    fn register(&mut self, symbol: Symbol) {
        let id = symbol.id();
        if let Some(name) = symbol.name() {
            self.names
                .insert((symbol.namespace().to_string(), name.to_string()), id);
        }
        let index = self.graph.add_node(id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(
            id,
            Entry {
                symbol,
                index,
                seq,
                loaded: false,
            },
        );
    }

    /// Undoes every materialized link touching `id` and forgets the symbol.
    fn remove(&mut self, id: Uuid) -> Option<Symbol> {
        let index = self.entries.get(&id)?.index;

        let wires: Vec<(NodeIndex, NodeIndex, Wire)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .chain(self.graph.edges_directed(index, Direction::Incoming))
            .map(|edge| (edge.source(), edge.target(), edge.weight().clone()))
            .collect();
        for (source, target, wire) in wires {
            let (Some(source), Some(target)) = (self.symbol_at(source), self.symbol_at(target))
            else {
                continue;
            };
            if let (Some(out), Some(port)) = (source.out_port(&wire.out), target.in_port(&wire.port)) {
                out.unlink(&port);
            }
        }

        self.graph.remove_node(index);
        let entry = self.entries.remove(&id)?;
        if let Some(name) = entry.symbol.name() {
            self.names
                .remove(&(entry.symbol.namespace().to_string(), name.to_string()));
        }
        Some(entry.symbol)
    }

    fn symbol_at(&self, index: NodeIndex) -> Option<&Symbol> {
        let id = self.graph.node_weight(index)?;
        self.entries.get(id).map(|e| &e.symbol)
    }

    fn ordered(&self) -> Vec<&Entry> {
        let mut entries: Vec<&Entry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    /// Wires the links `symbol` declares and the links already-present
    /// symbols in its namespace declare towards it.
    fn link(&mut self, symbol: &Symbol) -> Result<(), TableError> {
        for (out, locations) in symbol.links() {
            for location in locations {
                if let Some(target) = self.resolve(symbol, location)? {
                    self.connect(symbol, out, &target, &location.port)?;
                }
            }
        }

        let sources: Vec<Symbol> = self
            .ordered()
            .into_iter()
            .map(|e| e.symbol.clone())
            .filter(|s| s.id() != symbol.id() && s.namespace() == symbol.namespace())
            .collect();
        for source in sources {
            for (out, locations) in source.links() {
                for location in locations.iter().filter(|l| refers_to(l, symbol)) {
                    self.connect(&source, out, symbol, &location.port)?;
                }
            }
        }
        Ok(())
    }

    /// The present symbol a location points at. Ids must stay within the
    /// source's namespace; names are looked up in it.
    fn resolve(&self, source: &Symbol, location: &PortLocation) -> Result<Option<Symbol>, TableError> {
        if let Some(id) = location.id {
            return match self.entries.get(&id) {
                None => Ok(None),
                Some(entry) if entry.symbol.namespace() != source.namespace() => {
                    Err(TableError::NamespaceMismatch {
                        target: id,
                        expected: source.namespace().to_string(),
                        found: entry.symbol.namespace().to_string(),
                    })
                }
                Some(entry) => Ok(Some(entry.symbol.clone())),
            };
        }

        let Some(name) = &location.name else {
            return Err(TableError::InvalidLocation {
                port: location.port.clone(),
            });
        };
        Ok(self
            .names
            .get(&(source.namespace().to_string(), name.clone()))
            .and_then(|id| self.entries.get(id))
            .map(|e| e.symbol.clone()))
    }

    fn connect(&mut self, source: &Symbol, out: &str, target: &Symbol, port: &str) -> Result<(), TableError> {
        let out_port = source.out_port(out).ok_or_else(|| TableError::PortNotFound {
            symbol: source.id(),
            port: out.to_string(),
        })?;
        let in_port = target.in_port(port).ok_or_else(|| TableError::PortNotFound {
            symbol: target.id(),
            port: port.to_string(),
        })?;
        out_port.link(&in_port);

        let (Some(from), Some(to)) = (
            self.entries.get(&source.id()).map(|e| e.index),
            self.entries.get(&target.id()).map(|e| e.index),
        ) else {
            return Ok(());
        };
        let wire = Wire {
            out: out.to_string(),
            port: port.to_string(),
        };
        if !self.graph.edges_connecting(from, to).any(|e| e.weight() == &wire) {
            self.graph.add_edge(from, to, wire);
        }
        tracing::trace!(source = %source.id(), out, target = %target.id(), port, "linked ports");
        Ok(())
    }

    /// Not-yet-loaded symbols from which no unresolved link is reachable,
    /// in insertion order.
    fn activations(&self) -> Vec<Symbol> {
        let reversed = Reversed(&self.graph);
        let mut blocked: HashSet<NodeIndex> = HashSet::new();
        for entry in self.entries.values() {
            if self.is_resolved(&entry.symbol) || blocked.contains(&entry.index) {
                continue;
            }
            let mut dfs = Dfs::new(reversed, entry.index);
            while let Some(index) = dfs.next(reversed) {
                blocked.insert(index);
            }
        }

        self.ordered()
            .into_iter()
            .filter(|e| !e.loaded && !blocked.contains(&e.index))
            .map(|e| e.symbol.clone())
            .collect()
    }

    fn is_resolved(&self, symbol: &Symbol) -> bool {
        symbol
            .links()
            .values()
            .flatten()
            .all(|location| matches!(self.resolve(symbol, location), Ok(Some(_))))
    }
}

fn refers_to(location: &PortLocation, symbol: &Symbol) -> bool {
    match location.id {
        Some(id) => id == symbol.id(),
        None => location.name.is_some() && location.name.as_deref() == symbol.name(),
    }
}
