use async_trait::async_trait;
use portcore::{InPort, Node, NodeError, OutPort, Spec};
use portruntime::Symbol;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out a fresh port on every lookup and counts lookups and closes.
#[derive(Default)]
struct Fresh {
    lookups: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Node for Fresh {
    fn in_port(&self, name: &str) -> Option<InPort> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        (name == "in").then(InPort::new)
    }

    fn out_port(&self, name: &str) -> Option<OutPort> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        (name == "out").then(OutPort::new)
    }

    async fn close(&self) -> Result<(), NodeError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn symbol() -> (Symbol, Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let node = Fresh::default();
    let lookups = node.lookups.clone();
    let closes = node.closes.clone();
    let symbol = Symbol::new(Spec::new("fresh").with_name("fresh"), Box::new(node));
    (symbol, lookups, closes)
}

#[tokio::test]
async fn test_port_lookups_are_memoized() {
    let (symbol, lookups, _) = symbol();

    let out = symbol.out_port("out").unwrap();
    let target = InPort::new();
    out.link(&target);
    assert!(symbol.out_port("out").unwrap().is_linked(&target));

    let first = symbol.in_port("in").unwrap();
    let source = OutPort::new();
    source.link(&first);
    assert_eq!(symbol.in_port("in").unwrap().links(), 1);

    assert_eq!(lookups.load(Ordering::SeqCst), 2, "one node lookup per port");
}

#[tokio::test]
async fn test_unknown_ports_are_not_found() {
    let (symbol, _, _) = symbol();
    assert!(symbol.in_port("nope").is_none());
    assert!(symbol.out_port("nope").is_none());
}

#[tokio::test]
async fn test_closed_symbol_finds_no_ports() {
    let (symbol, lookups, closes) = symbol();
    symbol.out_port("out").unwrap();

    symbol.close().await.unwrap();
    symbol.close().await.unwrap();
    assert_eq!(closes.load(Ordering::SeqCst), 1, "node closed exactly once");
    assert!(symbol.is_closed());
    assert!(symbol.node().is_none());

    let before = lookups.load(Ordering::SeqCst);
    assert!(symbol.in_port("in").is_none());
    assert!(symbol.out_port("out").is_none());
    assert_eq!(lookups.load(Ordering::SeqCst), before);
    assert_eq!(symbol.name(), Some("fresh"));
}
