use async_trait::async_trait;
use portcore::{
    Flow, Node, NodeError, OneToOneAction, OneToOneNode, Packet, PortLocation, Process, Spec,
    Value,
};
use portruntime::loader::{load_flow, load_flows};
use portruntime::{NodeFactory, Runtime, RuntimeConfig, RuntimeError, Scheme, TableError};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

struct UpperFactory;

impl NodeFactory for UpperFactory {
    fn create(&self, _spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(OneToOneNode::new(|_: &Process, pck: Packet| {
            match pck.payload().as_str() {
                Some(s) => (Some(Packet::new(s.to_uppercase())), None),
                None => (None, Some(Packet::error("expected a string"))),
            }
        })))
    }

    fn kind(&self) -> &str {
        "upper"
    }
}

struct Stall;

#[async_trait]
impl OneToOneAction for Stall {
    async fn run(&self, _proc: &Process, inpck: Packet) -> (Option<Packet>, Option<Packet>) {
        tokio::time::sleep(Duration::from_secs(30)).await;
        (Some(inpck), None)
    }
}

struct StallFactory;

impl NodeFactory for StallFactory {
    fn create(&self, _spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        Ok(Box::new(OneToOneNode::with_action(Stall)))
    }

    fn kind(&self) -> &str {
        "stall"
    }
}

fn scheme() -> Arc<Scheme> {
    let mut scheme = Scheme::new();
    scheme.register(Arc::new(UpperFactory));
    scheme.register(Arc::new(StallFactory));
    Arc::new(scheme)
}

fn upper_flow() -> Flow {
    let mut flow = Flow::new("upper");
    flow.add(
        Spec::new("upper")
            .with_name("first")
            .with_link("out", PortLocation::by_name("second", "in")),
    );
    flow.add(Spec::new("upper").with_name("second"));
    flow
}

#[test]
fn test_scheme_lists_kinds() {
    let scheme = scheme();
    assert_eq!(scheme.kinds(), vec!["stall".to_string(), "upper".to_string()]);
    assert!(scheme.metadata("upper").is_some());
    assert!(scheme.metadata("nope").is_none());
}

#[tokio::test]
async fn test_call_runs_through_the_flow() {
    let runtime = Runtime::new(scheme());
    let symbols = runtime.load(&upper_flow()).await.unwrap();
    assert_eq!(symbols.len(), 2);

    let pck = runtime.call("first", "in", Value::from("hello")).await.unwrap();
    assert_eq!(pck.payload(), &Value::from("HELLO"));

    let pck = runtime.call("first", "in", Value::Bool(true)).await.unwrap();
    assert_eq!(pck.error_message(), Some("expected a string"));

    runtime.close().await.unwrap();
    assert!(runtime.table().is_empty().await);
}

#[tokio::test]
async fn test_call_unknown_symbol_or_port() {
    let runtime = Runtime::new(scheme());
    runtime.load(&upper_flow()).await.unwrap();

    assert!(matches!(
        runtime.call("missing", "in", Value::Null).await,
        Err(RuntimeError::SymbolNotFound(_))
    ));
    assert!(matches!(
        runtime.call("first", "nope", Value::Null).await,
        Err(RuntimeError::PortNotFound(_))
    ));
}

#[tokio::test]
async fn test_call_timeout() {
    let config = RuntimeConfig {
        call_timeout: Some(Duration::from_millis(50)),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::with_config(scheme(), config);
    let mut flow = Flow::new("stall");
    flow.add(Spec::new("stall").with_name("stall"));
    runtime.load(&flow).await.unwrap();

    let result = runtime.call("stall", "in", Value::Null).await;
    assert!(matches!(result, Err(RuntimeError::Timeout { millis: 50 })));
}

#[tokio::test]
async fn test_load_failure_frees_loaded_specs() {
    let runtime = Runtime::new(scheme());
    let mut flow = upper_flow();
    flow.add(Spec::new("does-not-exist"));

    let result = runtime.load(&flow).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Table(TableError::Compile { .. }))
    ));
    assert!(runtime.table().is_empty().await);
}

#[test]
fn test_load_flows_from_directory() {
    let dir = std::env::temp_dir().join(format!("portflow-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();

    let second = upper_flow();
    let mut first = Flow::new("single");
    first.add(Spec::new("upper").with_name("only"));
    std::fs::write(dir.join("a.json"), serde_json::to_string(&first).unwrap()).unwrap();
    std::fs::write(dir.join("b.json"), serde_json::to_string(&second).unwrap()).unwrap();
    std::fs::write(dir.join("notes.txt"), "ignored").unwrap();

    let flows = load_flows(&dir).unwrap();
    let names: Vec<&str> = flows.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["single", "upper"]);
    assert_eq!(flows[1].specs, second.specs);

    let single = load_flow(&dir.join("a.json")).unwrap();
    assert_eq!(single.specs.len(), 1);

    std::fs::write(dir.join("c.json"), "{ not json").unwrap();
    assert!(matches!(
        load_flows(&dir),
        Err(RuntimeError::Serialization(_))
    ));

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_flow_json_defaults() {
    let json = r#"{
        "name": "minimal",
        "specs": [
            { "kind": "upper", "name": "x", "links": { "out": [ { "name": "y", "port": "in" } ] } }
        ]
    }"#;
    let flow: Flow = serde_json::from_str(json).unwrap();
    let spec = &flow.specs[0];
    assert_eq!(spec.namespace(), "default");
    assert_eq!(spec.links()["out"], vec![PortLocation::by_name("y", "in")]);
}
