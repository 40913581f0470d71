// crates/portnodes/tests/nodes_test.rs
use async_trait::async_trait;
use portcore::{
    packet, Flow, Node, NodeError, OutPort, Packet, PortLocation, Process, Spec, Value,
};
use portnodes::language::run_with_timeout;
use portnodes::{switch_node, Branch, Compiler, LanguageRegistry, Program};
use portruntime::{Runtime, RuntimeError, Scheme, TableError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> Runtime {
    let mut scheme = Scheme::new();
    portnodes::register_all(&mut scheme, Arc::new(LanguageRegistry::with_builtins()));
    Runtime::new(Arc::new(scheme))
}

fn constant(name: &str, literal: serde_json::Value) -> Spec {
    Spec::new("snippet")
        .with_name(name)
        .with_config("language", "json")
        .with_config("code", literal.to_string())
}

fn payload(value: serde_json::Value) -> Value {
    Value::from_json(value)
}

struct Sleepy;

#[async_trait]
impl Program for Sleepy {
    async fn run(&self, input: &Value) -> Result<Value, NodeError> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(input.clone())
    }
}

struct SleepyCompiler;

impl Compiler for SleepyCompiler {
    fn compile(&self, _code: &str) -> Result<Arc<dyn Program>, NodeError> {
        Ok(Arc::new(Sleepy))
    }
}

#[tokio::test]
async fn test_builtin_languages() {
    let languages = LanguageRegistry::with_builtins();
    assert_eq!(languages.languages(), vec!["json".to_string(), "pointer".to_string()]);

    let literal = languages.compile("json", r#"{"a": 1.5}"#).unwrap();
    assert_eq!(
        literal.run(&Value::Null).await.unwrap(),
        payload(json!({"a": 1.5}))
    );

    let pointer = languages.compile("pointer", "/user/name").unwrap();
    let input = payload(json!({"user": {"name": "ada"}}));
    assert_eq!(pointer.run(&input).await.unwrap(), Value::from("ada"));
    assert_eq!(pointer.run(&Value::Null).await.unwrap(), Value::Null);
}

#[test]
fn test_compile_errors() {
    let languages = LanguageRegistry::with_builtins();
    assert!(matches!(
        languages.compile("lua", "return 1"),
        Err(NodeError::UnknownLanguage(_))
    ));
    assert!(matches!(
        languages.compile("json", "{ broken"),
        Err(NodeError::Configuration(_))
    ));
    assert!(matches!(
        languages.compile("pointer", "no-slash"),
        Err(NodeError::Configuration(_))
    ));
}

#[tokio::test]
async fn test_program_timeout() {
    let mut languages = LanguageRegistry::new();
    languages.register("sleepy", Arc::new(SleepyCompiler));
    let program = languages.compile("sleepy", "").unwrap();

    let result = run_with_timeout(program.as_ref(), &Value::Null, Some(Duration::from_millis(20))).await;
    assert!(matches!(result, Err(NodeError::Timeout { millis: 20 })));
}

#[tokio::test]
async fn test_snippet_extracts_with_pointer() {
    let runtime = runtime();
    let mut flow = Flow::new("snippet");
    flow.add(
        Spec::new("snippet")
            .with_name("extract")
            .with_config("code", "/items/1"),
    );
    runtime.load(&flow).await.unwrap();

    let pck = runtime
        .call("extract", "in", payload(json!({"items": ["a", "b"]})))
        .await
        .unwrap();
    assert_eq!(pck.payload(), &Value::from("b"));
    runtime.close().await.unwrap();
}

#[tokio::test]
async fn test_snippet_requires_code() {
    let runtime = runtime();
    let mut flow = Flow::new("broken");
    flow.add(Spec::new("snippet").with_name("extract"));

    let result = runtime.load(&flow).await;
    assert!(matches!(
        result,
        Err(RuntimeError::Table(TableError::Compile {
            source: NodeError::Configuration(_),
            ..
        }))
    ));
}

#[tokio::test]
async fn test_if_routes_on_predicate() {
    let runtime = runtime();
    let mut flow = Flow::new("if");
    flow.add(
        Spec::new("if")
            .with_name("check")
            .with_config("when", "/admin")
            .with_link("out[0]", PortLocation::by_name("yes", "in"))
            .with_link("out[1]", PortLocation::by_name("no", "in")),
    );
    flow.add(constant("yes", json!("granted")));
    flow.add(constant("no", json!("denied")));
    runtime.load(&flow).await.unwrap();

    let pck = runtime
        .call("check", "in", payload(json!({"admin": true})))
        .await
        .unwrap();
    assert_eq!(pck.payload(), &Value::from("granted"));

    let pck = runtime
        .call("check", "in", payload(json!({"admin": false})))
        .await
        .unwrap();
    assert_eq!(pck.payload(), &Value::from("denied"));

    let pck = runtime.call("check", "in", Value::Null).await.unwrap();
    assert_eq!(pck.payload(), &Value::from("denied"));
}

#[tokio::test]
async fn test_switch_picks_first_match() {
    let runtime = runtime();
    let mut flow = Flow::new("switch");
    flow.add(
        Spec::new("switch")
            .with_name("route")
            .with_config(
                "matches",
                json!([
                    { "when": "/urgent", "port": "out[1]" },
                    { "when": "/normal", "port": "out" },
                ]),
            )
            .with_link("out[0]", PortLocation::by_name("normal", "in"))
            .with_link("out[1]", PortLocation::by_name("urgent", "in")),
    );
    flow.add(constant("normal", json!("queued")));
    flow.add(constant("urgent", json!("paged")));
    runtime.load(&flow).await.unwrap();

    let pck = runtime
        .call("route", "in", payload(json!({"urgent": true, "normal": true})))
        .await
        .unwrap();
    assert_eq!(pck.payload(), &Value::from("paged"));

    let pck = runtime
        .call("route", "in", payload(json!({"normal": 1.0})))
        .await
        .unwrap();
    assert_eq!(pck.payload(), &Value::from("queued"));

    let pck = runtime
        .call("route", "in", payload(json!({})))
        .await
        .unwrap();
    assert!(pck.is_error());
}

#[tokio::test]
async fn test_switch_rejects_non_out_ports() {
    let runtime = runtime();
    let mut flow = Flow::new("switch");
    flow.add(
        Spec::new("switch")
            .with_name("route")
            .with_config("matches", json!([{ "when": "", "port": "error" }])),
    );
    assert!(runtime.load(&flow).await.is_err());
}

#[tokio::test]
async fn test_switch_rejects_out_of_range_ports() {
    for port in ["out[18446744073709551615]", "out[100000000]"] {
        let runtime = runtime();
        let mut flow = Flow::new("switch");
        flow.add(
            Spec::new("switch")
                .with_name("route")
                .with_config("matches", json!([{ "when": "/a", "port": port }])),
        );
        let result = runtime.load(&flow).await;
        assert!(
            matches!(
                result,
                Err(RuntimeError::Table(TableError::Compile {
                    source: NodeError::Configuration(_),
                    ..
                }))
            ),
            "{} should be rejected",
            port
        );
    }
}

#[tokio::test]
async fn test_switch_with_out_of_range_branch_answers_with_error() {
    let languages = LanguageRegistry::with_builtins();
    let node = switch_node(
        vec![Branch {
            when: languages.compile("json", "true").unwrap(),
            index: usize::MAX,
        }],
        None,
    );

    let driver = OutPort::new();
    driver.link(&node.in_port("in").unwrap());
    let proc = Process::new();
    let ack = tokio::time::timeout(
        Duration::from_secs(1),
        packet::call(&driver.open(&proc), Packet::new("x")),
    )
    .await
    .expect("switch should answer");
    assert!(ack.is_error());
    proc.exit(None);
}

#[tokio::test]
async fn test_log_forwards_payload() {
    let runtime = runtime();
    let mut flow = Flow::new("log");
    flow.add(
        Spec::new("log")
            .with_name("trace")
            .with_link("out", PortLocation::by_name("extract", "in")),
    );
    flow.add(
        Spec::new("snippet")
            .with_name("extract")
            .with_config("code", "/id"),
    );
    runtime.load(&flow).await.unwrap();

    let pck = runtime
        .call("trace", "in", payload(json!({"id": 7.0})))
        .await
        .unwrap();
    assert_eq!(pck.payload(), &Value::Number(7.0));
}

#[test]
fn test_register_all_kinds() {
    let mut scheme = Scheme::new();
    portnodes::register_all(&mut scheme, Arc::new(LanguageRegistry::default()));
    assert_eq!(scheme.kinds(), vec!["if", "log", "snippet", "switch"]);
}
