use crate::config::{require_str, str_or, timeout};
use crate::language::{run_with_timeout, LanguageRegistry, Program, POINTER};
use async_trait::async_trait;
use portcore::{Node, NodeError, OneToManyAction, OneToManyNode, Packet, Process, Spec};
use portruntime::{NodeFactory, NodeMetadata, PortDefinition};
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "if";

/// Routes each packet to `out[0]` when the predicate is truthy, `out[1]`
/// otherwise.
pub fn if_node(predicate: Arc<dyn Program>, timeout: Option<Duration>) -> OneToManyNode {
    OneToManyNode::with_action(IfAction { predicate, timeout })
}

struct IfAction {
    predicate: Arc<dyn Program>,
    timeout: Option<Duration>,
}

#[async_trait]
impl OneToManyAction for IfAction {
    async fn run(&self, _proc: &Process, inpck: Packet) -> (Vec<Option<Packet>>, Option<Packet>) {
        let verdict = run_with_timeout(self.predicate.as_ref(), inpck.payload(), self.timeout).await;
        match verdict {
            Ok(value) if value.is_truthy() => (vec![Some(inpck), None], None),
            Ok(_) => (vec![None, Some(inpck)], None),
            Err(err) => (Vec::new(), Some(Packet::error(err))),
        }
    }
}

pub struct IfNodeFactory {
    languages: Arc<LanguageRegistry>,
}

impl IfNodeFactory {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self { languages }
    }
}

impl NodeFactory for IfNodeFactory {
    fn create(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        let language = str_or(spec, "language", POINTER);
        let when = require_str(spec, "when")?;
        let predicate = self.languages.compile(language, when)?;
        Ok(Box::new(if_node(predicate, timeout(spec))))
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route packets on a predicate".to_string(),
            category: "flow".to_string(),
            inputs: vec![PortDefinition::new("in", "Packet to route")],
            outputs: vec![
                PortDefinition::new("out[0]", "Predicate held"),
                PortDefinition::new("out[1]", "Predicate failed"),
                PortDefinition::new("error", "Predicate failure"),
            ],
        }
    }
}
