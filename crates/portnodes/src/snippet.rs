use crate::config::{require_str, str_or, timeout};
use crate::language::{run_with_timeout, LanguageRegistry, Program, POINTER};
use async_trait::async_trait;
use portcore::{Node, NodeError, OneToOneAction, OneToOneNode, Packet, Process, Spec};
use portruntime::{NodeFactory, NodeMetadata, PortDefinition};
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "snippet";

/// Transform each payload with a compiled program.
///
/// A failing or timed-out program produces an error packet.
pub fn snippet_node(program: Arc<dyn Program>, timeout: Option<Duration>) -> OneToOneNode {
    OneToOneNode::with_action(SnippetAction { program, timeout })
}

struct SnippetAction {
    program: Arc<dyn Program>,
    timeout: Option<Duration>,
}

#[async_trait]
impl OneToOneAction for SnippetAction {
    async fn run(&self, _proc: &Process, inpck: Packet) -> (Option<Packet>, Option<Packet>) {
        match run_with_timeout(self.program.as_ref(), inpck.payload(), self.timeout).await {
            Ok(value) => (Some(Packet::new(value)), None),
            Err(err) => (None, Some(Packet::error(err))),
        }
    }
}

pub struct SnippetNodeFactory {
    languages: Arc<LanguageRegistry>,
}

impl SnippetNodeFactory {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self { languages }
    }
}

impl NodeFactory for SnippetNodeFactory {
    fn create(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        let language = str_or(spec, "language", POINTER);
        let code = require_str(spec, "code")?;
        let program = self.languages.compile(language, code)?;
        Ok(Box::new(snippet_node(program, timeout(spec))))
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Transform payloads with a compiled program".to_string(),
            category: "transform".to_string(),
            inputs: vec![PortDefinition::new("in", "Payload to transform")],
            outputs: vec![
                PortDefinition::new("out", "Program result"),
                PortDefinition::new("error", "Program failure"),
            ],
        }
    }
}
