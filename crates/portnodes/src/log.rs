use portcore::{Node, NodeError, OneToOneNode, Packet, Process, Spec};
use portruntime::{NodeFactory, NodeMetadata, PortDefinition};

pub const KIND: &str = "log";

/// Logs every payload and forwards it unchanged
pub fn log_node(label: impl Into<String>) -> OneToOneNode {
    let label = label.into();
    OneToOneNode::new(move |proc: &Process, inpck: Packet| {
        tracing::info!(node = %label, process = %proc.id(), payload = ?inpck.payload(), "packet");
        (Some(inpck), None)
    })
}

pub struct LogNodeFactory;

impl NodeFactory for LogNodeFactory {
    fn create(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        let label = spec
            .name
            .clone()
            .unwrap_or_else(|| spec.id.to_string());
        Ok(Box::new(log_node(label)))
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs payloads for debugging".to_string(),
            category: "debug".to_string(),
            inputs: vec![PortDefinition::new("in", "Payload to log")],
            outputs: vec![PortDefinition::new("out", "The same payload")],
        }
    }
}
