use crate::config::{str_or, timeout};
use crate::language::{run_with_timeout, LanguageRegistry, Program, POINTER};
use async_trait::async_trait;
use portcore::node::MAX_OUT_PORTS;
use portcore::port::{index_of_port, name_of_port, PORT_OUT};
use portcore::{Node, NodeError, OneToManyAction, OneToManyNode, Packet, Process, Spec};
use portruntime::{NodeFactory, NodeMetadata, PortDefinition};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "switch";

/// One branch of a switch: the first truthy `when` picks `out[index]`
pub struct Branch {
    pub when: Arc<dyn Program>,
    pub index: usize,
}

/// Routes each packet to the port of the first matching branch. A packet no
/// branch matches becomes an error.
pub fn switch_node(branches: Vec<Branch>, timeout: Option<Duration>) -> OneToManyNode {
    OneToManyNode::with_action(SwitchAction { branches, timeout })
}

struct SwitchAction {
    branches: Vec<Branch>,
    timeout: Option<Duration>,
}

#[async_trait]
impl OneToManyAction for SwitchAction {
    async fn run(&self, _proc: &Process, inpck: Packet) -> (Vec<Option<Packet>>, Option<Packet>) {
        for branch in &self.branches {
            let verdict = run_with_timeout(branch.when.as_ref(), inpck.payload(), self.timeout).await;
            match verdict {
                Ok(value) if value.is_truthy() => {
                    if branch.index >= MAX_OUT_PORTS {
                        let err = NodeError::Configuration(format!(
                            "Switch port index {} out of range",
                            branch.index
                        ));
                        return (Vec::new(), Some(Packet::error(err)));
                    }
                    let mut outpcks = vec![None; branch.index + 1];
                    outpcks[branch.index] = Some(inpck);
                    return (outpcks, None);
                }
                Ok(_) => continue,
                Err(err) => return (Vec::new(), Some(Packet::error(err))),
            }
        }
        (
            Vec::new(),
            Some(Packet::error(NodeError::ExecutionFailed(
                "no branch matched".to_string(),
            ))),
        )
    }
}

#[derive(Deserialize)]
struct MatchConfig {
    when: String,
    port: String,
}

pub struct SwitchNodeFactory {
    languages: Arc<LanguageRegistry>,
}

impl SwitchNodeFactory {
    pub fn new(languages: Arc<LanguageRegistry>) -> Self {
        Self { languages }
    }
}

impl NodeFactory for SwitchNodeFactory {
    fn create(&self, spec: &Spec) -> Result<Box<dyn Node>, NodeError> {
        let language = str_or(spec, "language", POINTER);
        let matches = spec
            .config
            .get("matches")
            .cloned()
            .ok_or_else(|| NodeError::Configuration("Missing config: matches".to_string()))?;
        let matches: Vec<MatchConfig> = serde_json::from_value(matches)
            .map_err(|e| NodeError::Configuration(format!("Invalid matches: {}", e)))?;

        let mut branches = Vec::with_capacity(matches.len());
        for m in matches {
            if name_of_port(&m.port) != PORT_OUT {
                return Err(NodeError::Configuration(format!(
                    "Switch can only route to out ports, got '{}'",
                    m.port
                )));
            }
            let index = index_of_port(&m.port).unwrap_or(0);
            if index >= MAX_OUT_PORTS {
                return Err(NodeError::Configuration(format!(
                    "Switch port '{}' exceeds the {} out ports a node can have",
                    m.port, MAX_OUT_PORTS
                )));
            }
            branches.push(Branch {
                when: self.languages.compile(language, &m.when)?,
                index,
            });
        }
        Ok(Box::new(switch_node(branches, timeout(spec))))
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Route packets to the first matching branch".to_string(),
            category: "flow".to_string(),
            inputs: vec![PortDefinition::new("in", "Packet to route")],
            outputs: vec![
                PortDefinition::new("out[i]", "Branch targets"),
                PortDefinition::new("error", "No match or predicate failure"),
            ],
        }
    }
}
