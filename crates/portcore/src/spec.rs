use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

pub const DEFAULT_NAMESPACE: &str = "default";

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Declarative description of one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spec {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub kind: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    /// Out port name to the in ports it feeds
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, Vec<PortLocation>>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub config: HashMap<String, serde_json::Value>,
}

impl Spec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            namespace: default_namespace(),
            name: None,
            annotations: HashMap::new(),
            links: BTreeMap::new(),
            config: HashMap::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn links(&self) -> &BTreeMap<String, Vec<PortLocation>> {
        &self.links
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_link(mut self, out_port: impl Into<String>, location: PortLocation) -> Self {
        self.links.entry(out_port.into()).or_default().push(location);
        self
    }
}

/// Declared link target: a spec by id or by name within the same namespace,
/// plus the in port to feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub port: String,
}

impl PortLocation {
    pub fn by_id(id: Uuid, port: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: None,
            port: port.into(),
        }
    }

    pub fn by_name(name: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            id: None,
            name: Some(name.into()),
            port: port.into(),
        }
    }
}

/// A named bundle of specs loaded together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub specs: Vec<Spec>,
}

impl Flow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            specs: Vec::new(),
        }
    }

    pub fn add(&mut self, spec: Spec) -> Uuid {
        let id = spec.id;
        self.specs.push(spec);
        id
    }

    pub fn find(&self, id: Uuid) -> Option<&Spec> {
        self.specs.iter().find(|s| s.id == id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Spec> {
        self.specs.iter().find(|s| s.name.as_deref() == Some(name))
    }
}
