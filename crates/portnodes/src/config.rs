use portcore::{NodeError, Spec};
use std::time::Duration;

pub(crate) fn require_str<'a>(spec: &'a Spec, key: &str) -> Result<&'a str, NodeError> {
    spec.config
        .get(key)
        .ok_or_else(|| NodeError::Configuration(format!("Missing config: {}", key)))?
        .as_str()
        .ok_or_else(|| NodeError::InvalidInputType {
            field: key.to_string(),
            expected: "string".to_string(),
            actual: "other".to_string(),
        })
}

pub(crate) fn str_or<'a>(spec: &'a Spec, key: &str, default: &'a str) -> &'a str {
    spec.config
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or(default)
}

pub(crate) fn timeout(spec: &Spec) -> Option<Duration> {
    spec.config
        .get("timeout_ms")
        .and_then(|v| v.as_u64())
        .map(Duration::from_millis)
}
