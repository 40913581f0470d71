// crates/portruntime/src/loader.rs
use crate::RuntimeError;
use portcore::Flow;
use std::path::Path;

/// Read one flow file
pub fn load_flow(path: &Path) -> Result<Flow, RuntimeError> {
    let flow: Flow = serde_json::from_reader(std::fs::File::open(path)?)?;
    Ok(flow)
}

/// Read every `*.json` flow in a directory, ordered by file name
pub fn load_flows(dir: &Path) -> Result<Vec<Flow>, RuntimeError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension() == Some("json".as_ref()) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut flows = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::debug!("Loading flow from {}", path.display());
        flows.push(load_flow(&path)?);
    }
    Ok(flows)
}
