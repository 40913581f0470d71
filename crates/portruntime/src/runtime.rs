use crate::scheme::Codec;
use crate::table::{Table, TableOptions};
use crate::{RuntimeError, Symbol};
use portcore::{packet, FlowError, Flow, Node, OutPort, Packet, Process, Value, DEFAULT_NAMESPACE};
use std::sync::Arc;
use std::time::Duration;

/// Main runtime: a symbol table plus a driver for one-shot calls into it
pub struct Runtime {
    table: Table,
    config: RuntimeConfig,
}

impl Runtime {
    /// Create a new runtime with default settings
    pub fn new(codec: Arc<dyn Codec>) -> Self {
        Self::with_config(codec, RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(codec: Arc<dyn Codec>, config: RuntimeConfig) -> Self {
        Self::with_options(codec, config, TableOptions::default())
    }

    /// Create a new runtime whose table fires the given hooks
    pub fn with_options(codec: Arc<dyn Codec>, config: RuntimeConfig, options: TableOptions) -> Self {
        Self {
            table: Table::with_options(codec, options),
            config,
        }
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Insert every spec of a flow. If one fails, the specs inserted so far
    /// are freed again.
    pub async fn load(&self, flow: &Flow) -> Result<Vec<Symbol>, RuntimeError> {
        let mut inserted: Vec<Symbol> = Vec::with_capacity(flow.specs.len());
        for spec in &flow.specs {
            match self.table.insert(spec.clone()).await {
                Ok(symbol) => inserted.push(symbol),
                Err(err) => {
                    for symbol in inserted.iter().rev() {
                        if let Err(e) = self.table.free(symbol.id()).await {
                            tracing::warn!(symbol = %symbol.id(), "failed to free after load error: {}", e);
                        }
                    }
                    return Err(err.into());
                }
            }
        }
        tracing::info!("Loaded flow '{}' ({} specs)", flow.name, inserted.len());
        Ok(inserted)
    }

    /// Send one payload into `name.port` under a fresh process and wait for
    /// its acknowledgment.
    ///
    /// The process exits afterwards, with an error if the acknowledgment was
    /// an error packet or the call timed out.
    pub async fn call(&self, name: &str, port: &str, payload: Value) -> Result<Packet, RuntimeError> {
        let symbol = self
            .table
            .lookup_by_name(&self.config.namespace, name)
            .await
            .ok_or_else(|| RuntimeError::SymbolNotFound(name.to_string()))?;
        let in_port = symbol
            .in_port(port)
            .ok_or_else(|| RuntimeError::PortNotFound(format!("{}.{}", name, port)))?;

        let driver = OutPort::new();
        driver.link(&in_port);
        let proc = Process::new();
        let writer = driver.open(&proc);

        let call = packet::call(&writer, Packet::new(payload));
        let result = match self.config.call_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RuntimeError::Timeout {
                    millis: limit.as_millis() as u64,
                }),
            None => Ok(call.await),
        };

        let err = match &result {
            Ok(pck) => pck.error_message().map(|e| FlowError::Execution(e.to_string())),
            Err(e) => Some(FlowError::Execution(e.to_string())),
        };
        proc.exit(err);
        driver.close();
        result
    }

    /// Free every symbol
    pub async fn close(&self) -> Result<(), RuntimeError> {
        self.table.close().await?;
        Ok(())
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Namespace `call` resolves names in
    pub namespace: String,
    /// Upper bound for one `call`; `None` waits indefinitely
    pub call_timeout: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            call_timeout: None,
        }
    }
}
