// crates/portcli/src/main.rs
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use portcore::{Flow, PortLocation, Spec, Value};
use portnodes::LanguageRegistry;
use portruntime::{Runtime, RuntimeConfig, Scheme};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portflow")]
#[command(about = "Packet flow CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a flow and send one payload into it
    Run {
        /// Path to flow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Name of the node receiving the payload
        #[arg(short, long)]
        entry: String,

        /// In port of the entry node
        #[arg(short, long, default_value = "in")]
        port: String,

        /// Payload as JSON string
        #[arg(short, long)]
        input: Option<String>,

        /// Give up after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Check that every node of a flow compiles and links
    Validate {
        /// Path to flow JSON file
        file: PathBuf,
    },

    /// List available node kinds
    Nodes,

    /// Create an example flow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "flow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            entry,
            port,
            input,
            timeout_ms,
            verbose,
        } => {
            init_tracing(verbose);
            run_flow(file, entry, port, input, timeout_ms).await?;
        }

        Commands::Validate { file } => {
            init_tracing(false);
            validate_flow(file).await?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_flow(output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn scheme() -> Scheme {
    let mut scheme = Scheme::new();
    portnodes::register_all(&mut scheme, Arc::new(LanguageRegistry::with_builtins()));
    scheme
}

fn read_flow(file: &Path) -> Result<Flow> {
    portruntime::loader::load_flow(file)
        .with_context(|| format!("failed to read flow {}", file.display()))
}

async fn run_flow(
    file: PathBuf,
    entry: String,
    port: String,
    input: Option<String>,
    timeout_ms: Option<u64>,
) -> Result<()> {
    println!("🚀 Loading flow from: {}", file.display());
    let flow = read_flow(&file)?;
    println!("📋 Flow: {}", flow.name);
    println!("   Nodes: {}", flow.specs.len());
    println!();

    let payload = match input {
        Some(input) => Value::from_json(serde_json::from_str(&input)?),
        None => Value::Null,
    };

    let config = RuntimeConfig {
        call_timeout: timeout_ms.map(Duration::from_millis),
        ..RuntimeConfig::default()
    };
    let runtime = Runtime::with_config(Arc::new(scheme()), config);
    runtime.load(&flow).await?;

    tracing::debug!(entry = %entry, port = %port, "calling entry node");
    let result = runtime.call(&entry, &port, payload).await;
    runtime.close().await?;
    let pck = result?;

    println!();
    match pck.error_message() {
        Some(err) => {
            println!("💥 Failed: {}", err);
            anyhow::bail!("flow returned an error: {}", err);
        }
        None => {
            println!("📤 Result:");
            println!("{}", serde_json::to_string_pretty(&pck.payload().to_json())?);
        }
    }

    Ok(())
}

async fn validate_flow(file: PathBuf) -> Result<()> {
    println!("🔍 Validating flow: {}", file.display());
    let flow = read_flow(&file)?;

    let runtime = Runtime::new(Arc::new(scheme()));
    let symbols = runtime.load(&flow).await?;

    println!("✅ Flow is valid:");
    println!("   Name: {}", flow.name);
    println!("   Nodes: {}", symbols.len());
    println!(
        "   Links: {}",
        flow.specs
            .iter()
            .map(|spec| spec.links.values().map(Vec::len).sum::<usize>())
            .sum::<usize>()
    );

    runtime.close().await?;
    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Kinds:");
    println!();

    let scheme = scheme();
    for kind in scheme.kinds() {
        if let Some(metadata) = scheme.metadata(&kind) {
            println!("  • {} ({})", kind, metadata.category);
            println!("    {}", metadata.description);
        } else {
            println!("  • {}", kind);
        }
    }
}

fn create_example_flow(output: PathBuf) -> Result<()> {
    let mut flow = Flow::new("Example Greeting Flow");
    flow.description = Some("Extracts a name from the payload and logs it".to_string());

    let extract = Spec::new("snippet")
        .with_name("extract")
        .with_config("language", "pointer")
        .with_config("code", "/name")
        .with_link("out", PortLocation::by_name("print", "in"));
    let print = Spec::new("log").with_name("print");

    flow.add(extract);
    flow.add(print);

    let json = serde_json::to_string_pretty(&flow)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example flow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  portflow run --file {} --entry extract --input '{{\"name\": \"world\"}}'",
        output.display()
    );

    Ok(())
}
