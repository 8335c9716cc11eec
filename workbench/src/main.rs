use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;
use workbench::dataset::{describe, load_dataset};
use workbench::domain::DomainRegistry;
use workbench::llm::{CompletionClient, ReplayClient};
use workbench::sandbox::{ExecutionBridge, PythonWorkerFactory, WorkerMode};
use workbench::{Session, WorkbenchConfig};
use workbench_sdk::FormValues;

#[derive(Parser, Debug)]
#[command(
    name = "workbench",
    about = "Generate, test and summarize LLM-proposed analyses of a dataset",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List analysis domains and their input fields
    Domains,

    /// Print the dataset description sent to the LLM
    Describe {
        /// CSV, JSON records or SQLite file
        #[arg(long)]
        data: PathBuf,
    },

    /// Generate artifacts, test every one, and optionally synthesize
    Run {
        /// Domain id (defaults to WORKBENCH_DOMAIN or "hypothesis")
        #[arg(long)]
        domain: Option<String>,

        /// CSV, JSON records or SQLite file
        #[arg(long)]
        data: PathBuf,

        /// Input field value, repeatable
        #[arg(long = "field", value_name = "KEY=VALUE", value_parser = parse_field)]
        fields: Vec<(String, String)>,

        /// Summarize all outcomes at the end
        #[arg(long)]
        synthesize: bool,

        /// Answer LLM calls from a YAML replay script
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Emit pipeline events on stderr
        #[arg(long)]
        events: bool,

        /// Sandbox timeout in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Sandbox worker mode: ephemeral or shared
        #[arg(long)]
        worker_mode: Option<WorkerMode>,

        /// Artifacts tested at once
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

fn parse_field(s: &str) -> std::result::Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty field name in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = WorkbenchConfig::load().context("Invalid workbench configuration")?;

    match cli.command {
        Command::Domains => list_domains(&build_registry(&config)?),
        Command::Describe { data } => {
            let rows = load_dataset(&data)
                .with_context(|| format!("Failed to load dataset: {}", data.display()))?;
            println!("{}", describe(&rows));
            Ok(())
        }
        Command::Run {
            domain,
            data,
            fields,
            synthesize,
            replay,
            events,
            timeout_ms,
            worker_mode,
            max_concurrent,
        } => {
            let mut config = config;
            if let Some(millis) = timeout_ms {
                config.sandbox_timeout = std::time::Duration::from_millis(millis.max(1));
            }
            if let Some(mode) = worker_mode {
                config.worker_mode = mode;
            }
            if let Some(limit) = max_concurrent {
                config.max_concurrent_tests = limit.max(1);
            }
            if let Some(domain) = domain {
                config.default_domain = domain;
            }

            let registry = build_registry(&config)?;
            let client = completion_client(replay.as_deref())?;
            let form: FormValues = fields.into_iter().collect();
            run(config, registry, client, &data, form, synthesize, events).await
        }
    }
}

fn build_registry(config: &WorkbenchConfig) -> Result<DomainRegistry> {
    let mut registry =
        DomainRegistry::with_defaults().context("Built-in domains failed validation")?;
    if let Some(dir) = &config.domain_dir {
        let count = registry
            .load_dir(dir)
            .with_context(|| format!("Failed to load domains from {}", dir.display()))?;
        tracing::info!(count, dir = %dir.display(), "loaded domain files");
    }
    Ok(registry)
}

fn list_domains(registry: &DomainRegistry) -> Result<()> {
    for domain in registry.iter() {
        println!("{}  {}", domain.id, domain.name);
        if !domain.description.is_empty() {
            println!("    {}", domain.description);
        }
        for field in &domain.input_fields {
            println!(
                "    --field {}=...  {}{}",
                field.id,
                field.label,
                if field.required { " (required)" } else { "" }
            );
        }
        println!();
    }
    Ok(())
}

fn completion_client(replay: Option<&Path>) -> Result<Arc<dyn CompletionClient>> {
    match replay {
        Some(path) => Ok(Arc::new(ReplayClient::from_yaml_file(path)?)),
        None => default_client(),
    }
}

#[cfg(feature = "claude")]
fn default_client() -> Result<Arc<dyn CompletionClient>> {
    Ok(Arc::new(workbench::llm::claude::ClaudeCompletionClient::new()))
}

#[cfg(not(feature = "claude"))]
fn default_client() -> Result<Arc<dyn CompletionClient>> {
    anyhow::bail!("No completion client available: pass --replay <file> or build with --features claude")
}

async fn run(
    config: WorkbenchConfig,
    registry: DomainRegistry,
    client: Arc<dyn CompletionClient>,
    data: &Path,
    form: FormValues,
    synthesize: bool,
    events: bool,
) -> Result<()> {
    let bridge = Arc::new(
        ExecutionBridge::new(Arc::new(PythonWorkerFactory::new(config.python.clone())))
            .with_timeout(config.sandbox_timeout)
            .with_mode(config.worker_mode),
    );
    let session = Session::new(Arc::new(registry), client, bridge.clone(), config)
        .context("Failed to start session")?;

    let forwarder = events.then(|| {
        let mut rx = session.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => event.emit(),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "event forwarder lagged")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    });

    session
        .load_dataset_file(data)
        .await
        .with_context(|| format!("Failed to load dataset: {}", data.display()))?;

    let domain = session.domain().await;
    let artifacts = session
        .generate_artifacts(&form)
        .await
        .with_context(|| format!("Failed to generate {} artifacts", domain.id))?;
    println!("Generated {} artifacts for {}\n", artifacts.len(), domain.name);

    let results = session.run_all().await;
    let failed = results.iter().filter(|(_, result)| result.is_err()).count();
    for (index, card) in session.cards().await.iter().enumerate() {
        println!("## {}. {}", index + 1, card.artifact.title);
        println!("[{}] {}\n", card.state, card.outcome_text.trim());
    }
    println!("{} tested, {} failed", results.len(), failed);

    if synthesize {
        match session.synthesize().await {
            Ok(text) => println!("\n{}", text),
            Err(e) => eprintln!("Synthesis failed: {}", e),
        }
    }

    bridge.shutdown().await;
    drop(session);
    if let Some(handle) = forwarder {
        handle.await.ok();
    }
    Ok(())
}
