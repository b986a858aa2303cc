use std::{
    collections::HashMap,
    io::IsTerminal,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use a11y_audit_core::{
    llm::client_from_settings, render_report, AbortReason, DependencyGraph,
    FileGuidelineRepository, GateConfig, GuidelineCatalog, KnowledgeSelector, LlmSettings,
    NoDependencies, OutputFormat, RateGate, ScanOptions, ScanOrchestrator, SourceFile,
    StaticDependencyGraph,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "a11y-audit",
    author,
    version,
    about = "LLM-driven accessibility audit for UI, scene and script assets"
)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON) with [llm], [scan] and [gate] sections
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Directory containing guidelines.txt / guidelines.json replacing the built-in catalog
    #[arg(long = "guidelines-dir", value_name = "DIR", global = true)]
    guidelines_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan files for accessibility defects
    Scan(ScanArgs),
    /// List the guideline catalog
    Guidelines {
        /// Emit guidelines as JSON instead of human-readable text
        #[arg(long)]
        json: bool,
    },
    /// Show which guidelines a file would be checked against, without calling the model
    Select {
        path: PathBuf,
        /// Emit the selection as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Files to scan
    #[arg(required = true, value_name = "PATH")]
    paths: Vec<PathBuf>,

    /// Dependency map (JSON or YAML) from each file to its related files
    #[arg(long, value_name = "FILE")]
    deps: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Format::Human)]
    format: Format,

    /// Provider: `openai` or `noop`
    #[arg(long)]
    provider: Option<String>,

    #[arg(long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible service
    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long = "batch-size")]
    batch_size: Option<usize>,

    /// Pause between batches, e.g. `2s` or `500ms`
    #[arg(long = "inter-batch-delay", value_parser = humantime::parse_duration)]
    inter_batch_delay: Option<Duration>,

    /// Total attempts per file
    #[arg(long = "max-retries")]
    max_retries: Option<u32>,

    /// Maximum concurrent model calls
    #[arg(long)]
    concurrency: Option<usize>,

    /// Minimum spacing between call starts, e.g. `1500ms`
    #[arg(long = "min-interval", value_parser = humantime::parse_duration)]
    min_interval: Option<Duration>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Human,
    Json,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Human => OutputFormat::Human,
            Format::Json => OutputFormat::Json,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AppConfig {
    llm: LlmSection,
    scan: ScanOptions,
    gate: GateConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LlmSection {
    provider: Option<String>,
    api_key: Option<String>,
    endpoint: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

impl LlmSection {
    fn into_vars(self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let mut put = |key: &str, value: Option<String>| {
            if let Some(value) = value {
                vars.insert(key.to_string(), value);
            }
        };
        put(LlmSettings::PROVIDER_ENV, self.provider);
        put(LlmSettings::API_KEY_ENV, self.api_key);
        put(LlmSettings::ENDPOINT_ENV, self.endpoint);
        put(LlmSettings::MODEL_ENV, self.model);
        put(LlmSettings::TIMEOUT_ENV, self.timeout_secs.map(|v| v.to_string()));
        put(LlmSettings::RETRIES_ENV, self.max_retries.map(|v| v.to_string()));
        vars
    }
}

struct LoadedConfig {
    app: AppConfig,
    raw: config::Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Guidelines { json: false }) {
        Commands::Scan(args) => {
            scan(cli.config.as_deref(), cli.guidelines_dir.as_deref(), args).await
        }
        Commands::Select { path, json } => {
            select(cli.guidelines_dir.as_deref(), &path, json).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Guidelines { json } => {
            list_guidelines(cli.guidelines_dir.as_deref(), json).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn scan(
    config_path: Option<&Path>,
    guidelines_dir: Option<&Path>,
    args: ScanArgs,
) -> Result<ExitCode> {
    let LoadedConfig { app, raw } = load_config(config_path)?;

    let mut vars = app.llm.into_vars();
    vars.extend(std::env::vars());
    if let Some(provider) = &args.provider {
        vars.insert(LlmSettings::PROVIDER_ENV.into(), provider.clone());
    }
    if let Some(model) = &args.model {
        vars.insert(LlmSettings::MODEL_ENV.into(), model.clone());
    }
    if let Some(endpoint) = &args.endpoint {
        vars.insert(LlmSettings::ENDPOINT_ENV.into(), endpoint.clone());
    }
    let settings = LlmSettings::from_map(vars).context("failed to resolve LLM settings")?;

    let mut options = app.scan;
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if let Some(delay) = args.inter_batch_delay {
        options.inter_batch_delay = delay;
    }
    options.max_retries = args
        .max_retries
        .or_else(|| raw.get::<u32>("scan.max_retries").ok())
        .unwrap_or(settings.max_retries);

    let mut gate_config = app.gate;
    if let Some(concurrency) = args.concurrency {
        gate_config.concurrency_cap = concurrency;
    }
    if let Some(min_interval) = args.min_interval {
        gate_config.min_interval = min_interval;
    }

    let graph: Arc<dyn DependencyGraph> = match &args.deps {
        Some(path) => Arc::new(StaticDependencyGraph::from_file(path)?),
        None => Arc::new(NoDependencies),
    };
    let catalog = load_catalog(guidelines_dir).await?;
    let client = client_from_settings(&settings)?;
    let orchestrator = ScanOrchestrator::new(client, Arc::new(RateGate::new(gate_config)))?
        .with_catalog(catalog)
        .with_dependency_graph(graph)
        .with_call_timeout(settings.timeout());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling scan");
            interrupt.cancel();
        }
    });

    let files: Vec<SourceFile> = args.paths.iter().cloned().map(SourceFile::from_fs).collect();
    info!(
        files = files.len(),
        provider = %settings.provider,
        model = %settings.model,
        "starting scan"
    );
    let outcome = orchestrator
        .start_scan(files, &settings.api_key, &options, &cancel)
        .await?;

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    print!("{}", render_report(&outcome, args.format.into())?);

    Ok(match outcome.abort {
        Some(AbortReason::AuthFailure { .. }) => ExitCode::from(2),
        Some(AbortReason::Unexpected { .. }) => ExitCode::FAILURE,
        Some(AbortReason::Cancelled) | None => ExitCode::SUCCESS,
    })
}

fn load_config(path: Option<&Path>) -> Result<LoadedConfig> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    let raw = builder
        .add_source(
            config::Environment::with_prefix("A11Y_AUDIT")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("failed to load configuration")?;
    let app = raw
        .clone()
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;
    Ok(LoadedConfig { app, raw })
}

async fn load_catalog(guidelines_dir: Option<&Path>) -> Result<GuidelineCatalog> {
    match guidelines_dir {
        Some(dir) => {
            let repo = FileGuidelineRepository::new(dir);
            GuidelineCatalog::load(&repo)
                .await
                .with_context(|| format!("failed to load guidelines from {}", dir.display()))
        }
        None => Ok(GuidelineCatalog::builtin()),
    }
}

async fn list_guidelines(guidelines_dir: Option<&Path>, json: bool) -> Result<()> {
    let catalog = load_catalog(guidelines_dir).await?;
    let entries: Vec<_> = catalog.iter().collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    let source = guidelines_dir
        .map(|dir| dir.display().to_string())
        .unwrap_or_else(|| "built-in catalog".to_string());
    println!("{} guideline(s) loaded from {}", entries.len(), source);
    for entry in entries {
        println!(
            "- {id:<12} {title}",
            id = entry.rule_id,
            title = if entry.title.is_empty() {
                &entry.text
            } else {
                &entry.title
            }
        );
    }
    Ok(())
}

async fn select(guidelines_dir: Option<&Path>, path: &Path, json: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let selector = KnowledgeSelector::new()?;
    let categories = selector.categories(&content);
    let rules = selector.select(&content, &file_name);
    let catalog = load_catalog(guidelines_dir).await?;

    if json {
        let value = serde_json::json!({
            "file": path,
            "categories": categories.iter().map(|c| format!("{c:?}")).collect::<Vec<_>>(),
            "rule_ids": rules,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    if rules.is_empty() {
        println!("{}: no guideline signals detected; generic checks apply", path.display());
        return Ok(());
    }
    println!(
        "{}: {} guideline(s) selected from {} signal categor{}",
        path.display(),
        rules.len(),
        categories.len(),
        if categories.len() == 1 { "y" } else { "ies" }
    );
    for rule_id in &rules {
        let title = catalog
            .get(rule_id)
            .map(|entry| entry.title.as_str())
            .unwrap_or("(not in catalog)");
        println!("- {rule_id:<12} {title}");
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init();
}
