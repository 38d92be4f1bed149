use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use cardgen_contracts::events::EventWriter;
use cardgen_contracts::request::{GenerationRequest, ModelChoice, QualityTier, Side};
use cardgen_contracts::runs::write_summary;
use cardgen_engine::config::parse_timeout;
use cardgen_engine::{BatchItem, BatchOptions, BatchProcessor, EngineConfig, GenerationEngine};
use clap::{Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cardgen", version, about = "Dual-provider business card generator")]
struct Cli {
    /// Output root; tier folders (`production/`, `drafts/`) are created below it.
    #[arg(long, global = true, env = "CARDGEN_OUTPUT_DIR")]
    out: Option<PathBuf>,
    /// Events JSONL path (default: `<out>/events.jsonl`).
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    /// Render solid-color placeholders instead of calling providers.
    #[arg(long, global = true)]
    dryrun: bool,
    /// Per-request provider timeout in seconds (overrides `CARDGEN_REQUEST_TIMEOUT`).
    #[arg(long, global = true)]
    timeout: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Batch(BatchArgs),
    Status(StatusArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    concept: String,
    #[arg(long, default_value = "front")]
    side: Side,
    #[arg(long, default_value = "draft")]
    quality: QualityTier,
    #[arg(long, default_value = "auto")]
    model: ModelChoice,
    /// Reference images sent along with the prompt.
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[arg(long, value_delimiter = ',', default_value = "Clinical-Precision,Athletic-Edge,Luxury-Wellness")]
    concepts: Vec<String>,
    #[arg(long, value_delimiter = ',', default_value = "front,back")]
    sides: Vec<Side>,
    #[arg(long, default_value = "draft")]
    quality: QualityTier,
    #[arg(long, default_value = "auto")]
    model: ModelChoice,
    #[arg(long, default_value_t = 4)]
    workers: usize,
    #[arg(long, default_value_t = 2)]
    per_provider: usize,
    /// Summary JSON path (default: `<out>/summary.json`).
    #[arg(long)]
    summary: Option<PathBuf>,
    #[arg(long = "reference")]
    references: Vec<PathBuf>,
}

#[derive(Debug, Parser)]
struct StatusArgs {
    /// Omit per-provider detail lines.
    #[arg(long)]
    brief: bool,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("cardgen error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Generate(args) => run_generate(&config, cli.events, args),
        Command::Batch(args) => run_batch(&config, cli.events, args),
        Command::Status(args) => run_status(&config, args),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cardgen=info,cardgen_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = EngineConfig::from_env();
    if let Some(out) = cli.out.as_ref() {
        config.output_root = out.clone();
    }
    if let Some(raw) = cli.timeout.as_deref() {
        let Some(timeout) = parse_timeout(raw) else {
            bail!("invalid --timeout '{raw}' (expected seconds)");
        };
        config.request_timeout = timeout;
    }
    config.dryrun = cli.dryrun;
    Ok(config)
}

fn build_engine(
    config: &EngineConfig,
    events_path: Option<PathBuf>,
    references: &[PathBuf],
    mode: &str,
) -> Result<GenerationEngine> {
    let events_path = events_path.unwrap_or_else(|| config.output_root.join("events.jsonl"));
    let events = EventWriter::new(events_path, uuid::Uuid::new_v4().to_string());

    let mut images = Vec::with_capacity(references.len());
    for path in references {
        let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        images.push(bytes);
    }

    let engine = GenerationEngine::from_config(config, events.clone()).with_reference_images(images);
    let availability = engine.availability();
    if !availability.any() {
        warn!("no provider available; set OPENAI_API_KEY or GEMINI_API_KEY, or pass --dryrun");
    }
    events.emit(
        "session_started",
        object(json!({
            "mode": mode,
            "out_dir": config.output_root.to_string_lossy(),
            "dryrun": config.dryrun,
            "availability": availability,
            "reference_images": references.len(),
        })),
    )?;
    info!(session_id = events.session_id(), ?availability, "session started");
    Ok(engine)
}

fn run_generate(config: &EngineConfig, events: Option<PathBuf>, args: GenerateArgs) -> Result<i32> {
    let engine = build_engine(config, events, &args.references, "generate")?;
    let request = GenerationRequest::new(args.concept, args.side, args.quality, args.model)?;
    let outcome = engine.generate(&request);
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.success { 0 } else { 2 })
}

fn run_batch(config: &EngineConfig, events: Option<PathBuf>, args: BatchArgs) -> Result<i32> {
    let engine = build_engine(config, events, &args.references, "batch")?;
    let items = BatchItem::grid(
        &args.concepts,
        &args.sides,
        args.quality,
        args.model,
        engine.concepts(),
    )?;
    let summary_path = args
        .summary
        .clone()
        .unwrap_or_else(|| config.output_root.join("summary.json"));
    let session_id = engine.events().session_id().to_string();

    let processor = BatchProcessor::new(Arc::new(engine));
    let options = BatchOptions {
        max_workers: args.workers,
        max_concurrent_per_provider: args.per_provider,
    };
    let summary = processor.run_batch(items, options, &mut |percent| {
        eprintln!("progress: {percent:.0}%");
    });

    let mut extra = Map::new();
    extra.insert("session_id".to_string(), Value::String(session_id));
    write_summary(&summary_path, &summary, Some(&extra))?;
    info!(
        path = %summary_path.display(),
        successful = summary.successful,
        failed = summary.failed,
        total_cost_usd = summary.total_cost_usd,
        "summary written"
    );
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(if summary.failed == 0 { 0 } else { 2 })
}

fn run_status(config: &EngineConfig, args: StatusArgs) -> Result<i32> {
    let status = config.api_status();
    println!("{}", status.format_report(!args.brief));
    Ok(if status.available_count() > 0 { 0 } else { 1 })
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
