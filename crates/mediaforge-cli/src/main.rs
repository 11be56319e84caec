use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use mediaforge_contracts::events::{EventPayload, EventWriter};
use mediaforge_contracts::{
    AssetClass, BusinessContext, Dimensions, FormatProbe, GenerationRequest, PersistedAsset,
    ProgressEvent, ProgressSink,
};
use mediaforge_engine::{probe_format_support, Orchestrator, RetryPolicy};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

const PROGRESS_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Parser)]
#[command(name = "mediaforge", version, about = "Generate and store media assets across image providers")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// JSON business context; environment variables fill unset credentials.
    #[arg(long, global = true)]
    context: Option<PathBuf>,
    /// Append progress events to this JSONL file.
    #[arg(long, global = true)]
    events: Option<PathBuf>,
    #[arg(long, global = true, default_value_t = 3)]
    max_attempts: u32,
    #[arg(long, global = true, default_value_t = 1000)]
    retry_base_ms: u64,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate one asset.
    Generate(GenerateArgs),
    /// Generate every request in a JSON array file.
    Batch(BatchArgs),
    /// Store a local image file.
    Upload(UploadArgs),
    /// Show provider order and availability per asset class.
    Providers(ProvidersArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    class: AssetClass,
    #[arg(long, value_parser = parse_dimensions)]
    size: Dimensions,
    #[arg(long)]
    description: String,
    #[arg(long)]
    style_hint: Option<String>,
    #[arg(long)]
    overlay: Option<String>,
    #[arg(long = "modifier")]
    modifiers: Vec<String>,
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Debug, Parser)]
struct BatchArgs {
    #[arg(long)]
    requests: PathBuf,
    #[arg(long, default_value_t = 4)]
    concurrency: usize,
}

#[derive(Debug, Parser)]
struct UploadArgs {
    file: PathBuf,
    #[arg(long)]
    alt: String,
    #[arg(long)]
    filename: Option<String>,
}

#[derive(Debug, Parser)]
struct ProvidersArgs {
    #[arg(long)]
    class: Option<AssetClass>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("mediaforge error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    runtime.block_on(dispatch(cli))
}

async fn dispatch(cli: Cli) -> Result<i32> {
    let context = load_context(cli.common.context.as_deref())?;
    let writer = match cli.common.events.as_ref() {
        Some(path) => {
            let writer = EventWriter::open(path.clone(), format!("run-{}", uuid::Uuid::new_v4()))
                .with_context(|| format!("failed to open event log {}", path.display()))?;
            tracing::info!(path = %writer.path().display(), run_id = writer.run_id(), "recording events");
            Some(writer)
        }
        None => None,
    };
    let policy = RetryPolicy::new(
        cli.common.max_attempts,
        Duration::from_millis(cli.common.retry_base_ms),
    );
    let orchestrator = Arc::new(Orchestrator::with_defaults().with_retry_policy(policy));

    match cli.command {
        Command::Generate(args) => run_generate(args, &orchestrator, &context, writer.as_ref()).await,
        Command::Batch(args) => run_batch(args, &orchestrator, context, writer.as_ref()).await,
        Command::Upload(args) => run_upload(args, &orchestrator, &context, writer.as_ref()).await,
        Command::Providers(args) => run_providers(args, &orchestrator, &context),
    }
}

fn load_context(path: Option<&Path>) -> Result<BusinessContext> {
    let mut context = match path {
        Some(path) => BusinessContext::from_json_file(path)?,
        None => BusinessContext::from_env(),
    };
    let probe = FormatProbe::new();
    context.format_support = probe.get_or_probe(probe_format_support);
    tracing::debug!(context = ?context, "loaded business context");
    Ok(context)
}

fn parse_dimensions(raw: &str) -> Result<Dimensions, String> {
    Dimensions::parse(raw).ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))
}

async fn run_generate(
    args: GenerateArgs,
    orchestrator: &Arc<Orchestrator>,
    context: &BusinessContext,
    writer: Option<&EventWriter>,
) -> Result<i32> {
    let mut request = GenerationRequest::new(args.class, args.size, args.description)
        .with_style_modifiers(args.modifiers);
    if let Some(hint) = args.style_hint {
        request = request.with_style_hint(hint);
    }
    if let Some(text) = args.overlay {
        request = request.with_text_overlay(text);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        request = request.with_timeout(Duration::from_millis(timeout_ms));
    }

    record(writer, "run_started", json!({ "command": "generate", "requests": 1 }));
    let (sink, rx) = ProgressSink::channel(PROGRESS_CHANNEL_CAPACITY);
    let drain = spawn_progress_drain(writer.cloned(), "req-0".to_string(), rx);
    let asset = orchestrator.generate(&request, context, sink).await;
    let _ = drain.await;

    finish(writer, &[asset])
}

async fn run_batch(
    args: BatchArgs,
    orchestrator: &Arc<Orchestrator>,
    context: BusinessContext,
    writer: Option<&EventWriter>,
) -> Result<i32> {
    let raw = tokio::fs::read_to_string(&args.requests)
        .await
        .with_context(|| format!("failed reading {}", args.requests.display()))?;
    let requests: Vec<GenerationRequest> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array of requests", args.requests.display()))?;
    if requests.is_empty() {
        bail!("{} contains no requests", args.requests.display());
    }

    record(
        writer,
        "run_started",
        json!({ "command": "batch", "requests": requests.len(), "concurrency": args.concurrency }),
    );
    let mut sinks = Vec::with_capacity(requests.len());
    let mut drains = Vec::with_capacity(requests.len());
    for idx in 0..requests.len() {
        let (sink, rx) = ProgressSink::channel(PROGRESS_CHANNEL_CAPACITY);
        sinks.push(sink);
        drains.push(spawn_progress_drain(writer.cloned(), format!("req-{idx}"), rx));
    }

    let assets = orchestrator
        .generate_batch(requests, Arc::new(context), args.concurrency, |idx| {
            sinks.get(idx).cloned().unwrap_or_default()
        })
        .await;
    drop(sinks);
    for drain in drains {
        let _ = drain.await;
    }

    finish(writer, &assets)
}

async fn run_upload(
    args: UploadArgs,
    orchestrator: &Arc<Orchestrator>,
    context: &BusinessContext,
    writer: Option<&EventWriter>,
) -> Result<i32> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("failed reading {}", args.file.display()))?;
    let filename = args.filename.unwrap_or_else(|| {
        args.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string())
    });

    record(writer, "run_started", json!({ "command": "upload", "requests": 1 }));
    let (sink, rx) = ProgressSink::channel(PROGRESS_CHANNEL_CAPACITY);
    let drain = spawn_progress_drain(writer.cloned(), "upload-0".to_string(), rx);
    let asset = orchestrator
        .upload(&bytes, &args.alt, &filename, context, sink)
        .await;
    let _ = drain.await;

    finish(writer, &[asset])
}

fn run_providers(
    args: ProvidersArgs,
    orchestrator: &Orchestrator,
    context: &BusinessContext,
) -> Result<i32> {
    let classes = match args.class {
        Some(class) => vec![class],
        None => AssetClass::ALL.to_vec(),
    };
    let rows: Vec<Value> = classes
        .into_iter()
        .map(|class| {
            json!({
                "asset_class": class,
                "providers": orchestrator.providers().describe(class, context),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(0)
}

fn spawn_progress_drain(
    writer: Option<EventWriter>,
    request_id: String,
    mut rx: mpsc::Receiver<ProgressEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            tracing::info!(
                request_id = %request_id,
                phase = %event.phase,
                percent = event.percent,
                provider = event.provider.as_deref().unwrap_or("-"),
                "{}",
                event.message
            );
            if let Some(writer) = writer.as_ref() {
                if let Err(err) = writer.record_progress(&request_id, &event) {
                    tracing::warn!(error = %err, "failed to record progress event");
                }
            }
        }
    })
}

fn record(writer: Option<&EventWriter>, event_type: &str, payload: Value) {
    let Some(writer) = writer else {
        return;
    };
    let payload: EventPayload = match payload {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    };
    if let Err(err) = writer.emit(event_type, payload) {
        tracing::warn!(error = %err, event_type, "failed to record event");
    }
}

fn finish(writer: Option<&EventWriter>, assets: &[PersistedAsset]) -> Result<i32> {
    if let Some(writer) = writer {
        for (idx, asset) in assets.iter().enumerate() {
            if let Err(err) = writer.record_asset(idx, asset) {
                tracing::warn!(error = %err, request_index = idx, "failed to record asset result");
            }
        }
    }
    let failed = assets.iter().filter(|asset| !asset.is_success()).count();
    record(
        writer,
        "run_finished",
        json!({ "assets": assets.len(), "failed": failed }),
    );

    let output = match assets {
        [single] => serde_json::to_string_pretty(single)?,
        many => serde_json::to_string_pretty(many)?,
    };
    println!("{output}");
    Ok(if failed > 0 { 2 } else { 0 })
}
