//! Concord - dual-validator product data verification
//!
//! Two independent validators agree on field values, and pipeline failures are
//! diagnosed, fixed, verified and rolled back under the same two-party rule.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use concord_adapters::json_repair;
use concord_adapters::{
    AuditLog, CommandReprocessor, Config, FsSourceAccessor, HttpValidator, RecordingSink,
    WebhookSink,
};
use concord_core::{
    AuditSink, DownstreamSink, JobRecord, ProductRecord, Provider, SourceAccessor, Validator,
};
use concord_engine::{
    DualDiagnosisEngine, FixApplier, MultiAttemptVerifier, ProductConsensusLoop,
    RemediationOrchestrator, ReplayScript,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser, Debug)]
#[command(
    name = "concord",
    about = "Dual-validator product data verification with guarded self-healing",
    version
)]
struct Args {
    /// Config file (defaults to $CONCORD_CONFIG, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug-level logging for concord crates
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Use scripted validators from a replay file instead of HTTP
    #[arg(long, global = true)]
    replay: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build consensus for a batch of products
    Verify {
        /// JSON array of product records
        #[arg(long)]
        products: PathBuf,
        /// Comma-separated fields to track (overrides the config)
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,
    },
    /// Diagnose and repair a single job
    Remediate {
        #[arg(long)]
        job: PathBuf,
    },
    /// Remediate several jobs, one at a time
    Backfill {
        /// A directory of job files or a JSON array of jobs
        #[arg(long)]
        jobs: PathBuf,
    },
    /// Repair truncated strings and escaped entities in a JSON data file
    RepairJson {
        file: PathBuf,
        /// JSON array of {"truncated", "full"} pairs
        #[arg(long)]
        fixes: Option<PathBuf>,
    },
    /// Delete backups beyond the retention limit
    PruneBackups,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose, args.json_logs);

    let config = Config::load(args.config.as_deref())?;

    match args.command {
        Command::Verify { products, fields } => {
            let products: Vec<ProductRecord> = read_json(&products)?;
            let fields = if fields.is_empty() {
                config.target_fields.clone()
            } else {
                fields
            };
            let (a, b) = validators(&config, args.replay.as_deref())?;
            let consensus = ProductConsensusLoop::new(
                a,
                b,
                config.consensus.clone(),
                fields,
                audit(&config),
            );
            let results = consensus.verify_batch(&products).await;
            print_json(&results)
        }
        Command::Remediate { job } => {
            let job: JobRecord = read_json(&job)?;
            let orchestrator = orchestrator(&config, args.replay.as_deref())?;
            let report = orchestrator.remediate(&job).await;
            print_json(&report)
        }
        Command::Backfill { jobs } => {
            let jobs = load_jobs(&jobs)?;
            tracing::info!(count = jobs.len(), "starting backfill");
            let orchestrator = orchestrator(&config, args.replay.as_deref())?;
            let reports = orchestrator.backfill(&jobs).await;
            print_json(&reports)
        }
        Command::RepairJson { file, fixes } => {
            let fixes = match fixes {
                Some(path) => json_repair::load_fixes(&path)?,
                None => json_repair::default_fixes(),
            };
            let report = json_repair::repair_file(&file, &fixes)?;
            print_json(&report)
        }
        Command::PruneBackups => {
            let applier = applier(&config)?;
            let removed = applier.backups().prune()?;
            eprintln!("  Removed {} backup(s)", removed.len());
            print_json(&removed)
        }
    }
}

fn init_tracing(verbose: bool, json: bool) {
    let default = if verbose { "concord=debug" } else { "concord=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn validators(
    config: &Config,
    replay: Option<&Path>,
) -> Result<(Arc<dyn Validator>, Arc<dyn Validator>)> {
    if let Some(path) = replay {
        let (a, b) = ReplayScript::load(path)?.into_validators();
        tracing::info!(script = %path.display(), "using replayed validators");
        return Ok((Arc::new(a), Arc::new(b)));
    }
    let a = HttpValidator::from_config(Provider::A, &config.validators.a)?;
    let b = HttpValidator::from_config(Provider::B, &config.validators.b)?;
    Ok((Arc::new(a), Arc::new(b)))
}

fn audit(config: &Config) -> Arc<dyn AuditSink> {
    Arc::new(AuditLog::new(config.audit_dir()))
}

/// Check commands run from the canonical source root the edits are written under.
fn applier(config: &Config) -> Result<FixApplier> {
    let fs = FsSourceAccessor::new(&config.source_root)?;
    let check_root = fs.root().to_path_buf();
    let source: Arc<dyn SourceAccessor> = Arc::new(fs);
    Ok(FixApplier::new(source, config.remediation.clone()).with_check_root(check_root))
}

fn orchestrator(config: &Config, replay: Option<&Path>) -> Result<RemediationOrchestrator> {
    let (a, b) = validators(config, replay)?;
    let source: Arc<dyn SourceAccessor> = Arc::new(FsSourceAccessor::new(&config.source_root)?);
    let reprocessor = CommandReprocessor::from_config(
        &config.reprocess,
        &config.source_root,
        config.remediation.reprocess_timeout(),
    )
    .context("remediation needs [reprocess] command in the config")?;

    let sink: Arc<dyn DownstreamSink> = match WebhookSink::from_config(&config.sink)? {
        Some(sink) => Arc::new(sink),
        None => {
            tracing::warn!("no sink.webhook_url configured; corrections are kept in memory only");
            Arc::new(RecordingSink::new())
        }
    };

    let diagnosis =
        DualDiagnosisEngine::new(a.clone(), b.clone(), source, config.diagnosis.clone());
    let verifier = MultiAttemptVerifier::new(a, b, applier(config)?, Arc::new(reprocessor));
    Ok(RemediationOrchestrator::new(
        diagnosis,
        verifier,
        sink,
        audit(config),
    ))
}

/// Jobs from a JSON array file, or every `*.json` file of a directory in name order.
fn load_jobs(path: &Path) -> Result<Vec<JobRecord>> {
    if !path.is_dir() {
        return read_json(path);
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files.iter().map(|file| read_json(file)).collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is malformed", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
