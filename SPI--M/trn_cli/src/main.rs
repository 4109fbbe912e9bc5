use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shared_event_bus::FileEventPublisher;
use shared_logging::{read_json_lines, JsonLinesWriter, LogLevel};
use spi_data::{decode_as, decode_auto, fetch_export, prepare_files, synthesize, ExportFormat};
use spi_learning::{
    manifest_path, read_manifest, train_and_evaluate, LearningTelemetry, TrainParams,
};
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "trn", version, about = "Stockholm Price Intelligence operator CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Downloads a statistics export and writes it as a flat CSV.
    Fetch {
        /// Export endpoint.
        #[arg(long)]
        url: String,
        /// Saved JSON query; POSTed with the response format forced to jsonstat2.
        #[arg(long)]
        query: Option<PathBuf>,
        #[arg(long, default_value = "data/raw/scb.csv")]
        out: PathBuf,
        /// Request timeout in seconds.
        #[arg(long, default_value_t = 60.0)]
        timeout: f64,
    },
    /// Decodes a saved JSON-stat2 or PC-Axis file into CSV.
    Decode {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, value_enum, default_value_t = FormatArg::Auto)]
        format: FormatArg,
        /// Defaults to the input path with a `.csv` extension.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value = "value")]
        value_col: String,
    },
    /// Writes a deterministic synthetic training set.
    Synth {
        #[arg(long, default_value = "data/processed/train.csv")]
        out: PathBuf,
        #[arg(long, default_value_t = 6000)]
        n: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Maps the raw CSV onto the canonical schema and writes a summary.
    Prepare {
        #[arg(long, default_value = "params.json")]
        params: PathBuf,
    },
    /// Cross-validates a configured model and persists its artifacts.
    Train(TrainArgs),
    /// Lists the most recent training runs.
    Runs {
        #[arg(long, default_value = "params.json")]
        params: PathBuf,
        /// Number of entries to display.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Parser, Debug)]
struct TrainArgs {
    #[arg(long, default_value = "params.json")]
    params: PathBuf,
    /// Model name from the params file.
    #[arg(long, default_value = "baseline")]
    model: String,
    /// Artifact version tag.
    #[arg(long, default_value = "v1")]
    version: String,
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,
    #[arg(long)]
    event_log: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FormatArg {
    Auto,
    Px,
    Jsonstat,
}

impl FormatArg {
    const fn explicit(self) -> Option<ExportFormat> {
        match self {
            Self::Auto => None,
            Self::Px => Some(ExportFormat::PcAxis),
            Self::Jsonstat => Some(ExportFormat::JsonStat),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
struct JobManifestEntry {
    job_id: String,
    submitted_at: DateTime<Utc>,
    params: PathBuf,
    model: String,
    version: String,
    log_path: PathBuf,
    status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
}

impl JobManifestEntry {
    fn new(args: &TrainArgs, log_path: PathBuf) -> Self {
        Self {
            job_id: format!("job-{}", Uuid::new_v4()),
            submitted_at: Utc::now(),
            params: args.params.clone(),
            model: args.model.clone(),
            version: args.version.clone(),
            log_path,
            status: "queued".into(),
            run_id: None,
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Commands::Fetch {
            url,
            query,
            out,
            timeout,
        } => handle_fetch(&url, query.as_deref(), &out, timeout),
        Commands::Decode {
            input,
            format,
            out,
            value_col,
        } => handle_decode(&input, format, out, &value_col),
        Commands::Synth { out, n, seed } => {
            let rows = handle_synth(&out, n, seed)?;
            println!("Wrote {rows} rows to {}", out.display());
            Ok(())
        }
        Commands::Prepare { params } => handle_prepare(&params),
        Commands::Train(args) => handle_train(&args).map(|_| ()),
        Commands::Runs { params, limit } => {
            let params = TrainParams::load(&params)?;
            let entries = read_manifest(manifest_path(&params))?;
            for entry in entries.into_iter().rev().take(limit) {
                println!(
                    "{} | {} | {} | {} | MAE={:.2} RMSE={:.2} R2={:.4}",
                    entry.run_id,
                    entry.model_type,
                    entry.version_tag,
                    entry.finished_at,
                    entry.mean_mae,
                    entry.mean_rmse,
                    entry.mean_r2
                );
            }
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("trn=info,spi_data=info,spi_learning=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn handle_fetch(url: &str, query: Option<&Path>, out: &Path, timeout: f64) -> Result<()> {
    let query: Option<Value> = query
        .map(|path| -> Result<Value> {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading query {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing query {}", path.display()))
        })
        .transpose()?;
    anyhow::ensure!(timeout > 0.0, "timeout must be positive");
    let runtime = Runtime::new()?;
    let table = runtime.block_on(fetch_export(
        url,
        query.as_ref(),
        Duration::from_secs_f64(timeout),
        "value",
    ))?;
    table.write_csv(out)?;
    println!("Wrote {} rows: {}", table.height(), out.display());
    println!("Columns: {:?}", table.column_names().collect::<Vec<_>>());
    Ok(())
}

fn handle_decode(input: &Path, format: FormatArg, out: Option<PathBuf>, value_col: &str) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    let table = match format.explicit() {
        Some(format) => decode_as(format, &bytes, None, value_col),
        None => decode_auto(&bytes, None, value_col),
    }
    .with_context(|| format!("decoding {}", input.display()))?;
    let out = out.unwrap_or_else(|| input.with_extension("csv"));
    table.write_csv(&out)?;
    println!("Wrote {} rows: {}", table.height(), out.display());
    println!("Columns: {:?}", table.column_names().collect::<Vec<_>>());
    Ok(())
}

fn handle_synth(out: &Path, rows: usize, seed: u64) -> Result<usize> {
    let table = synthesize(rows, seed)?;
    table.write_csv(out)?;
    Ok(table.height())
}

fn handle_prepare(params_path: &Path) -> Result<()> {
    let params = TrainParams::load(params_path)?;
    let processed = params.resolve(&params.data.train_csv);
    let summary_path = params.resolve(&params.data.summary_json);
    let summary = prepare_files(
        &params.resolve(&params.data.raw_csv),
        &processed,
        &summary_path,
        &params.prepare_options(),
    )?;
    tracing::info!(rows = summary.rows, dropped = summary.dropped_rows, "dataset prepared");
    println!("Wrote processed: {}", processed.display());
    println!("Wrote summary: {}", summary_path.display());
    Ok(())
}

fn handle_train(args: &TrainArgs) -> Result<JobManifestEntry> {
    anyhow::ensure!(args.params.exists(), "params file {} not found", args.params.display());
    let params = TrainParams::load(&args.params)?;

    let log_path = compute_log_path(&args.log_dir)?;
    let job_manifest = job_manifest_path(&args.log_dir);
    let mut entry = JobManifestEntry::new(args, log_path.clone());
    JsonLinesWriter::open(&job_manifest)?.append(&entry)?;

    let mut telemetry = LearningTelemetry::builder("trn").log_path(&log_path);
    if let Some(path) = &args.event_log {
        telemetry = telemetry.event_publisher(Arc::new(FileEventPublisher::new(path)?));
    }
    let telemetry = telemetry.build()?;

    telemetry.log(
        LogLevel::Info,
        "job queued",
        json!({ "job_id": entry.job_id, "model": entry.model, "version": entry.version }),
    )?;
    telemetry.event(
        "trn.job_submitted",
        json!({ "job_id": entry.job_id, "params": entry.params, "model": entry.model }),
    )?;

    update_status(&job_manifest, &entry.job_id, "running", None)?;
    match train_and_evaluate(&params, &args.model, &args.version, Some(&telemetry)) {
        Ok(outcome) => {
            entry.status = "completed".into();
            entry.run_id = Some(outcome.run_id.clone());
            update_status(&job_manifest, &entry.job_id, &entry.status, entry.run_id.as_deref())?;
            telemetry.log(
                LogLevel::Info,
                "job completed",
                json!({ "job_id": entry.job_id, "run_id": outcome.run_id }),
            )?;
            telemetry.event(
                "trn.job_completed",
                json!({ "job_id": entry.job_id, "run_id": outcome.run_id }),
            )?;

            let run = &outcome.metrics;
            println!("model={} type={}", run.model_name, run.model_type);
            println!(
                "MAE={:.2} RMSE={:.2} R2={:.4}",
                run.mean_mae, run.mean_rmse, run.mean_r2
            );
            println!("Saved: {}", outcome.model_path.display());
            println!("Saved: {}", outcome.preprocessor_path.display());
            Ok(entry)
        }
        Err(err) => {
            update_status(&job_manifest, &entry.job_id, "failed", None)?;
            telemetry.log(
                LogLevel::Error,
                "job failed",
                json!({ "job_id": entry.job_id, "error": err.to_string() }),
            )?;
            telemetry.event(
                "trn.job_failed",
                json!({ "job_id": entry.job_id, "error": err.to_string() }),
            )?;
            Err(err).with_context(|| format!("training model '{}'", args.model))
        }
    }
}

fn job_manifest_path(log_dir: &Path) -> PathBuf {
    log_dir.join("jobs").join("index.jsonl")
}

fn compute_log_path(base: &Path) -> Result<PathBuf> {
    let now = Local::now();
    let dir = base
        .join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()));
    fs::create_dir_all(&dir)?;
    Ok(dir.join(format!(
        "job-{}.log.jsonl",
        Utc::now().format("%Y%m%d-%H%M%S")
    )))
}

fn update_status(path: &Path, job_id: &str, status: &str, run_id: Option<&str>) -> Result<()> {
    let mut entries: Vec<JobManifestEntry> = read_json_lines(path)?;
    let mut changed = false;
    for entry in &mut entries {
        if entry.job_id == job_id {
            entry.status = status.to_string();
            if let Some(run_id) = run_id {
                entry.run_id = Some(run_id.to_string());
            }
            changed = true;
        }
    }
    if !changed {
        return Ok(());
    }
    let mut file = File::create(path).with_context(|| format!("rewriting {}", path.display()))?;
    for entry in entries {
        serde_json::to_writer(&mut file, &entry)?;
        file.write_all(b"\n")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use shared_event_bus::EventRecord;
    use shared_logging::LogRecord;
    use spi_data::Table;
    use tempfile::tempdir;

    use super::*;

    const PARAMS: &str = r#"{
        "data": {
            "train_csv": "data/processed/train.csv",
            "numeric_features": ["area", "rooms", "year_built", "monthly_fee", "transaction_year"],
            "categorical_features": ["district"]
        },
        "train": { "cv_folds": 3 },
        "models": { "baseline": { "type": "linear" } }
    }"#;

    fn train_args(dir: &Path, model: &str) -> TrainArgs {
        TrainArgs {
            params: dir.join("params.json"),
            model: model.to_string(),
            version: "v1".to_string(),
            log_dir: dir.join("logs"),
            event_log: Some(dir.join("logs/events.jsonl")),
        }
    }

    #[test]
    fn cli_defaults_follow_the_data_layout() {
        let cli = Cli::try_parse_from(["trn", "train"]).unwrap();
        let Commands::Train(args) = cli.command else {
            panic!("expected train");
        };
        assert_eq!(args.params, PathBuf::from("params.json"));
        assert_eq!(args.model, "baseline");
        assert_eq!(args.version, "v1");

        let cli = Cli::try_parse_from(["trn", "fetch", "--url", "https://example.org/px"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Fetch { ref out, timeout, .. }
                if out == Path::new("data/raw/scb.csv") && (timeout - 60.0).abs() < f64::EPSILON
        ));

        let cli = Cli::try_parse_from(["trn", "decode", "--input", "x.px", "--format", "px"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Decode { format: FormatArg::Px, ref value_col, .. } if value_col == "value"
        ));
        assert!(Cli::try_parse_from(["trn", "decode", "--input", "x", "--format", "xml"]).is_err());
    }

    #[test]
    fn log_path_is_partitioned_by_date() {
        let dir = tempdir().unwrap();
        let path = compute_log_path(dir.path()).unwrap();
        let relative = path.strip_prefix(dir.path()).unwrap();
        let parts: Vec<String> = relative
            .iter()
            .map(|part| part.to_string_lossy().into_owned())
            .collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0].len(), 4);
        assert!(parts[3].starts_with("job-") && parts[3].ends_with(".log.jsonl"));
        assert!(path.parent().unwrap().is_dir());
    }

    #[test]
    fn decode_writes_csv_next_to_input() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("cube.json");
        fs::write(
            &input,
            json!({
                "id": ["Region", "Tid"],
                "size": [2, 1],
                "dimension": {
                    "Region": { "category": { "index": { "0180": 0, "0114": 1 } } },
                    "Tid": { "category": { "index": { "2023": 0 } } }
                },
                "value": [61000, 48000]
            })
            .to_string(),
        )
        .unwrap();
        handle_decode(&input, FormatArg::Auto, None, "price").unwrap();
        let table = Table::read_csv(dir.path().join("cube.csv")).unwrap();
        assert_eq!(table.height(), 2);
        assert!(table.contains("price"));
    }

    #[test]
    fn train_records_job_lifecycle() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("params.json"), PARAMS).unwrap();
        let rows = handle_synth(&dir.path().join("data/processed/train.csv"), 150, 7).unwrap();
        assert_eq!(rows, 150);

        let entry = handle_train(&train_args(dir.path(), "baseline")).unwrap();
        assert_eq!(entry.status, "completed");

        let jobs: Vec<JobManifestEntry> =
            read_json_lines(job_manifest_path(&dir.path().join("logs"))).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, "completed");
        assert_eq!(jobs[0].run_id, entry.run_id);

        let log: Vec<LogRecord> = read_json_lines(&entry.log_path).unwrap();
        assert!(log.iter().any(|record| record.message == "job completed"));
        let events: Vec<EventRecord> = read_json_lines(dir.path().join("logs/events.jsonl")).unwrap();
        assert_eq!(events.first().map(|e| e.event_type.as_str()), Some("trn.job_submitted"));
        assert!(events.iter().any(|e| e.event_type == "training.persisted"));

        let params = TrainParams::load(dir.path().join("params.json")).unwrap();
        let runs = read_manifest(manifest_path(&params)).unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(Some(runs[0].run_id.clone()), entry.run_id);
    }

    #[test]
    fn failed_training_marks_the_job_failed() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("params.json"), PARAMS).unwrap();
        let err = handle_train(&train_args(dir.path(), "missing")).unwrap_err();
        assert!(format!("{err:#}").contains("missing"));

        let jobs: Vec<JobManifestEntry> =
            read_json_lines(job_manifest_path(&dir.path().join("logs"))).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, "failed");
        assert!(jobs[0].run_id.is_none());
    }
}
