use anyhow::{Context, Result};
use clap::Parser;
use humansize::{format_size, DECIMAL};
use log::{info, warn, LevelFilter};
use orchestrator::{
    Compression, JobKey, JobRecord, JobStatus, Orchestrator, OrchestratorConfig, OutputFormat, ProfileKnobs,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Shrink video files with automatic profile escalation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Quality percentage (95, 85, 75, 60 or 40; anything else uses the default CRF)
    #[arg(short, long, default_value_t = 80, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: u8,

    /// Compression level: none, light, medium, heavy, web
    #[arg(long, default_value = "medium")]
    compression: Compression,

    /// Output container: mp4, mkv, mov
    #[arg(short, long, default_value = "mp4")]
    format: OutputFormat,

    /// Progress polling interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Print progress reports as JSON lines
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Video files to compress
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG still wins over -v
    let mut logger = env_logger::Builder::new();
    logger
        .filter_level(if args.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let cfg = OrchestratorConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    info!("Shrink starting");
    info!("  Upload dir: {}", cfg.upload_dir.display());
    info!("  Output dir: {}", cfg.output_dir.display());
    info!("  Primary timeout: {}s, escalation timeout: {}s", cfg.primary_timeout_secs, cfg.escalation_timeout_secs);

    let orch = Orchestrator::new(cfg).context("Failed to initialize orchestrator")?;
    let _sweeper = orch.spawn_sweeper();

    let knobs = ProfileKnobs {
        quality: args.quality,
        compression: args.compression,
        format: args.format,
    };

    let mut keys = Vec::new();
    let mut intake_failures = 0;
    for file in &args.files {
        let ingested = match orch.storage().ingest(file).await {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping {}: {:#}", file.display(), e);
                intake_failures += 1;
                continue;
            }
        };
        match orch.submit_job(&ingested, knobs).await {
            Ok(key) => {
                info!("Submitted {} as job {}", file.display(), key);
                keys.push((key, file.clone()));
            }
            Err(e) => {
                warn!("Skipping {}: {}", file.display(), e);
                intake_failures += 1;
            }
        }
    }

    poll_until_done(&orch, &keys, Duration::from_millis(args.poll_ms.max(10)), args.json).await?;

    let mut unsuccessful = intake_failures;
    println!();
    for (key, file) in &keys {
        let Some(record) = orch.wait_for(key).await else {
            unsuccessful += 1;
            continue;
        };
        if record.status != JobStatus::Completed {
            unsuccessful += 1;
        }
        println!("{}", summary_line(file, &record));
    }

    if unsuccessful > 0 {
        anyhow::bail!("{} of {} file(s) were not compressed", unsuccessful, args.files.len());
    }
    Ok(())
}

/// Print every progress change until all jobs are terminal
async fn poll_until_done(orch: &Orchestrator, keys: &[(JobKey, PathBuf)], every: Duration, json: bool) -> Result<()> {
    let mut last_seen: HashMap<&JobKey, (JobStatus, u8, String)> = HashMap::new();
    let mut ticker = tokio::time::interval(every);

    loop {
        ticker.tick().await;
        let mut pending = 0;

        for (key, file) in keys {
            let report = orch.get_progress(key);
            if !report.status.is_terminal() {
                pending += 1;
            }

            let snapshot = (report.status, report.progress, report.message.clone());
            if last_seen.get(key) == Some(&snapshot) {
                continue;
            }
            last_seen.insert(key, snapshot);

            if json {
                let line = serde_json::json!({ "key": key, "file": file, "report": report });
                println!("{}", serde_json::to_string(&line).context("Failed to serialize progress report")?);
            } else {
                println!(
                    "[{:>3}%] {:<10} {}: {}",
                    report.progress,
                    report.status,
                    file.display(),
                    report.message
                );
            }
        }

        if pending == 0 {
            return Ok(());
        }
    }
}

fn summary_line(file: &std::path::Path, record: &JobRecord) -> String {
    match (record.status, record.source_bytes, record.target_bytes) {
        (JobStatus::Completed, Some(src), Some(dst)) => format!(
            "✅ {} -> {} ({} -> {}, {:.1}% saved{})",
            file.display(),
            record.target_path.display(),
            format_size(src, DECIMAL),
            format_size(dst, DECIMAL),
            record.compression_ratio.unwrap_or(0.0),
            record.profile.as_deref().map(|p| format!(", {} profile", p)).unwrap_or_else(|| ", copied".to_string())
        ),
        (status, _, _) => format!("❌ {} ({}): {}", file.display(), status, record.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use std::path::Path;

    #[test]
    fn test_args_defaults() {
        let args = Args::try_parse_from(["shrink", "a.mp4", "b.mov"]).unwrap();
        assert_eq!(args.quality, 80);
        assert_eq!(args.compression, Compression::Medium);
        assert_eq!(args.format, OutputFormat::Mp4);
        assert_eq!(args.files.len(), 2);
    }

    #[test]
    fn test_args_reject_bad_values() {
        assert!(Args::try_parse_from(["shrink"]).is_err());
        assert!(Args::try_parse_from(["shrink", "--compression", "extreme", "a.mp4"]).is_err());
        assert!(Args::try_parse_from(["shrink", "--quality", "0", "a.mp4"]).is_err());
        let args = Args::try_parse_from(["shrink", "--format", "MKV", "--compression", "web", "a.mp4"]).unwrap();
        assert_eq!(args.format, OutputFormat::Mkv);
        assert_eq!(args.compression, Compression::Web);
    }

    #[test]
    fn test_summary_line() {
        let mut record = JobRecord::new(
            JobKey::from("k"),
            PathBuf::from("/up/x_a.mp4"),
            PathBuf::from("/out/x_a_converted.mp4"),
            2_000_000,
            ChronoDuration::seconds(60),
        );
        record.status = JobStatus::Completed;
        record.set_sizes(2_000_000, 500_000);
        record.profile = Some("primary".to_string());
        let line = summary_line(Path::new("a.mp4"), &record);
        assert!(line.contains("75.0% saved"));
        assert!(line.contains("primary profile"));

        record.status = JobStatus::Failed;
        record.message = "Compression failed: disk full".to_string();
        assert!(summary_line(Path::new("a.mp4"), &record).contains("disk full"));
    }
}
