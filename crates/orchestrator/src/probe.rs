use std::path::Path;
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use log::{debug, warn};
use serde::Deserialize;
use tokio::process::Command;
use crate::config::OrchestratorConfig;

/// Subset of `ffprobe -print_format json -show_entries format=duration`
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeOutput {
    pub format: Option<ProbeFormat>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeFormat {
    /// ffprobe prints numbers as strings ("60.046000")
    pub duration: Option<String>,
}

/// Total media duration in seconds, or None when it cannot be determined.
///
/// Never fails the job: a missing tool, bad exit, garbage output or timeout
/// all degrade progress reporting to the elapsed-time heuristic.
pub async fn probe_duration(cfg: &OrchestratorConfig, file_path: &Path) -> Option<f64> {
    match run_probe(cfg, file_path).await {
        Ok(duration) => {
            debug!("ffprobe: {} lasts {:.2}s", file_path.display(), duration);
            Some(duration)
        }
        Err(e) => {
            warn!("ffprobe: duration unavailable for {}: {:#}", file_path.display(), e);
            None
        }
    }
}

async fn run_probe(cfg: &OrchestratorConfig, file_path: &Path) -> Result<f64> {
    let mut cmd = Command::new(&cfg.ffprobe_bin);
    cmd.arg("-v")
        .arg("error")
        .arg("-print_format")
        .arg("json")
        .arg("-show_entries")
        .arg("format=duration")
        .arg(file_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(cfg.probe_timeout(), cmd.output())
        .await
        .map_err(|_| anyhow!("ffprobe timed out after {}s", cfg.probe_timeout_secs))?
        .with_context(|| format!("Failed to execute ffprobe at: {}", cfg.ffprobe_bin.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "ffprobe failed (exit code {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }

    let json_str = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    parse_duration_json(&json_str)
}

/// Extract a positive, finite duration from ffprobe JSON
pub fn parse_duration_json(json_str: &str) -> Result<f64> {
    let data: ProbeOutput = serde_json::from_str(json_str).context("Failed to parse ffprobe JSON")?;

    let raw = data
        .format
        .and_then(|f| f.duration)
        .ok_or_else(|| anyhow!("ffprobe reported no format duration"))?;

    let duration: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("Unparsable duration: {}", raw))?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(anyhow!("Implausible duration: {}", raw));
    }

    Ok(duration)
}
