use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the transcode job orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Path to the ffmpeg binary (PATH lookup when bare)
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary (PATH lookup when bare)
    pub ffprobe_bin: PathBuf,
    /// Directory holding ingested source files
    pub upload_dir: PathBuf,
    /// Directory holding finished artifacts
    pub output_dir: PathBuf,
    /// Upper bound for the one-shot duration probe
    pub probe_timeout_secs: u64,
    /// Budget for the primary encoding attempt
    pub primary_timeout_secs: u64,
    /// Budget for each escalation attempt (Aggressive, Forced)
    pub escalation_timeout_secs: u64,
    /// Hard wall-clock ceiling for the whole job
    pub job_budget_secs: u64,
    /// Silence on the encoder output longer than this triggers a heartbeat update
    pub heartbeat_interval_ms: u64,
    /// Percent per second used by the elapsed-time progress heuristic
    pub heuristic_rate: f64,
    /// Files in upload/output dirs older than this are swept
    pub retention_secs: u64,
    /// Interval between retention sweeps
    pub sweep_interval_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl OrchestratorConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            upload_dir: PathBuf::from("/tmp/shrink/uploads"),
            output_dir: PathBuf::from("/tmp/shrink/outputs"),
            probe_timeout_secs: 10,
            primary_timeout_secs: 300, // 5 minutes
            escalation_timeout_secs: 60,
            job_budget_secs: 600,
            heartbeat_interval_ms: 2000,
            heuristic_rate: 3.2,
            retention_secs: 3600, // 1 hour
            sweep_interval_secs: 300,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn primary_timeout(&self) -> Duration {
        Duration::from_secs(self.primary_timeout_secs)
    }

    pub fn escalation_timeout(&self) -> Duration {
        Duration::from_secs(self.escalation_timeout_secs)
    }

    pub fn job_budget(&self) -> Duration {
        Duration::from_secs(self.job_budget_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
