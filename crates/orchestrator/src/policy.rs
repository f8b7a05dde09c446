use std::path::Path;
use log::{info, warn};
use crate::error::{EncodeError, JobError};
use crate::profile::ProfileKind;

/// How one encoder attempt ended
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Exit code 0. `target_bytes` is None when no usable output exists.
    Finished { target_bytes: Option<u64> },
    /// The process could not run to a clean exit
    Failed(EncodeError),
}

/// What to do after an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Output is smaller than the source
    Accept { target_bytes: u64 },
    /// Retry the same target with the next profile
    Escalate(ProfileKind),
    /// Nothing left to try (or no time to try it); keep what was produced
    AcceptBestEffort { target_bytes: u64 },
    /// Replace the target with a verbatim copy of the source
    CopyFallback { reason: String },
    /// The encoder may still be running; the target cannot be trusted or reused
    Abandon { reason: String },
}

/// Escalation state machine:
/// Primary -> Evaluate -> {Accept | Aggressive} -> Evaluate -> {Accept | Forced} -> Evaluate -> Accept
#[derive(Debug, Clone, Copy)]
pub struct EscalationPolicy {
    source_bytes: u64,
}

impl EscalationPolicy {
    pub fn new(source_bytes: u64) -> Self {
        Self { source_bytes }
    }

    /// Judge the attempt made with `stage`. `time_left` is false once the
    /// whole-job deadline has passed, which rules out further escalation.
    pub fn evaluate(&self, stage: ProfileKind, outcome: &AttemptOutcome, time_left: bool) -> Verdict {
        match outcome {
            AttemptOutcome::Failed(EncodeError::EncodeTimedOut { terminated: false, after }) => Verdict::Abandon {
                reason: format!("{} encoder ignored termination after {}s", stage, after.as_secs()),
            },
            AttemptOutcome::Failed(e) => Verdict::CopyFallback {
                reason: format!("{} attempt failed: {}", stage, e),
            },
            AttemptOutcome::Finished { target_bytes } => {
                let produced = target_bytes.filter(|&b| b > 0);
                if let Some(bytes) = produced {
                    if bytes < self.source_bytes {
                        return Verdict::Accept { target_bytes: bytes };
                    }
                }

                match (stage.next(), time_left, produced) {
                    (Some(next), true, _) => Verdict::Escalate(next),
                    (_, _, Some(bytes)) => Verdict::AcceptBestEffort { target_bytes: bytes },
                    (_, _, None) => Verdict::CopyFallback {
                        reason: format!("{} attempt produced no output", stage),
                    },
                }
            }
        }
    }
}

/// Duplicate `source` over `target` via a `.part` sibling so a reader never
/// finds a half-copied target. Returns the copied size.
pub async fn copy_fallback(source: &Path, target: &Path) -> Result<u64, JobError> {
    let part = part_path(target);

    let copied = match tokio::fs::copy(source, &part).await {
        Ok(bytes) => bytes,
        Err(source_err) => {
            let _ = tokio::fs::remove_file(&part).await;
            let _ = tokio::fs::remove_file(target).await;
            return Err(JobError::CopyFallbackFailed {
                target: target.to_path_buf(),
                source: source_err,
            });
        }
    };

    if let Err(e) = tokio::fs::rename(&part, target).await {
        warn!("Copy fallback rename failed: {} -> {}: {}", part.display(), target.display(), e);
        let _ = tokio::fs::remove_file(&part).await;
        let _ = tokio::fs::remove_file(target).await;
        return Err(JobError::CopyFallbackFailed {
            target: target.to_path_buf(),
            source: e,
        });
    }

    info!("Copy fallback: {} -> {} ({} bytes)", source.display(), target.display(), copied);
    Ok(copied)
}

fn part_path(target: &Path) -> std::path::PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    target.with_file_name(name)
}
