use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single encoder attempt. Never surfaced to callers directly;
/// the escalation policy turns each of these into "next profile" or "copy".
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("encoder could not be launched ({bin}): {source}")]
    EncoderUnavailable {
        bin: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("encoder exited with code {}: {stderr_tail}", exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    EncodeFailed {
        exit_code: Option<i32>,
        stderr_tail: String,
    },

    #[error("encoder exceeded its {}s budget (terminated: {terminated})", after.as_secs())]
    EncodeTimedOut { after: Duration, terminated: bool },
}

/// Job-level errors. Only these are user visible.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("source file is unreadable: {path}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("copy fallback failed for {target}: {source}")]
    CopyFallbackFailed {
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
