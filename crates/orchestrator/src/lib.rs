pub mod config;
pub mod error;
pub mod job;
pub mod store;
pub mod profile;
pub mod probe;
pub mod progress;
pub mod encoder;
pub mod policy;
pub mod storage;
pub mod orchestrator;

#[cfg(all(test, unix))]
mod testutil;

pub use config::OrchestratorConfig;
pub use error::{EncodeError, JobError};
pub use job::{JobKey, JobRecord, JobStatus, ProgressReport};
pub use orchestrator::Orchestrator;
pub use profile::{Compression, OutputFormat, ProfileKind, ProfileKnobs};
pub use storage::Storage;
pub use store::ProgressStore;
