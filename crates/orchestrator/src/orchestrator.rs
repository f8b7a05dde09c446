use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use crate::config::OrchestratorConfig;
use crate::encoder::Encoder;
use crate::error::{EncodeError, JobError};
use crate::job::{compression_ratio, JobKey, JobRecord, JobStatus, ProgressReport};
use crate::policy::{copy_fallback, AttemptOutcome, EscalationPolicy, Verdict};
use crate::probe::probe_duration;
use crate::profile::{EncodingProfile, ProfileKind, ProfileKnobs};
use crate::progress::{ProgressParser, ProgressUpdate, MAX_PARSED_PERCENT};
use crate::storage::Storage;
use crate::store::ProgressStore;

/// Background tasks of jobs that have not finished yet
type JobHandles = Arc<Mutex<HashMap<JobKey, JoinHandle<()>>>>;

/// Heartbeat floor; `tokio::time::interval` rejects a zero period
const MIN_HEARTBEAT: Duration = Duration::from_millis(100);

/// Accepts submissions and drives each one to a terminal state on its own task
pub struct Orchestrator {
    cfg: Arc<OrchestratorConfig>,
    store: ProgressStore,
    storage: Storage,
    encoder: Encoder,
    handles: JobHandles,
}

impl Orchestrator {
    pub fn new(cfg: OrchestratorConfig) -> Result<Self> {
        let storage = Storage::new(cfg.upload_dir.clone(), cfg.output_dir.clone());
        storage.ensure_dirs()?;

        Ok(Self {
            encoder: Encoder::new(&cfg),
            cfg: Arc::new(cfg),
            store: ProgressStore::new(),
            storage,
            handles: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.cfg
    }

    pub fn store(&self) -> &ProgressStore {
        &self.store
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Register a job for `source` and start it in the background.
    ///
    /// Returns as soon as the record exists; only an unreadable source fails
    /// here. Everything after intake is reported through the progress store.
    pub async fn submit_job(&self, source: &Path, knobs: ProfileKnobs) -> Result<JobKey, JobError> {
        let unreadable = |e: std::io::Error| JobError::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        };
        let file = tokio::fs::File::open(source).await.map_err(unreadable)?;
        let source_bytes = file.metadata().await.map_err(unreadable)?.len();
        drop(file);

        let job_deadline = Instant::now() + self.cfg.job_budget();
        let budget = chrono::Duration::from_std(self.cfg.job_budget()).unwrap_or_else(|_| chrono::Duration::days(1));

        let mut key = JobKey::generate();
        let target = loop {
            let record = JobRecord::new(
                key.clone(),
                source.to_path_buf(),
                self.storage.target_for(source, knobs.format),
                source_bytes,
                budget,
            );
            match self.store.insert(record) {
                Some(target) => break target,
                None => key = JobKey::generate(),
            }
        };

        info!(
            "Job {}: queued {} ({} bytes) -> {}",
            key,
            source.display(),
            source_bytes,
            target.display()
        );

        let runner = JobRunner {
            key: key.clone(),
            cfg: self.cfg.clone(),
            store: self.store.clone(),
            encoder: self.encoder.clone(),
            knobs,
            source: source.to_path_buf(),
            target,
            source_bytes,
            job_deadline,
        };
        // The task drops its own entry when it ends; holding the lock across
        // spawn keeps that removal from running before the insert
        let handles = self.handles.clone();
        let task_key = key.clone();
        let mut tracked = self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = tokio::spawn(async move {
            runner.run().await;
            handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&task_key);
        });
        tracked.insert(key.clone(), handle);
        drop(tracked);

        Ok(key)
    }

    /// Snapshot for pollers; unknown keys report `not_found`
    pub fn get_progress(&self, key: &JobKey) -> ProgressReport {
        self.store.report(key)
    }

    pub fn record(&self, key: &JobKey) -> Option<JobRecord> {
        self.store.get(key)
    }

    /// Target path, once the job has completed
    pub fn result_path(&self, key: &JobKey) -> Option<PathBuf> {
        self.store
            .get(key)
            .filter(|r| r.status == JobStatus::Completed)
            .map(|r| r.target_path)
    }

    /// Number of jobs whose background task is still running
    pub fn active_jobs(&self) -> usize {
        self.handles.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Wait for the job's background task to finish and return its final record
    pub async fn wait_for(&self, key: &JobKey) -> Option<JobRecord> {
        let handle = self
            .handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Job {}: worker task aborted: {}", key, e);
            }
        }
        self.store.get(key)
    }

    /// Start the periodic retention sweep over upload and output directories
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        self.storage.spawn_sweeper(self.cfg.retention(), self.cfg.sweep_interval())
    }
}

/// Everything one job's background task needs
struct JobRunner {
    key: JobKey,
    cfg: Arc<OrchestratorConfig>,
    store: ProgressStore,
    encoder: Encoder,
    knobs: ProfileKnobs,
    source: PathBuf,
    target: PathBuf,
    source_bytes: u64,
    job_deadline: Instant,
}

impl JobRunner {
    async fn run(self) {
        self.update(|r| {
            r.status = JobStatus::Probing;
            r.message = "Reading media duration...".to_string();
        });

        let duration = probe_duration(&self.cfg, &self.source).await;
        if let Some(secs) = duration {
            self.update(|r| r.source_duration_seconds = Some(secs));
        }

        let policy = EscalationPolicy::new(self.source_bytes);
        let mut stage = ProfileKind::Primary;

        loop {
            let profile = EncodingProfile::for_kind(stage, &self.knobs);
            let outcome = self.run_attempt(&profile, duration).await;
            if let AttemptOutcome::Failed(e) = &outcome {
                warn!("Job {}: {} attempt failed: {}", self.key, stage, e);
            }

            let time_left = Instant::now() < self.job_deadline;
            match policy.evaluate(stage, &outcome, time_left) {
                Verdict::Accept { target_bytes } => {
                    let saved = compression_ratio(self.source_bytes, target_bytes);
                    self.complete(
                        stage,
                        target_bytes,
                        format!("Video compression completed! Size reduced by {:.1}%", saved),
                    );
                    return;
                }
                Verdict::AcceptBestEffort { target_bytes } => {
                    if !time_left {
                        warn!("Job {}: job budget exhausted, keeping {} output", self.key, stage);
                    }
                    self.complete(
                        stage,
                        target_bytes,
                        format!(
                            "Video compression completed ({} profile could not shrink the file)",
                            stage
                        ),
                    );
                    return;
                }
                Verdict::Escalate(next) => {
                    info!("Job {}: {} output not smaller than source, escalating to {}", self.key, stage, next);
                    stage = next;
                }
                Verdict::CopyFallback { reason } => {
                    self.fall_back_to_copy(&reason).await;
                    return;
                }
                Verdict::Abandon { reason } => {
                    error!("Job {}: {}", self.key, reason);
                    self.update(|r| {
                        r.status = JobStatus::TimedOut;
                        r.progress_percent = 100;
                        r.message = format!("Compression timed out: {}", reason);
                        r.finished_at = Some(Utc::now());
                    });
                    return;
                }
            }
        }
    }

    /// Launch one profile, pump its output into the store until it exits or
    /// its deadline passes.
    async fn run_attempt(&self, profile: &EncodingProfile, duration: Option<f64>) -> AttemptOutcome {
        let stage = profile.kind;
        let budget = match stage {
            ProfileKind::Primary => self.cfg.primary_timeout(),
            _ => self.cfg.escalation_timeout(),
        };
        let started = Instant::now();
        let deadline = (started + budget).min(self.job_deadline);
        let allowed = deadline.saturating_duration_since(started);

        let mut process = match self.encoder.launch(&self.source, &self.target, profile) {
            Ok(p) => p,
            Err(e) => return AttemptOutcome::Failed(e),
        };

        self.update(|r| {
            r.status = match stage {
                ProfileKind::Primary => JobStatus::Encoding,
                _ => JobStatus::Escalating,
            };
            r.progress_percent = 1;
            r.message = match stage {
                ProfileKind::Primary => "Starting FFmpeg compression...".to_string(),
                _ => format!("Output not smaller, retrying with {} profile...", stage),
            };
            r.profile = Some(stage.name().to_string());
            r.attempts += 1;
        });
        debug!("Job {}: {} attempt running: {}", self.key, stage, process.command());

        let heartbeat = self.cfg.heartbeat_interval().max(MIN_HEARTBEAT);
        let mut parser = ProgressParser::new(duration, self.cfg.heuristic_rate, started);
        let mut ticker = tokio::time::interval(heartbeat);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let expiry = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
        tokio::pin!(expiry);

        // Both streams drain before the exit status is collected
        loop {
            tokio::select! {
                line = process.next_line() => match line {
                    Some(line) => {
                        if let Some(update) = parser.feed_line(line.text(), Instant::now()) {
                            self.publish(update);
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if let Some(update) = parser.heartbeat(Instant::now(), heartbeat) {
                        self.publish(update);
                    }
                }
                _ = &mut expiry => {
                    let terminated = process.terminate().await;
                    self.mark_evaluating(stage);
                    return AttemptOutcome::Failed(EncodeError::EncodeTimedOut { after: allowed, terminated });
                }
            }
        }

        self.publish(ProgressUpdate {
            percent: MAX_PARSED_PERCENT,
            message: "Finalizing conversion...".to_string(),
        });

        let status = tokio::select! {
            status = process.wait() => status,
            _ = &mut expiry => {
                let terminated = process.terminate().await;
                self.mark_evaluating(stage);
                return AttemptOutcome::Failed(EncodeError::EncodeTimedOut { after: allowed, terminated });
            }
        };
        self.mark_evaluating(stage);

        match status {
            Ok(status) if status.success() => {
                let target_bytes = tokio::fs::metadata(&self.target).await.ok().map(|m| m.len());
                debug!("Job {}: {} attempt wrote {:?} bytes", self.key, stage, target_bytes);
                AttemptOutcome::Finished { target_bytes }
            }
            Ok(status) => AttemptOutcome::Failed(EncodeError::EncodeFailed {
                exit_code: status.code(),
                stderr_tail: process.stderr_tail(),
            }),
            Err(e) => AttemptOutcome::Failed(EncodeError::EncodeFailed {
                exit_code: None,
                stderr_tail: e.to_string(),
            }),
        }
    }

    async fn fall_back_to_copy(&self, reason: &str) {
        warn!("Job {}: {}; copying source unchanged", self.key, reason);
        match copy_fallback(&self.source, &self.target).await {
            Ok(copied) => {
                info!("✅ Job {}: completed in fallback mode ({} bytes)", self.key, copied);
                self.update(|r| {
                    r.status = JobStatus::Completed;
                    r.progress_percent = 100;
                    r.message = "Video processing completed (fallback mode)".to_string();
                    r.set_sizes(copied, copied);
                    r.profile = None;
                    r.finished_at = Some(Utc::now());
                });
            }
            Err(e) => {
                error!("❌ Job {}: {}", self.key, e);
                self.update(|r| {
                    r.status = JobStatus::Failed;
                    r.progress_percent = 100;
                    r.message = format!("Compression failed: {}", e);
                    r.finished_at = Some(Utc::now());
                });
            }
        }
    }

    fn complete(&self, stage: ProfileKind, target_bytes: u64, message: String) {
        info!(
            "✅ Job {}: completed with {} profile: {} -> {} bytes",
            self.key, stage, self.source_bytes, target_bytes
        );
        self.update(|r| {
            r.status = JobStatus::Completed;
            r.progress_percent = 100;
            r.message = message;
            r.set_sizes(self.source_bytes, target_bytes);
            r.profile = Some(stage.name().to_string());
            r.finished_at = Some(Utc::now());
        });
    }

    fn mark_evaluating(&self, stage: ProfileKind) {
        self.update(|r| {
            r.status = JobStatus::Evaluating;
            r.message = format!("Checking {} output size...", stage);
        });
    }

    fn publish(&self, update: ProgressUpdate) {
        self.update(|r| {
            r.progress_percent = update.percent;
            r.message = update.message;
        });
    }

    fn update<F: FnOnce(&mut JobRecord)>(&self, f: F) {
        if !self.store.update(&self.key, f) {
            debug!("Job {}: record update discarded", self.key);
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::testutil::{fake_ffmpeg, fake_ffprobe, source_file, write_script};

    const SOURCE_BYTES: usize = 10_000;

    fn config_in(dir: &Path) -> OrchestratorConfig {
        OrchestratorConfig {
            ffmpeg_bin: dir.join("ffmpeg"),
            ffprobe_bin: dir.join("ffprobe"),
            upload_dir: dir.join("uploads"),
            output_dir: dir.join("outputs"),
            heartbeat_interval_ms: 100,
            ..Default::default()
        }
    }

    async fn run_to_end(orch: &Orchestrator, source: &Path) -> JobRecord {
        let key = orch.submit_job(source, ProfileKnobs::default()).await.unwrap();
        let record = tokio::time::timeout(Duration::from_secs(20), orch.wait_for(&key))
            .await
            .expect("job did not finish")
            .unwrap();
        assert!(record.status.is_terminal());
        assert_eq!(record.progress_percent, 100);
        record
    }

    #[tokio::test]
    async fn test_primary_output_accepted_without_escalation() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 60.0);
        fake_ffmpeg(dir.path(), &["out_time=00:00:30.000000"], &[], (SOURCE_BYTES / 2) as u64);
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let record = run_to_end(&orch, &source).await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.profile.as_deref(), Some("primary"));
        assert_eq!(record.source_duration_seconds, Some(60.0));
        assert_eq!(record.target_bytes, Some((SOURCE_BYTES / 2) as u64));
        assert!((record.compression_ratio.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(std::fs::metadata(&record.target_path).unwrap().len(), (SOURCE_BYTES / 2) as u64);
        assert_eq!(orch.result_path(&record.key), Some(record.target_path.clone()));

        let report = orch.get_progress(&record.key);
        assert_eq!(report.status, JobStatus::Completed);
        assert_eq!(report.original_size, Some(SOURCE_BYTES as u64));
    }

    /// Poll until terminal, recording every distinct (status, progress) pair
    async fn watch(orch: &Orchestrator, key: &JobKey) -> Vec<(JobStatus, u8)> {
        let give_up = Instant::now() + Duration::from_secs(20);
        let mut seen: Vec<(JobStatus, u8)> = Vec::new();
        loop {
            let report = orch.get_progress(key);
            let snapshot = (report.status, report.progress);
            if seen.last() != Some(&snapshot) {
                seen.push(snapshot);
            }
            if report.status.is_terminal() {
                return seen;
            }
            assert!(Instant::now() < give_up, "job did not finish: {:?}", seen);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn stage_rank(status: JobStatus) -> u8 {
        match status {
            JobStatus::Queued => 0,
            JobStatus::Probing => 1,
            JobStatus::Encoding => 2,
            JobStatus::Evaluating | JobStatus::Escalating => 3,
            _ => 4,
        }
    }

    fn assert_never_moves_backwards(seen: &[(JobStatus, u8)]) {
        for pair in seen.windows(2) {
            assert!(
                stage_rank(pair[0].0) <= stage_rank(pair[1].0),
                "backwards move {:?} -> {:?} in {:?}",
                pair[0],
                pair[1],
                seen
            );
        }
    }

    #[tokio::test]
    async fn test_progress_is_visible_while_encoding() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 60.0);
        write_script(
            dir.path(),
            "ffmpeg",
            "for a in \"$@\"; do out=\"$a\"; done\necho 'out_time=00:00:30.000000'\nsleep 1\nhead -c 10 /dev/zero > \"$out\"",
        );
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();
        let key = orch.submit_job(&source, ProfileKnobs::default()).await.unwrap();

        let seen = watch(&orch, &key).await;

        assert!(seen.contains(&(JobStatus::Encoding, 50)), "never observed 50%: {:?}", seen);
        assert!(seen.iter().all(|(status, _)| *status != JobStatus::Escalating));
        assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1), "progress dropped: {:?}", seen);
        assert_never_moves_backwards(&seen);
        assert_eq!(seen.last(), Some(&(JobStatus::Completed, 100)));
    }

    #[tokio::test]
    async fn test_each_escalation_resets_progress_once() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        write_script(
            dir.path(),
            "ffmpeg",
            "out=\"\"; crf=\"\"; prev=\"\"\n\
             for a in \"$@\"; do\n  if [ \"$prev\" = \"-crf\" ]; then crf=\"$a\"; fi\n  prev=\"$a\"; out=\"$a\"\ndone\n\
             sleep 0.3\n\
             echo 'out_time=00:00:09.000000'\n\
             sleep 0.3\n\
             case \"$crf\" in\n  40) head -c 2500 /dev/zero > \"$out\" ;;\n  *) head -c 20000 /dev/zero > \"$out\" ;;\nesac",
        );
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();
        let key = orch.submit_job(&source, ProfileKnobs::default()).await.unwrap();

        let seen = watch(&orch, &key).await;

        let drops: Vec<usize> = (1..seen.len()).filter(|&i| seen[i].1 < seen[i - 1].1).collect();
        assert_eq!(drops.len(), 2, "expected one reset per escalation: {:?}", seen);
        for i in drops {
            assert_eq!(seen[i].0, JobStatus::Escalating, "reset outside escalation: {:?}", seen);
            assert!(seen[i].1 < 50, "reset did not go low: {:?}", seen);
        }
        assert_never_moves_backwards(&seen);
        assert!(seen.contains(&(JobStatus::Encoding, 90)));
        assert!(seen.contains(&(JobStatus::Escalating, 90)));
        assert_eq!(seen.last(), Some(&(JobStatus::Completed, 100)));

        let record = orch.record(&key).unwrap();
        assert_eq!(record.attempts, 3);
        assert_eq!(record.profile.as_deref(), Some("forced"));
    }

    #[tokio::test]
    async fn test_non_utf8_stderr_keeps_primary_result() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        write_script(
            dir.path(),
            "ffmpeg",
            "for a in \"$@\"; do out=\"$a\"; done\n\
             printf 'title : caf\\351\\n' >&2\n\
             sleep 0.2\n\
             echo 'Stream mapping:' >&2\n\
             head -c 5000 /dev/zero > \"$out\"",
        );
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let record = run_to_end(&orch, &source).await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.profile.as_deref(), Some("primary"));
        assert_eq!(record.target_bytes, Some(5000));
        assert!((record.compression_ratio.unwrap() - 50.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_finished_jobs_release_their_task_handle() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        fake_ffmpeg(dir.path(), &[], &[], 100);
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let mut keys = Vec::new();
        for _ in 0..3 {
            keys.push(orch.submit_job(&source, ProfileKnobs::default()).await.unwrap());
        }
        for key in &keys {
            watch(&orch, key).await;
        }

        let give_up = Instant::now() + Duration::from_secs(5);
        while orch.active_jobs() > 0 {
            assert!(Instant::now() < give_up, "{} handle(s) still tracked", orch.active_jobs());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(orch.record(&keys[0]).unwrap().status, JobStatus::Completed);
        assert!(orch.wait_for(&keys[0]).await.is_some());
    }

    #[tokio::test]
    async fn test_missing_encoder_falls_back_to_copy() {
        let dir = tempfile::tempdir().unwrap();
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let record = run_to_end(&orch, &source).await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 0);
        assert_eq!(record.profile, None);
        assert_eq!(record.compression_ratio, Some(0.0));
        assert_eq!(record.source_bytes, record.target_bytes);
        assert_eq!(record.source_duration_seconds, None);
        assert_eq!(std::fs::read(&record.target_path).unwrap(), std::fs::read(&source).unwrap());
    }

    #[tokio::test]
    async fn test_growing_output_escalates_to_forced() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        let larger = (SOURCE_BYTES * 2) as u64;
        let smaller = (SOURCE_BYTES / 4) as u64;
        fake_ffmpeg(dir.path(), &["frame=10"], &[(28, larger), (35, larger), (40, smaller)], larger);
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let record = run_to_end(&orch, &source).await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.profile.as_deref(), Some("forced"));
        assert_eq!(record.target_bytes, Some(smaller));
        assert!((record.compression_ratio.unwrap() - 75.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_no_profile_shrinks_keeps_forced_output() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        let larger = (SOURCE_BYTES + 500) as u64;
        fake_ffmpeg(dir.path(), &[], &[], larger);
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let record = run_to_end(&orch, &source).await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.profile.as_deref(), Some("forced"));
        assert!(record.compression_ratio.unwrap() < 0.0);
    }

    #[tokio::test]
    async fn test_hung_encoder_is_killed_and_copied() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        write_script(dir.path(), "ffmpeg", "exec sleep 30");
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let cfg = OrchestratorConfig {
            primary_timeout_secs: 1,
            ..config_in(dir.path())
        };
        let orch = Orchestrator::new(cfg).unwrap();

        let started = Instant::now();
        let record = run_to_end(&orch, &source).await;

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.compression_ratio, Some(0.0));
        assert_eq!(record.target_bytes, Some(SOURCE_BYTES as u64));
    }

    #[tokio::test]
    async fn test_crashing_encoder_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        write_script(dir.path(), "ffmpeg", "echo 'Invalid data found' >&2\nexit 1");
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let record = run_to_end(&orch, &source).await;

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.message, "Video processing completed (fallback mode)");
        assert_eq!(record.target_bytes, Some(SOURCE_BYTES as u64));
    }

    #[tokio::test]
    async fn test_unreadable_source_is_rejected_at_intake() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let err = orch
            .submit_job(&dir.path().join("missing.mp4"), ProfileKnobs::default())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::SourceUnreadable { .. }));
        assert!(orch.store().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let report = orch.get_progress(&JobKey::from("does-not-exist"));
        assert_eq!(report.status, JobStatus::NotFound);
        assert_eq!(report.progress, 0);
        assert_eq!(report.message, "Conversion not found");
        assert!(orch.result_path(&JobKey::from("does-not-exist")).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_jobs_for_same_name_get_distinct_targets() {
        let dir = tempfile::tempdir().unwrap();
        fake_ffprobe(dir.path(), 10.0);
        fake_ffmpeg(dir.path(), &[], &[], 100);
        let source = source_file(dir.path(), "clip.mp4", SOURCE_BYTES);
        let orch = Orchestrator::new(config_in(dir.path())).unwrap();

        let a = orch.submit_job(&source, ProfileKnobs::default()).await.unwrap();
        let b = orch.submit_job(&source, ProfileKnobs::default()).await.unwrap();
        let a = orch.wait_for(&a).await.unwrap();
        let b = orch.wait_for(&b).await.unwrap();

        assert_ne!(a.key, b.key);
        assert_ne!(a.target_path, b.target_path);
        assert_eq!(a.status, JobStatus::Completed);
        assert_eq!(b.status, JobStatus::Completed);
    }
}
