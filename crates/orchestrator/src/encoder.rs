use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use crate::config::OrchestratorConfig;
use crate::error::EncodeError;
use crate::profile::{EncodingProfile, ProfileKind};

/// Number of stderr lines kept for error reports
const STDERR_TAIL_LINES: usize = 20;
const LINE_CHANNEL_CAPACITY: usize = 256;

/// One line of encoder output, tagged with its stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderLine {
    Stdout(String),
    Stderr(String),
}

impl EncoderLine {
    pub fn text(&self) -> &str {
        match self {
            EncoderLine::Stdout(s) | EncoderLine::Stderr(s) => s,
        }
    }
}

/// Command builder for generating ffmpeg command lines
#[derive(Debug, Clone, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Build the H.264 encode command for one profile.
    ///
    /// `-progress pipe:1` puts newline-terminated `out_time=`/`frame=` lines on
    /// stdout; the interactive stats line (carriage-return terminated) is
    /// switched off. The output path is always the last argument.
    pub fn build_encode_command(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-hide_banner".to_string());
        args.push("-nostdin".to_string());
        args.push("-y".to_string());

        args.push("-i".to_string());
        args.push(input.to_string_lossy().to_string());

        if let Some((width, height)) = profile.scale {
            args.push("-vf".to_string());
            args.push(format!("scale={}:{}", width, height));
        }

        args.push("-c:v".to_string());
        args.push("libx264".to_string());
        args.push("-crf".to_string());
        args.push(profile.crf.to_string());
        args.push("-preset".to_string());
        args.push(profile.preset.clone());
        args.push("-pix_fmt".to_string());
        args.push("yuv420p".to_string());

        if profile.kind == ProfileKind::Primary {
            // Widest playback compatibility for the normal pass
            args.push("-profile:v".to_string());
            args.push("baseline".to_string());
            args.push("-level".to_string());
            args.push("3.0".to_string());
            args.push("-tune".to_string());
            args.push("film".to_string());
        }

        args.push("-maxrate".to_string());
        args.push(profile.max_bitrate.clone());
        args.push("-bufsize".to_string());
        args.push(profile.buf_size.clone());

        args.push("-c:a".to_string());
        args.push("aac".to_string());
        args.push("-b:a".to_string());
        args.push(profile.audio_bitrate.clone());

        if profile.format.supports_faststart() {
            args.push("-movflags".to_string());
            args.push("+faststart".to_string());
        }

        args.push("-progress".to_string());
        args.push("pipe:1".to_string());
        args.push("-nostats".to_string());

        args.push(output.to_string_lossy().to_string());

        args
    }
}

/// Launches ffmpeg for a profile without waiting for it
#[derive(Debug, Clone)]
pub struct Encoder {
    ffmpeg_bin: PathBuf,
    builder: CommandBuilder,
}

impl Encoder {
    pub fn new(cfg: &OrchestratorConfig) -> Self {
        Self {
            ffmpeg_bin: cfg.ffmpeg_bin.clone(),
            builder: CommandBuilder::new(),
        }
    }

    /// Spawn the encoder with both streams piped into a line channel.
    /// The caller owns pumping the lines and waiting for exit.
    pub fn launch(&self, input: &Path, output: &Path, profile: &EncodingProfile) -> Result<EncoderProcess, EncodeError> {
        let args = self.builder.build_encode_command(input, output, profile);
        let command = format!("{} {}", self.ffmpeg_bin.display(), args.join(" "));
        debug!("Executing ffmpeg ({}): {}", profile.kind, command);

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| EncodeError::EncoderUnavailable {
            bin: self.ffmpeg_bin.clone(),
            source,
        })?;

        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone(), None, EncoderLine::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx, Some(stderr_tail.clone()), EncoderLine::Stderr));
        }

        Ok(EncoderProcess {
            child,
            lines: rx,
            stderr_tail,
            command,
        })
    }
}

async fn forward_lines<R>(
    stream: R,
    tx: mpsc::Sender<EncoderLine>,
    tail: Option<Arc<Mutex<VecDeque<String>>>>,
    wrap: fn(String) -> EncoderLine,
) where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        // Raw bytes: container metadata echoed on stderr is not always UTF-8
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = decode_line(&buf);
                if let Some(tail) = &tail {
                    let mut tail = tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line.clone());
                }
                // Receiver gone means the attempt is over; keep draining so
                // the encoder never blocks on a full pipe
                let _ = tx.send(wrap(line)).await;
            }
            Err(e) => {
                warn!("Encoder output stream read failed, discarding the rest: {}", e);
                // Closing the pipe early would kill the encoder with SIGPIPE
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    warn!("Encoder output stream drain failed: {}", e);
                }
                break;
            }
        }
    }
}

/// Strip the line terminator (`\n` or `\r\n`) and decode lossily
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// A running encoder: child handle plus its merged output lines
#[derive(Debug)]
pub struct EncoderProcess {
    child: Child,
    lines: mpsc::Receiver<EncoderLine>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    command: String,
}

impl EncoderProcess {
    /// Next output line; None once both streams reached EOF
    pub async fn next_line(&mut self) -> Option<EncoderLine> {
        self.lines.recv().await
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Kill and reap the process. Returns whether termination was confirmed.
    pub async fn terminate(&mut self) -> bool {
        match self.child.kill().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to kill ffmpeg: {}", e);
                // It may have exited on its own in the meantime
                matches!(self.child.try_wait(), Ok(Some(_)))
            }
        }
    }

    /// Last stderr lines, newline-joined
    pub fn stderr_tail(&self) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tail.iter().cloned().collect::<Vec<_>>().join("\n")
    }

    pub fn command(&self) -> &str {
        &self.command
    }
}
