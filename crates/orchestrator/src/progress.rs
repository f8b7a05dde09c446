use std::time::{Duration, Instant};

/// Upper bound when the media duration is known. 100 means "done" and is
/// only ever written by the orchestrator after the encoder exits.
pub const MAX_PARSED_PERCENT: u8 = 99;
/// Upper bound for the elapsed-time heuristic
pub const MAX_HEURISTIC_PERCENT: u8 = 95;

/// One overwrite of the job's percent and message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub percent: u8,
    pub message: String,
}

/// Turns encoder output lines into a 0-99 percentage for one attempt.
///
/// Recognizes an elapsed media time token (`time=HH:MM:SS.mmm` from the stats
/// line, `out_time=HH:MM:SS.micro` from `-progress`) and a frame counter
/// (`frame=N`). Lines without either are ignored.
#[derive(Debug, Clone)]
pub struct ProgressParser {
    duration: Option<f64>,
    heuristic_rate: f64,
    started: Instant,
    last_update: Instant,
    last_percent: u8,
}

impl ProgressParser {
    pub fn new(duration: Option<f64>, heuristic_rate: f64, started: Instant) -> Self {
        Self {
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
            heuristic_rate,
            started,
            last_update: started,
            last_percent: 0,
        }
    }

    pub fn last_percent(&self) -> u8 {
        self.last_percent
    }

    /// Parse one line; None when the line carries nothing we understand
    pub fn feed_line(&mut self, line: &str, now: Instant) -> Option<ProgressUpdate> {
        let elapsed_wall = now.saturating_duration_since(self.started).as_secs_f64();

        // `time=N/A` (common before the first packet) falls through to `frame=`
        let timed = extract_token(line, "time=")
            .or_else(|| extract_token(line, "out_time="))
            .and_then(|t| parse_timestamp(t).map(|secs| (t, secs)));

        if let Some((time_str, media_secs)) = timed {
            let (percent, message) = match self.duration {
                Some(total) => {
                    let p = duration_percent(media_secs, total);
                    (p, format!("Processing video... {} ({}%)", time_str, p.max(self.last_percent)))
                }
                None => (
                    heuristic_percent(elapsed_wall, self.heuristic_rate),
                    format!("Processing video... {} ({:.0}s)", time_str, elapsed_wall),
                ),
            };
            return Some(self.commit(percent, message, now));
        }

        if let Some(frame_str) = extract_token(line, "frame=") {
            let frame: u64 = frame_str.parse().ok()?;
            let percent = match self.duration {
                Some(_) => self.last_percent,
                None => heuristic_percent(elapsed_wall, self.heuristic_rate),
            };
            let message = format!("Processing frame {}... ({:.0}s)", frame, elapsed_wall);
            return Some(self.commit(percent, message, now));
        }

        None
    }

    /// Keep the percentage moving when the encoder has been quiet for
    /// `interval`. With a known duration only the message is refreshed.
    pub fn heartbeat(&mut self, now: Instant, interval: Duration) -> Option<ProgressUpdate> {
        if now.saturating_duration_since(self.last_update) < interval {
            return None;
        }
        let elapsed_wall = now.saturating_duration_since(self.started).as_secs_f64();
        let percent = match self.duration {
            Some(_) => self.last_percent,
            None => heuristic_percent(elapsed_wall, self.heuristic_rate),
        };
        let message = format!("Processing video... {:.0}s elapsed", elapsed_wall);
        Some(self.commit(percent, message, now))
    }

    fn commit(&mut self, percent: u8, message: String, now: Instant) -> ProgressUpdate {
        self.last_percent = self.last_percent.max(percent);
        self.last_update = now;
        ProgressUpdate {
            percent: self.last_percent,
            message,
        }
    }
}

/// `clamp(round(elapsed / duration * 100), 1, 99)`
pub fn duration_percent(elapsed_secs: f64, duration_secs: f64) -> u8 {
    if duration_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 1;
    }
    let p = (elapsed_secs / duration_secs * 100.0).round();
    p.clamp(1.0, MAX_PARSED_PERCENT as f64) as u8
}

/// `clamp(round(1 + secs * k), 1, 95)`
pub fn heuristic_percent(secs_since_start: f64, rate: f64) -> u8 {
    let p = (1.0 + secs_since_start * rate).round();
    if !p.is_finite() {
        return 1;
    }
    p.clamp(1.0, MAX_HEURISTIC_PERCENT as f64) as u8
}

/// Parse `HH:MM:SS(.fraction)` into seconds. Negative or `N/A` values yield None.
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.split(':');
    let hours: u64 = parts.next()?.parse().ok()?;
    let minutes: u64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds)
}

/// Value of the first whitespace-separated `key=value` token.
/// Handles ffmpeg's padded form `frame=  123`.
fn extract_token<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line
        .match_indices(key)
        .map(|(i, _)| i)
        .find(|&i| i == 0 || line[..i].ends_with(char::is_whitespace))?;
    let rest = line[start + key.len()..].trim_start();
    rest.split_whitespace().next()
}
