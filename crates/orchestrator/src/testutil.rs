//! Shell scripts standing in for ffmpeg/ffprobe in tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Write an executable `/bin/sh` script named `name` into `dir`
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// ffprobe that reports a fixed duration
pub fn fake_ffprobe(dir: &Path, duration_secs: f64) -> PathBuf {
    write_script(
        dir,
        "ffprobe",
        &format!("echo '{{\"format\": {{\"duration\": \"{:.6}\"}}}}'", duration_secs),
    )
}

/// ffmpeg that prints progress lines and writes `out_bytes(crf)` bytes to its
/// last argument. `sizes` maps a CRF value to an output size; `default` is
/// used for anything else.
pub fn fake_ffmpeg(dir: &Path, progress_lines: &[&str], sizes: &[(u8, u64)], default: u64) -> PathBuf {
    let mut body = String::new();
    body.push_str("out=\"\"; crf=\"\"; prev=\"\"\n");
    body.push_str("for a in \"$@\"; do\n  if [ \"$prev\" = \"-crf\" ]; then crf=\"$a\"; fi\n  prev=\"$a\"; out=\"$a\"\ndone\n");
    for line in progress_lines {
        body.push_str(&format!("echo '{}'\n", line));
    }
    body.push_str("case \"$crf\" in\n");
    for (crf, bytes) in sizes {
        body.push_str(&format!("  {}) head -c {} /dev/zero > \"$out\" ;;\n", crf, bytes));
    }
    body.push_str(&format!("  *) head -c {} /dev/zero > \"$out\" ;;\nesac\n", default));
    body.push_str("exit 0");
    write_script(dir, "ffmpeg", &body)
}

/// Source file of `bytes` bytes
pub fn source_file(dir: &Path, name: &str, bytes: usize) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, vec![7u8; bytes]).unwrap();
    path
}
