use std::fmt;
use std::str::FromStr;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Caller-facing speed/size trade-off, mapped onto an x264 preset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    Light,
    #[default]
    Medium,
    Heavy,
    Web,
}

impl Compression {
    pub fn preset(&self) -> &'static str {
        match self {
            Compression::None => "ultrafast",
            Compression::Light => "fast",
            Compression::Medium => "medium",
            Compression::Heavy => "slow",
            Compression::Web => "veryslow",
        }
    }
}

impl FromStr for Compression {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Compression::None),
            "light" => Ok(Compression::Light),
            "medium" => Ok(Compression::Medium),
            "heavy" => Ok(Compression::Heavy),
            "web" => Ok(Compression::Web),
            other => Err(anyhow!("Unknown compression level: {}", other)),
        }
    }
}

/// Container of the produced artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mkv,
    Mov,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mkv => "mkv",
            OutputFormat::Mov => "mov",
        }
    }

    /// `+faststart` only applies to the ISO-BMFF family
    pub fn supports_faststart(&self) -> bool {
        matches!(self, OutputFormat::Mp4 | OutputFormat::Mov)
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mp4" => Ok(OutputFormat::Mp4),
            "mkv" => Ok(OutputFormat::Mkv),
            "mov" => Ok(OutputFormat::Mov),
            other => Err(anyhow!("Unsupported output format: {}", other)),
        }
    }
}

/// Knobs a caller supplies with a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileKnobs {
    /// Quality percentage (95, 85, 75, 60, 40 are the recognized steps)
    pub quality: u8,
    pub compression: Compression,
    pub format: OutputFormat,
}

impl Default for ProfileKnobs {
    fn default() -> Self {
        Self {
            quality: 80,
            compression: Compression::Medium,
            format: OutputFormat::Mp4,
        }
    }
}

/// Map a quality percentage to a CRF value.
/// Lower CRF = higher quality = larger file.
pub fn crf_for_quality(quality: u8) -> u8 {
    match quality {
        95 => 18,
        85 => 23,
        75 => 28,
        60 => 32,
        40 => 36,
        _ => 28,
    }
}

/// Encoding attempts in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    Primary,
    Aggressive,
    Forced,
}

impl ProfileKind {
    /// The next, more aggressive profile; None after Forced
    pub fn next(&self) -> Option<ProfileKind> {
        match self {
            ProfileKind::Primary => Some(ProfileKind::Aggressive),
            ProfileKind::Aggressive => Some(ProfileKind::Forced),
            ProfileKind::Forced => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProfileKind::Primary => "primary",
            ProfileKind::Aggressive => "aggressive",
            ProfileKind::Forced => "forced",
        }
    }
}

impl fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Concrete encoder parameters for one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodingProfile {
    pub kind: ProfileKind,
    pub crf: u8,
    pub preset: String,
    pub audio_bitrate: String,
    pub max_bitrate: String,
    pub buf_size: String,
    /// Forced output resolution (width, height)
    pub scale: Option<(u32, u32)>,
    pub format: OutputFormat,
}

impl EncodingProfile {
    pub fn for_kind(kind: ProfileKind, knobs: &ProfileKnobs) -> Self {
        match kind {
            ProfileKind::Primary => EncodingProfile {
                kind,
                crf: crf_for_quality(knobs.quality),
                preset: knobs.compression.preset().to_string(),
                audio_bitrate: "32k".to_string(),
                max_bitrate: "500k".to_string(),
                buf_size: "1000k".to_string(),
                scale: None,
                format: knobs.format,
            },
            ProfileKind::Aggressive => EncodingProfile {
                kind,
                crf: 35,
                preset: "ultrafast".to_string(),
                audio_bitrate: "16k".to_string(),
                max_bitrate: "200k".to_string(),
                buf_size: "400k".to_string(),
                scale: None,
                format: knobs.format,
            },
            ProfileKind::Forced => EncodingProfile {
                kind,
                crf: 40,
                preset: "ultrafast".to_string(),
                audio_bitrate: "8k".to_string(),
                max_bitrate: "200k".to_string(),
                buf_size: "400k".to_string(),
                scale: Some((320, 240)),
                format: knobs.format,
            },
        }
    }
}
