//! Media conversion through an external `ffmpeg` binary.
//!
//! The pipeline only talks to the [`AudioConverter`] trait, which keeps the
//! job logic testable without ffmpeg installed.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

#[async_trait]
pub trait AudioConverter: Send + Sync {
    /// Pull the audio track out of a video container into `output` (WAV).
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    /// Re-encode any audio input as uncompressed mono WAV at the model's sample rate.
    ///
    /// `output` is always a fresh file; `input` is never touched.
    async fn condition(&self, input: &Path, output: &Path) -> Result<()>;
}

pub struct FfmpegConverter {
    binary: String,
    sample_rate: u32,
    channels: u16,
}

impl FfmpegConverter {
    pub fn new(binary: impl Into<String>, sample_rate: u32, channels: u16) -> Self {
        Self {
            binary: binary.into(),
            sample_rate,
            channels,
        }
    }

    /// Check that the binary can be executed at all. Used at startup to warn early.
    pub async fn probe(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to execute '{}'", self.binary))?;

        let first_line = String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or_default()
            .to_string();
        Ok(first_line)
    }

    async fn run(&self, args: &[&OsStr]) -> Result<()> {
        debug!(binary = %self.binary, ?args, "Running ffmpeg");

        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("failed to execute '{}'", self.binary))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr_tail(&stderr, 3);
            warn!(status = %output.status, detail = %detail, "ffmpeg failed");
            return Err(anyhow!("ffmpeg terminou com {}: {}", output.status, detail));
        }

        Ok(())
    }
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        info!(input = %video.display(), "Extracting audio track");
        self.run(&[
            OsStr::new("-i"),
            video.as_os_str(),
            OsStr::new("-vn"),
            OsStr::new("-acodec"),
            OsStr::new("pcm_s16le"),
            output.as_os_str(),
        ])
        .await
    }

    async fn condition(&self, input: &Path, output: &Path) -> Result<()> {
        let rate = self.sample_rate.to_string();
        let channels = self.channels.to_string();

        info!(input = %input.display(), sample_rate = self.sample_rate, channels = self.channels, "Conditioning audio");
        self.run(&[
            OsStr::new("-i"),
            input.as_os_str(),
            OsStr::new("-ar"),
            OsStr::new(&rate),
            OsStr::new("-ac"),
            OsStr::new(&channels),
            OsStr::new("-vn"),
            OsStr::new("-acodec"),
            OsStr::new("pcm_s16le"),
            output.as_os_str(),
        ])
        .await
    }
}

/// Last `lines` non-empty lines of ffmpeg's stderr, joined on one line.
fn stderr_tail(stderr: &str, lines: usize) -> String {
    let tail: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = tail.len().saturating_sub(lines);
    let joined = tail[start..].join(" | ");

    if joined.is_empty() {
        "sem detalhes".to_string()
    } else {
        joined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_tail() {
        let stderr = "line one\n\n  line two  \nline three\nline four\n";
        assert_eq!(stderr_tail(stderr, 2), "line three | line four");
        assert_eq!(stderr_tail("", 3), "sem detalhes");
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let converter = FfmpegConverter::new("/nonexistent/ffmpeg-binary", 16000, 1);
        let dir = tempfile::tempdir().unwrap();
        let err = converter
            .condition(&dir.path().join("in.mp3"), &dir.path().join("out.wav"))
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("/nonexistent/ffmpeg-binary"));
        assert!(converter.probe().await.is_err());
    }
}
