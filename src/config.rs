//! # Configuration Management
//!
//! Loads the service configuration from several layered sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` in the working directory
//! - Environment variables with the `APP_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (set by most deployment platforms)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_JOBS__STORE`, ...)
//! 3. Configuration file (`config.toml`)
//! 4. Default values
//!
//! Nested keys are separated by a double underscore so that field names that
//! already contain an underscore (`max_upload_mb`, `progress_step`) survive
//! the mapping: `APP_SERVER__MAX_UPLOAD_MB=512` becomes `server.max_upload_mb`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::progress::ProgressSettings;
use crate::transcription::model::ModelSize;

/// Main application configuration.
///
/// Grouped by concern so every part of the service only needs to look at
/// its own section (the pipeline reads `audio` and `storage`, the dispatcher
/// reads `jobs`, and so on).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub jobs: JobsConfig,
    pub storage: StorageConfig,
    pub audio: AudioConfig,
}

/// HTTP server settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: accept connections from any address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload, in megabytes
    pub max_upload_mb: usize,
}

/// Speech model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Whisper variant to load at startup ("tiny", "base", "small", "medium", "large")
    pub whisper_model: String,
    /// Compute device preference ("auto", "cpu", "cuda", "metal")
    pub device: String,
    /// Language passed explicitly to the decoder; the domain is Portuguese only
    pub language: String,
    /// Local directory with `config.json`, `tokenizer.json` and
    /// `model.safetensors`. Empty means "download from the HuggingFace hub".
    pub model_dir: String,
}

/// Job system settings.
///
/// ## Progress heuristic:
/// The reporter starts at `progress_start`, adds `progress_step` every
/// `progress_interval_ms` and never goes past `progress_ceiling`. Those
/// numbers are illustrative only; transcription time cannot be predicted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Job store backend: "memory" or "file"
    pub store: String,
    /// Directory for the file backend (one JSON record per job)
    pub jobs_dir: String,
    pub progress_start: u8,
    pub progress_step: u8,
    pub progress_ceiling: u8,
    pub progress_interval_ms: u64,
    /// Upper bound on waiting for the reporter to stop before the job publishes its outcome
    pub reporter_join_timeout_ms: u64,
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Where result documents are written and served from
    pub media_root: String,
    /// Where uploads and converted audio live while a job runs
    pub scratch_dir: String,
    /// Stem of the shared result document (`<stem>.docx`, `<stem>_<timestamp>.docx`)
    pub result_stem: String,
}

/// Audio conditioning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub ffmpeg_path: String,
    /// Whisper expects 16 kHz
    pub sample_rate: u32,
    /// Whisper expects mono
    pub channels: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        let tmp = env::temp_dir();

        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                max_upload_mb: 1024,
            },
            models: ModelsConfig {
                whisper_model: "large".to_string(),
                device: "cpu".to_string(),
                language: "pt".to_string(),
                model_dir: String::new(),
            },
            jobs: JobsConfig {
                store: "memory".to_string(),
                jobs_dir: tmp.join("transcribe_jobs").to_string_lossy().into_owned(),
                progress_start: 3,
                progress_step: 4,
                progress_ceiling: 95,
                progress_interval_ms: 2000,
                reporter_join_timeout_ms: 1000,
            },
            storage: StorageConfig {
                media_root: "media".to_string(),
                scratch_dir: tmp.to_string_lossy().into_owned(),
                result_stem: "transcricao".to_string(),
            },
            audio: AudioConfig {
                ffmpeg_path: "ffmpeg".to_string(),
                sample_rate: 16000,
                channels: 1,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.server.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        self.models
            .whisper_model
            .parse::<ModelSize>()
            .map_err(|e| anyhow::anyhow!("Invalid whisper model: {}", e))?;

        if self.models.language.trim().is_empty() {
            return Err(anyhow::anyhow!("Transcription language must be set explicitly"));
        }

        if !matches!(self.jobs.store.as_str(), "memory" | "file") {
            return Err(anyhow::anyhow!(
                "Unknown job store '{}' (expected \"memory\" or \"file\")",
                self.jobs.store
            ));
        }

        if self.jobs.progress_step == 0 {
            return Err(anyhow::anyhow!("Progress step must be greater than 0"));
        }

        if self.jobs.progress_start >= self.jobs.progress_ceiling || self.jobs.progress_ceiling >= 100 {
            return Err(anyhow::anyhow!(
                "Progress must satisfy start < ceiling < 100 (got start={}, ceiling={})",
                self.jobs.progress_start,
                self.jobs.progress_ceiling
            ));
        }

        if self.jobs.progress_interval_ms == 0 {
            return Err(anyhow::anyhow!("Progress interval must be greater than 0"));
        }

        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Audio sample rate and channel count must be greater than 0"));
        }

        if self.storage.result_stem.is_empty() || self.storage.result_stem.contains(['/', '\\']) {
            return Err(anyhow::anyhow!("Result stem must be a plain file name"));
        }

        Ok(())
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb * 1024 * 1024
    }

    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(&self.storage.media_root)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.scratch_dir)
    }

    pub fn jobs_dir(&self) -> PathBuf {
        PathBuf::from(&self.jobs.jobs_dir)
    }
}

impl JobsConfig {
    pub fn progress_settings(&self) -> ProgressSettings {
        ProgressSettings {
            start: self.progress_start,
            step: self.progress_step,
            ceiling: self.progress_ceiling,
            interval: Duration::from_millis(self.progress_interval_ms),
        }
    }

    pub fn reporter_join_timeout(&self) -> Duration {
        Duration::from_millis(self.reporter_join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.models.language, "pt");
        assert_eq!(config.jobs.store, "memory");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.jobs.store = "redis".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.whisper_model = "huge".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_progress_bounds_are_validated() {
        let mut config = AppConfig::default();
        config.jobs.progress_ceiling = 100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.jobs.progress_start = 95;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.jobs.progress_step = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_progress_settings_from_config() {
        let config = AppConfig::default();
        let settings = config.jobs.progress_settings();
        assert_eq!(settings.start, 3);
        assert_eq!(settings.step, 4);
        assert_eq!(settings.ceiling, 95);
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(config.jobs.reporter_join_timeout(), Duration::from_secs(1));
    }
}
