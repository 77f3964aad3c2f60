//! # Transcription Engine
//!
//! Owns the loaded speech model and turns decoded audio into text with
//! timing metadata. One model instance is shared by every job.
//!
//! ## Key Responsibilities:
//! - **Model lifecycle**: the model is installed once at startup and never
//!   swapped while jobs run
//! - **Audio-to-text conversion**: runs the model with the configured language
//! - **Performance monitoring**: request counts, audio seconds and processing time
//!
//! ## Concurrency:
//! Inference mutates model state, so calls to [`TranscriptionEngine::transcribe`]
//! are serialized on a mutex. They are blocking and belong on
//! `tokio::task::spawn_blocking`. Status queries (`is_model_loaded`,
//! `model_name`, `stats`) never wait on a running inference.

use anyhow::{anyhow, Result};
use candle_core::Device;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::{Mutex, RwLock};
use std::time::Instant;

use crate::audio::DecodedAudio;
use crate::transcription::model::{ModelSize, WhisperModel};

/// Message reported when a job reaches transcription without a model.
pub const MODEL_NOT_LOADED: &str = "modelo de transcrição não carregado";

/// Anything that can turn 16 kHz mono samples into text.
pub trait SpeechModel: Send {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String>;

    /// Human-readable identifier, e.g. `whisper-large`
    fn name(&self) -> String;
}

#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Language passed to the model, never auto-detected
    pub language: String,

    /// Sample rate of the audio handed to `transcribe`
    pub sample_rate: u32,

    /// Minimum audio duration to process (seconds)
    pub min_audio_duration: f64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: "pt".to_string(),
            sample_rate: 16000,
            min_audio_duration: 0.1,
        }
    }
}

/// Result of a transcription operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptionResult {
    pub text: String,

    /// Duration of audio processed (seconds)
    pub audio_duration: f64,

    /// Time taken for transcription (milliseconds)
    pub processing_time_ms: u64,

    pub language: String,

    pub model_name: String,

    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct EngineMetrics {
    total_requests: u64,
    failed_requests: u64,
    total_audio_duration: f64,
    total_processing_time: u64,
}

/// Snapshot of engine activity for the health endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub total_requests: u64,
    pub failed_requests: u64,
    pub total_audio_seconds: f64,
    pub average_real_time_factor: f64,
}

pub struct TranscriptionEngine {
    model: Mutex<Option<Box<dyn SpeechModel>>>,

    /// Name of the installed model, readable while an inference holds `model`
    model_name: RwLock<Option<String>>,

    config: TranscriptionConfig,

    metrics: Mutex<EngineMetrics>,
}

impl TranscriptionEngine {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self {
            model: Mutex::new(None),
            model_name: RwLock::new(None),
            config,
            metrics: Mutex::new(EngineMetrics::default()),
        }
    }

    /// Download (or read from `model_dir`) and install a Whisper checkpoint.
    pub async fn load_whisper(
        &self,
        size: ModelSize,
        device: Device,
        model_dir: Option<&Path>,
    ) -> Result<()> {
        tracing::info!(
            "Loading {} model (~{} MB) for transcription engine",
            size,
            size.size_mb()
        );
        let start_time = Instant::now();

        let model = WhisperModel::load(size, device, model_dir).await?;
        tracing::debug!(
            "{} weights placed on {}",
            model.size(),
            crate::transcription::device::describe(model.device())
        );
        self.install(Box::new(model));

        tracing::info!("Model ready in {:.2}s", start_time.elapsed().as_secs_f64());
        Ok(())
    }

    pub fn install(&self, model: Box<dyn SpeechModel>) {
        let name = model.name();
        *self.model.lock().unwrap_or_else(|e| e.into_inner()) = Some(model);
        *self.model_name.write().unwrap_or_else(|e| e.into_inner()) = Some(name);
    }

    pub fn is_model_loaded(&self) -> bool {
        self.model_name().is_some()
    }

    pub fn model_name(&self) -> Option<String> {
        self.model_name
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn language(&self) -> &str {
        &self.config.language
    }

    /// Transcribe decoded audio. Blocking.
    pub fn transcribe(&self, audio: &DecodedAudio) -> Result<TranscriptionResult> {
        let outcome = self.run(audio);
        if outcome.is_err() {
            self.metrics.lock().unwrap_or_else(|e| e.into_inner()).failed_requests += 1;
        }
        outcome
    }

    fn run(&self, audio: &DecodedAudio) -> Result<TranscriptionResult> {
        let start_time = Instant::now();

        if audio.samples.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        if audio.sample_rate != self.config.sample_rate {
            return Err(anyhow!(
                "Audio sample rate {} Hz does not match model rate {} Hz",
                audio.sample_rate,
                self.config.sample_rate
            ));
        }

        let audio_duration = audio.duration_secs();
        if audio_duration < self.config.min_audio_duration {
            return Err(anyhow!(
                "Audio too short: {:.2}s (minimum: {:.2}s)",
                audio_duration,
                self.config.min_audio_duration
            ));
        }

        let mut guard = self.model.lock().unwrap_or_else(|e| e.into_inner());
        let model = guard.as_mut().ok_or_else(|| anyhow!(MODEL_NOT_LOADED))?;

        tracing::debug!(language = %self.config.language, "Starting transcription of {:.2}s audio", audio_duration);
        let text = model.transcribe(&audio.samples, &self.config.language)?;
        let model_name = model.name();
        drop(guard);

        let processing_time_ms = start_time.elapsed().as_millis() as u64;
        let result = TranscriptionResult {
            text: text.trim().to_string(),
            audio_duration,
            processing_time_ms,
            language: self.config.language.clone(),
            model_name,
            timestamp: Utc::now(),
        };

        {
            let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
            metrics.total_requests += 1;
            metrics.total_audio_duration += audio_duration;
            metrics.total_processing_time += processing_time_ms;
        }

        tracing::info!(
            "Transcription completed: {:.2}s audio -> {} chars in {}ms",
            audio_duration,
            result.text.len(),
            processing_time_ms
        );

        Ok(result)
    }

    pub fn stats(&self) -> EngineStats {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let average_real_time_factor = if metrics.total_audio_duration > 0.0 {
            (metrics.total_processing_time as f64 / 1000.0) / metrics.total_audio_duration
        } else {
            0.0
        };

        EngineStats {
            total_requests: metrics.total_requests,
            failed_requests: metrics.failed_requests,
            total_audio_seconds: metrics.total_audio_duration,
            average_real_time_factor,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns a fixed transcript and records the language it was asked for.
    pub(crate) struct FixedModel {
        pub text: String,
        pub fail: bool,
    }

    impl SpeechModel for FixedModel {
        fn transcribe(&mut self, _samples: &[f32], language: &str) -> Result<String> {
            if self.fail {
                return Err(anyhow!("inference failed"));
            }
            Ok(format!("{} [{}]", self.text, language))
        }

        fn name(&self) -> String {
            "fixed".to_string()
        }
    }

    pub(crate) fn engine_with(text: &str, fail: bool) -> TranscriptionEngine {
        let engine = TranscriptionEngine::new(TranscriptionConfig::default());
        engine.install(Box::new(FixedModel {
            text: text.to_string(),
            fail,
        }));
        engine
    }

    fn second_of_audio() -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.0; 16000],
            sample_rate: 16000,
        }
    }

    #[test]
    fn test_without_model() {
        let engine = TranscriptionEngine::new(TranscriptionConfig::default());
        assert!(!engine.is_model_loaded());

        let err = engine.transcribe(&second_of_audio()).unwrap_err();
        assert_eq!(err.to_string(), MODEL_NOT_LOADED);
        assert_eq!(engine.stats().failed_requests, 1);
    }

    #[test]
    fn test_transcribe_uses_configured_language() {
        let engine = engine_with("olá mundo", false);
        assert_eq!(engine.model_name().as_deref(), Some("fixed"));

        let result = engine.transcribe(&second_of_audio()).unwrap();
        assert_eq!(result.text, "olá mundo [pt]");
        assert_eq!(result.language, "pt");
        assert!((result.audio_duration - 1.0).abs() < 1e-9);

        let stats = engine.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.failed_requests, 0);
    }

    #[test]
    fn test_rejects_wrong_rate_and_short_audio() {
        let engine = engine_with("x", false);

        let wrong_rate = DecodedAudio {
            samples: vec![0.0; 44100],
            sample_rate: 44100,
        };
        assert!(engine.transcribe(&wrong_rate).is_err());

        let tiny = DecodedAudio {
            samples: vec![0.0; 100],
            sample_rate: 16000,
        };
        assert!(engine.transcribe(&tiny).unwrap_err().to_string().contains("too short"));
    }

    #[test]
    fn test_model_failure_is_counted() {
        let engine = engine_with("x", true);
        assert!(engine.transcribe(&second_of_audio()).is_err());
        assert_eq!(engine.stats().failed_requests, 1);
    }
}
