//! # Work Pipeline
//!
//! The stages one job runs through after its upload is on disk.
//!
//! ## Stages:
//! 1. **Media normalization**: video containers (`.mp4`, `.mkv`, `.avi`,
//!    `.mov`) get their audio track extracted first (checkpoint at 10 %)
//! 2. **Audio conditioning**: everything is re-encoded to 16 kHz mono PCM WAV
//!    in a fresh file (checkpoint at 15 %)
//! 3. **Transcription**: the WAV is decoded and handed to the shared engine
//!    with the configured language
//! 4. **Result materialization**: the transcript is appended to the result
//!    document, which is renamed to its final timestamped name
//!
//! Cleanup of temporary files is not a stage here: the job task does it after
//! stopping the progress reporter, on every exit path.

pub mod artifacts;

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::audio::{decode_wav, is_video_extension, AudioConverter};
use crate::document::ResultDocument;
use crate::jobs::tracker::JobTracker;
use crate::transcription::engine::MODEL_NOT_LOADED;
use crate::transcription::TranscriptionEngine;

pub use artifacts::{JobArtifacts, UploadWriter, UploadedArtifact};

pub const SUCCESS_MESSAGE: &str = "Transcrição concluída com sucesso!";

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub message: String,
    pub filename: String,
    pub transcript_chars: usize,
}

pub struct Pipeline {
    converter: Arc<dyn AudioConverter>,
    engine: Arc<TranscriptionEngine>,
    results: Arc<ResultDocument>,
    sample_rate: u32,
}

impl Pipeline {
    pub fn new(
        converter: Arc<dyn AudioConverter>,
        engine: Arc<TranscriptionEngine>,
        results: Arc<ResultDocument>,
        sample_rate: u32,
    ) -> Self {
        Self {
            converter,
            engine,
            results,
            sample_rate,
        }
    }

    pub async fn execute(
        &self,
        tracker: &JobTracker,
        artifacts: &mut JobArtifacts,
    ) -> Result<PipelineOutcome> {
        if !self.engine.is_model_loaded() {
            return Err(anyhow!(MODEL_NOT_LOADED));
        }

        let upload = artifacts.upload();
        info!(
            job_id = %tracker.id(),
            file = upload.original_name(),
            bytes = upload.size(),
            "Pipeline started"
        );
        let mut source = upload.path().to_path_buf();

        if is_video_extension(upload.extension()) {
            tracker.checkpoint("A extrair áudio do vídeo...", None);
            let extracted = artifacts.new_intermediate("extracted")?;
            self.converter
                .extract_audio(&source, &extracted)
                .await
                .context("Falha ao extrair o áudio do vídeo")?;
            tracker.checkpoint("Áudio extraído", Some(10));
            source = extracted;
        }

        tracker.checkpoint("A converter o áudio...", None);
        let conditioned = artifacts.new_intermediate("conditioned")?;
        self.converter
            .condition(&source, &conditioned)
            .await
            .context("Falha ao converter o áudio")?;
        tracker.checkpoint("Áudio convertido", Some(15));

        tracker.checkpoint("A transcrever...", None);
        let engine = self.engine.clone();
        let sample_rate = self.sample_rate;
        let transcription = tokio::task::spawn_blocking(move || {
            let audio = decode_wav(&conditioned, sample_rate)?;
            engine.transcribe(&audio)
        })
        .await
        .context("transcription task failed")?
        .context("Falha na transcrição")?;

        tracker.checkpoint("A gerar documento...", None);
        let results = self.results.clone();
        let text = transcription.text;
        let transcript_chars = text.chars().count();
        let filename = tokio::task::spawn_blocking(move || results.publish(&text))
            .await
            .context("document task failed")?
            .context("Falha ao gerar o documento")?;

        Ok(PipelineOutcome {
            message: SUCCESS_MESSAGE.to_string(),
            filename,
            transcript_chars,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::decode::write_pcm16_wav;
    use crate::document::docx::{Block, DocxDocument};
    use crate::jobs::model::{JobId, JobState, JobStatus};
    use crate::jobs::store::{JobStore, MemoryJobStore};
    use crate::transcription::engine::tests::engine_with;
    use crate::transcription::{TranscriptionConfig, TranscriptionEngine};
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    /// Stands in for ffmpeg: writes one second of 16 kHz silence, or fails
    /// when the input starts with `corrupt`.
    #[derive(Default)]
    pub(crate) struct FakeConverter {
        pub calls: Mutex<Vec<(&'static str, PathBuf, PathBuf)>>,
    }

    impl FakeConverter {
        fn convert(&self, stage: &'static str, input: &Path, output: &Path) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((stage, input.to_path_buf(), output.to_path_buf()));

            let bytes = std::fs::read(input)?;
            if bytes.starts_with(b"corrupt") {
                return Err(anyhow!("Invalid data found when processing input"));
            }
            write_pcm16_wav(output, &vec![0i16; 16000], 16000, 1);
            Ok(())
        }

        pub fn stages(&self) -> Vec<&'static str> {
            self.calls.lock().unwrap().iter().map(|c| c.0).collect()
        }
    }

    #[async_trait]
    impl AudioConverter for FakeConverter {
        async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
            self.convert("extract", video, output)
        }

        async fn condition(&self, input: &Path, output: &Path) -> Result<()> {
            self.convert("condition", input, output)
        }
    }

    pub(crate) fn pipeline_in(
        media_root: &Path,
        converter: Arc<FakeConverter>,
        engine: TranscriptionEngine,
    ) -> Pipeline {
        Pipeline::new(
            converter,
            Arc::new(engine),
            Arc::new(ResultDocument::new(media_root, "transcricao")),
            16000,
        )
    }

    fn tracker() -> (Arc<MemoryJobStore>, JobTracker) {
        let store = Arc::new(MemoryJobStore::new());
        let id = JobId::generate();
        store.create(&id, &JobState::queued()).unwrap();
        (store.clone(), JobTracker::new(id, store, JobState::queued()))
    }

    #[tokio::test]
    async fn test_audio_upload_skips_extraction() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let converter = Arc::new(FakeConverter::default());
        let pipeline = pipeline_in(media.path(), converter.clone(), engine_with("bom dia", false));

        let upload = UploadedArtifact::from_bytes(scratch.path(), "nota.mp3", b"audio").unwrap();
        let mut artifacts = JobArtifacts::new(upload, scratch.path());
        let (_, tracker) = tracker();

        let outcome = pipeline.execute(&tracker, &mut artifacts).await.unwrap();
        assert_eq!(outcome.message, SUCCESS_MESSAGE);
        assert!(outcome.filename.starts_with("transcricao_"));
        assert_eq!(converter.stages(), vec!["condition"]);
        assert_eq!(artifacts.intermediate_count(), 1);

        let state = tracker.snapshot();
        assert_eq!(state.status, JobStatus::Processing);
        assert_eq!(state.message, "A gerar documento...");
        assert_eq!(state.percent, 15);

        let blocks = DocxDocument::open(&media.path().join(&outcome.filename))
            .unwrap()
            .blocks()
            .unwrap();
        assert_eq!(blocks.last(), Some(&Block::Paragraph("bom dia [pt]".to_string())));
    }

    #[tokio::test]
    async fn test_video_upload_is_extracted_then_conditioned() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let converter = Arc::new(FakeConverter::default());
        let pipeline = pipeline_in(media.path(), converter.clone(), engine_with("x", false));

        let upload = UploadedArtifact::from_bytes(scratch.path(), "aula.MOV", b"video").unwrap();
        let upload_path = upload.path().to_path_buf();
        let mut artifacts = JobArtifacts::new(upload, scratch.path());
        let (_, tracker) = tracker();

        pipeline.execute(&tracker, &mut artifacts).await.unwrap();

        let calls = converter.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "extract");
        assert_eq!(calls[0].1, upload_path);
        // conditioning reads the extracted audio and writes somewhere new
        assert_eq!(calls[1].1, calls[0].2);
        assert_ne!(calls[1].2, calls[1].1);
        assert_eq!(artifacts.intermediate_count(), 2);
        // the upload itself is untouched
        assert_eq!(std::fs::read(&upload_path).unwrap(), b"video");
    }

    #[tokio::test]
    async fn test_corrupt_video_fails_at_extraction() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let converter = Arc::new(FakeConverter::default());
        let pipeline = pipeline_in(media.path(), converter.clone(), engine_with("x", false));

        let upload = UploadedArtifact::from_bytes(scratch.path(), "x.mp4", b"corrupt!!").unwrap();
        let mut artifacts = JobArtifacts::new(upload, scratch.path());
        let (_, tracker) = tracker();

        let err = pipeline.execute(&tracker, &mut artifacts).await.unwrap_err();
        assert!(format!("{:#}", err).starts_with("Falha ao extrair o áudio do vídeo"));
        assert_eq!(converter.stages(), vec!["extract"]);
        assert_eq!(std::fs::read_dir(media.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_model_fails_before_conversion() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let converter = Arc::new(FakeConverter::default());
        let engine = TranscriptionEngine::new(TranscriptionConfig::default());
        let pipeline = pipeline_in(media.path(), converter.clone(), engine);

        let upload = UploadedArtifact::from_bytes(scratch.path(), "a.wav", b"audio").unwrap();
        let mut artifacts = JobArtifacts::new(upload, scratch.path());
        let (_, tracker) = tracker();

        let err = pipeline.execute(&tracker, &mut artifacts).await.unwrap_err();
        assert_eq!(err.to_string(), MODEL_NOT_LOADED);
        assert!(converter.stages().is_empty());
    }

    #[tokio::test]
    async fn test_inference_failure_is_reported() {
        let scratch = tempfile::tempdir().unwrap();
        let media = tempfile::tempdir().unwrap();
        let converter = Arc::new(FakeConverter::default());
        let pipeline = pipeline_in(media.path(), converter, engine_with("x", true));

        let upload = UploadedArtifact::from_bytes(scratch.path(), "a.wav", b"audio").unwrap();
        let mut artifacts = JobArtifacts::new(upload, scratch.path());
        let (_, tracker) = tracker();

        let err = pipeline.execute(&tracker, &mut artifacts).await.unwrap_err();
        assert!(format!("{:#}", err).contains("inference failed"));
    }
}
