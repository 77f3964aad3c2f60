//! # Whisper Model
//!
//! Loads a Whisper checkpoint with Candle and runs greedy decoding over
//! 30-second windows of the log-mel spectrogram.
//!
//! ## Loading Process:
//! 1. Resolve `config.json`, `tokenizer.json` and `model.safetensors`, either
//!    from a local directory or from the HuggingFace hub (cached locally)
//! 2. Build the mel filter bank for the checkpoint's number of mel bins
//! 3. Map the weights onto the selected device
//! 4. Look up the special tokens in the tokenizer
//!
//! Loading happens once at startup; every job then reuses the same instance.

use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::path::{Path, PathBuf};
use tokenizers::Tokenizer;

use crate::transcription::engine::SpeechModel;

/// Available Whisper model sizes.
///
/// ## Trade-offs:
/// - **Size vs Accuracy**: larger models are more accurate but slower
/// - **Memory**: `large` needs several GB of RAM on CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ModelSize {
    Tiny,
    Base,
    Small,
    Medium,
    Large,
}

impl ModelSize {
    /// HuggingFace repository and the revision that carries safetensors weights.
    pub fn repo(&self) -> (&'static str, &'static str) {
        match self {
            ModelSize::Tiny => ("openai/whisper-tiny", "main"),
            ModelSize::Base => ("openai/whisper-base", "refs/pr/22"),
            ModelSize::Small => ("openai/whisper-small", "main"),
            ModelSize::Medium => ("openai/whisper-medium", "main"),
            ModelSize::Large => ("openai/whisper-large-v3", "main"),
        }
    }

    /// Approximate size of the weights in MB.
    pub fn size_mb(&self) -> u32 {
        match self {
            ModelSize::Tiny => 39,
            ModelSize::Base => 74,
            ModelSize::Small => 244,
            ModelSize::Medium => 769,
            ModelSize::Large => 1550,
        }
    }
}

impl std::str::FromStr for ModelSize {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tiny" => Ok(ModelSize::Tiny),
            "base" => Ok(ModelSize::Base),
            "small" => Ok(ModelSize::Small),
            "medium" => Ok(ModelSize::Medium),
            "large" => Ok(ModelSize::Large),
            _ => Err(anyhow!("Unknown model size: {}", s)),
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ModelSize::Tiny => "tiny",
            ModelSize::Base => "base",
            ModelSize::Small => "small",
            ModelSize::Medium => "medium",
            ModelSize::Large => "large",
        };
        write!(f, "{}", name)
    }
}

/// Where the three checkpoint files live on disk.
struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

/// A loaded Whisper checkpoint.
///
/// Decoding mutates the model's key/value caches, so callers need exclusive
/// access (`&mut self`); the engine keeps it behind a mutex.
pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    device: Device,
    size: ModelSize,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    /// Additive logit mask: `-inf` for tokens the checkpoint says to suppress
    suppress_tokens: Tensor,
    sot_token: u32,
    transcribe_token: u32,
    eot_token: u32,
    no_timestamps_token: u32,
}

impl WhisperModel {
    /// Load a checkpoint.
    ///
    /// `model_dir` takes precedence over the hub; it must contain
    /// `config.json`, `tokenizer.json` and `model.safetensors`.
    pub async fn load(size: ModelSize, device: Device, model_dir: Option<&Path>) -> Result<Self> {
        tracing::info!("Loading Whisper {} model...", size);
        let start_time = std::time::Instant::now();

        let files = match model_dir {
            Some(dir) => Self::local_files(dir)?,
            None => Self::download_files(size).await?,
        };

        let config: Config = serde_json::from_reader(std::fs::File::open(&files.config)?)
            .with_context(|| format!("invalid model config {}", files.config.display()))?;
        tracing::debug!(
            num_mel_bins = config.num_mel_bins,
            vocab_size = config.vocab_size,
            "Model config loaded"
        );

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let mel_filters = mel_filter_bank(config.num_mel_bins, m::N_FFT, m::SAMPLE_RATE as f64);

        // SAFETY: the weights file is not modified while mapped
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], m::DTYPE, &device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|i| {
                if config.suppress_tokens.contains(&i) {
                    f32::NEG_INFINITY
                } else {
                    0f32
                }
            })
            .collect();
        let suppress_tokens = Tensor::new(suppress.as_slice(), &device)?;

        let sot_token = special_token(&tokenizer, m::SOT_TOKEN)?;
        let transcribe_token = special_token(&tokenizer, m::TRANSCRIBE_TOKEN)?;
        let eot_token = special_token(&tokenizer, m::EOT_TOKEN)?;
        let no_timestamps_token = special_token(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?;

        tracing::info!("Whisper {} model loaded in {:.2}s", size, start_time.elapsed().as_secs_f64());

        Ok(Self {
            model,
            config,
            device,
            size,
            tokenizer,
            mel_filters,
            suppress_tokens,
            sot_token,
            transcribe_token,
            eot_token,
            no_timestamps_token,
        })
    }

    fn local_files(dir: &Path) -> Result<ModelFiles> {
        let files = ModelFiles {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        };

        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.is_file() {
                return Err(anyhow!("Missing model file {}", path.display()));
            }
        }

        tracing::info!("Using local model files from {}", dir.display());
        Ok(files)
    }

    async fn download_files(size: ModelSize) -> Result<ModelFiles> {
        use hf_hub::api::tokio::ApiBuilder;
        use hf_hub::{Repo, RepoType};

        let (repo_name, revision) = size.repo();
        tracing::info!(repo = repo_name, revision, "Fetching model files from HuggingFace");

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Ok(token) = std::env::var("HF_TOKEN") {
            builder = builder.with_token(Some(token));
        }
        if let Ok(cache_dir) = std::env::var("HF_HUB_CACHE") {
            builder = builder.with_cache_dir(cache_dir.into());
        } else if let Ok(hf_home) = std::env::var("HF_HOME") {
            builder = builder.with_cache_dir(PathBuf::from(hf_home).join("hub"));
        }

        let api = builder.build()?;
        let repo = api.repo(Repo::with_revision(
            repo_name.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let config = repo
            .get("config.json")
            .await
            .map_err(|e| anyhow!("Failed to download config.json from {}: {}", repo_name, e))?;
        let tokenizer = repo
            .get("tokenizer.json")
            .await
            .map_err(|e| anyhow!("Failed to download tokenizer.json from {}: {}", repo_name, e))?;
        let weights = repo
            .get("model.safetensors")
            .await
            .map_err(|e| anyhow!("Failed to download model weights from {}: {}", repo_name, e))?;

        Ok(ModelFiles {
            config,
            tokenizer,
            weights,
        })
    }

    pub fn size(&self) -> ModelSize {
        self.size
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Greedy decoding of one mel window (at most `N_FRAMES` frames).
    fn decode_window(&mut self, mel_window: &Tensor, language_token: u32) -> Result<Vec<u32>> {
        let audio_features = self.model.encoder.forward(mel_window, true)?;

        let mut tokens = vec![
            self.sot_token,
            language_token,
            self.transcribe_token,
            self.no_timestamps_token,
        ];
        let prompt_len = tokens.len();
        let sample_len = self.config.max_target_positions / 2;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), mel_window.device())?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress_tokens)?;
            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;

            if next_token == self.eot_token || tokens.len() >= self.config.max_target_positions {
                break;
            }

            if is_repetitive(&tokens[prompt_len..], next_token) {
                tracing::debug!("Stopping decode on repetition loop");
                break;
            }

            tokens.push(next_token);
        }

        Ok(tokens[prompt_len..].to_vec())
    }
}

impl SpeechModel for WhisperModel {
    fn transcribe(&mut self, samples: &[f32], language: &str) -> Result<String> {
        if samples.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        let language_token = self
            .tokenizer
            .token_to_id(&format!("<|{}|>", language))
            .ok_or_else(|| anyhow!("Language '{}' is not supported by this model", language))?;

        let mel = audio::pcm_to_mel(&self.config, samples, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?;
        let (_, _, content_frames) = mel.dims3()?;

        let mut pieces = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let window = usize::min(content_frames - seek, m::N_FRAMES);
            let mel_window = mel.narrow(2, seek, window)?;

            let tokens = self.decode_window(&mel_window, language_token)?;
            let text = self
                .tokenizer
                .decode(&tokens, true)
                .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

            tracing::debug!(
                window_start_s = seek as f64 * m::HOP_LENGTH as f64 / m::SAMPLE_RATE as f64,
                chars = text.len(),
                "Decoded window"
            );

            let text = text.trim();
            if !text.is_empty() {
                pieces.push(text.to_string());
            }
            seek += window;
        }

        Ok(pieces.join(" "))
    }

    fn name(&self) -> String {
        format!("whisper-{}", self.size)
    }
}

fn special_token(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer is missing special token {}", token))
}

/// Detect the decoder getting stuck: the same token three times in a row,
/// or the last three tokens repeating the three before them.
fn is_repetitive(tokens: &[u32], new_token: u32) -> bool {
    let n = tokens.len();

    if n >= 3 && tokens[n - 3..].iter().all(|&t| t == new_token) {
        return true;
    }

    if n >= 5 {
        let candidate = [tokens[n - 2], tokens[n - 1], new_token];
        if tokens[n - 5..n - 2] == candidate {
            return true;
        }
    }

    false
}

/// Slaney-style mel filter bank, laid out `[n_mels][n_fft / 2 + 1]`.
///
/// Same layout and normalisation as the filters shipped with the reference
/// Whisper implementation (librosa defaults).
pub fn mel_filter_bank(n_mels: usize, n_fft: usize, sample_rate: f64) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * sample_rate / n_fft as f64)
        .collect();

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate / 2.0);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0f32; n_mels * n_freqs];
    for band in 0..n_mels {
        let (lower, center, upper) = (edges[band], edges[band + 1], edges[band + 2]);
        let norm = 2.0 / (upper - lower);

        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[band * n_freqs + k] = (weight * norm) as f32;
        }
    }

    filters
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MEL_MIN_LOG_HZ {
        MEL_MIN_LOG_HZ / MEL_F_SP + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    } else {
        hz / MEL_F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    let min_log_mel = MEL_MIN_LOG_HZ / MEL_F_SP;
    if mel >= min_log_mel {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - min_log_mel)).exp()
    } else {
        mel * MEL_F_SP
    }
}
