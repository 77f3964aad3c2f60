//! # Transcription Module
//!
//! Speech-to-text with Whisper models through the Candle framework.
//!
//! ## Key Components:
//! - **Model**: checkpoint download/loading and greedy decoding
//! - **Engine**: the shared, load-once model handle used by every job
//! - **Device**: CPU/GPU selection
//!
//! ## Whisper Model Sizes:
//! - **tiny**: ~39MB, fastest but least accurate
//! - **base**: ~74MB
//! - **small**: ~244MB
//! - **medium**: ~769MB
//! - **large**: ~1550MB, best accuracy but slowest (default)

pub mod device;
pub mod engine;
pub mod model;

pub use engine::{TranscriptionConfig, TranscriptionEngine};
