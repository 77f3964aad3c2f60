//! # Audio Module
//!
//! Everything between an uploaded media file and the samples the model sees.
//!
//! ## Key Components:
//! - **Converter**: ffmpeg-backed audio extraction (video containers) and
//!   conditioning (16 kHz, mono, 16-bit PCM WAV)
//! - **Decode**: reads the conditioned WAV into `f32` samples in `[-1.0, 1.0]`
//!
//! ## Audio Format Requirements (model input):
//! - **Sample Rate**: 16kHz
//! - **Channels**: Mono
//! - **Encoding**: uncompressed PCM, decoded to 32-bit floats

pub mod converter;
pub mod decode;

pub use converter::{AudioConverter, FfmpegConverter};
pub use decode::{decode_wav, DecodedAudio};

/// Container extensions whose audio track has to be extracted first.
pub const VIDEO_EXTENSIONS: &[&str] = &[".mp4", ".mkv", ".avi", ".mov"];

/// `extension` is the lower-cased suffix including the dot, e.g. `".mp4"`.
pub fn is_video_extension(extension: &str) -> bool {
    VIDEO_EXTENSIONS.contains(&extension)
}

/// Lower-cased extension (with the leading dot) of an uploaded file name,
/// or an empty string when there is none.
pub fn extension_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_of() {
        assert_eq!(extension_of("reuniao.MP4"), ".mp4");
        assert_eq!(extension_of("nota.final.wav"), ".wav");
        assert_eq!(extension_of("sem_extensao"), "");
        assert_eq!(extension_of(".bashrc"), "");
    }

    #[test]
    fn test_video_extensions() {
        for ext in [".mp4", ".mkv", ".avi", ".mov"] {
            assert!(is_video_extension(ext));
        }
        assert!(!is_video_extension(".wav"));
        assert!(!is_video_extension(".mp3"));
        assert!(!is_video_extension("mp4"));
    }
}
