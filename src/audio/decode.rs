//! Conditioned WAV → `f32` samples.
//!
//! The conditioning step already produced 16 kHz mono PCM, so this only has
//! to read the file and scale the samples. Other bit depths and channel
//! layouts are still accepted and folded down to mono.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Decoded model input.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Read a WAV file and check that it has the rate the model expects.
pub fn decode_wav(path: &Path, expected_rate: u32) -> Result<DecodedAudio> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let (header, data) = wav::read(&mut reader)
        .with_context(|| format!("invalid WAV file {}", path.display()))?;

    if header.sampling_rate != expected_rate {
        return Err(anyhow!(
            "unexpected sample rate {} Hz (expected {} Hz)",
            header.sampling_rate,
            expected_rate
        ));
    }

    let interleaved = to_f32(data)?;
    let samples = downmix(&interleaved, header.channel_count.max(1) as usize);

    if samples.is_empty() {
        return Err(anyhow!("o ficheiro de áudio não contém amostras"));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate: header.sampling_rate,
    })
}

fn to_f32(data: wav::BitDepth) -> Result<Vec<f32>> {
    let samples = match data {
        wav::BitDepth::Eight(raw) => raw.iter().map(|&s| (s as f32 - 128.0) / 128.0).collect(),
        wav::BitDepth::Sixteen(raw) => pcm_to_float(&raw),
        wav::BitDepth::TwentyFour(raw) => raw.iter().map(|&s| s as f32 / 8_388_608.0).collect(),
        wav::BitDepth::ThirtyTwoFloat(raw) => raw,
        wav::BitDepth::Empty => return Err(anyhow!("WAV file has no sample data")),
    };
    Ok(samples)
}

/// Scale 16-bit PCM from `[-32768, 32767]` to `[-1.0, 1.0]`.
pub fn pcm_to_float(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Average interleaved frames down to one channel.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Write 16-bit PCM samples as a WAV file. Test fixtures only.
#[cfg(test)]
pub(crate) fn write_pcm16_wav(path: &Path, samples: &[i16], sample_rate: u32, channels: u16) {
    let header = wav::Header::new(1, channels, sample_rate, 16);
    let mut file = File::create(path).unwrap();
    wav::write(header, &wav::BitDepth::Sixteen(samples.to_vec()), &mut file).unwrap();
}
