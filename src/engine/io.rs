//! WAV file I/O
//!
//! Ambient loops are imported from WAV and resampled to the context rate;
//! offline renders are exported back to WAV. Only mono and stereo files are
//! accepted. Sample rate conversion uses linear interpolation.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::debug;

use crate::engine::buffer::AudioBuffer;
use crate::error::{LayertoneError, Result};

/// Bit depth and encoding of an exported file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WavEncoding {
    #[default]
    Int16,
    Int24,
    Float32,
}

impl WavEncoding {
    /// Pick an encoding from a bit depth (16, 24 or 32)
    pub fn from_bits(bits: u16) -> Result<Self> {
        match bits {
            16 => Ok(WavEncoding::Int16),
            24 => Ok(WavEncoding::Int24),
            32 => Ok(WavEncoding::Float32),
            other => Err(LayertoneError::InvalidAudio {
                reason: format!("{other}-bit output (only 16, 24, 32 supported)"),
            }),
        }
    }

    fn spec(&self, channels: u16, sample_rate: u32) -> WavSpec {
        let (bits_per_sample, sample_format) = match self {
            WavEncoding::Int16 => (16, SampleFormat::Int),
            WavEncoding::Int24 => (24, SampleFormat::Int),
            WavEncoding::Float32 => (32, SampleFormat::Float),
        };
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample,
            sample_format,
        }
    }
}

/// Read a WAV file and resample it to `target_rate`
pub fn import_wav(path: &Path, target_rate: u32) -> Result<AudioBuffer> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    if channels == 0 || channels > 2 {
        return Err(LayertoneError::InvalidAudio {
            reason: format!("{channels}-channel audio (only mono/stereo supported)"),
        });
    }

    let interleaved = read_samples(reader, spec)?;
    if interleaved.len() < channels {
        return Err(LayertoneError::InvalidAudio {
            reason: format!("{} contains no audio", path.display()),
        });
    }

    let buffer = AudioBuffer::from_interleaved(&interleaved, channels, spec.sample_rate)?;
    debug!(
        path = %path.display(),
        channels,
        source_rate = spec.sample_rate,
        frames = buffer.len(),
        "[IO] imported"
    );
    Ok(resample(&buffer, target_rate))
}

/// Write a buffer to a WAV file at its own sample rate
pub fn export_wav(buffer: &AudioBuffer, path: &Path, encoding: WavEncoding) -> Result<()> {
    let spec = encoding.spec(buffer.num_channels() as u16, buffer.sample_rate);
    let mut writer = WavWriter::create(path, spec)?;

    for sample in buffer.to_interleaved() {
        let sample = sample.clamp(-1.0, 1.0);
        match encoding {
            WavEncoding::Int16 => writer.write_sample((sample * 32767.0) as i16)?,
            // 24-bit stored as i32 in hound
            WavEncoding::Int24 => writer.write_sample((sample * 8_388_607.0) as i32)?,
            WavEncoding::Float32 => writer.write_sample(sample)?,
        }
    }

    writer.finalize()?;
    debug!(path = %path.display(), frames = buffer.len(), "[IO] exported");
    Ok(())
}

/// Linear-interpolation sample rate conversion
pub fn resample(buffer: &AudioBuffer, target_rate: u32) -> AudioBuffer {
    if buffer.sample_rate == target_rate || buffer.is_empty() || target_rate == 0 {
        return AudioBuffer {
            samples: buffer.samples.clone(),
            sample_rate: if target_rate == 0 {
                buffer.sample_rate
            } else {
                target_rate
            },
        };
    }

    let ratio = buffer.sample_rate as f64 / target_rate as f64;
    let out_len = ((buffer.len() as f64) / ratio).round().max(1.0) as usize;

    let samples = buffer
        .samples
        .iter()
        .map(|channel| {
            let last = channel.len() - 1;
            (0..out_len)
                .map(|i| {
                    let pos = i as f64 * ratio;
                    let idx = (pos as usize).min(last);
                    let next = (idx + 1).min(last);
                    let frac = (pos - idx as f64) as f32;
                    channel[idx] + (channel[next] - channel[idx]) * frac
                })
                .collect()
        })
        .collect();

    AudioBuffer {
        samples,
        sample_rate: target_rate,
    }
}

type SampleResult = std::result::Result<Vec<f32>, hound::Error>;

fn read_samples<R: std::io::Read>(mut reader: WavReader<R>, spec: WavSpec) -> Result<Vec<f32>> {
    let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, _) => reader.samples::<f32>().collect::<SampleResult>()?,
        (SampleFormat::Int, 8) => reader
            .samples::<i8>()
            .map(|s| s.map(|v| v as f32 / 128.0))
            .collect::<SampleResult>()?,
        (SampleFormat::Int, 16) => reader
            .samples::<i16>()
            .map(|s| s.map(|v| v as f32 / 32768.0))
            .collect::<SampleResult>()?,
        (SampleFormat::Int, bits @ (24 | 32)) => {
            let scale = (1u64 << (bits - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<SampleResult>()?
        }
        (SampleFormat::Int, bits) => {
            return Err(LayertoneError::InvalidAudio {
                reason: format!("{bits}-bit integer audio"),
            })
        }
    };
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tempfile::tempdir;

    fn ramp(frames: usize, sample_rate: u32) -> AudioBuffer {
        AudioBuffer {
            samples: vec![(0..frames).map(|i| i as f32 / frames as f32 - 0.5).collect()],
            sample_rate,
        }
    }

    #[test]
    fn test_float_export_import_is_lossless() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        let buffer = ramp(480, 48000);

        export_wav(&buffer, &path, WavEncoding::Float32).unwrap();
        let imported = import_wav(&path, 48000).unwrap();

        assert_eq!(imported, buffer);
    }

    #[test]
    fn test_import_resamples_to_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop.wav");
        export_wav(&ramp(441, 44100), &path, WavEncoding::Int16).unwrap();

        let imported = import_wav(&path, 48000).unwrap();
        assert_eq!(imported.sample_rate, 48000);
        assert_eq!(imported.len(), 480);
    }

    #[test]
    fn test_import_missing_file() {
        let err = import_wav(Path::new("/nonexistent/loop.wav"), 48000).unwrap_err();
        assert_eq!(err.error_code(), "WAV_ERROR");
    }

    #[test]
    fn test_resample_keeps_endpoints() {
        let buffer = ramp(100, 24000);
        let out = resample(&buffer, 48000);
        assert_eq!(out.len(), 200);
        assert_abs_diff_eq!(out.samples[0][0], buffer.samples[0][0]);
        assert_abs_diff_eq!(out.samples[0][2], buffer.samples[0][1], epsilon = 1e-6);
    }

    #[test]
    fn test_encoding_from_bits() {
        assert_eq!(WavEncoding::from_bits(24).unwrap(), WavEncoding::Int24);
        assert!(WavEncoding::from_bits(12).is_err());
    }
}
