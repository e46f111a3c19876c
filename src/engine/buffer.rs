//! Audio Buffer Management
//!
//! Planar float buffers used both for render quanta inside the graph and
//! for whole renders/loops handed in and out of the crate.

use crate::error::{LayertoneError, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default context sample rate (48kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

// ============================================================================
// Helper Functions
// ============================================================================

/// Convert decibels to linear amplitude
#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels
///
/// Returns -f32::INFINITY for zero input.
#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        f32::NEG_INFINITY
    } else {
        20.0 * linear.log10()
    }
}

/// RMS level of a buffer in dB (all channels pooled)
pub fn calculate_rms(buffer: &AudioBuffer) -> f32 {
    let total_samples = buffer.num_channels() * buffer.len();
    if total_samples == 0 {
        return f32::NEG_INFINITY;
    }

    let sum_squares: f64 = buffer
        .samples
        .iter()
        .flat_map(|channel| channel.iter())
        .map(|&s| (s as f64) * (s as f64))
        .sum();

    let rms = (sum_squares / total_samples as f64).sqrt() as f32;
    linear_to_db(rms)
}

// ============================================================================
// Channel Layout
// ============================================================================

/// Audio channel configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelLayout {
    /// Single channel (mono)
    Mono,
    /// Two channels (stereo: left, right)
    #[default]
    Stereo,
}

impl ChannelLayout {
    /// Returns the number of channels for this layout
    pub fn num_channels(&self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

// ============================================================================
// Audio Buffer
// ============================================================================

/// Planar audio buffer: outer Vec is channels, inner Vec is samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Create a silent buffer with the given layout
    pub fn new(num_samples: usize, layout: ChannelLayout, sample_rate: u32) -> Self {
        Self::with_channels(layout.num_channels(), num_samples, sample_rate)
    }

    /// Create a silent buffer with an arbitrary channel count
    pub fn with_channels(num_channels: usize, num_samples: usize, sample_rate: u32) -> Self {
        Self {
            samples: vec![vec![0.0_f32; num_samples]; num_channels],
            sample_rate,
        }
    }

    /// Create an audio buffer from interleaved sample data
    pub fn from_interleaved(
        interleaved: &[f32],
        num_channels: usize,
        sample_rate: u32,
    ) -> Result<Self> {
        if num_channels == 0 {
            return Err(LayertoneError::InvalidAudio {
                reason: "channel count must be at least 1".to_string(),
            });
        }
        if interleaved.len() % num_channels != 0 {
            return Err(LayertoneError::InvalidAudio {
                reason: format!(
                    "Interleaved data length {} is not divisible by channel count {}",
                    interleaved.len(),
                    num_channels
                ),
            });
        }

        let num_samples = interleaved.len() / num_channels;
        let mut samples = vec![Vec::with_capacity(num_samples); num_channels];
        for frame in interleaved.chunks_exact(num_channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                samples[ch].push(sample);
            }
        }

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Convert the buffer to interleaved format (L, R, L, R, ...)
    pub fn to_interleaved(&self) -> Vec<f32> {
        let num_channels = self.num_channels();
        let num_samples = self.len();
        let mut interleaved = Vec::with_capacity(num_channels * num_samples);
        for sample_idx in 0..num_samples {
            for channel in &self.samples {
                interleaved.push(channel[sample_idx]);
            }
        }
        interleaved
    }

    /// Get the number of channels
    #[inline]
    pub fn num_channels(&self) -> usize {
        self.samples.len()
    }

    /// Get the number of samples per channel
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.first().map(|ch| ch.len()).unwrap_or(0)
    }

    /// Check if the buffer is empty (no samples)
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the duration in seconds
    #[inline]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.len() as f64 / self.sample_rate as f64
    }

    /// Immutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel(&self, index: usize) -> &[f32] {
        &self.samples[index]
    }

    /// Mutable access to a channel's samples
    ///
    /// # Panics
    /// Panics if the channel index is out of bounds
    #[inline]
    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        &mut self.samples[index]
    }

    /// Zero every sample
    pub fn clear(&mut self) {
        for channel in &mut self.samples {
            channel.fill(0.0);
        }
    }

    /// Largest absolute sample value
    pub fn peak(&self) -> f32 {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .map(|&s| s.abs())
            .fold(0.0_f32, f32::max)
    }

    /// Average all channels into one
    pub fn mono_mix(&self) -> Vec<f32> {
        let channels = self.num_channels();
        if channels == 0 {
            return Vec::new();
        }
        let scale = 1.0 / channels as f32;
        (0..self.len())
            .map(|i| self.samples.iter().map(|ch| ch[i]).sum::<f32>() * scale)
            .collect()
    }

    /// Sum `other` into this buffer using speaker up/down-mix rules
    ///
    /// Mono into stereo is copied to both sides; stereo into mono is averaged.
    /// The shorter length wins.
    pub fn mix_in(&mut self, other: &AudioBuffer) {
        let frames = self.len().min(other.len());
        match (self.num_channels(), other.num_channels()) {
            (a, b) if a == b => {
                for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
                    for i in 0..frames {
                        dst[i] += src[i];
                    }
                }
            }
            (_, 1) => {
                let src = &other.samples[0];
                for dst in &mut self.samples {
                    for i in 0..frames {
                        dst[i] += src[i];
                    }
                }
            }
            (1, b) => {
                let scale = 1.0 / b as f32;
                let dst = &mut self.samples[0];
                for src in &other.samples {
                    for i in 0..frames {
                        dst[i] += src[i] * scale;
                    }
                }
            }
            (_, _) => {
                for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
                    for i in 0..frames {
                        dst[i] += src[i];
                    }
                }
            }
        }
    }

    /// Append another buffer with the same channel count
    pub fn append(&mut self, other: &AudioBuffer) {
        for (dst, src) in self.samples.iter_mut().zip(&other.samples) {
            dst.extend_from_slice(src);
        }
    }

    /// Check that every sample is finite
    pub fn is_finite(&self) -> bool {
        self.samples
            .iter()
            .flat_map(|channel| channel.iter())
            .all(|s| s.is_finite())
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(0, ChannelLayout::Stereo, DEFAULT_SAMPLE_RATE)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_db_to_linear() {
        assert_relative_eq!(db_to_linear(0.0), 1.0, epsilon = 1e-6);
        assert_relative_eq!(db_to_linear(-6.0), 0.501187, epsilon = 1e-4);
    }

    #[test]
    fn test_linear_to_db() {
        assert_relative_eq!(linear_to_db(1.0), 0.0, epsilon = 1e-6);
        assert_eq!(linear_to_db(0.0), f32::NEG_INFINITY);
    }

    #[test]
    fn test_rms_of_unity_dc() {
        let buffer = AudioBuffer {
            samples: vec![vec![1.0; 64], vec![1.0; 64]],
            sample_rate: DEFAULT_SAMPLE_RATE,
        };
        assert_relative_eq!(calculate_rms(&buffer), 0.0, epsilon = 1e-4);
        assert_relative_eq!(linear_to_db(buffer.peak()), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_from_interleaved_stereo() {
        let buffer = AudioBuffer::from_interleaved(&[0.1, 0.2, 0.3, 0.4], 2, 48000).unwrap();
        assert_eq!(buffer.channel(0), &[0.1, 0.3]);
        assert_eq!(buffer.channel(1), &[0.2, 0.4]);
        assert_eq!(buffer.to_interleaved(), vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_from_interleaved_invalid() {
        assert!(AudioBuffer::from_interleaved(&[0.1, 0.2, 0.3], 2, 48000).is_err());
        assert!(AudioBuffer::from_interleaved(&[0.1], 0, 48000).is_err());
    }

    #[test]
    fn test_mix_mono_into_stereo() {
        let mut stereo = AudioBuffer::new(4, ChannelLayout::Stereo, 48000);
        let mono = AudioBuffer {
            samples: vec![vec![0.5; 4]],
            sample_rate: 48000,
        };
        stereo.mix_in(&mono);
        stereo.mix_in(&mono);
        assert_eq!(stereo.channel(0), &[1.0; 4]);
        assert_eq!(stereo.channel(1), &[1.0; 4]);
    }

    #[test]
    fn test_mix_stereo_into_mono_averages() {
        let mut mono = AudioBuffer::new(2, ChannelLayout::Mono, 48000);
        let stereo = AudioBuffer {
            samples: vec![vec![1.0, 1.0], vec![0.0, 0.0]],
            sample_rate: 48000,
        };
        mono.mix_in(&stereo);
        assert_eq!(mono.channel(0), &[0.5, 0.5]);
    }

    #[test]
    fn test_duration() {
        let buffer = AudioBuffer::new(24000, ChannelLayout::Mono, 48000);
        assert_relative_eq!(buffer.duration_secs(), 0.5);
    }
}
