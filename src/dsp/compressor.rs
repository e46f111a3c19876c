//! Dynamics compressor
//!
//! Feed-forward compressor with peak detection linked across channels,
//! soft knee, and one-pole attack/release smoothing of the gain.

use serde::{Deserialize, Serialize};

use crate::engine::buffer::{db_to_linear, AudioBuffer};

/// Compressor parameters, times in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressorParams {
    /// Threshold level in dB (-100 to 0 dB)
    pub threshold_db: f32,
    /// Knee width in dB (0 = hard knee, up to 40 dB)
    pub knee_db: f32,
    /// Compression ratio (1.0 to 20.0)
    pub ratio: f32,
    /// Attack time (0 to 1 s)
    pub attack_secs: f32,
    /// Release time (0 to 1 s)
    pub release_secs: f32,
}

impl Default for CompressorParams {
    fn default() -> Self {
        Self {
            threshold_db: -24.0,
            knee_db: 30.0,
            ratio: 12.0,
            attack_secs: 0.003,
            release_secs: 0.25,
        }
    }
}

impl CompressorParams {
    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.threshold_db = self.threshold_db.clamp(-100.0, 0.0);
        self.knee_db = self.knee_db.clamp(0.0, 40.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack_secs = self.attack_secs.clamp(0.0, 1.0);
        self.release_secs = self.release_secs.clamp(0.0, 1.0);
    }
}

/// Stereo-linked dynamics compressor
#[derive(Debug, Clone)]
pub struct Compressor {
    params: CompressorParams,
    sample_rate: f64,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current smoothed gain (linear, <= 1)
    gain: f32,
}

impl Compressor {
    pub fn new(params: CompressorParams, sample_rate: f64) -> Self {
        let mut comp = Self {
            params,
            sample_rate,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            gain: 1.0,
        };
        comp.params.clamp();
        comp.update_coefficients();
        comp
    }

    pub fn params(&self) -> &CompressorParams {
        &self.params
    }

    /// Current gain reduction in dB (0 or negative), for metering
    pub fn gain_reduction_db(&self) -> f32 {
        if self.gain > 0.0 {
            20.0 * self.gain.log10()
        } else {
            -96.0
        }
    }

    fn update_coefficients(&mut self) {
        // coeff = exp(-1 / time_in_samples)
        let coeff = |secs: f32| {
            let samples = secs as f64 * self.sample_rate;
            if samples > 0.0 {
                (-1.0 / samples).exp() as f32
            } else {
                0.0
            }
        };
        self.attack_coeff = coeff(self.params.attack_secs);
        self.release_coeff = coeff(self.params.release_secs);
    }

    /// Gain change in dB (negative) for an input level in dB
    fn compute_gain_reduction_db(&self, input_db: f32) -> f32 {
        let threshold = self.params.threshold_db;
        let ratio = self.params.ratio;
        let knee = self.params.knee_db;

        if knee > 0.0 {
            let knee_start = threshold - knee / 2.0;
            let knee_end = threshold + knee / 2.0;

            if input_db <= knee_start {
                0.0
            } else if input_db >= knee_end {
                (threshold + (input_db - threshold) / ratio) - input_db
            } else {
                // Quadratic interpolation inside the knee
                let over = input_db - knee_start;
                (1.0 / ratio - 1.0) * over * over / (2.0 * knee)
            }
        } else if input_db <= threshold {
            0.0
        } else {
            (threshold + (input_db - threshold) / ratio) - input_db
        }
    }

    /// Compress a block in place
    pub fn process(&mut self, buffer: &mut AudioBuffer) {
        let num_channels = buffer.num_channels();
        for frame in 0..buffer.len() {
            let mut level: f32 = 0.0;
            for ch in 0..num_channels {
                level = level.max(buffer.samples[ch][frame].abs());
            }

            let input_db = if level > 0.0 {
                20.0 * level.log10()
            } else {
                -96.0
            };
            let target = db_to_linear(self.compute_gain_reduction_db(input_db));

            let coeff = if target < self.gain {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.gain = coeff * self.gain + (1.0 - coeff) * target;

            for ch in 0..num_channels {
                buffer.samples[ch][frame] *= self.gain;
            }
        }
    }

    /// Reset the gain follower
    pub fn reset(&mut self) {
        self.gain = 1.0;
    }
}
