//! Biquad filters
//!
//! Audio EQ Cookbook highpass/lowpass sections used by the master bus
//! DC blocker and the noise unit's low-pass.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Filter response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    /// Remove above frequency
    #[default]
    LowPass,
    /// Remove below frequency
    HighPass,
}

/// Biquad filter coefficients
/// Transfer function: H(z) = (b0 + b1*z^-1 + b2*z^-2) / (a0 + a1*z^-1 + a2*z^-2)
/// Normalized: all coefficients divided by a0
#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl BiquadCoeffs {
    /// Reference: https://www.w3.org/2011/audio/audio-eq-cookbook.html
    fn calculate(filter_type: FilterType, sample_rate: f64, frequency: f64, q: f64) -> Self {
        // Keep the corner strictly below Nyquist
        let freq = frequency.clamp(1.0, sample_rate / 2.0 * 0.99);
        let q = q.clamp(0.1, 10.0);

        let w0 = 2.0 * PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);

        let (b0, b1, b2, a0, a1, a2) = match filter_type {
            FilterType::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterType::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
        };

        BiquadCoeffs {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }
}

/// Filter history for one channel (Direct Form I)
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

impl BiquadState {
    fn process(&mut self, input: f64, coeffs: &BiquadCoeffs) -> f64 {
        let output = coeffs.b0 * input + coeffs.b1 * self.x1 + coeffs.b2 * self.x2
            - coeffs.a1 * self.y1
            - coeffs.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

/// Multi-channel biquad section
#[derive(Debug, Clone)]
pub struct Biquad {
    filter_type: FilterType,
    frequency: f32,
    q: f32,
    sample_rate: f64,
    coeffs: BiquadCoeffs,
    states: Vec<BiquadState>,
}

impl Biquad {
    pub fn new(filter_type: FilterType, frequency: f32, q: f32, sample_rate: f64) -> Self {
        Self {
            filter_type,
            frequency,
            q,
            sample_rate,
            coeffs: BiquadCoeffs::calculate(filter_type, sample_rate, frequency as f64, q as f64),
            states: Vec::new(),
        }
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Retune; coefficients are only recomputed on change
    pub fn set_frequency(&mut self, frequency: f32) {
        if (frequency - self.frequency).abs() > f32::EPSILON {
            self.frequency = frequency;
            self.coeffs = BiquadCoeffs::calculate(
                self.filter_type,
                self.sample_rate,
                frequency as f64,
                self.q as f64,
            );
        }
    }

    /// Filter one sample on `channel`
    #[inline]
    pub fn process_sample(&mut self, channel: usize, input: f32) -> f32 {
        if self.states.len() <= channel {
            self.states.resize(channel + 1, BiquadState::default());
        }
        self.states[channel].process(input as f64, &self.coeffs) as f32
    }

    /// Clear filter history
    pub fn reset(&mut self) {
        self.states.iter_mut().for_each(|s| *s = BiquadState::default());
    }
}
