//! Band-limited oscillator kernel
//!
//! Phase-accumulator oscillator with PolyBLEP correction on the
//! discontinuous shapes. Frequency is supplied per sample so the graph can
//! drive it from an automated parameter.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Oscillator shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    #[default]
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    /// Parse a waveform name
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "sine" => Some(Waveform::Sine),
            "square" => Some(Waveform::Square),
            "sawtooth" | "saw" => Some(Waveform::Sawtooth),
            "triangle" => Some(Waveform::Triangle),
            _ => None,
        }
    }

    /// Get string identifier
    pub fn as_str(&self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
            Waveform::Triangle => "triangle",
        }
    }
}

/// PolyBLEP residual for a discontinuity at phase 0
#[inline]
fn poly_blep(phase: f64, inc: f64) -> f64 {
    if inc <= 0.0 {
        return 0.0;
    }
    if phase < inc {
        let t = phase / inc;
        t + t - t * t - 1.0
    } else if phase > 1.0 - inc {
        let t = (phase - 1.0) / inc;
        t * t + t + t + 1.0
    } else {
        0.0
    }
}

/// Phase-accumulator oscillator
#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f64,
    sample_rate: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, sample_rate: f64) -> Self {
        Self {
            waveform,
            phase: 0.0,
            sample_rate,
        }
    }

    pub fn waveform(&self) -> Waveform {
        self.waveform
    }

    /// Generate the next sample at `frequency` Hz
    pub fn next_sample(&mut self, frequency: f32) -> f32 {
        let inc = (frequency.max(0.0) as f64 / self.sample_rate).min(0.5);
        let phase = self.phase;

        let sample = match self.waveform {
            Waveform::Sine => (2.0 * PI * phase).sin(),
            Waveform::Sawtooth => 2.0 * phase - 1.0 - poly_blep(phase, inc),
            Waveform::Square => {
                let naive = if phase < 0.5 { 1.0 } else { -1.0 };
                naive + poly_blep(phase, inc) - poly_blep((phase + 0.5) % 1.0, inc)
            }
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        };

        self.phase += inc;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }

        sample as f32
    }
}
