//! Colored noise generator
//!
//! Stereo white/pink/brown noise with gain, pan, an optional low-pass and
//! an optional autopan LFO. This is the sample-generation half of the noise
//! effect unit; the graph wraps it in a node.

use std::f32::consts::TAU;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::biquad::{Biquad, FilterType};
use super::panner::equal_power_gains;

/// Noise color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseType {
    #[default]
    White,
    Pink,
    Brown,
}

impl NoiseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NoiseType::White => "white",
            NoiseType::Pink => "pink",
            NoiseType::Brown => "brown",
        }
    }
}

/// Live-settable noise parameters
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseSettings {
    pub noise_type: NoiseType,
    /// Output gain in [0, 1]
    pub gain: f32,
    /// Stereo position in [-1, 1]
    pub pan: f32,
    /// Low-pass corner; `None` leaves the spectrum untouched
    pub lpf_hz: Option<f32>,
    /// Autopan rate; `None` or zero disables the LFO
    pub autopan_hz: Option<f32>,
    /// Autopan swing in [0, 1]
    pub autopan_depth: Option<f32>,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self {
            noise_type: NoiseType::White,
            gain: 0.5,
            pan: 0.0,
            lpf_hz: None,
            autopan_hz: None,
            autopan_depth: None,
        }
    }
}

impl NoiseSettings {
    /// Clamp every field to its domain
    pub fn clamped(mut self) -> Self {
        self.gain = self.gain.clamp(0.0, 1.0);
        self.pan = self.pan.clamp(-1.0, 1.0);
        self.lpf_hz = self.lpf_hz.map(|hz| hz.clamp(20.0, 20_000.0));
        self.autopan_hz = self.autopan_hz.map(|hz| hz.clamp(0.0, 20.0));
        self.autopan_depth = self.autopan_depth.map(|d| d.clamp(0.0, 1.0));
        self
    }
}

/// Paul Kellet's refined pink filter state
#[derive(Debug, Clone, Default)]
struct PinkState {
    b: [f32; 7],
}

impl PinkState {
    fn next(&mut self, white: f32) -> f32 {
        let b = &mut self.b;
        b[0] = 0.99886 * b[0] + white * 0.0555179;
        b[1] = 0.99332 * b[1] + white * 0.0750759;
        b[2] = 0.96900 * b[2] + white * 0.1538520;
        b[3] = 0.86650 * b[3] + white * 0.3104856;
        b[4] = 0.55000 * b[4] + white * 0.5329522;
        b[5] = -0.7616 * b[5] - white * 0.0168980;
        let out = b[0] + b[1] + b[2] + b[3] + b[4] + b[5] + b[6] + white * 0.5362;
        b[6] = white * 0.115926;
        out * 0.11
    }
}

/// Stereo noise source
#[derive(Debug, Clone)]
pub struct NoiseGenerator {
    settings: NoiseSettings,
    sample_rate: f64,
    rng: StdRng,
    pink: PinkState,
    brown: f32,
    lpf: Option<Biquad>,
    lfo_phase: f32,
    /// Smoothed gain to avoid zipper noise on live changes
    current_gain: f32,
}

impl NoiseGenerator {
    pub fn new(settings: NoiseSettings, sample_rate: f64, seed: u64) -> Self {
        let settings = settings.clamped();
        let mut generator = Self {
            current_gain: settings.gain,
            settings: NoiseSettings::default(),
            sample_rate,
            rng: StdRng::seed_from_u64(seed),
            pink: PinkState::default(),
            brown: 0.0,
            lpf: None,
            lfo_phase: 0.0,
        };
        generator.apply(settings);
        generator
    }

    pub fn settings(&self) -> &NoiseSettings {
        &self.settings
    }

    /// Push new settings; color switches take effect on the next sample
    pub fn apply(&mut self, settings: NoiseSettings) {
        let settings = settings.clamped();
        self.lpf = match (settings.lpf_hz, self.lpf.take()) {
            (None, _) => None,
            (Some(hz), Some(mut filter)) => {
                filter.set_frequency(hz);
                Some(filter)
            }
            (Some(hz), None) => Some(Biquad::new(
                FilterType::LowPass,
                hz,
                std::f32::consts::FRAC_1_SQRT_2,
                self.sample_rate,
            )),
        };
        self.settings = settings;
    }

    pub fn set_type(&mut self, noise_type: NoiseType) {
        self.settings.noise_type = noise_type;
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.settings.gain = gain.clamp(0.0, 1.0);
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.settings.pan = pan.clamp(-1.0, 1.0);
    }

    fn next_mono(&mut self) -> f32 {
        let white: f32 = self.rng.gen_range(-1.0..1.0);
        match self.settings.noise_type {
            NoiseType::White => white,
            NoiseType::Pink => self.pink.next(white),
            NoiseType::Brown => {
                self.brown = (self.brown + 0.02 * white) / 1.02;
                self.brown * 3.5
            }
        }
    }

    /// Fill a stereo pair of slices
    pub fn render(&mut self, left: &mut [f32], right: &mut [f32]) {
        let rate = self.settings.autopan_hz.unwrap_or(0.0);
        let depth = self.settings.autopan_depth.unwrap_or(0.0);
        let lfo_inc = rate / self.sample_rate as f32;
        let smoothing = 1.0 - (-1.0 / (0.005 * self.sample_rate as f32)).exp();

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mut sample = self.next_mono();
            if let Some(filter) = self.lpf.as_mut() {
                sample = filter.process_sample(0, sample);
            }

            self.current_gain += (self.settings.gain - self.current_gain) * smoothing;

            let mut pan = self.settings.pan;
            if lfo_inc > 0.0 && depth > 0.0 {
                pan += depth * (TAU * self.lfo_phase).sin();
                self.lfo_phase = (self.lfo_phase + lfo_inc).fract();
            }
            let (gl, gr) = equal_power_gains(pan);

            let out = sample * self.current_gain;
            *l = out * gl;
            *r = out * gr;
        }
    }
}
