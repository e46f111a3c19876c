//! Layer configuration model
//!
//! `SoundLayer` is the store's record for one layer. Engines keep their own
//! copy and receive changes as `LayerPatch`es. Field names serialize in the
//! store's camelCase shape.

use serde::{Deserialize, Serialize};

pub use crate::dsp::{NoiseType, Waveform};
use crate::dsp::NoiseSettings;

/// Lowest frequency that ever reaches an oscillator
pub const MIN_FREQ_HZ: f32 = 1.0;

/// Lowest isochronic gate rate
pub const MIN_PULSE_HZ: f32 = 0.5;

/// Highest isochronic gate rate
pub const MAX_PULSE_HZ: f32 = 100.0;

/// Carrier ceiling used when no engine config is at hand
pub const DEFAULT_MAX_BASE_FREQ: f32 = 5000.0;

// ============================================================================
// Layer Types
// ============================================================================

/// Which engine variant renders a layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Binaural,
    Isochronic,
    Ambient,
}

impl LayerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayerType::Binaural => "binaural",
            LayerType::Isochronic => "isochronic",
            LayerType::Ambient => "ambient",
        }
    }
}

/// Layer parameter an automation ramp drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AutomationTarget {
    BeatOffset,
    PulseFreq,
    Volume,
    Pan,
}

// ============================================================================
// Effects
// ============================================================================

/// Noise bed attached to a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoiseEffect {
    pub id: String,
    #[serde(rename = "type")]
    pub noise_type: NoiseType,
    pub gain: f32,
    #[serde(default)]
    pub pan: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lpf_hz: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopan_hz: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autopan_depth: Option<f32>,
}

impl NoiseEffect {
    pub fn new(id: impl Into<String>, noise_type: NoiseType, gain: f32, pan: f32) -> Self {
        Self {
            id: id.into(),
            noise_type,
            gain,
            pan,
            lpf_hz: None,
            autopan_hz: None,
            autopan_depth: None,
        }
    }

    /// Generator settings, clamped to their domains
    pub fn settings(&self) -> NoiseSettings {
        NoiseSettings {
            noise_type: self.noise_type,
            gain: finite_or(self.gain, 0.0),
            pan: finite_or(self.pan, 0.0),
            lpf_hz: self.lpf_hz.filter(|hz| hz.is_finite()),
            autopan_hz: self.autopan_hz.filter(|hz| hz.is_finite()),
            autopan_depth: self.autopan_depth.filter(|d| d.is_finite()),
        }
        .clamped()
    }
}

/// One-shot linear ramp of a layer parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamAutomation {
    pub id: String,
    pub target: AutomationTarget,
    pub from: f32,
    pub to: f32,
    pub duration_sec: f32,
}

impl ParamAutomation {
    pub fn new(
        id: impl Into<String>,
        target: AutomationTarget,
        from: f32,
        to: f32,
        duration_sec: f32,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            from,
            to,
            duration_sec,
        }
    }

    /// Value `elapsed` seconds into the ramp
    pub fn value_at(&self, elapsed: f32) -> f32 {
        if self.duration_sec <= 0.0 || elapsed >= self.duration_sec {
            return self.to;
        }
        let t = (elapsed / self.duration_sec).max(0.0);
        self.from + (self.to - self.from) * t
    }
}

/// Effect attached to a layer, tagged by `kind`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum LayerEffect {
    Noise(NoiseEffect),
    Automation(ParamAutomation),
}

impl LayerEffect {
    pub fn id(&self) -> &str {
        match self {
            LayerEffect::Noise(noise) => &noise.id,
            LayerEffect::Automation(ramp) => &ramp.id,
        }
    }

    pub fn as_noise(&self) -> Option<&NoiseEffect> {
        match self {
            LayerEffect::Noise(noise) => Some(noise),
            LayerEffect::Automation(_) => None,
        }
    }

    pub fn as_automation(&self) -> Option<&ParamAutomation> {
        match self {
            LayerEffect::Automation(ramp) => Some(ramp),
            LayerEffect::Noise(_) => None,
        }
    }
}

// ============================================================================
// Sound Layer
// ============================================================================

fn default_base_freq() -> f32 {
    200.0
}

fn default_pulse_freq() -> f32 {
    10.0
}

fn default_volume() -> f32 {
    0.5
}

/// Store record for one layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SoundLayer {
    pub id: String,
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    #[serde(default = "default_base_freq")]
    pub base_freq: f32,
    #[serde(default)]
    pub beat_offset: f32,
    #[serde(default = "default_pulse_freq")]
    pub pulse_freq: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ambient_key: Option<String>,
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default)]
    pub pan: f32,
    #[serde(default)]
    pub wave: Waveform,
    #[serde(default)]
    pub is_playing: bool,
    #[serde(default)]
    pub effects: Vec<LayerEffect>,
}

impl SoundLayer {
    fn with_type(id: impl Into<String>, layer_type: LayerType) -> Self {
        Self {
            id: id.into(),
            layer_type,
            base_freq: default_base_freq(),
            beat_offset: 0.0,
            pulse_freq: default_pulse_freq(),
            ambient_key: None,
            volume: default_volume(),
            pan: 0.0,
            wave: Waveform::Sine,
            is_playing: false,
            effects: Vec::new(),
        }
    }

    pub fn binaural(id: impl Into<String>, base_freq: f32, beat_offset: f32) -> Self {
        Self {
            base_freq,
            beat_offset,
            ..Self::with_type(id, LayerType::Binaural)
        }
    }

    pub fn isochronic(id: impl Into<String>, base_freq: f32, pulse_freq: f32) -> Self {
        Self {
            base_freq,
            pulse_freq,
            ..Self::with_type(id, LayerType::Isochronic)
        }
    }

    pub fn ambient(id: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            ambient_key: Some(key.into()),
            ..Self::with_type(id, LayerType::Ambient)
        }
    }

    /// A fresh layer with a random id
    pub fn with_random_id(layer_type: LayerType) -> Self {
        Self::with_type(uuid::Uuid::new_v4().to_string(), layer_type)
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn with_wave(mut self, wave: Waveform) -> Self {
        self.wave = wave;
        self
    }

    pub fn with_effects(mut self, effects: Vec<LayerEffect>) -> Self {
        self.effects = effects;
        self
    }

    /// Merge a patch; later patches win on overlapping fields
    pub fn apply(&mut self, patch: &LayerPatch) {
        if let Some(v) = patch.base_freq {
            self.base_freq = v;
        }
        if let Some(v) = patch.beat_offset {
            self.beat_offset = v;
        }
        if let Some(v) = patch.pulse_freq {
            self.pulse_freq = v;
        }
        if let Some(key) = &patch.ambient_key {
            self.ambient_key = Some(key.clone());
        }
        if let Some(v) = patch.volume {
            self.volume = v;
        }
        if let Some(v) = patch.pan {
            self.pan = v;
        }
        if let Some(wave) = patch.wave {
            self.wave = wave;
        }
        if let Some(effects) = &patch.effects {
            self.effects = effects.clone();
        }
    }
}

/// Partial layer update; `None` leaves a field alone
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LayerPatch {
    pub base_freq: Option<f32>,
    pub beat_offset: Option<f32>,
    pub pulse_freq: Option<f32>,
    pub ambient_key: Option<String>,
    pub volume: Option<f32>,
    pub pan: Option<f32>,
    pub wave: Option<Waveform>,
    pub effects: Option<Vec<LayerEffect>>,
}

impl LayerPatch {
    pub fn volume(volume: f32) -> Self {
        Self {
            volume: Some(volume),
            ..Self::default()
        }
    }

    pub fn pan(pan: f32) -> Self {
        Self {
            pan: Some(pan),
            ..Self::default()
        }
    }

    pub fn base_freq(base_freq: f32) -> Self {
        Self {
            base_freq: Some(base_freq),
            ..Self::default()
        }
    }

    pub fn wave(wave: Waveform) -> Self {
        Self {
            wave: Some(wave),
            ..Self::default()
        }
    }

    pub fn effects(effects: Vec<LayerEffect>) -> Self {
        Self {
            effects: Some(effects),
            ..Self::default()
        }
    }

    /// Whether carrier or beat/pulse frequencies change
    pub fn touches_frequency(&self) -> bool {
        self.base_freq.is_some() || self.beat_offset.is_some() || self.pulse_freq.is_some()
    }
}

// ============================================================================
// Clamping
// ============================================================================

#[inline]
fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Carrier frequency in [1, max_hz]
pub fn clamp_base_freq(base_freq: f32, max_hz: f32) -> f32 {
    finite_or(base_freq, MIN_FREQ_HZ).clamp(MIN_FREQ_HZ, max_hz.max(MIN_FREQ_HZ))
}

/// Gate rate in [0.5, 100] Hz
pub fn clamp_pulse_freq(pulse_freq: f32) -> f32 {
    finite_or(pulse_freq, MIN_PULSE_HZ).clamp(MIN_PULSE_HZ, MAX_PULSE_HZ)
}

/// Linear gain in [0, 1]
pub fn clamp_volume(volume: f32) -> f32 {
    finite_or(volume, 0.0).clamp(0.0, 1.0)
}

/// Stereo position in [-1, 1]
pub fn clamp_pan(pan: f32) -> f32 {
    finite_or(pan, 0.0).clamp(-1.0, 1.0)
}

/// Left/right frequencies around a carrier, each floored at 1 Hz
///
/// The carrier is capped at `max_hz` first; the two channels always move
/// together so `right - left == beat_offset` whenever neither is floored.
pub fn binaural_frequencies(base_freq: f32, beat_offset: f32, max_hz: f32) -> (f32, f32) {
    let base = finite_or(base_freq, MIN_FREQ_HZ).min(max_hz.max(MIN_FREQ_HZ));
    let half = finite_or(beat_offset, 0.0) / 2.0;
    (
        (base - half).max(MIN_FREQ_HZ),
        (base + half).max(MIN_FREQ_HZ),
    )
}

/// Gate period for a pulse rate
pub fn pulse_period_secs(pulse_freq: f32) -> f64 {
    1.0 / clamp_pulse_freq(pulse_freq) as f64
}
