//! Engine configuration
//!
//! Timing constants for fades, retunes, gating and automation, plus the
//! master bus tuning. Loaded from JSON; missing fields take defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LayertoneError, Result};

/// Master bus tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Input gain applied before any processing (headroom)
    pub headroom: f32,
    /// DC-blocking highpass corner in Hz
    pub highpass_hz: f32,
    /// Compressor threshold in dB
    pub threshold_db: f32,
    /// Compressor knee width in dB
    pub knee_db: f32,
    /// Compressor ratio (n:1)
    pub ratio: f32,
    /// Compressor attack in seconds
    pub attack_secs: f32,
    /// Compressor release in seconds
    pub release_secs: f32,
    /// Soft-clip drive in (0, 1]
    pub soft_clip_amount: f32,
    /// Number of points in the soft-clip transfer curve
    pub soft_clip_samples: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            headroom: 0.85,
            highpass_hz: 20.0,
            threshold_db: -18.0,
            knee_db: 6.0,
            ratio: 3.0,
            attack_secs: 0.01,
            release_secs: 0.25,
            soft_clip_amount: 0.5,
            soft_clip_samples: 2048,
        }
    }
}

impl BusConfig {
    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.headroom = self.headroom.clamp(0.0, 1.0);
        self.highpass_hz = self.highpass_hz.clamp(1.0, 200.0);
        self.threshold_db = self.threshold_db.clamp(-100.0, 0.0);
        self.knee_db = self.knee_db.clamp(0.0, 40.0);
        self.ratio = self.ratio.clamp(1.0, 20.0);
        self.attack_secs = self.attack_secs.clamp(0.0, 1.0);
        self.release_secs = self.release_secs.clamp(0.0, 1.0);
        self.soft_clip_amount = self.soft_clip_amount.clamp(0.001, 1.0);
        self.soft_clip_samples = self.soft_clip_samples.clamp(2, 65536);
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Context sample rate in Hz
    pub sample_rate: u32,
    /// Frames per render quantum
    pub render_quantum: usize,
    /// Linear fade-in applied on start
    pub fade_in_secs: f32,
    /// Linear fade-out applied on stop
    pub fade_out_secs: f32,
    /// Time constant used when retuning oscillators
    pub freq_smoothing_secs: f32,
    /// Step interval of tick-driven automation ramps
    pub automation_tick_ms: u64,
    /// Isochronic gate attack
    pub pulse_attack_secs: f32,
    /// Isochronic gate decay time constant
    pub pulse_decay_secs: f32,
    /// Resting gate level between pulses
    pub pulse_floor: f32,
    /// Maximum concurrent layers in a mixer
    pub max_layers: usize,
    /// Upper bound for carrier frequencies
    pub max_base_freq: f32,
    /// Analyser FFT size (power of two)
    pub analyser_fft_size: usize,
    /// Analyser spectrum smoothing in [0, 1)
    pub analyser_smoothing: f32,
    pub analyser_min_db: f32,
    pub analyser_max_db: f32,
    /// Master bus tuning
    pub bus: BusConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            render_quantum: 128,
            fade_in_secs: 0.025,
            fade_out_secs: 0.03,
            freq_smoothing_secs: 0.015,
            automation_tick_ms: 16,
            pulse_attack_secs: 0.005,
            pulse_decay_secs: 0.06,
            pulse_floor: 0.0001,
            max_layers: 5,
            max_base_freq: 5000.0,
            analyser_fft_size: 2048,
            analyser_smoothing: 0.8,
            analyser_min_db: -100.0,
            analyser_max_db: -30.0,
            bus: BusConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON text and clamp it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: EngineConfig = serde_json::from_str(json)?;
        config.clamp();
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Clamp parameters to valid ranges
    pub fn clamp(&mut self) {
        self.sample_rate = self.sample_rate.clamp(8000, 192_000);
        self.render_quantum = self.render_quantum.clamp(1, 4096);
        self.fade_in_secs = self.fade_in_secs.clamp(0.0, 1.0);
        self.fade_out_secs = self.fade_out_secs.clamp(0.0, 1.0);
        self.freq_smoothing_secs = self.freq_smoothing_secs.clamp(0.001, 1.0);
        self.automation_tick_ms = self.automation_tick_ms.clamp(1, 1000);
        self.pulse_attack_secs = self.pulse_attack_secs.clamp(0.0005, 0.5);
        self.pulse_decay_secs = self.pulse_decay_secs.clamp(0.001, 1.0);
        self.pulse_floor = self.pulse_floor.clamp(0.0, 0.1);
        self.max_layers = self.max_layers.max(1);
        self.max_base_freq = self.max_base_freq.clamp(1.0, 20_000.0);
        self.analyser_smoothing = self.analyser_smoothing.clamp(0.0, 0.99);
        self.bus.clamp();
    }

    /// Check constraints clamping cannot fix
    pub fn validate(&self) -> Result<()> {
        let fft = self.analyser_fft_size;
        if !(32..=32768).contains(&fft) || !fft.is_power_of_two() {
            return Err(LayertoneError::Config {
                reason: format!("analyser_fft_size must be a power of two in 32..=32768, got {fft}"),
            });
        }
        if self.analyser_min_db >= self.analyser_max_db {
            return Err(LayertoneError::Config {
                reason: "analyser_min_db must be below analyser_max_db".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_empty_json() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_partial_json_overrides() {
        let config =
            EngineConfig::from_json_str(r#"{"fade_in_secs": 0.02, "bus": {"headroom": 0.7}}"#)
                .unwrap();
        assert!((config.fade_in_secs - 0.02).abs() < f32::EPSILON);
        assert!((config.bus.headroom - 0.7).abs() < f32::EPSILON);
        assert!((config.bus.highpass_hz - 20.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let config =
            EngineConfig::from_json_str(r#"{"max_layers": 0, "bus": {"headroom": 4.0}}"#).unwrap();
        assert_eq!(config.max_layers, 1);
        assert!((config.bus.headroom - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_invalid_fft_size_rejected() {
        let err = EngineConfig::from_json_str(r#"{"analyser_fft_size": 1000}"#).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"automation_tick_ms": 20}"#).unwrap();
        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.automation_tick_ms, 20);
    }
}
