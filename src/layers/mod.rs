//! Sound layers
//!
//! Per-layer engines and the pieces they share:
//! - `model`: layer configuration, patches and clamping rules
//! - `oscillator`, `effects`, `automation`: graph building blocks
//! - `binaural`, `isochronic`, `ambient`: the three engine variants
//! - `mixer`: binds a set of layer configurations to their engines

pub mod ambient;
pub mod automation;
pub mod binaural;
pub mod effects;
pub mod engine;
pub mod isochronic;
pub mod mixer;
pub mod model;
pub mod oscillator;
pub(crate) mod output;

pub use ambient::{AmbientEngine, SampleLibrary};
pub use automation::AutomationRunner;
pub use binaural::BinauralEngine;
pub use effects::{EffectFactory, EffectRack, EffectUnit, NoiseUnit, NoiseUnitFactory, RackDiff};
pub use engine::{create_engine, EngineDeps, LayerEngine, PlayState};
pub use isochronic::IsochronicEngine;
pub use mixer::{LayerMixer, PlayStateCallback};
pub use model::{
    AutomationTarget, LayerEffect, LayerPatch, LayerType, NoiseEffect, NoiseType,
    ParamAutomation, SoundLayer, Waveform,
};
pub use oscillator::{
    NodeOscillators, OscillatorBackend, OscillatorGraph, RingingVoices, VoiceTarget,
};
