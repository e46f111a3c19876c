//! Layer engine contract
//!
//! One engine per sound layer. Engines own their node subgraph, keep their
//! own copy of the layer configuration, and report play-state transitions
//! through return values instead of writing back into the store.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EngineConfig;
use crate::engine::{AudioContext, NodeId};
use crate::error::Result;
use crate::layers::ambient::{AmbientEngine, SampleLibrary};
use crate::layers::binaural::BinauralEngine;
use crate::layers::effects::{EffectFactory, NoiseUnitFactory};
use crate::layers::isochronic::IsochronicEngine;
use crate::layers::model::{LayerPatch, LayerType, SoundLayer};
use crate::layers::oscillator::OscillatorBackend;

/// Whether a layer is producing sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayState {
    Playing,
    Stopped,
}

impl PlayState {
    pub fn is_playing(&self) -> bool {
        matches!(self, PlayState::Playing)
    }
}

impl From<bool> for PlayState {
    fn from(playing: bool) -> Self {
        if playing {
            PlayState::Playing
        } else {
            PlayState::Stopped
        }
    }
}

/// Shared collaborators handed to every engine
#[derive(Clone)]
pub struct EngineDeps {
    pub config: Arc<EngineConfig>,
    pub effects: Arc<dyn EffectFactory>,
    pub samples: Arc<SampleLibrary>,
    pub backend: OscillatorBackend,
}

impl fmt::Debug for EngineDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDeps")
            .field("config", &self.config)
            .field("effects", &self.effects)
            .field("backend", &self.backend)
            .finish()
    }
}

impl Default for EngineDeps {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl EngineDeps {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config: Arc::new(config),
            effects: Arc::new(NoiseUnitFactory),
            samples: Arc::new(SampleLibrary::new()),
            backend: OscillatorBackend::default(),
        }
    }

    pub fn with_effects(mut self, effects: Arc<dyn EffectFactory>) -> Self {
        self.effects = effects;
        self
    }

    pub fn with_samples(mut self, samples: Arc<SampleLibrary>) -> Self {
        self.samples = samples;
        self
    }
}

/// Engine contract shared by every layer variant
#[async_trait]
pub trait LayerEngine: Send + Sync + fmt::Debug {
    fn id(&self) -> String;

    fn layer_type(&self) -> LayerType;

    /// Build the graph if needed, resume the context and fade in
    ///
    /// Idempotent while playing. Only an unusable context is an error.
    async fn start(&self) -> Result<PlayState>;

    /// Fade out, then release the sources; idempotent while stopped
    async fn stop(&self) -> PlayState;

    /// Apply a partial configuration to the live graph
    fn update(&self, patch: LayerPatch);

    /// Tear down every node, effect and timer, whatever the play state
    fn dispose(&self);

    fn is_playing(&self) -> bool;

    /// The engine's own copy of the layer configuration
    fn layer(&self) -> SoundLayer;

    /// Analyser tap, once the graph exists
    fn analyser(&self) -> Option<NodeId> {
        None
    }

    /// Time-domain bytes; leaves `out` untouched without an analyser
    fn waveform_data(&self, _out: &mut [u8]) {}

    /// Spectrum bytes; leaves `out` untouched without an analyser
    fn frequency_data(&self, _out: &mut [u8]) {}
}

/// Build the engine variant for `layer`
pub fn create_engine(
    layer: SoundLayer,
    ctx: Arc<AudioContext>,
    deps: &EngineDeps,
) -> Box<dyn LayerEngine> {
    match layer.layer_type {
        LayerType::Binaural => Box::new(BinauralEngine::new(layer, ctx, deps)),
        LayerType::Isochronic => Box::new(IsochronicEngine::new(layer, ctx, deps)),
        LayerType::Ambient => Box::new(AmbientEngine::new(layer, ctx, deps)),
    }
}
