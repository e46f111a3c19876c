//! Layer mixer
//!
//! Binds an ordered set of layer configurations to their engines. Engines
//! are created on first reference, rebuilt when a layer changes type, and
//! disposed when a layer is removed. Play-state transitions are reported
//! through a callback so the owner of the configuration can record them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::MasterBus;
use crate::engine::{AudioBuffer, AudioContext};
use crate::error::{LayertoneError, Result};
use crate::layers::engine::{create_engine, EngineDeps, LayerEngine, PlayState};
use crate::layers::model::{LayerPatch, SoundLayer};

/// Receives `(layer_id, is_playing)` whenever a layer starts or stops
pub type PlayStateCallback = Box<dyn Fn(&str, bool) + Send + Sync>;

pub struct LayerMixer {
    ctx: Arc<AudioContext>,
    deps: EngineDeps,
    layers: Vec<SoundLayer>,
    engines: HashMap<String, Box<dyn LayerEngine>>,
    on_play_state: Option<PlayStateCallback>,
}

impl fmt::Debug for LayerMixer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayerMixer")
            .field("context", &self.ctx.id())
            .field("layers", &self.layers.len())
            .field("engines", &self.engines.len())
            .finish()
    }
}

impl LayerMixer {
    pub fn new(ctx: Arc<AudioContext>, deps: EngineDeps) -> Self {
        Self {
            ctx,
            deps,
            layers: Vec::new(),
            engines: HashMap::new(),
            on_play_state: None,
        }
    }

    /// Register the play-state callback, replacing any previous one
    pub fn on_play_state(&mut self, callback: impl Fn(&str, bool) + Send + Sync + 'static) {
        self.on_play_state = Some(Box::new(callback));
    }

    pub fn context(&self) -> &Arc<AudioContext> {
        &self.ctx
    }

    pub fn layers(&self) -> &[SoundLayer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&SoundLayer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Number of engines built so far
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// The master bus all layers route into
    pub fn bus(&self) -> Result<Arc<MasterBus>> {
        MasterBus::get_or_create(&self.ctx, &self.deps.config.bus)
    }

    // ========================================================================
    // Layer set
    // ========================================================================

    /// Append a layer; the engine is built when the layer is first used
    pub fn add_layer(&mut self, layer: SoundLayer) -> Result<()> {
        let max = self.deps.config.max_layers;
        if self.layers.len() >= max {
            return Err(LayertoneError::LayerLimit { max });
        }
        if self.layer(&layer.id).is_some() {
            return Err(LayertoneError::InvalidState {
                reason: format!("layer {} already exists", layer.id),
            });
        }
        debug!(layer = %layer.id, kind = layer.layer_type.as_str(), "[MIXER] layer added");
        self.layers.push(SoundLayer {
            is_playing: false,
            ..layer
        });
        Ok(())
    }

    /// Remove a layer and dispose its engine
    pub fn remove_layer(&mut self, id: &str) -> Result<SoundLayer> {
        let idx = self.index_of(id)?;
        let layer = self.layers.remove(idx);
        if let Some(engine) = self.engines.remove(id) {
            engine.dispose();
        }
        if layer.is_playing {
            self.notify(id, false);
        }
        debug!(layer = %id, "[MIXER] layer removed");
        Ok(layer)
    }

    /// Replace a layer's whole configuration
    ///
    /// A type change discards the engine and builds a new one, restarting it
    /// if the old one was playing. Otherwise the new values are pushed into
    /// the live engine.
    pub async fn replace_layer(&mut self, layer: SoundLayer) -> Result<()> {
        let idx = self.index_of(&layer.id)?;
        let was_playing = self.layers[idx].is_playing;
        self.layers[idx] = SoundLayer {
            is_playing: was_playing,
            ..layer.clone()
        };

        let rebuild = self
            .engines
            .get(&layer.id)
            .is_some_and(|engine| engine.layer_type() != layer.layer_type);

        if rebuild {
            if let Some(old) = self.engines.remove(&layer.id) {
                old.dispose();
            }
            info!(
                layer = %layer.id,
                kind = layer.layer_type.as_str(),
                "[MIXER] layer type changed, engine rebuilt"
            );
            if was_playing {
                self.set_playing(&layer.id, false);
                self.start_layer(&layer.id).await?;
            }
        } else if let Some(engine) = self.engines.get(&layer.id) {
            engine.update(full_patch(&layer));
        }
        Ok(())
    }

    /// Apply a partial update to a layer and its engine, if built
    pub fn update_layer(&mut self, id: &str, patch: LayerPatch) -> Result<()> {
        let idx = self.index_of(id)?;
        self.layers[idx].apply(&patch);
        if let Some(engine) = self.engines.get(id) {
            engine.update(patch);
        }
        Ok(())
    }

    // ========================================================================
    // Playback
    // ========================================================================

    pub async fn start_layer(&mut self, id: &str) -> Result<PlayState> {
        let state = self.engine(id)?.start().await?;
        self.set_playing(id, state.is_playing());
        Ok(state)
    }

    pub async fn stop_layer(&mut self, id: &str) -> Result<PlayState> {
        self.index_of(id)?;
        let state = match self.engines.get(id) {
            Some(engine) => engine.stop().await,
            None => PlayState::Stopped,
        };
        self.set_playing(id, state.is_playing());
        Ok(state)
    }

    /// Start every layer; a layer that fails to start is skipped
    pub async fn start_all(&mut self) -> Result<usize> {
        let ids: Vec<String> = self.layers.iter().map(|l| l.id.clone()).collect();
        let mut playing = 0;
        for id in ids {
            match self.start_layer(&id).await {
                Ok(state) if state.is_playing() => playing += 1,
                Ok(_) => {}
                Err(e @ LayertoneError::AudioUnavailable { .. }) => return Err(e),
                Err(e) => warn!(layer = %id, error = %e, "[MIXER] layer skipped"),
            }
        }
        Ok(playing)
    }

    pub async fn stop_all(&mut self) {
        let ids: Vec<String> = self.layers.iter().map(|l| l.id.clone()).collect();
        for id in ids {
            if let Err(e) = self.stop_layer(&id).await {
                warn!(layer = %id, error = %e, "[MIXER] stop failed");
            }
        }
    }

    pub fn is_playing(&self, id: &str) -> bool {
        self.engines.get(id).is_some_and(|engine| engine.is_playing())
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Engine for `id`, building it on first use
    pub fn engine(&mut self, id: &str) -> Result<&dyn LayerEngine> {
        let idx = self.index_of(id)?;
        if !self.engines.contains_key(id) {
            let engine = create_engine(self.layers[idx].clone(), Arc::clone(&self.ctx), &self.deps);
            debug!(layer = %id, "[MIXER] engine built");
            self.engines.insert(id.to_string(), engine);
        }
        self.engines
            .get(id)
            .map(|engine| engine.as_ref())
            .ok_or_else(|| LayertoneError::LayerNotFound { id: id.into() })
    }

    pub fn waveform_data(&self, id: &str, out: &mut [u8]) {
        if let Some(engine) = self.engines.get(id) {
            engine.waveform_data(out);
        }
    }

    pub fn frequency_data(&self, id: &str, out: &mut [u8]) {
        if let Some(engine) = self.engines.get(id) {
            engine.frequency_data(out);
        }
    }

    /// Pull `frames` of mixed output through the master bus
    pub fn render(&self, frames: usize) -> AudioBuffer {
        self.ctx.render(frames)
    }

    /// Dispose every engine; layer configurations are kept
    pub fn dispose(&mut self) {
        for (_, engine) in self.engines.drain() {
            engine.dispose();
        }
        let stopped: Vec<String> = self
            .layers
            .iter_mut()
            .filter(|l| l.is_playing)
            .map(|l| {
                l.is_playing = false;
                l.id.clone()
            })
            .collect();
        for id in stopped {
            self.notify(&id, false);
        }
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| LayertoneError::LayerNotFound { id: id.into() })
    }

    fn set_playing(&mut self, id: &str, playing: bool) {
        let Some(layer) = self.layers.iter_mut().find(|l| l.id == id) else {
            return;
        };
        if layer.is_playing == playing {
            return;
        }
        layer.is_playing = playing;
        self.notify(id, playing);
    }

    fn notify(&self, id: &str, playing: bool) {
        if let Some(callback) = &self.on_play_state {
            callback(id, playing);
        }
    }
}

/// Patch carrying every field of `layer`
fn full_patch(layer: &SoundLayer) -> LayerPatch {
    LayerPatch {
        base_freq: Some(layer.base_freq),
        beat_offset: Some(layer.beat_offset),
        pulse_freq: Some(layer.pulse_freq),
        ambient_key: layer.ambient_key.clone(),
        volume: Some(layer.volume),
        pan: Some(layer.pan),
        wave: Some(layer.wave),
        effects: Some(layer.effects.clone()),
    }
}
