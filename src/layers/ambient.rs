//! Ambient loop engine
//!
//! A looping buffer source feeding the shared volume/pan stage. Loops come
//! from a [`SampleLibrary`] keyed by `ambientKey`. There is no analyser,
//! effects are ignored, and automations do not run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::bus::MasterBus;
use crate::config::EngineConfig;
use crate::engine::{import_wav, AudioBuffer, AudioContext, NodeId};
use crate::error::{LayertoneError, Result};
use crate::layers::engine::{EngineDeps, LayerEngine, PlayState};
use crate::layers::model::{LayerPatch, LayerType, SoundLayer};
use crate::layers::output::LayerOutput;

// ============================================================================
// Sample library
// ============================================================================

/// Ambient loops keyed by name
///
/// Buffers can be registered directly or read lazily from `<dir>/<key>.wav`.
#[derive(Debug, Default)]
pub struct SampleLibrary {
    samples: RwLock<HashMap<String, Arc<AudioBuffer>>>,
    dir: Option<PathBuf>,
}

impl SampleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Library that falls back to `<dir>/<key>.wav` for unknown keys
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            samples: RwLock::default(),
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn register(&self, key: impl Into<String>, buffer: AudioBuffer) {
        self.samples.write().insert(key.into(), Arc::new(buffer));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.samples.read().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.samples.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn get(&self, key: &str) -> Option<Arc<AudioBuffer>> {
        self.samples.read().get(key).cloned()
    }

    /// Cached buffer for `key`, reading it from the library directory once
    pub fn load(&self, key: &str, sample_rate: u32) -> Result<Arc<AudioBuffer>> {
        if let Some(buffer) = self.get(key) {
            return Ok(buffer);
        }
        let Some(dir) = &self.dir else {
            return Err(LayertoneError::SampleNotFound { key: key.into() });
        };
        let path = dir.join(format!("{key}.wav"));
        if !path.is_file() {
            return Err(LayertoneError::SampleNotFound { key: key.into() });
        }

        let buffer = Arc::new(import_wav(&path, sample_rate)?);
        debug!(%key, path = %path.display(), secs = buffer.duration_secs(), "[IO] ambient loop loaded");
        self.samples
            .write()
            .insert(key.to_string(), Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Read every `*.wav` under the library directory, keyed by file stem
    ///
    /// Files that fail to decode are skipped. Returns the number loaded.
    pub fn load_dir(&self, sample_rate: u32) -> usize {
        let Some(dir) = &self.dir else {
            return 0;
        };
        let mut loaded = 0;
        for entry in WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            let is_wav = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_wav {
                continue;
            }
            match import_wav(path, sample_rate) {
                Ok(buffer) => {
                    self.register(key, buffer);
                    loaded += 1;
                }
                Err(e) => warn!(path = %path.display(), error = %e, "[IO] skipping ambient loop"),
            }
        }
        info!(dir = %dir.display(), loaded, "[IO] ambient library scanned");
        loaded
    }
}

// ============================================================================
// Engine
// ============================================================================

#[derive(Debug)]
struct AmbientState {
    layer: SoundLayer,
    playing: bool,
    disposed: bool,
    output: Option<LayerOutput>,
    source: Option<NodeId>,
    /// Stopped players still ringing out their fade
    fading: Vec<NodeId>,
    bus: Option<Arc<MasterBus>>,
}

/// Engine for `ambient` layers
#[derive(Debug)]
pub struct AmbientEngine {
    ctx: Arc<AudioContext>,
    config: Arc<EngineConfig>,
    samples: Arc<SampleLibrary>,
    state: Mutex<AmbientState>,
}

impl AmbientEngine {
    pub fn new(layer: SoundLayer, ctx: Arc<AudioContext>, deps: &EngineDeps) -> Self {
        Self {
            ctx,
            config: Arc::clone(&deps.config),
            samples: Arc::clone(&deps.samples),
            state: Mutex::new(AmbientState {
                layer: SoundLayer {
                    is_playing: false,
                    ..layer
                },
                playing: false,
                disposed: false,
                output: None,
                source: None,
                fading: Vec::new(),
                bus: None,
            }),
        }
    }

    /// Live loop player, if a sample is loaded
    pub fn source(&self) -> Option<NodeId> {
        self.state.lock().source
    }

    pub fn bus(&self) -> Option<Arc<MasterBus>> {
        self.state.lock().bus.clone()
    }

    /// Current volume-stage gain, once the graph exists
    pub fn output_volume(&self) -> Option<f32> {
        self.state.lock().output.as_ref().and_then(|o| o.volume())
    }

    fn begin_playback(
        &self,
        st: &mut AmbientState,
        buffer: Option<Arc<AudioBuffer>>,
    ) -> Result<()> {
        let bus = MasterBus::get_or_create(&self.ctx, &self.config.bus)?;
        if st.output.is_none() {
            st.output = Some(LayerOutput::build(&self.ctx, st.layer.pan, false)?);
        }
        let Some(output) = st.output.as_mut() else {
            return Err(LayertoneError::InvalidState {
                reason: "ambient output missing".into(),
            });
        };
        output.connect_to(bus.input())?;
        let input = output.input();
        output.fade_in(st.layer.volume, self.config.fade_in_secs);

        st.source = self.spawn_source(&st.layer, input, buffer);
        st.bus = Some(bus);
        st.playing = true;
        st.layer.is_playing = true;
        info!(
            layer = %st.layer.id,
            key = st.layer.ambient_key.as_deref().unwrap_or(""),
            "[AMBIENT] started"
        );
        Ok(())
    }

    /// Resolve the loop for `key`, reading it from disk on first use
    ///
    /// Must be called without the state lock held.
    fn load_loop(&self, id: &str, key: Option<&str>) -> Option<Arc<AudioBuffer>> {
        let key = key?;
        match self.samples.load(key, self.ctx.sample_rate()) {
            Ok(buffer) => Some(buffer),
            Err(e) => {
                warn!(layer = %id, error = %e, "[AMBIENT] no loop, layer stays silent");
                None
            }
        }
    }

    /// Loop for the layer's current key
    ///
    /// If the key moved since `loaded_for`, only the cache is consulted.
    fn settle_loop(
        &self,
        layer: &SoundLayer,
        loaded_for: Option<&str>,
        buffer: Option<Arc<AudioBuffer>>,
    ) -> Option<Arc<AudioBuffer>> {
        if layer.ambient_key.as_deref() == loaded_for {
            return buffer;
        }
        debug!(layer = %layer.id, "[AMBIENT] key changed while loading");
        layer
            .ambient_key
            .as_deref()
            .and_then(|key| self.samples.get(key))
    }

    /// Start a loop player on `buffer`; `None` plays silence
    fn spawn_source(
        &self,
        layer: &SoundLayer,
        input: NodeId,
        buffer: Option<Arc<AudioBuffer>>,
    ) -> Option<NodeId> {
        let buffer = buffer?;
        let key = layer.ambient_key.as_deref().unwrap_or("");
        let source = self.ctx.create_buffer_source(buffer, true);
        let wired = self
            .ctx
            .connect(source, input)
            .and_then(|_| self.ctx.start_source(source, self.ctx.current_time()));
        if let Err(e) = wired {
            warn!(layer = %layer.id, error = %e, "[AMBIENT] loop player failed");
            self.ctx.remove_node(source);
            return None;
        }
        debug!(layer = %layer.id, %key, %source, "[AMBIENT] loop player started");
        Some(source)
    }

    fn release_source(&self, st: &mut AmbientState) {
        if let Some(source) = st.source.take() {
            self.ctx.remove_node(source);
        }
    }

    fn release_fading(&self, st: &mut AmbientState) {
        for source in st.fading.drain(..) {
            self.ctx.remove_node(source);
        }
    }
}

#[async_trait]
impl LayerEngine for AmbientEngine {
    fn id(&self) -> String {
        self.state.lock().layer.id.clone()
    }

    fn layer_type(&self) -> LayerType {
        LayerType::Ambient
    }

    async fn start(&self) -> Result<PlayState> {
        let (id, key) = {
            let st = self.state.lock();
            if st.disposed {
                return Err(LayertoneError::InvalidState {
                    reason: format!("layer {} was disposed", st.layer.id),
                });
            }
            if st.playing {
                return Ok(PlayState::Playing);
            }
            (st.layer.id.clone(), st.layer.ambient_key.clone())
        };

        self.ctx.resume().await?;
        let buffer = self.load_loop(&id, key.as_deref());

        let mut st = self.state.lock();
        if st.playing || st.disposed {
            return Ok(st.playing.into());
        }
        let buffer = self.settle_loop(&st.layer, key.as_deref(), buffer);
        if let Err(e) = self.begin_playback(&mut st, buffer) {
            warn!(layer = %st.layer.id, error = %e, "[AMBIENT] start failed, layer stays silent");
            self.release_source(&mut st);
            return Ok(PlayState::Stopped);
        }
        Ok(PlayState::Playing)
    }

    async fn stop(&self) -> PlayState {
        let fade = self.config.fade_out_secs.max(0.0);
        let ringing = {
            let mut st = self.state.lock();
            if !st.playing {
                return PlayState::Stopped;
            }
            st.playing = false;
            st.layer.is_playing = false;
            if let Some(output) = &st.output {
                output.fade_out(fade);
            }
            let ringing = st.source.take();
            if let Some(source) = ringing {
                let _ = self
                    .ctx
                    .stop_source(source, self.ctx.current_time() + fade as f64);
                st.fading.push(source);
            }
            info!(layer = %st.layer.id, "[AMBIENT] stopping");
            ringing
        };

        tokio::time::sleep(Duration::from_secs_f32(fade)).await;
        if let Some(source) = ringing {
            let mut st = self.state.lock();
            // dispose may have released it already
            if let Some(pos) = st.fading.iter().position(|&n| n == source) {
                st.fading.swap_remove(pos);
                self.ctx.remove_node(source);
            }
        }
        PlayState::Stopped
    }

    fn update(&self, patch: LayerPatch) {
        let (id, key) = {
            let mut st = self.state.lock();
            let previous_key = st.layer.ambient_key.clone();
            st.layer.apply(&patch);
            if st.disposed {
                return;
            }

            if let Some(output) = &st.output {
                if patch.volume.is_some() && st.playing {
                    output.set_volume(st.layer.volume);
                }
                if patch.pan.is_some() {
                    output.set_pan(st.layer.pan);
                }
            }

            if patch.ambient_key.is_none() || st.layer.ambient_key == previous_key || !st.playing {
                return;
            }
            self.release_source(&mut st);
            (st.layer.id.clone(), st.layer.ambient_key.clone())
        };

        let buffer = self.load_loop(&id, key.as_deref());

        let mut st = self.state.lock();
        // The player changed hands while the loop was loading.
        if !st.playing || st.source.is_some() {
            return;
        }
        let buffer = self.settle_loop(&st.layer, key.as_deref(), buffer);
        if let Some(input) = st.output.as_ref().map(|o| o.input()) {
            st.source = self.spawn_source(&st.layer, input, buffer);
        }
        debug!(layer = %st.layer.id, "[AMBIENT] loop swapped");
    }

    fn dispose(&self) {
        let mut st = self.state.lock();
        if st.disposed {
            return;
        }
        st.disposed = true;
        st.playing = false;
        st.layer.is_playing = false;
        self.release_source(&mut st);
        self.release_fading(&mut st);
        if let Some(mut output) = st.output.take() {
            output.release();
        }
        st.bus = None;
        debug!(layer = %st.layer.id, "[AMBIENT] disposed");
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn layer(&self) -> SoundLayer {
        self.state.lock().layer.clone()
    }
}

impl Drop for AmbientEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
