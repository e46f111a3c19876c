//! Binaural beat engine
//!
//! ```text
//! left osc  -> left gain  --\
//!                            merger -> volume -> pan -> analyser -> bus
//! right osc -> right gain --/
//! ```
//!
//! The two oscillators sit at `base - offset/2` and `base + offset/2`. They
//! are always retuned together so the beat offset holds at every moment.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::bus::MasterBus;
use crate::config::EngineConfig;
use crate::engine::{AudioContext, NodeId};
use crate::error::{LayertoneError, Result};
use crate::layers::automation::AutomationRunner;
use crate::layers::effects::EffectRack;
use crate::layers::engine::{EngineDeps, LayerEngine, PlayState};
use crate::layers::model::{
    binaural_frequencies, AutomationTarget, LayerPatch, LayerType, NoiseEffect, ParamAutomation,
    SoundLayer,
};
use crate::layers::oscillator::{OscillatorGraph, RingingVoices, VoiceTarget};
use crate::layers::output::LayerOutput;

/// Nodes that persist across stop/start
#[derive(Debug)]
struct Stage {
    output: LayerOutput,
    left: NodeId,
    right: NodeId,
    merger: NodeId,
}

#[derive(Debug)]
struct BinauralState {
    this: Weak<Mutex<BinauralState>>,
    ctx: Arc<AudioContext>,
    config: Arc<EngineConfig>,
    layer: SoundLayer,
    playing: bool,
    disposed: bool,
    stage: Option<Stage>,
    oscillators: Box<dyn OscillatorGraph>,
    ringing: RingingVoices,
    rack: EffectRack,
    automations: AutomationRunner,
    bus: Option<Arc<MasterBus>>,
    runtime: Option<Handle>,
}

impl BinauralState {
    fn frequencies(&self) -> (f32, f32) {
        binaural_frequencies(
            self.layer.base_freq,
            self.layer.beat_offset,
            self.config.max_base_freq,
        )
    }

    fn ensure_stage(&mut self) -> Result<()> {
        if self.stage.is_some() {
            return Ok(());
        }
        let ctx = &self.ctx;
        let output = LayerOutput::build(ctx, self.layer.pan, true)?;
        let left = ctx.create_gain(1.0);
        let right = ctx.create_gain(1.0);
        let merger = ctx.create_channel_merger(2);
        ctx.connect_input(left, merger, 0)?;
        ctx.connect_input(right, merger, 1)?;
        ctx.connect(merger, output.input())?;

        debug!(layer = %self.layer.id, "[BINAURAL] stage built");
        self.stage = Some(Stage {
            output,
            left,
            right,
            merger,
        });
        Ok(())
    }

    fn begin_playback(&mut self) -> Result<()> {
        let bus = MasterBus::get_or_create(&self.ctx, &self.config.bus)?;
        self.ensure_stage()?;

        let (left, right) = self.frequencies();
        let Some(stage) = self.stage.as_mut() else {
            return Err(LayertoneError::InvalidState {
                reason: "binaural stage missing".into(),
            });
        };
        stage.output.connect_to(bus.input())?;
        let targets = [
            VoiceTarget::new(stage.left, 0),
            VoiceTarget::new(stage.right, 0),
        ];

        self.oscillators.create(self.layer.wave, &[left, right])?;
        self.oscillators.connect(&targets)?;
        self.oscillators.start_or_rebuild(self.ctx.current_time())?;

        stage
            .output
            .fade_in(self.layer.volume, self.config.fade_in_secs);
        self.bus = Some(bus);
        self.playing = true;
        self.layer.is_playing = true;
        self.reconcile_effects();

        info!(layer = %self.layer.id, left, right, "[BINAURAL] started");
        Ok(())
    }

    fn reconcile_effects(&mut self) {
        let effects = self.layer.effects.clone();
        let noise: Vec<&NoiseEffect> = effects.iter().filter_map(|e| e.as_noise()).collect();
        let output = if self.playing {
            self.bus.as_ref().map(|bus| bus.input())
        } else {
            None
        };
        self.rack.reconcile(&self.ctx, &noise, output);

        let ramps: Vec<&ParamAutomation> =
            effects.iter().filter_map(|e| e.as_automation()).collect();
        let ids: HashSet<&str> = ramps.iter().map(|r| r.id.as_str()).collect();
        self.automations.retain(&ids);
        if self.playing {
            for ramp in ramps {
                self.begin_automation(ramp);
            }
        }
    }

    fn begin_automation(&mut self, ramp: &ParamAutomation) {
        if self.automations.is_known(&ramp.id) {
            return;
        }
        let Some(runtime) = self.runtime.clone() else {
            return;
        };
        match ramp.target {
            AutomationTarget::PulseFreq => {
                debug!(id = %ramp.id, "[BINAURAL] pulseFreq automation ignored");
                return;
            }
            AutomationTarget::Volume => {
                if let Some(stage) = &self.stage {
                    stage.output.ramp_volume(ramp.from, ramp.to, ramp.duration_sec);
                }
            }
            AutomationTarget::Pan => {
                if let Some(stage) = &self.stage {
                    stage.output.ramp_pan(ramp.from, ramp.to, ramp.duration_sec);
                }
            }
            AutomationTarget::BeatOffset => {}
        }

        let weak = self.this.clone();
        let id = ramp.id.clone();
        let target = ramp.target;
        self.automations.begin(&runtime, ramp, move |value, done| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let mut st = state.lock();
            if !st.playing {
                return false;
            }
            st.apply_automation(target, value);
            if done {
                st.automations.complete(&id);
            }
            true
        });
    }

    fn apply_automation(&mut self, target: AutomationTarget, value: f32) {
        match target {
            // The live parameter follows a native ramp.
            AutomationTarget::Volume => self.layer.volume = value,
            AutomationTarget::Pan => self.layer.pan = value,
            AutomationTarget::BeatOffset => {
                self.layer.beat_offset = value;
                let (left, right) = self.frequencies();
                self.oscillators.retune(&[left, right], 0.0);
            }
            AutomationTarget::PulseFreq => {}
        }
    }

    fn teardown(&mut self) {
        self.automations.cancel_all();
        self.rack.clear();
        self.oscillators.release();
        self.ringing.release_all();
        if let Some(mut stage) = self.stage.take() {
            stage.output.release();
            for node in [stage.left, stage.right, stage.merger] {
                self.ctx.remove_node(node);
            }
        }
        self.bus = None;
    }
}

/// Engine for `binaural` layers
#[derive(Debug)]
pub struct BinauralEngine {
    ctx: Arc<AudioContext>,
    config: Arc<EngineConfig>,
    state: Arc<Mutex<BinauralState>>,
}

impl BinauralEngine {
    pub fn new(layer: SoundLayer, ctx: Arc<AudioContext>, deps: &EngineDeps) -> Self {
        let config = Arc::clone(&deps.config);
        let state = Arc::new_cyclic(|this| {
            Mutex::new(BinauralState {
                this: this.clone(),
                ctx: Arc::clone(&ctx),
                config: Arc::clone(&config),
                layer: SoundLayer {
                    is_playing: false,
                    ..layer
                },
                playing: false,
                disposed: false,
                stage: None,
                oscillators: deps.backend.build(Arc::clone(&ctx)),
                ringing: RingingVoices::new(),
                rack: EffectRack::new(Arc::clone(&deps.effects)),
                automations: AutomationRunner::new(Duration::from_millis(
                    config.automation_tick_ms,
                )),
                bus: None,
                runtime: None,
            })
        });
        Self { ctx, config, state }
    }

    /// Left and right channel frequencies in Hz
    pub fn channel_frequencies(&self) -> (f32, f32) {
        self.state.lock().frequencies()
    }

    /// Live oscillator nodes, left then right
    pub fn voices(&self) -> Vec<NodeId> {
        self.state.lock().oscillators.nodes()
    }

    /// Bus this layer feeds, once started
    pub fn bus(&self) -> Option<Arc<MasterBus>> {
        self.state.lock().bus.clone()
    }

    /// Per-channel gain nodes, once the graph exists
    pub fn channel_gains(&self) -> Option<(NodeId, NodeId)> {
        self.state
            .lock()
            .stage
            .as_ref()
            .map(|stage| (stage.left, stage.right))
    }

    /// Ids of the live effect units
    pub fn effect_ids(&self) -> Vec<String> {
        self.state.lock().rack.ids()
    }

    pub fn running_automations(&self) -> usize {
        self.state.lock().automations.running_count()
    }
}

#[async_trait]
impl LayerEngine for BinauralEngine {
    fn id(&self) -> String {
        self.state.lock().layer.id.clone()
    }

    fn layer_type(&self) -> LayerType {
        LayerType::Binaural
    }

    async fn start(&self) -> Result<PlayState> {
        {
            let st = self.state.lock();
            if st.disposed {
                return Err(LayertoneError::InvalidState {
                    reason: format!("layer {} was disposed", st.layer.id),
                });
            }
            if st.playing {
                return Ok(PlayState::Playing);
            }
        }

        self.ctx.resume().await?;

        let mut st = self.state.lock();
        if st.playing || st.disposed {
            return Ok(st.playing.into());
        }
        st.runtime = Some(Handle::current());
        if let Err(e) = st.begin_playback() {
            warn!(layer = %st.layer.id, error = %e, "[BINAURAL] start failed, layer stays silent");
            st.oscillators.release();
            return Ok(PlayState::Stopped);
        }
        Ok(PlayState::Playing)
    }

    async fn stop(&self) -> PlayState {
        let fade = self.config.fade_out_secs.max(0.0);
        let ticket = {
            let mut st = self.state.lock();
            if !st.playing {
                return PlayState::Stopped;
            }
            st.playing = false;
            st.layer.is_playing = false;

            if let Some(stage) = &st.stage {
                stage.output.fade_out(fade);
            }
            st.automations.cancel_all();
            st.rack.detach_all();

            let mut ringing = st.oscillators.detach();
            ringing.stop(self.ctx.current_time() + fade as f64);
            info!(layer = %st.layer.id, "[BINAURAL] stopping");
            st.ringing.hold(ringing)
        };

        tokio::time::sleep(Duration::from_secs_f32(fade)).await;
        self.state.lock().ringing.release(ticket);
        PlayState::Stopped
    }

    fn update(&self, patch: LayerPatch) {
        let mut st = self.state.lock();
        st.layer.apply(&patch);
        if st.disposed {
            return;
        }

        if patch.base_freq.is_some() || patch.beat_offset.is_some() {
            let (left, right) = st.frequencies();
            let smoothing = st.config.freq_smoothing_secs as f64;
            st.oscillators.retune(&[left, right], smoothing);
        }
        if let Some(stage) = &st.stage {
            if patch.volume.is_some() && st.playing {
                stage.output.set_volume(st.layer.volume);
            }
            if patch.pan.is_some() {
                stage.output.set_pan(st.layer.pan);
            }
        }
        if let Some(wave) = patch.wave {
            if let Err(e) = st.oscillators.set_wave(wave) {
                warn!(layer = %st.layer.id, error = %e, "[BINAURAL] waveform swap failed");
            }
        }
        if patch.effects.is_some() {
            st.reconcile_effects();
        }
    }

    fn dispose(&self) {
        let mut st = self.state.lock();
        if st.disposed {
            return;
        }
        st.disposed = true;
        st.playing = false;
        st.layer.is_playing = false;
        st.teardown();
        debug!(layer = %st.layer.id, "[BINAURAL] disposed");
    }

    fn is_playing(&self) -> bool {
        self.state.lock().playing
    }

    fn layer(&self) -> SoundLayer {
        self.state.lock().layer.clone()
    }

    fn analyser(&self) -> Option<NodeId> {
        self.state
            .lock()
            .stage
            .as_ref()
            .and_then(|stage| stage.output.analyser())
    }

    fn waveform_data(&self, out: &mut [u8]) {
        if let Some(stage) = &self.state.lock().stage {
            stage.output.waveform_data(out);
        }
    }

    fn frequency_data(&self, out: &mut [u8]) {
        if let Some(stage) = &self.state.lock().stage {
            stage.output.frequency_data(out);
        }
    }
}

impl Drop for BinauralEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::effects::testing::MockFactory;
    use crate::layers::effects::EffectFactory;
    use crate::layers::model::{LayerEffect, NoiseType, Waveform};

    fn engine(layer: SoundLayer) -> (Arc<AudioContext>, BinauralEngine) {
        let ctx = AudioContext::with_sample_rate(48000);
        let engine = BinauralEngine::new(layer, Arc::clone(&ctx), &EngineDeps::default());
        (ctx, engine)
    }

    #[tokio::test]
    async fn test_start_derives_channel_frequencies() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 432.0, 6.0));
        assert_eq!(engine.start().await.unwrap(), PlayState::Playing);

        assert_eq!(engine.channel_frequencies(), (429.0, 435.0));
        let voices = engine.voices();
        assert_eq!(voices.len(), 2);
        let (left, right) = engine.channel_gains().unwrap();
        assert!(ctx.is_connected(voices[0], left));
        assert!(ctx.is_connected(voices[1], right));
        assert!(engine.layer().is_playing);
    }

    #[tokio::test]
    async fn test_double_start_builds_one_graph() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        engine.start().await.unwrap();
        let nodes = ctx.node_count();
        let voices = engine.voices();

        assert_eq!(engine.start().await.unwrap(), PlayState::Playing);
        assert_eq!(ctx.node_count(), nodes);
        assert_eq!(engine.voices(), voices);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_voices_after_fade() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        engine.start().await.unwrap();
        let voices = engine.voices();

        assert_eq!(engine.stop().await, PlayState::Stopped);
        assert_eq!(engine.stop().await, PlayState::Stopped);

        assert!(!engine.is_playing());
        assert!(voices.iter().all(|v| !ctx.contains(*v)));
        assert!(engine.voices().is_empty());
        // The output stage survives for the next start.
        assert!(engine.analyser().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_stop_leaves_voices_to_dispose() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        let baseline = ctx.node_count();
        engine.start().await.unwrap();
        let voices = engine.voices();

        // Give up on the stop mid-fade.
        let abandoned = tokio::time::timeout(Duration::from_millis(1), engine.stop()).await;
        assert!(abandoned.is_err());
        assert!(voices.iter().all(|v| ctx.contains(*v)));

        engine.dispose();
        assert!(voices.iter().all(|v| !ctx.contains(*v)));
        assert_eq!(ctx.node_count(), baseline + 5);
    }

    #[tokio::test]
    async fn test_retune_moves_both_channels() {
        let (_, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        engine.start().await.unwrap();
        engine.update(LayerPatch {
            beat_offset: Some(10.0),
            ..LayerPatch::default()
        });
        assert_eq!(engine.channel_frequencies(), (195.0, 205.0));

        engine.update(LayerPatch::base_freq(-50.0));
        let (left, right) = engine.channel_frequencies();
        assert_eq!((left, right), (1.0, 1.0));
    }

    #[tokio::test]
    async fn test_wave_swap_keeps_downstream_graph() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        engine.start().await.unwrap();
        let old = engine.voices();
        let gains = engine.channel_gains().unwrap();

        engine.update(LayerPatch::wave(Waveform::Sawtooth));

        let new = engine.voices();
        assert_ne!(old, new);
        assert_eq!(engine.channel_gains(), Some(gains));
        assert!(ctx.is_connected(new[0], gains.0));
        assert_eq!(ctx.waveform(new[1]), Some(Waveform::Sawtooth));
        assert!(engine.is_playing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_detaches_effects_and_start_reattaches() {
        let factory = Arc::new(MockFactory::default());
        let deps = EngineDeps::default().with_effects(Arc::clone(&factory) as Arc<dyn EffectFactory>);
        let ctx = AudioContext::with_sample_rate(48000);
        let layer = SoundLayer::binaural("b", 200.0, 4.0).with_effects(vec![LayerEffect::Noise(
            crate::layers::model::NoiseEffect::new("n", NoiseType::White, 0.3, 0.0),
        )]);
        let engine = BinauralEngine::new(layer, Arc::clone(&ctx), &deps);

        engine.start().await.unwrap();
        let bus_input = engine.bus().unwrap().input();
        assert_eq!(factory.logs_for("n")[0].connected_to, Some(bus_input));

        engine.stop().await;
        assert_eq!(factory.logs_for("n")[0].connected_to, None);
        assert_eq!(engine.effect_ids(), vec!["n".to_string()]);

        engine.start().await.unwrap();
        let log = &factory.logs_for("n")[0];
        assert_eq!(log.connected_to, Some(bus_input));
        assert_eq!(factory.created(), 1);
    }

    #[test]
    fn test_dispose_before_start() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        let nodes = ctx.node_count();
        engine.dispose();
        engine.dispose();
        assert_eq!(ctx.node_count(), nodes);
        assert_eq!(engine.analyser(), None);

        let mut buf = [7u8; 16];
        engine.waveform_data(&mut buf);
        assert_eq!(buf, [7u8; 16]);
    }

    #[tokio::test]
    async fn test_dispose_while_playing_frees_everything() {
        let (ctx, engine) = engine(SoundLayer::binaural("b", 200.0, 4.0));
        let baseline = ctx.node_count();
        engine.start().await.unwrap();
        let bus_nodes = 5;

        engine.dispose();
        assert_eq!(ctx.node_count(), baseline + bus_nodes);
        assert!(!engine.is_playing());
        assert!(engine.start().await.is_err());
    }
}
