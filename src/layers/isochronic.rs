//! Isochronic pulse engine
//!
//! ```text
//! carrier osc -> gate -> volume -> pan -> analyser -> bus
//! ```
//!
//! The gate rests near zero. A timer task fires every `1 / pulseFreq`
//! seconds and shapes one pulse on the gate: a fast linear attack followed
//! by an exponential decay back to the floor. The carrier runs continuously.

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::bus::MasterBus;
use crate::config::EngineConfig;
use crate::engine::{AudioContext, NodeId, ParamKind};
use crate::error::{LayertoneError, Result};
use crate::layers::automation::AutomationRunner;
use crate::layers::effects::EffectRack;
use crate::layers::engine::{EngineDeps, LayerEngine, PlayState};
use crate::layers::model::{
    clamp_base_freq, pulse_period_secs, AutomationTarget, LayerPatch, LayerType, NoiseEffect,
    ParamAutomation, SoundLayer,
};
use crate::layers::oscillator::{OscillatorGraph, RingingVoices, VoiceTarget};
use crate::layers::output::LayerOutput;

#[derive(Debug)]
struct Stage {
    output: LayerOutput,
    gate: NodeId,
}

#[derive(Debug)]
struct IsochronicState {
    this: Weak<Mutex<IsochronicState>>,
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
    gate_task: Option<JoinHandle<()>>,
    pulse_count: u64,
    bus: Option<Arc<MasterBus>>,
    runtime: Option<Handle>,
}

impl IsochronicState {
    fn carrier(&self) -> f32 {
        clamp_base_freq(self.layer.base_freq, self.config.max_base_freq)
    }

    fn ensure_stage(&mut self) -> Result<()> {
        if self.stage.is_some() {
            return Ok(());
        }
        let output = LayerOutput::build(&self.ctx, self.layer.pan, true)?;
        let gate = self.ctx.create_gain(self.config.pulse_floor);
        self.ctx.connect(gate, output.input())?;
        debug!(layer = %self.layer.id, "[ISO] stage built");
        self.stage = Some(Stage { output, gate });
        Ok(())
    }

    fn begin_playback(&mut self) -> Result<()> {
        let bus = MasterBus::get_or_create(&self.ctx, &self.config.bus)?;
        self.ensure_stage()?;

        let carrier = self.carrier();
        let Some(stage) = self.stage.as_mut() else {
            return Err(LayertoneError::InvalidState {
                reason: "isochronic stage missing".into(),
            });
        };
        stage.output.connect_to(bus.input())?;
        let target = VoiceTarget::new(stage.gate, 0);

        self.oscillators.create(self.layer.wave, &[carrier])?;
        self.oscillators.connect(&[target])?;
        self.oscillators.start_or_rebuild(self.ctx.current_time())?;

        stage
            .output
            .fade_in(self.layer.volume, self.config.fade_in_secs);
        self.bus = Some(bus);
        self.playing = true;
        self.layer.is_playing = true;
        self.spawn_gate();
        self.reconcile_effects();

        info!(
            layer = %self.layer.id,
            carrier,
            pulse_hz = self.layer.pulse_freq,
            "[ISO] started"
        );
        Ok(())
    }

    /// Shape one pulse on the gate at the current audio time
    fn pulse(&mut self) {
        let Some(stage) = &self.stage else {
            return;
        };
        let attack = self.config.pulse_attack_secs.max(0.0) as f64;
        // Three time constants bring the decay within 5% of the floor.
        let decay_tc = (self.config.pulse_decay_secs.max(0.0) / 3.0) as f64;
        let floor = self.config.pulse_floor;
        let shaped = self.ctx.automate(stage.gate, ParamKind::Gain, |param, now| {
            param.cancel_and_hold_at_time(now);
            param.linear_ramp_to_value_at_time(1.0, now + attack);
            param.set_target_at_time(floor, now + attack, decay_tc);
        });
        if shaped.is_ok() {
            self.pulse_count += 1;
            trace!(layer = %self.layer.id, count = self.pulse_count, "[ISO] pulse");
        }
    }

    /// (Re)start the gate timer at the current pulse rate
    fn spawn_gate(&mut self) {
        self.stop_gate();
        let Some(runtime) = self.runtime.clone() else {
            return;
        };
        let weak = self.this.clone();
        self.gate_task = Some(runtime.spawn(async move {
            loop {
                let period = {
                    let Some(state) = weak.upgrade() else {
                        break;
                    };
                    let mut st = state.lock();
                    if !st.playing {
                        break;
                    }
                    st.pulse();
                    Duration::from_secs_f64(pulse_period_secs(st.layer.pulse_freq))
                };
                tokio::time::sleep(period).await;
            }
        }));
        debug!(
            layer = %self.layer.id,
            period_ms = pulse_period_secs(self.layer.pulse_freq) * 1000.0,
            "[ISO] gate timer started"
        );
    }

    fn stop_gate(&mut self) {
        if let Some(task) = self.gate_task.take() {
            task.abort();
        }
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
            AutomationTarget::BeatOffset => {
                debug!(id = %ramp.id, "[ISO] beatOffset automation ignored");
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
            AutomationTarget::PulseFreq => {}
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
            match target {
                AutomationTarget::Volume => st.layer.volume = value,
                AutomationTarget::Pan => st.layer.pan = value,
                // Read by the gate loop on its next cycle.
                AutomationTarget::PulseFreq => st.layer.pulse_freq = value,
                AutomationTarget::BeatOffset => {}
            }
            if done {
                st.automations.complete(&id);
            }
            true
        });
    }

    fn teardown(&mut self) {
        self.stop_gate();
        self.automations.cancel_all();
        self.rack.clear();
        self.oscillators.release();
        self.ringing.release_all();
        if let Some(mut stage) = self.stage.take() {
            stage.output.release();
            self.ctx.remove_node(stage.gate);
        }
        self.bus = None;
    }
}

/// Engine for `isochronic` layers
#[derive(Debug)]
pub struct IsochronicEngine {
    ctx: Arc<AudioContext>,
    config: Arc<EngineConfig>,
    state: Arc<Mutex<IsochronicState>>,
}

impl IsochronicEngine {
    pub fn new(layer: SoundLayer, ctx: Arc<AudioContext>, deps: &EngineDeps) -> Self {
        let config = Arc::clone(&deps.config);
        let state = Arc::new_cyclic(|this| {
            Mutex::new(IsochronicState {
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
                gate_task: None,
                pulse_count: 0,
                bus: None,
                runtime: None,
            })
        });
        Self { ctx, config, state }
    }

    /// Carrier frequency in Hz after clamping
    pub fn carrier_frequency(&self) -> f32 {
        self.state.lock().carrier()
    }

    /// Pulses fired since construction
    pub fn pulse_count(&self) -> u64 {
        self.state.lock().pulse_count
    }

    /// Whether the gate timer task is alive
    pub fn gate_running(&self) -> bool {
        self.state
            .lock()
            .gate_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    pub fn gate(&self) -> Option<NodeId> {
        self.state.lock().stage.as_ref().map(|stage| stage.gate)
    }

    pub fn voices(&self) -> Vec<NodeId> {
        self.state.lock().oscillators.nodes()
    }

    pub fn bus(&self) -> Option<Arc<MasterBus>> {
        self.state.lock().bus.clone()
    }

    pub fn effect_ids(&self) -> Vec<String> {
        self.state.lock().rack.ids()
    }

    pub fn running_automations(&self) -> usize {
        self.state.lock().automations.running_count()
    }
}

#[async_trait]
impl LayerEngine for IsochronicEngine {
    fn id(&self) -> String {
        self.state.lock().layer.id.clone()
    }

    fn layer_type(&self) -> LayerType {
        LayerType::Isochronic
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
            warn!(layer = %st.layer.id, error = %e, "[ISO] start failed, layer stays silent");
            st.stop_gate();
            st.oscillators.release();
            st.playing = false;
            st.layer.is_playing = false;
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
            st.stop_gate();
            st.automations.cancel_all();
            st.rack.detach_all();

            let mut ringing = st.oscillators.detach();
            ringing.stop(self.ctx.current_time() + fade as f64);
            info!(layer = %st.layer.id, "[ISO] stopping");
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

        if patch.base_freq.is_some() {
            let carrier = st.carrier();
            let smoothing = st.config.freq_smoothing_secs as f64;
            st.oscillators.retune(&[carrier], smoothing);
        }
        if patch.pulse_freq.is_some() && st.playing {
            st.spawn_gate();
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
                warn!(layer = %st.layer.id, error = %e, "[ISO] waveform swap failed");
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
        debug!(layer = %st.layer.id, "[ISO] disposed");
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

impl Drop for IsochronicEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
