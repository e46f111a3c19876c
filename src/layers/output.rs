//! Per-layer output stage
//!
//! volume gain -> stereo panner -> [analyser] -> master bus input. Every
//! tone layer ends in this chain; the ambient layer uses it without the
//! analyser.

use std::sync::Arc;

use tracing::debug;

use crate::engine::{AudioContext, NodeId, ParamKind};
use crate::error::Result;
use crate::layers::model::{clamp_pan, clamp_volume};

#[derive(Debug)]
pub(crate) struct LayerOutput {
    ctx: Arc<AudioContext>,
    gain: NodeId,
    panner: NodeId,
    analyser: Option<NodeId>,
    destination: Option<NodeId>,
}

impl LayerOutput {
    /// Build the chain silent; `fade_in` brings the volume up
    pub fn build(ctx: &Arc<AudioContext>, pan: f32, with_analyser: bool) -> Result<Self> {
        let gain = ctx.create_gain(0.0);
        let panner = ctx.create_stereo_panner(clamp_pan(pan));
        ctx.connect(gain, panner)?;

        let analyser = if with_analyser {
            let analyser = ctx.create_analyser();
            ctx.connect(panner, analyser)?;
            Some(analyser)
        } else {
            None
        };

        Ok(Self {
            ctx: Arc::clone(ctx),
            gain,
            panner,
            analyser,
            destination: None,
        })
    }

    /// Node upstream stages feed
    pub fn input(&self) -> NodeId {
        self.gain
    }

    pub fn analyser(&self) -> Option<NodeId> {
        self.analyser
    }

    fn tail(&self) -> NodeId {
        self.analyser.unwrap_or(self.panner)
    }

    /// Route the chain into `destination`
    pub fn connect_to(&mut self, destination: NodeId) -> Result<()> {
        if self.destination == Some(destination) {
            return Ok(());
        }
        self.ctx.disconnect(self.tail());
        self.ctx.connect(self.tail(), destination)?;
        self.destination = Some(destination);
        Ok(())
    }

    pub fn destination(&self) -> Option<NodeId> {
        self.destination
    }

    /// Linear ramp from the current level up to `volume`
    pub fn fade_in(&self, volume: f32, secs: f32) {
        let volume = clamp_volume(volume);
        self.schedule_gain(|param, now| {
            param.cancel_and_hold_at_time(now);
            param.linear_ramp_to_value_at_time(volume, now + secs.max(0.0) as f64);
        });
    }

    /// Linear ramp from the current level down to silence
    pub fn fade_out(&self, secs: f32) {
        self.schedule_gain(|param, now| {
            param.cancel_and_hold_at_time(now);
            param.linear_ramp_to_value_at_time(0.0, now + secs.max(0.0) as f64);
        });
    }

    /// Jump to `volume` at the current audio time
    pub fn set_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        self.schedule_gain(|param, now| {
            param.cancel_and_hold_at_time(now);
            param.set_value_at_time(volume, now);
        });
    }

    pub fn set_pan(&self, pan: f32) {
        let pan = clamp_pan(pan);
        self.schedule(self.panner, ParamKind::Pan, |param, now| {
            param.cancel_and_hold_at_time(now);
            param.set_value_at_time(pan, now);
        });
    }

    /// Native linear ramp of the volume stage
    pub fn ramp_volume(&self, from: f32, to: f32, secs: f32) {
        let (from, to) = (clamp_volume(from), clamp_volume(to));
        self.schedule_gain(|param, now| {
            param.cancel_and_hold_at_time(now);
            param.set_value_at_time(from, now);
            param.linear_ramp_to_value_at_time(to, now + secs.max(0.0) as f64);
        });
    }

    /// Native linear ramp of the panner
    pub fn ramp_pan(&self, from: f32, to: f32, secs: f32) {
        let (from, to) = (clamp_pan(from), clamp_pan(to));
        self.schedule(self.panner, ParamKind::Pan, |param, now| {
            param.cancel_and_hold_at_time(now);
            param.set_value_at_time(from, now);
            param.linear_ramp_to_value_at_time(to, now + secs.max(0.0) as f64);
        });
    }

    pub fn volume(&self) -> Option<f32> {
        self.ctx.param_value(self.gain, ParamKind::Gain)
    }

    pub fn pan(&self) -> Option<f32> {
        self.ctx.param_value(self.panner, ParamKind::Pan)
    }

    pub fn waveform_data(&self, out: &mut [u8]) {
        if let Some(analyser) = self.analyser {
            self.ctx.analyser_time_data(analyser, out);
        }
    }

    pub fn frequency_data(&self, out: &mut [u8]) {
        if let Some(analyser) = self.analyser {
            self.ctx.analyser_frequency_data(analyser, out);
        }
    }

    /// Remove the whole chain from the graph
    pub fn release(&mut self) {
        for node in [Some(self.gain), Some(self.panner), self.analyser]
            .into_iter()
            .flatten()
        {
            self.ctx.remove_node(node);
        }
        self.destination = None;
    }

    fn schedule_gain(&self, f: impl FnOnce(&mut crate::engine::AudioParam, f64)) {
        self.schedule(self.gain, ParamKind::Gain, f);
    }

    fn schedule(
        &self,
        node: NodeId,
        kind: ParamKind,
        f: impl FnOnce(&mut crate::engine::AudioParam, f64),
    ) {
        if let Err(e) = self.ctx.automate(node, kind, f) {
            debug!(error = %e, "[LAYER] output stage already released");
        }
    }
}
