//! Audio graph node kinds
//!
//! Each node turns its summed inputs into one output block per render
//! quantum. Automated parameters are evaluated per sample against the
//! audio clock.

use std::fmt;
use std::sync::Arc;

use crate::dsp::{
    pan_frame, Analyser, Biquad, Compressor, NoiseGenerator, Oscillator, WaveShaper, Waveform,
};
use crate::engine::buffer::AudioBuffer;
use crate::engine::param::AudioParam;

/// Handle to a node inside one `AudioContext`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u64);

impl NodeId {
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Automatable parameter slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Frequency,
    Gain,
    Pan,
}

/// Timing for one-shot source nodes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SourceSchedule {
    pub start: Option<f64>,
    pub stop: Option<f64>,
}

impl SourceSchedule {
    #[inline]
    fn is_active(&self, time: f64) -> bool {
        match self.start {
            Some(start) if time >= start => self.stop.map_or(true, |stop| time < stop),
            _ => false,
        }
    }
}

/// Periodic oscillator source (mono)
#[derive(Debug, Clone)]
pub struct OscillatorNode {
    pub(crate) osc: Oscillator,
    pub(crate) frequency: AudioParam,
    pub(crate) schedule: SourceSchedule,
}

/// Looping sample player
#[derive(Debug, Clone)]
pub struct BufferSourceNode {
    pub(crate) buffer: Arc<AudioBuffer>,
    pub(crate) looping: bool,
    pub(crate) position: f64,
    pub(crate) schedule: SourceSchedule,
}

/// Everything a node can be
#[derive(Debug)]
pub enum NodeKind {
    Oscillator(OscillatorNode),
    Gain(AudioParam),
    StereoPanner(AudioParam),
    ChannelMerger(usize),
    BiquadFilter(Biquad),
    Compressor(Compressor),
    WaveShaper(WaveShaper),
    Analyser(Analyser),
    Noise(NoiseGenerator),
    BufferSource(BufferSourceNode),
    Destination,
}

/// Timing of the quantum being rendered
#[derive(Debug, Clone, Copy)]
pub(crate) struct RenderInfo {
    pub start_time: f64,
    pub sample_rate: u32,
    pub frames: usize,
}

impl RenderInfo {
    #[inline]
    fn time_of(&self, frame: usize) -> f64 {
        self.start_time + frame as f64 / self.sample_rate as f64
    }

    fn silence(&self, channels: usize) -> AudioBuffer {
        AudioBuffer::with_channels(channels, self.frames, self.sample_rate)
    }
}

/// Per-sample values of a parameter over the quantum
fn param_values(param: &AudioParam, info: &RenderInfo) -> Vec<f32> {
    if param.has_pending_events(info.start_time) {
        (0..info.frames)
            .map(|i| param.value_at(info.time_of(i)))
            .collect()
    } else {
        vec![param.value_at(info.start_time); info.frames]
    }
}

impl NodeKind {
    /// Human-readable kind, for logs
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Oscillator(_) => "oscillator",
            NodeKind::Gain(_) => "gain",
            NodeKind::StereoPanner(_) => "stereo-panner",
            NodeKind::ChannelMerger(_) => "channel-merger",
            NodeKind::BiquadFilter(_) => "biquad-filter",
            NodeKind::Compressor(_) => "compressor",
            NodeKind::WaveShaper(_) => "wave-shaper",
            NodeKind::Analyser(_) => "analyser",
            NodeKind::Noise(_) => "noise",
            NodeKind::BufferSource(_) => "buffer-source",
            NodeKind::Destination => "destination",
        }
    }

    /// Number of input slots
    pub fn input_count(&self) -> usize {
        match self {
            NodeKind::Oscillator(_) | NodeKind::Noise(_) | NodeKind::BufferSource(_) => 0,
            NodeKind::ChannelMerger(n) => *n,
            _ => 1,
        }
    }

    pub fn param(&self, kind: ParamKind) -> Option<&AudioParam> {
        match (self, kind) {
            (NodeKind::Oscillator(osc), ParamKind::Frequency) => Some(&osc.frequency),
            (NodeKind::Gain(gain), ParamKind::Gain) => Some(gain),
            (NodeKind::StereoPanner(pan), ParamKind::Pan) => Some(pan),
            _ => None,
        }
    }

    pub fn param_mut(&mut self, kind: ParamKind) -> Option<&mut AudioParam> {
        match (self, kind) {
            (NodeKind::Oscillator(osc), ParamKind::Frequency) => Some(&mut osc.frequency),
            (NodeKind::Gain(gain), ParamKind::Gain) => Some(gain),
            (NodeKind::StereoPanner(pan), ParamKind::Pan) => Some(pan),
            _ => None,
        }
    }

    pub fn schedule_mut(&mut self) -> Option<&mut SourceSchedule> {
        match self {
            NodeKind::Oscillator(osc) => Some(&mut osc.schedule),
            NodeKind::BufferSource(src) => Some(&mut src.schedule),
            _ => None,
        }
    }

    pub fn waveform(&self) -> Option<Waveform> {
        match self {
            NodeKind::Oscillator(osc) => Some(osc.osc.waveform()),
            _ => None,
        }
    }

    /// Drop automation events the clock has already passed
    pub(crate) fn prune_params(&mut self, time: f64) {
        for kind in [ParamKind::Frequency, ParamKind::Gain, ParamKind::Pan] {
            if let Some(param) = self.param_mut(kind) {
                param.prune(time);
            }
        }
    }

    /// Render one quantum; `inputs[i]` is the mix arriving at input slot `i`
    pub(crate) fn process(
        &mut self,
        inputs: Vec<Option<AudioBuffer>>,
        info: &RenderInfo,
    ) -> AudioBuffer {
        match self {
            NodeKind::Oscillator(node) => {
                let mut out = info.silence(1);
                let freqs = param_values(&node.frequency, info);
                for (i, sample) in out.channel_mut(0).iter_mut().enumerate() {
                    if node.schedule.is_active(info.time_of(i)) {
                        *sample = node.osc.next_sample(freqs[i]);
                    }
                }
                out
            }
            NodeKind::Gain(gain) => {
                let mut out = first_input(inputs, info);
                let gains = param_values(gain, info);
                for channel in &mut out.samples {
                    for (sample, g) in channel.iter_mut().zip(&gains) {
                        *sample *= g;
                    }
                }
                out
            }
            NodeKind::StereoPanner(pan) => {
                let input = first_input(inputs, info);
                let pans = param_values(pan, info);
                let mut out = info.silence(2);
                for i in 0..info.frames {
                    let left = input.samples[0][i];
                    let right = input.samples.get(1).map(|ch| ch[i]);
                    let (l, r) = pan_frame(left, right, pans[i]);
                    out.samples[0][i] = l;
                    out.samples[1][i] = r;
                }
                out
            }
            NodeKind::ChannelMerger(count) => {
                let mut out = info.silence(*count);
                for (channel, input) in out.samples.iter_mut().zip(inputs) {
                    if let Some(input) = input {
                        *channel = input.mono_mix();
                    }
                }
                out
            }
            NodeKind::BiquadFilter(filter) => {
                let mut out = first_input(inputs, info);
                for (ch, channel) in out.samples.iter_mut().enumerate() {
                    for sample in channel.iter_mut() {
                        *sample = filter.process_sample(ch, *sample);
                    }
                }
                out
            }
            NodeKind::Compressor(comp) => {
                let mut out = first_input(inputs, info);
                comp.process(&mut out);
                out
            }
            NodeKind::WaveShaper(shaper) => {
                let mut out = first_input(inputs, info);
                for channel in &mut out.samples {
                    shaper.process(channel);
                }
                out
            }
            NodeKind::Analyser(analyser) => {
                let out = first_input(inputs, info);
                analyser.push(&out.mono_mix());
                out
            }
            NodeKind::Noise(generator) => {
                let mut out = info.silence(2);
                let (left, right) = out.samples.split_at_mut(1);
                generator.render(&mut left[0], &mut right[0]);
                out
            }
            NodeKind::BufferSource(node) => render_buffer_source(node, info),
            NodeKind::Destination => {
                let input = first_input(inputs, info);
                let mut out = info.silence(2);
                out.mix_in(&input);
                out
            }
        }
    }
}

/// The mix at input slot 0, or a silent mono block
fn first_input(inputs: Vec<Option<AudioBuffer>>, info: &RenderInfo) -> AudioBuffer {
    inputs
        .into_iter()
        .next()
        .flatten()
        .unwrap_or_else(|| info.silence(1))
}

fn render_buffer_source(node: &mut BufferSourceNode, info: &RenderInfo) -> AudioBuffer {
    let channels = node.buffer.num_channels().max(1);
    let mut out = info.silence(channels);
    let len = node.buffer.len();
    if len == 0 {
        return out;
    }
    // Resample on the fly when the loop was recorded at another rate.
    let step = node.buffer.sample_rate as f64 / info.sample_rate as f64;

    for i in 0..info.frames {
        if !node.schedule.is_active(info.time_of(i)) {
            continue;
        }
        if node.position >= len as f64 {
            if !node.looping {
                break;
            }
            node.position %= len as f64;
        }
        let idx = node.position as usize;
        for (ch, channel) in out.samples.iter_mut().enumerate() {
            channel[i] = node.buffer.samples[ch][idx];
        }
        node.position += step;
    }
    out
}
