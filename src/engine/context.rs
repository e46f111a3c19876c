//! Audio context: node arena, routing and pull rendering
//!
//! An `AudioContext` owns every node it creates. Callers hold `NodeId`s and
//! go through the context for connections, parameter automation and source
//! scheduling. Rendering pulls the graph from the destination one quantum at
//! a time; only nodes that reach the destination are processed.
//!
//! Teardown is forgiving: disconnecting or removing nodes that are already
//! gone is a no-op rather than an error.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, trace};

use crate::config::EngineConfig;
use crate::dsp::{
    Analyser, Biquad, Compressor, CompressorParams, FilterType, NoiseGenerator, NoiseSettings,
    Oscillator, WaveShaper, Waveform,
};
use crate::engine::buffer::AudioBuffer;
use crate::engine::node::{
    BufferSourceNode, NodeId, NodeKind, OscillatorNode, ParamKind, RenderInfo, SourceSchedule,
};
use crate::engine::param::AudioParam;
use crate::engine::transport::{AudioClock, ContextState};
use crate::error::{LayertoneError, Result};

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

/// Analyser defaults applied to nodes created without explicit settings
#[derive(Debug, Clone, Copy)]
struct AnalyserDefaults {
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Edge {
    from: NodeId,
    to: NodeId,
    input: usize,
}

#[derive(Debug)]
struct Graph {
    clock: AudioClock,
    nodes: HashMap<NodeId, NodeKind>,
    edges: Vec<Edge>,
    next_node: u64,
    destination: NodeId,
    next_seed: u64,
}

impl Graph {
    fn insert(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        trace!(%id, kind = kind.name(), "[GRAPH] node created");
        self.nodes.insert(id, kind);
        id
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeKind> {
        self.nodes
            .get_mut(&id)
            .ok_or(LayertoneError::NodeNotFound { node: id.0 })
    }

    /// Post-order walk from the destination along incoming edges
    fn processing_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut visited = HashSet::new();
        let mut stack = vec![(self.destination, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            for edge in self.edges.iter().filter(|e| e.to == id) {
                if !visited.contains(&edge.from) {
                    stack.push((edge.from, false));
                }
            }
        }
        order
    }

    fn render_quantum(&mut self, frames: usize) -> AudioBuffer {
        let sample_rate = self.clock.sample_rate();
        let info = RenderInfo {
            start_time: self.clock.current_time(),
            sample_rate,
            frames,
        };
        let end_time = info.start_time + frames as f64 / sample_rate as f64;

        let order = self.processing_order();
        let mut outputs: HashMap<NodeId, AudioBuffer> = HashMap::with_capacity(order.len());

        for id in order {
            let Some(node) = self.nodes.get_mut(&id) else {
                continue;
            };
            let mut inputs: Vec<Option<AudioBuffer>> = vec![None; node.input_count()];
            for edge in self.edges.iter().filter(|e| e.to == id) {
                if let (Some(src), Some(slot)) = (outputs.get(&edge.from), inputs.get_mut(edge.input)) {
                    sum_into(slot, src);
                }
            }
            let out = node.process(inputs, &info);
            node.prune_params(end_time);
            outputs.insert(id, out);
        }

        self.clock.advance(frames as u64);
        outputs
            .remove(&self.destination)
            .unwrap_or_else(|| AudioBuffer::with_channels(2, frames, sample_rate))
    }
}

/// Sum `src` into an input slot, widening the slot if `src` has more channels
fn sum_into(slot: &mut Option<AudioBuffer>, src: &AudioBuffer) {
    match slot {
        None => *slot = Some(src.clone()),
        Some(acc) if acc.num_channels() < src.num_channels() => {
            let mut wider = src.clone();
            wider.mix_in(acc);
            *acc = wider;
        }
        Some(acc) => acc.mix_in(src),
    }
}

/// In-process audio context
#[derive(Debug)]
pub struct AudioContext {
    id: ContextId,
    sample_rate: u32,
    quantum: usize,
    analyser: AnalyserDefaults,
    graph: Mutex<Graph>,
}

impl AudioContext {
    /// Create a suspended context configured from `config`
    pub fn new(config: &EngineConfig) -> Arc<Self> {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, NodeKind::Destination);

        info!(context = id.0, sample_rate = config.sample_rate, "[CONTEXT] created");

        Arc::new(Self {
            id,
            sample_rate: config.sample_rate,
            quantum: config.render_quantum.max(1),
            analyser: AnalyserDefaults {
                fft_size: config.analyser_fft_size,
                smoothing: config.analyser_smoothing,
                min_db: config.analyser_min_db,
                max_db: config.analyser_max_db,
            },
            graph: Mutex::new(Graph {
                clock: AudioClock::new(config.sample_rate),
                nodes,
                edges: Vec::new(),
                next_node: 1,
                destination,
                next_seed: id.0.wrapping_mul(0x9E37_79B9_7F4A_7C15),
            }),
        })
    }

    /// Create a context with default settings at `sample_rate`
    pub fn with_sample_rate(sample_rate: u32) -> Arc<Self> {
        Self::new(&EngineConfig {
            sample_rate,
            ..EngineConfig::default()
        })
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn nyquist(&self) -> f32 {
        self.sample_rate as f32 / 2.0
    }

    pub fn state(&self) -> ContextState {
        self.graph.lock().clock.state()
    }

    /// Current audio time in seconds
    pub fn current_time(&self) -> f64 {
        self.graph.lock().clock.current_time()
    }

    pub fn destination(&self) -> NodeId {
        self.graph.lock().destination
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Resume a suspended context; fails once the context is closed
    pub async fn resume(&self) -> Result<()> {
        if self.graph.lock().clock.resume() {
            Ok(())
        } else {
            Err(LayertoneError::AudioUnavailable {
                reason: format!("audio context {} is closed", self.id.0),
            })
        }
    }

    /// Freeze the audio clock
    pub fn suspend(&self) {
        self.graph.lock().clock.suspend();
    }

    /// Close the context and drop every node except the destination
    pub fn close(&self) {
        let mut graph = self.graph.lock();
        if graph.clock.is_closed() {
            return;
        }
        graph.clock.close();
        let destination = graph.destination;
        graph.nodes.retain(|id, _| *id == destination);
        graph.edges.clear();
        info!(context = self.id.0, "[CONTEXT] closed");
    }

    // ========================================================================
    // Node Creation
    // ========================================================================

    pub fn create_oscillator(&self, waveform: Waveform, frequency: f32) -> NodeId {
        let kind = NodeKind::Oscillator(OscillatorNode {
            osc: Oscillator::new(waveform, self.sample_rate as f64),
            frequency: AudioParam::new(frequency, 0.0, self.nyquist()),
            schedule: SourceSchedule::default(),
        });
        self.graph.lock().insert(kind)
    }

    pub fn create_gain(&self, gain: f32) -> NodeId {
        self.graph
            .lock()
            .insert(NodeKind::Gain(AudioParam::new(gain, 0.0, 16.0)))
    }

    pub fn create_stereo_panner(&self, pan: f32) -> NodeId {
        self.graph
            .lock()
            .insert(NodeKind::StereoPanner(AudioParam::new(pan, -1.0, 1.0)))
    }

    pub fn create_channel_merger(&self, inputs: usize) -> NodeId {
        self.graph
            .lock()
            .insert(NodeKind::ChannelMerger(inputs.max(1)))
    }

    pub fn create_biquad_filter(&self, filter_type: FilterType, frequency: f32, q: f32) -> NodeId {
        let filter = Biquad::new(filter_type, frequency, q, self.sample_rate as f64);
        self.graph.lock().insert(NodeKind::BiquadFilter(filter))
    }

    pub fn create_compressor(&self, params: CompressorParams) -> NodeId {
        let comp = Compressor::new(params, self.sample_rate as f64);
        self.graph.lock().insert(NodeKind::Compressor(comp))
    }

    pub fn create_wave_shaper(&self, curve: Vec<f32>) -> NodeId {
        self.graph
            .lock()
            .insert(NodeKind::WaveShaper(WaveShaper::new(curve)))
    }

    pub fn create_analyser(&self) -> NodeId {
        let d = self.analyser;
        let analyser = Analyser::new(d.fft_size, d.smoothing, d.min_db, d.max_db);
        self.graph.lock().insert(NodeKind::Analyser(analyser))
    }

    pub fn create_noise(&self, settings: NoiseSettings) -> NodeId {
        let mut graph = self.graph.lock();
        let seed = graph.next_seed;
        graph.next_seed = seed.wrapping_add(0x2545_F491_4F6C_DD1D);
        let generator = NoiseGenerator::new(settings, self.sample_rate as f64, seed);
        graph.insert(NodeKind::Noise(generator))
    }

    pub fn create_buffer_source(&self, buffer: Arc<AudioBuffer>, looping: bool) -> NodeId {
        self.graph
            .lock()
            .insert(NodeKind::BufferSource(BufferSourceNode {
                buffer,
                looping,
                position: 0.0,
                schedule: SourceSchedule::default(),
            }))
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Connect `from` into input 0 of `to`
    pub fn connect(&self, from: NodeId, to: NodeId) -> Result<()> {
        self.connect_input(from, to, 0)
    }

    /// Connect `from` into a specific input slot of `to`; duplicates are ignored
    pub fn connect_input(&self, from: NodeId, to: NodeId, input: usize) -> Result<()> {
        let mut graph = self.graph.lock();
        if !graph.nodes.contains_key(&from) {
            return Err(LayertoneError::NodeNotFound { node: from.0 });
        }
        let inputs = graph.node_mut(to)?.input_count();
        if input >= inputs {
            return Err(LayertoneError::InvalidState {
                reason: format!("{to} has {inputs} inputs, cannot connect to input {input}"),
            });
        }
        let edge = Edge { from, to, input };
        if !graph.edges.contains(&edge) {
            graph.edges.push(edge);
        }
        Ok(())
    }

    /// Drop every outgoing connection of `from`; returns how many were removed
    pub fn disconnect(&self, from: NodeId) -> usize {
        let mut graph = self.graph.lock();
        let before = graph.edges.len();
        graph.edges.retain(|e| e.from != from);
        before - graph.edges.len()
    }

    /// Drop the connections from `from` to `to`; returns whether any existed
    pub fn disconnect_from(&self, from: NodeId, to: NodeId) -> bool {
        let mut graph = self.graph.lock();
        let before = graph.edges.len();
        graph.edges.retain(|e| !(e.from == from && e.to == to));
        before != graph.edges.len()
    }

    /// Disconnect and free a node; returns whether it existed
    pub fn remove_node(&self, id: NodeId) -> bool {
        let mut graph = self.graph.lock();
        if id == graph.destination {
            return false;
        }
        graph.edges.retain(|e| e.from != id && e.to != id);
        graph.nodes.remove(&id).is_some()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.lock().nodes.contains_key(&id)
    }

    /// Number of live nodes, including the destination
    pub fn node_count(&self) -> usize {
        self.graph.lock().nodes.len()
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.graph
            .lock()
            .edges
            .iter()
            .any(|e| e.from == from && e.to == to)
    }

    /// Nodes fed by `from`
    pub fn outputs_of(&self, from: NodeId) -> Vec<NodeId> {
        self.graph
            .lock()
            .edges
            .iter()
            .filter(|e| e.from == from)
            .map(|e| e.to)
            .collect()
    }

    /// Nodes feeding `to`
    pub fn inputs_of(&self, to: NodeId) -> Vec<NodeId> {
        self.graph
            .lock()
            .edges
            .iter()
            .filter(|e| e.to == to)
            .map(|e| e.from)
            .collect()
    }

    // ========================================================================
    // Sources
    // ========================================================================

    /// Schedule a source to start; a source can only be started once
    pub fn start_source(&self, id: NodeId, when: f64) -> Result<()> {
        let mut graph = self.graph.lock();
        let node = graph.node_mut(id)?;
        let name = node.name();
        let schedule = node.schedule_mut().ok_or_else(|| LayertoneError::InvalidState {
            reason: format!("{id} ({name}) is not a source node"),
        })?;
        if schedule.start.is_some() {
            return Err(LayertoneError::InvalidState {
                reason: format!("{id} was already started"),
            });
        }
        schedule.start = Some(when);
        Ok(())
    }

    /// Schedule a source to stop; later calls move the stop time
    pub fn stop_source(&self, id: NodeId, when: f64) -> Result<()> {
        let mut graph = self.graph.lock();
        let node = graph.node_mut(id)?;
        if let Some(schedule) = node.schedule_mut() {
            schedule.stop = Some(when);
        }
        Ok(())
    }

    /// Oscillator shape, if `id` is a live oscillator
    pub fn waveform(&self, id: NodeId) -> Option<Waveform> {
        self.graph.lock().nodes.get(&id).and_then(|n| n.waveform())
    }

    // ========================================================================
    // Parameters
    // ========================================================================

    /// Run `f` against a node parameter with the current audio time
    pub fn automate<R>(
        &self,
        id: NodeId,
        kind: ParamKind,
        f: impl FnOnce(&mut AudioParam, f64) -> R,
    ) -> Result<R> {
        let mut graph = self.graph.lock();
        let now = graph.clock.current_time();
        let node = graph.node_mut(id)?;
        let name = node.name();
        let param = node.param_mut(kind).ok_or_else(|| LayertoneError::InvalidState {
            reason: format!("{id} ({name}) has no {kind:?} parameter"),
        })?;
        Ok(f(param, now))
    }

    /// Parameter value at the current audio time
    pub fn param_value(&self, id: NodeId, kind: ParamKind) -> Option<f32> {
        let graph = self.graph.lock();
        let now = graph.clock.current_time();
        graph
            .nodes
            .get(&id)
            .and_then(|n| n.param(kind))
            .map(|p| p.value_at(now))
    }

    /// Mutate a noise generator in place
    pub fn with_noise<R>(&self, id: NodeId, f: impl FnOnce(&mut NoiseGenerator) -> R) -> Result<R> {
        let mut graph = self.graph.lock();
        match graph.node_mut(id)? {
            NodeKind::Noise(generator) => Ok(f(generator)),
            other => Err(LayertoneError::InvalidState {
                reason: format!("{id} is a {} node, not noise", other.name()),
            }),
        }
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Copy time-domain bytes from an analyser; false if `id` is not one
    pub fn analyser_time_data(&self, id: NodeId, out: &mut [u8]) -> bool {
        match self.graph.lock().nodes.get(&id) {
            Some(NodeKind::Analyser(analyser)) => {
                analyser.time_domain_bytes(out);
                true
            }
            _ => false,
        }
    }

    /// Copy spectrum bytes from an analyser; false if `id` is not one
    pub fn analyser_frequency_data(&self, id: NodeId, out: &mut [u8]) -> bool {
        match self.graph.lock().nodes.get_mut(&id) {
            Some(NodeKind::Analyser(analyser)) => {
                analyser.frequency_bytes(out);
                true
            }
            _ => false,
        }
    }

    /// Current compressor gain reduction; `None` if `id` is not a compressor
    pub fn gain_reduction_db(&self, id: NodeId) -> Option<f32> {
        match self.graph.lock().nodes.get(&id) {
            Some(NodeKind::Compressor(comp)) => Some(comp.gain_reduction_db()),
            _ => None,
        }
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Pull `frames` stereo frames from the destination
    ///
    /// A context that is not running yields silence and its clock stays put.
    pub fn render(&self, frames: usize) -> AudioBuffer {
        let mut out = AudioBuffer::with_channels(2, 0, self.sample_rate);
        let mut graph = self.graph.lock();
        if !graph.clock.is_running() {
            return AudioBuffer::with_channels(2, frames, self.sample_rate);
        }
        let mut remaining = frames;
        while remaining > 0 {
            let block = remaining.min(self.quantum);
            let rendered = graph.render_quantum(block);
            out.append(&rendered);
            remaining -= block;
        }
        out
    }
}

impl Drop for AudioContext {
    fn drop(&mut self) {
        trace!(context = self.id.0, "[CONTEXT] dropped");
    }
}
