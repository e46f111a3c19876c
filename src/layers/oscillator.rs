//! Oscillator voices behind one interface
//!
//! Engines drive their oscillators through `OscillatorGraph` only; which
//! backend renders them is chosen once, at construction. Each voice feeds a
//! fixed downstream input that survives waveform swaps and rebuilds.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::dsp::Waveform;
use crate::engine::{AudioContext, NodeId, ParamKind};
use crate::error::{LayertoneError, Result};

/// Where a voice's output lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceTarget {
    pub node: NodeId,
    pub input: usize,
}

impl VoiceTarget {
    pub fn new(node: NodeId, input: usize) -> Self {
        Self { node, input }
    }
}

/// Control surface over a set of oscillator voices
pub trait OscillatorGraph: Send + fmt::Debug {
    /// Build one voice per frequency, replacing any existing voices
    fn create(&mut self, wave: Waveform, frequencies: &[f32]) -> Result<()>;

    /// Route voice `i` into `targets[i]`
    fn connect(&mut self, targets: &[VoiceTarget]) -> Result<()>;

    /// Start every voice at `when`
    fn start(&mut self, when: f64) -> Result<()>;

    /// Glide every voice to new frequencies with time constant `smoothing`
    fn retune(&mut self, frequencies: &[f32], smoothing: f64);

    /// Swap the waveform in place, keeping routing and play state
    fn set_wave(&mut self, wave: Waveform) -> Result<()>;

    /// Schedule every voice to stop at `when`
    fn stop(&mut self, when: f64);

    /// Remove every voice from the graph
    fn release(&mut self);

    fn is_built(&self) -> bool;

    fn wave(&self) -> Waveform;

    /// Frequencies the voices were last tuned to
    fn frequencies(&self) -> Vec<f32>;

    fn nodes(&self) -> Vec<NodeId>;

    /// Start, rebuilding the voices once if a stale node was already started
    fn start_or_rebuild(&mut self, when: f64) -> Result<()> {
        match self.start(when) {
            Err(LayertoneError::InvalidState { reason }) => {
                warn!(%reason, "[OSC] start failed, rebuilding voices");
                let frequencies = self.frequencies();
                let wave = self.wave();
                let targets = self.targets();
                self.create(wave, &frequencies)?;
                self.connect(&targets)?;
                self.start(when)
            }
            other => other,
        }
    }

    /// Current routing, one entry per connected voice
    fn targets(&self) -> Vec<VoiceTarget>;

    /// Detach the live voices into a new handle, leaving this one empty
    ///
    /// Lets a caller let old voices ring out while new ones are built.
    fn detach(&mut self) -> Box<dyn OscillatorGraph>;
}

/// Available oscillator backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OscillatorBackend {
    /// One graph oscillator node per voice
    #[default]
    Nodes,
}

impl OscillatorBackend {
    pub fn build(self, ctx: Arc<AudioContext>) -> Box<dyn OscillatorGraph> {
        match self {
            OscillatorBackend::Nodes => Box::new(NodeOscillators::new(ctx)),
        }
    }
}

/// Stopped voices ringing out their fade, owned until released
///
/// A stop hands its detached voices here and gets a ticket back. Whoever
/// finishes first, the stop's own release or a teardown, removes them.
#[derive(Debug, Default)]
pub struct RingingVoices {
    next: u64,
    held: Vec<(u64, Box<dyn OscillatorGraph>)>,
}

impl RingingVoices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hold(&mut self, voices: Box<dyn OscillatorGraph>) -> u64 {
        let ticket = self.next;
        self.next += 1;
        self.held.push((ticket, voices));
        ticket
    }

    /// Release the voices behind `ticket`; false if already released
    pub fn release(&mut self, ticket: u64) -> bool {
        match self.held.iter().position(|(t, _)| *t == ticket) {
            Some(idx) => {
                let (_, mut voices) = self.held.remove(idx);
                voices.release();
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) {
        for (_, mut voices) in self.held.drain(..) {
            voices.release();
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Voice {
    node: NodeId,
    frequency: f32,
    target: Option<VoiceTarget>,
}

/// Voices rendered by the context's oscillator nodes
pub struct NodeOscillators {
    ctx: Arc<AudioContext>,
    wave: Waveform,
    voices: Vec<Voice>,
    started_at: Option<f64>,
}

impl fmt::Debug for NodeOscillators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeOscillators")
            .field("wave", &self.wave)
            .field("voices", &self.voices)
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl NodeOscillators {
    pub fn new(ctx: Arc<AudioContext>) -> Self {
        Self {
            ctx,
            wave: Waveform::Sine,
            voices: Vec::new(),
            started_at: None,
        }
    }

    fn remove_voices(&mut self) {
        for voice in self.voices.drain(..) {
            self.ctx.remove_node(voice.node);
        }
        self.started_at = None;
    }
}

impl OscillatorGraph for NodeOscillators {
    fn create(&mut self, wave: Waveform, frequencies: &[f32]) -> Result<()> {
        self.remove_voices();
        self.wave = wave;
        self.voices = frequencies
            .iter()
            .map(|&frequency| Voice {
                node: self.ctx.create_oscillator(wave, frequency),
                frequency,
                target: None,
            })
            .collect();
        debug!(wave = wave.as_str(), ?frequencies, "[OSC] voices created");
        Ok(())
    }

    fn connect(&mut self, targets: &[VoiceTarget]) -> Result<()> {
        for (voice, target) in self.voices.iter_mut().zip(targets) {
            self.ctx.connect_input(voice.node, target.node, target.input)?;
            voice.target = Some(*target);
        }
        Ok(())
    }

    fn start(&mut self, when: f64) -> Result<()> {
        for voice in &self.voices {
            self.ctx.start_source(voice.node, when)?;
        }
        self.started_at = Some(when);
        Ok(())
    }

    fn retune(&mut self, frequencies: &[f32], smoothing: f64) {
        for (voice, &frequency) in self.voices.iter_mut().zip(frequencies) {
            voice.frequency = frequency;
            let result = self.ctx.automate(voice.node, ParamKind::Frequency, |param, now| {
                param.cancel_and_hold_at_time(now);
                if smoothing > 0.0 {
                    param.set_target_at_time(frequency, now, smoothing);
                } else {
                    param.set_value_at_time(frequency, now);
                }
            });
            if let Err(e) = result {
                debug!(error = %e, "[OSC] retune skipped");
            }
        }
    }

    fn set_wave(&mut self, wave: Waveform) -> Result<()> {
        if wave == self.wave && self.is_built() {
            return Ok(());
        }
        self.wave = wave;
        if !self.is_built() {
            return Ok(());
        }

        let frequencies = self.frequencies();
        let targets = self.targets();
        let restart = self.started_at.map(|_| self.ctx.current_time());

        self.create(wave, &frequencies)?;
        self.connect(&targets)?;
        if let Some(now) = restart {
            self.start(now)?;
        }
        debug!(wave = wave.as_str(), "[OSC] waveform swapped");
        Ok(())
    }

    fn stop(&mut self, when: f64) {
        for voice in &self.voices {
            // Voices already removed from the graph are already silent.
            let _ = self.ctx.stop_source(voice.node, when);
        }
    }

    fn release(&mut self) {
        self.remove_voices();
    }

    fn is_built(&self) -> bool {
        !self.voices.is_empty()
    }

    fn wave(&self) -> Waveform {
        self.wave
    }

    fn frequencies(&self) -> Vec<f32> {
        self.voices.iter().map(|v| v.frequency).collect()
    }

    fn nodes(&self) -> Vec<NodeId> {
        self.voices.iter().map(|v| v.node).collect()
    }

    fn targets(&self) -> Vec<VoiceTarget> {
        self.voices.iter().filter_map(|v| v.target).collect()
    }

    fn detach(&mut self) -> Box<dyn OscillatorGraph> {
        Box::new(NodeOscillators {
            ctx: Arc::clone(&self.ctx),
            wave: self.wave,
            voices: std::mem::take(&mut self.voices),
            started_at: self.started_at.take(),
        })
    }
}
