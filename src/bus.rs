//! Master bus
//!
//! One mastering chain per audio context, shared by every layer routed to
//! that context:
//!
//! ```text
//! input (headroom) -> highpass -> compressor -> soft-clip -> analyser -> destination
//! ```
//!
//! Buses are cached by context id. Only the input gain changes after
//! construction; the chain itself is never rewired.

use std::collections::HashMap;
use std::f32::consts::FRAC_1_SQRT_2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::BusConfig;
use crate::dsp::{soft_clip_curve, CompressorParams, FilterType};
use crate::engine::{AudioContext, ContextId, NodeId, ParamKind};
use crate::error::Result;

lazy_static! {
    static ref BUSES: Mutex<HashMap<ContextId, Arc<MasterBus>>> = Mutex::new(HashMap::new());
}

/// Shared mastering chain for one context
#[derive(Debug)]
pub struct MasterBus {
    context: Weak<AudioContext>,
    context_id: ContextId,
    input: NodeId,
    highpass: NodeId,
    compressor: NodeId,
    shaper: NodeId,
    analyser: NodeId,
    disposed: AtomicBool,
}

impl MasterBus {
    /// The bus for `ctx`, building and caching it on first request
    ///
    /// `config` is only read when the bus is built.
    pub fn get_or_create(ctx: &Arc<AudioContext>, config: &BusConfig) -> Result<Arc<MasterBus>> {
        let mut buses = BUSES.lock();
        buses.retain(|_, bus| bus.context.strong_count() > 0);

        if let Some(bus) = buses.get(&ctx.id()) {
            return Ok(Arc::clone(bus));
        }

        let bus = Arc::new(Self::build(ctx, config)?);
        buses.insert(ctx.id(), Arc::clone(&bus));
        Ok(bus)
    }

    fn build(ctx: &Arc<AudioContext>, config: &BusConfig) -> Result<Self> {
        let mut config = config.clone();
        config.clamp();

        let input = ctx.create_gain(config.headroom);
        let highpass = ctx.create_biquad_filter(FilterType::HighPass, config.highpass_hz, FRAC_1_SQRT_2);
        let compressor = ctx.create_compressor(CompressorParams {
            threshold_db: config.threshold_db,
            knee_db: config.knee_db,
            ratio: config.ratio,
            attack_secs: config.attack_secs,
            release_secs: config.release_secs,
        });
        let shaper = ctx.create_wave_shaper(soft_clip_curve(
            config.soft_clip_amount,
            config.soft_clip_samples,
        ));
        let analyser = ctx.create_analyser();

        ctx.connect(input, highpass)?;
        ctx.connect(highpass, compressor)?;
        ctx.connect(compressor, shaper)?;
        ctx.connect(shaper, analyser)?;
        ctx.connect(analyser, ctx.destination())?;

        info!(context = ?ctx.id(), headroom = config.headroom, "[BUS] master bus created");

        Ok(Self {
            context: Arc::downgrade(ctx),
            context_id: ctx.id(),
            input,
            highpass,
            compressor,
            shaper,
            analyser,
            disposed: AtomicBool::new(false),
        })
    }

    /// Node every layer output connects into
    pub fn input(&self) -> NodeId {
        self.input
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Internal chain in signal order, input first
    pub fn chain(&self) -> [NodeId; 5] {
        [
            self.input,
            self.highpass,
            self.compressor,
            self.shaper,
            self.analyser,
        ]
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Set the input gain, clamped to [0, 1], at the current audio time
    pub fn set_gain(&self, gain: f32) {
        let gain = gain.clamp(0.0, 1.0);
        let Some(ctx) = self.context.upgrade() else {
            return;
        };
        let scheduled = ctx.automate(self.input, ParamKind::Gain, |param, now| {
            param.cancel_scheduled_values(now);
            param.set_value_at_time(gain, now);
        });
        if scheduled.is_ok() {
            debug!(gain, "[BUS] gain set");
        }
    }

    /// Current input gain; 0 once the bus is gone
    pub fn gain(&self) -> f32 {
        self.context
            .upgrade()
            .and_then(|ctx| ctx.param_value(self.input, ParamKind::Gain))
            .unwrap_or(0.0)
    }

    /// Compressor gain reduction in dB (0 when idle)
    pub fn gain_reduction_db(&self) -> f32 {
        self.context
            .upgrade()
            .and_then(|ctx| ctx.gain_reduction_db(self.compressor))
            .unwrap_or(0.0)
    }

    /// Time-domain snapshot of the mastered signal
    pub fn waveform_data(&self, out: &mut [u8]) {
        if let Some(ctx) = self.context.upgrade() {
            ctx.analyser_time_data(self.analyser, out);
        }
    }

    /// Spectrum snapshot of the mastered signal
    pub fn frequency_data(&self, out: &mut [u8]) {
        if let Some(ctx) = self.context.upgrade() {
            ctx.analyser_frequency_data(self.analyser, out);
        }
    }

    /// Detach every internal node and drop this bus from the cache
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(ctx) = self.context.upgrade() {
            for node in self.chain() {
                ctx.remove_node(node);
            }
        }

        let mut buses = BUSES.lock();
        if buses
            .get(&self.context_id)
            .is_some_and(|cached| std::ptr::eq(Arc::as_ptr(cached), self))
        {
            buses.remove(&self.context_id);
        }
        info!(context = ?self.context_id, "[BUS] master bus disposed");
    }

    /// Dispose whatever bus is cached for `ctx`
    pub fn dispose_for(ctx: &AudioContext) {
        let cached = BUSES.lock().get(&ctx.id()).cloned();
        if let Some(bus) = cached {
            bus.dispose();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::Waveform;

    async fn running() -> Arc<AudioContext> {
        let ctx = AudioContext::with_sample_rate(48000);
        ctx.resume().await.unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_one_bus_per_context() {
        let ctx = running().await;
        let a = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();
        let b = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.input(), b.input());

        let other = running().await;
        let c = MasterBus::get_or_create(&other, &BusConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_chain_order() {
        let ctx = running().await;
        let bus = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();
        let chain = bus.chain();
        for pair in chain.windows(2) {
            assert_eq!(ctx.outputs_of(pair[0]), vec![pair[1]]);
        }
        assert_eq!(ctx.outputs_of(chain[4]), vec![ctx.destination()]);
        assert_eq!(ctx.waveform(chain[0]), None);
    }

    #[tokio::test]
    async fn test_set_gain_clamps() {
        let ctx = running().await;
        let bus = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();
        assert!((bus.gain() - 0.85).abs() < 1e-6);

        bus.set_gain(1.7);
        assert_eq!(bus.gain(), 1.0);
        bus.set_gain(-0.2);
        assert_eq!(bus.gain(), 0.0);
    }

    #[tokio::test]
    async fn test_dispose_rebuilds_on_next_request() {
        let ctx = running().await;
        let first = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();
        let nodes_before = ctx.node_count();
        first.dispose();
        first.dispose();

        assert!(first.is_disposed());
        assert_eq!(ctx.node_count(), nodes_before - 5);

        let second = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.input(), second.input());
    }

    #[tokio::test]
    async fn test_loud_input_stays_bounded() {
        let ctx = running().await;
        let bus = MasterBus::get_or_create(&ctx, &BusConfig::default()).unwrap();

        let mut sources = Vec::new();
        for freq in [110.0, 220.0, 330.0, 440.0] {
            let osc = ctx.create_oscillator(Waveform::Square, freq);
            ctx.connect(osc, bus.input()).unwrap();
            ctx.start_source(osc, 0.0).unwrap();
            sources.push(osc);
        }

        let out = ctx.render(48000);
        assert!(out.is_finite());
        assert!(out.peak() <= 1.0, "peak {}", out.peak());
        assert!(bus.gain_reduction_db() < 0.0);

        let mut wave = [0u8; 64];
        bus.waveform_data(&mut wave);
        assert!(wave.iter().any(|&b| b != 128));
    }
}
