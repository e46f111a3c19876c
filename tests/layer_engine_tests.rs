//! Engine-level behaviour across the three layer variants

use std::sync::Arc;
use std::time::Duration;

use approx::assert_relative_eq;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use test_case::test_case;

use layertone::engine::{AudioContext, NodeId};
use layertone::error::Result;
use layertone::layers::{
    AutomationTarget, BinauralEngine, EffectFactory, EffectUnit, EngineDeps, IsochronicEngine,
    LayerEffect, LayerEngine, LayerPatch, NoiseEffect, NoiseType, ParamAutomation, PlayState,
    SoundLayer,
};
use layertone::MasterBus;

// ============================================================================
// Recording effect factory
// ============================================================================

#[derive(Debug, Default)]
struct Record {
    serial: usize,
    effect_id: String,
    noise_type: Option<NoiseType>,
    gain: f32,
    connected_to: Option<NodeId>,
    disposed: bool,
}

#[derive(Debug)]
struct RecordingUnit(Arc<Mutex<Record>>);

impl EffectUnit for RecordingUnit {
    fn set_type(&mut self, noise_type: NoiseType) {
        self.0.lock().noise_type = Some(noise_type);
    }

    fn set_gain(&mut self, gain: f32) {
        self.0.lock().gain = gain;
    }

    fn set_pan(&mut self, _pan: f32) {}

    fn connect(&mut self, destination: NodeId) -> Result<()> {
        self.0.lock().connected_to = Some(destination);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.0.lock().connected_to = None;
    }

    fn dispose(&mut self) {
        let mut record = self.0.lock();
        record.connected_to = None;
        record.disposed = true;
    }

    fn is_connected(&self) -> bool {
        self.0.lock().connected_to.is_some()
    }
}

#[derive(Debug, Default)]
struct RecordingFactory {
    units: Mutex<Vec<Arc<Mutex<Record>>>>,
}

impl RecordingFactory {
    fn records_for(&self, id: &str) -> Vec<Arc<Mutex<Record>>> {
        self.units
            .lock()
            .iter()
            .filter(|r| r.lock().effect_id == id)
            .cloned()
            .collect()
    }
}

impl EffectFactory for RecordingFactory {
    fn create(&self, _ctx: &Arc<AudioContext>, effect: &NoiseEffect) -> Result<Box<dyn EffectUnit>> {
        let mut units = self.units.lock();
        let record = Arc::new(Mutex::new(Record {
            serial: units.len(),
            effect_id: effect.id.clone(),
            ..Record::default()
        }));
        units.push(Arc::clone(&record));
        let mut unit = RecordingUnit(record);
        unit.apply(effect);
        Ok(Box::new(unit))
    }
}

fn noise(id: &str, noise_type: NoiseType, gain: f32) -> LayerEffect {
    LayerEffect::Noise(NoiseEffect::new(id, noise_type, gain, 0.0))
}

fn setup() -> (Arc<AudioContext>, EngineDeps) {
    (AudioContext::with_sample_rate(48000), EngineDeps::default())
}

async fn advance(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ============================================================================
// Frequencies
// ============================================================================

#[test_case(432.0, 6.0, 429.0, 435.0 ; "carrier with small offset")]
#[test_case(200.0, 10.0, 195.0, 205.0 ; "ten hertz beat")]
#[test_case(100.0, 0.0, 100.0, 100.0 ; "no offset")]
#[test_case(2.0, 8.0, 1.0, 6.0 ; "left channel floored")]
#[test_case(-50.0, 10.0, 1.0, 1.0 ; "negative carrier floored")]
fn test_channel_frequencies(base: f32, offset: f32, left: f32, right: f32) {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("b", base, offset), ctx, &deps);
    let (l, r) = engine.channel_frequencies();
    assert_relative_eq!(l, left);
    assert_relative_eq!(r, right);
    if l > 1.0 && r > 1.0 {
        assert_relative_eq!(r - l, offset, epsilon = 1e-4);
    }
}

#[tokio::test]
async fn test_scenario_binaural_432() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 432.0, 6.0), ctx, &deps);
    assert_eq!(engine.start().await.unwrap(), PlayState::Playing);
    assert_eq!(engine.channel_frequencies(), (429.0, 435.0));
    engine.dispose();
}

#[tokio::test]
async fn test_negative_base_never_reaches_oscillator() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), Arc::clone(&ctx), &deps);
    engine.start().await.unwrap();
    engine.update(LayerPatch::base_freq(-50.0));

    assert_eq!(engine.channel_frequencies(), (1.0, 1.0));
    ctx.render(4800);
    for voice in engine.voices() {
        let hz = ctx
            .param_value(voice, layertone::engine::ParamKind::Frequency)
            .unwrap();
        assert!(hz >= 1.0, "oscillator at {hz} Hz");
    }
    engine.dispose();
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_start_and_stop_are_idempotent() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), Arc::clone(&ctx), &deps);

    engine.start().await.unwrap();
    let nodes = ctx.node_count();
    let voices = engine.voices();
    assert_eq!(engine.start().await.unwrap(), PlayState::Playing);
    assert_eq!(ctx.node_count(), nodes);
    assert_eq!(engine.voices(), voices);

    assert_eq!(engine.stop().await, PlayState::Stopped);
    let stopped = ctx.node_count();
    assert_eq!(engine.stop().await, PlayState::Stopped);
    assert_eq!(ctx.node_count(), stopped);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_build_once() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), Arc::clone(&ctx), &deps);

    let (a, b) = tokio::join!(engine.start(), engine.start());
    assert!(a.unwrap().is_playing());
    assert!(b.unwrap().is_playing());
    assert_eq!(engine.voices().len(), 2);
}

#[test]
fn test_dispose_before_start_is_safe() {
    let (ctx, deps) = setup();
    let binaural = BinauralEngine::new(SoundLayer::binaural("b", 200.0, 4.0), Arc::clone(&ctx), &deps);
    let isochronic = IsochronicEngine::new(SoundLayer::isochronic("i", 200.0, 10.0), ctx, &deps);

    binaural.dispose();
    isochronic.dispose();
    assert!(!isochronic.gate_running());
    assert_eq!(binaural.running_automations(), 0);

    let mut data = [42u8; 32];
    binaural.waveform_data(&mut data);
    isochronic.frequency_data(&mut data);
    assert_eq!(data, [42u8; 32]);
}

#[tokio::test(start_paused = true)]
async fn test_stop_then_dispose_is_safe() {
    let (ctx, deps) = setup();
    let engine = IsochronicEngine::new(SoundLayer::isochronic("i", 200.0, 10.0), ctx, &deps);
    engine.start().await.unwrap();
    engine.stop().await;
    engine.dispose();
    assert!(!engine.is_playing());
    assert!(!engine.gate_running());
}

// ============================================================================
// Master bus
// ============================================================================

#[tokio::test]
async fn test_layers_share_one_bus_input() {
    let (ctx, deps) = setup();
    let a = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), Arc::clone(&ctx), &deps);
    let b = IsochronicEngine::new(SoundLayer::isochronic("b", 300.0, 8.0), Arc::clone(&ctx), &deps);
    a.start().await.unwrap();
    b.start().await.unwrap();

    let bus_a = a.bus().unwrap();
    let bus_b = b.bus().unwrap();
    assert!(Arc::ptr_eq(&bus_a, &bus_b));
    assert_eq!(bus_a.input(), bus_b.input());

    let again = MasterBus::get_or_create(&ctx, &deps.config.bus).unwrap();
    assert!(Arc::ptr_eq(&bus_a, &again));

    for tap in [a.analyser().unwrap(), b.analyser().unwrap()] {
        assert!(ctx.is_connected(tap, bus_a.input()));
        assert!(!ctx.is_connected(tap, ctx.destination()));
    }
    a.dispose();
    b.dispose();
}

#[tokio::test]
async fn test_analyser_data_after_render() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(
        SoundLayer::binaural("a", 440.0, 4.0).with_volume(0.8),
        Arc::clone(&ctx),
        &deps,
    );
    engine.start().await.unwrap();
    ctx.render(9600);

    let mut wave = [0u8; 256];
    engine.waveform_data(&mut wave);
    assert!(wave.iter().any(|&b| b != 128));

    let mut spectrum = [0u8; 128];
    engine.frequency_data(&mut spectrum);
    assert!(spectrum.iter().any(|&b| b > 0));
    engine.dispose();
}

// ============================================================================
// Effects
// ============================================================================

#[tokio::test]
async fn test_reconcile_diff_by_identity() {
    let (ctx, deps) = setup();
    let factory = Arc::new(RecordingFactory::default());
    let deps = deps.with_effects(Arc::clone(&factory) as Arc<dyn EffectFactory>);
    let engine = BinauralEngine::new(
        SoundLayer::binaural("a", 200.0, 4.0).with_effects(vec![
            noise("A", NoiseType::White, 0.1),
            noise("B", NoiseType::Pink, 0.2),
        ]),
        ctx,
        &deps,
    );
    engine.start().await.unwrap();
    let b_serial = factory.records_for("B")[0].lock().serial;

    engine.update(LayerPatch::effects(vec![
        noise("B", NoiseType::Brown, 0.4),
        noise("C", NoiseType::White, 0.3),
    ]));

    let a = factory.records_for("A");
    assert_eq!(a.len(), 1);
    assert!(a[0].lock().disposed);

    let b = factory.records_for("B");
    assert_eq!(b.len(), 1);
    {
        // Release B's guard before records_for locks every record again.
        let b = b[0].lock();
        assert_eq!(b.serial, b_serial);
        assert_eq!(b.noise_type, Some(NoiseType::Brown));
        assert_relative_eq!(b.gain, 0.4);
        assert!(!b.disposed);
    }

    let c = factory.records_for("C");
    assert_eq!(c.len(), 1);
    assert!(c[0].lock().connected_to.is_some());
    assert_eq!(engine.effect_ids(), vec!["B".to_string(), "C".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_effect_connects_only_after_start() {
    let (ctx, deps) = setup();
    let factory = Arc::new(RecordingFactory::default());
    let deps = deps.with_effects(Arc::clone(&factory) as Arc<dyn EffectFactory>);
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), ctx, &deps);

    engine.update(LayerPatch::effects(vec![noise("pink", NoiseType::Pink, 0.25)]));
    let record = factory.records_for("pink").remove(0);
    assert_eq!(record.lock().connected_to, None);

    engine.start().await.unwrap();
    let bus = engine.bus().unwrap();
    assert_eq!(record.lock().connected_to, Some(bus.input()));

    engine.stop().await;
    assert_eq!(record.lock().connected_to, None);
    assert!(!record.lock().disposed);
}

// ============================================================================
// Automation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_volume_automation_ramps_once() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), ctx, &deps);
    engine.start().await.unwrap();

    let ramp = vec![LayerEffect::Automation(ParamAutomation::new(
        "fade",
        AutomationTarget::Volume,
        0.2,
        0.8,
        1.0,
    ))];
    engine.update(LayerPatch::effects(ramp.clone()));

    let mut seen = Vec::new();
    for step in 0..12 {
        advance(100).await;
        seen.push(engine.layer().volume);
        if step == 4 {
            // Same id while running: ignored.
            engine.update(LayerPatch::effects(ramp.clone()));
        }
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert!(seen[0] > 0.2 - 1e-6 && seen[0] < 0.4);
    assert_relative_eq!(*seen.last().unwrap(), 0.8);
    assert_eq!(engine.running_automations(), 0);

    advance(500).await;
    assert_relative_eq!(engine.layer().volume, 0.8);
}

#[tokio::test(start_paused = true)]
async fn test_removing_automation_cancels_it() {
    let (ctx, deps) = setup();
    let engine = BinauralEngine::new(SoundLayer::binaural("a", 200.0, 4.0), ctx, &deps);
    engine.start().await.unwrap();
    engine.update(LayerPatch::effects(vec![LayerEffect::Automation(
        ParamAutomation::new("beat", AutomationTarget::BeatOffset, 4.0, 12.0, 2.0),
    )]));

    advance(500).await;
    engine.update(LayerPatch::effects(Vec::new()));
    let frozen = engine.layer().beat_offset;
    advance(2000).await;

    assert_relative_eq!(engine.layer().beat_offset, frozen);
    assert!(frozen > 4.0 && frozen < 12.0);
    let (l, r) = engine.channel_frequencies();
    assert_relative_eq!(r - l, frozen, epsilon = 1e-3);
}

// ============================================================================
// Isochronic gate
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_gate_fires_at_pulse_rate() {
    let (ctx, deps) = setup();
    let engine = IsochronicEngine::new(SoundLayer::isochronic("i", 200.0, 10.0), ctx, &deps);
    engine.start().await.unwrap();
    assert_relative_eq!(engine.carrier_frequency(), 200.0);

    // Sample between pulses: one new pulse per 100 ms.
    advance(50).await;
    let mut counts = vec![engine.pulse_count()];
    for _ in 0..5 {
        advance(100).await;
        counts.push(engine.pulse_count());
    }
    assert_eq!(counts, vec![1, 2, 3, 4, 5, 6]);

    engine.stop().await;
    let after = engine.pulse_count();
    advance(1000).await;
    assert_eq!(engine.pulse_count(), after);
}

#[tokio::test]
async fn test_gate_envelope_shapes_pulses() {
    let (ctx, deps) = setup();
    let engine = IsochronicEngine::new(SoundLayer::isochronic("i", 200.0, 10.0), Arc::clone(&ctx), &deps);
    engine.start().await.unwrap();
    tokio::task::yield_now().await;
    let gate = engine.gate().unwrap();

    // The first pulse fires at audio time 0.
    let mut levels = Vec::new();
    for _ in 0..20 {
        ctx.render(240);
        levels.push(ctx.param_value(gate, layertone::engine::ParamKind::Gain).unwrap());
    }
    let peak = levels.iter().cloned().fold(0.0_f32, f32::max);
    assert!(peak > 0.5, "{levels:?}");
    assert!(*levels.last().unwrap() < peak);
    engine.dispose();
}
