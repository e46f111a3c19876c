//! Effect units and reconciliation
//!
//! An `EffectRack` holds at most one live unit per effect id and brings it
//! in line with a new effect list by diffing: units whose id disappeared are
//! disconnected and disposed, new ids get a fresh unit, and surviving ids
//! are updated in place. Units connect to the master bus only while the
//! owning layer plays.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::dsp::NoiseType;
use crate::engine::{AudioContext, NodeId};
use crate::error::Result;
use crate::layers::model::NoiseEffect;

/// Handle to one live effect
pub trait EffectUnit: Send + fmt::Debug {
    fn set_type(&mut self, noise_type: NoiseType);
    fn set_gain(&mut self, gain: f32);
    fn set_pan(&mut self, pan: f32);

    /// Push every parameter of `effect`
    fn apply(&mut self, effect: &NoiseEffect) {
        self.set_type(effect.noise_type);
        self.set_gain(effect.gain);
        self.set_pan(effect.pan);
    }

    /// Route the unit's output into `destination`
    fn connect(&mut self, destination: NodeId) -> Result<()>;

    /// Drop every outgoing connection; no-op when already detached
    fn disconnect(&mut self);

    /// Release the unit's nodes; safe to repeat
    fn dispose(&mut self);

    fn is_connected(&self) -> bool;
}

/// Builds effect units for a context
pub trait EffectFactory: Send + Sync + fmt::Debug {
    fn create(&self, ctx: &Arc<AudioContext>, effect: &NoiseEffect) -> Result<Box<dyn EffectUnit>>;
}

// ============================================================================
// Noise Unit
// ============================================================================

/// Effect unit backed by a noise generator node
pub struct NoiseUnit {
    ctx: Arc<AudioContext>,
    node: NodeId,
    destination: Option<NodeId>,
}

impl fmt::Debug for NoiseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoiseUnit")
            .field("node", &self.node)
            .field("destination", &self.destination)
            .finish()
    }
}

impl NoiseUnit {
    pub fn new(ctx: Arc<AudioContext>, effect: &NoiseEffect) -> Self {
        let node = ctx.create_noise(effect.settings());
        Self {
            ctx,
            node,
            destination: None,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    fn tweak(&self, f: impl FnOnce(&mut crate::dsp::NoiseGenerator)) {
        if let Err(e) = self.ctx.with_noise(self.node, f) {
            debug!(error = %e, "[FX] noise unit gone");
        }
    }
}

impl EffectUnit for NoiseUnit {
    fn set_type(&mut self, noise_type: NoiseType) {
        self.tweak(|g| g.set_type(noise_type));
    }

    fn set_gain(&mut self, gain: f32) {
        self.tweak(|g| g.set_gain(gain));
    }

    fn set_pan(&mut self, pan: f32) {
        self.tweak(|g| g.set_pan(pan));
    }

    fn apply(&mut self, effect: &NoiseEffect) {
        let settings = effect.settings();
        self.tweak(|g| g.apply(settings));
    }

    fn connect(&mut self, destination: NodeId) -> Result<()> {
        self.ctx.connect(self.node, destination)?;
        self.destination = Some(destination);
        Ok(())
    }

    fn disconnect(&mut self) {
        self.ctx.disconnect(self.node);
        self.destination = None;
    }

    fn dispose(&mut self) {
        self.disconnect();
        self.ctx.remove_node(self.node);
    }

    fn is_connected(&self) -> bool {
        self.destination.is_some()
    }
}

/// Factory for the built-in noise units
#[derive(Debug, Default, Clone, Copy)]
pub struct NoiseUnitFactory;

impl EffectFactory for NoiseUnitFactory {
    fn create(&self, ctx: &Arc<AudioContext>, effect: &NoiseEffect) -> Result<Box<dyn EffectUnit>> {
        Ok(Box::new(NoiseUnit::new(Arc::clone(ctx), effect)))
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// What one reconciliation pass did, by effect id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RackDiff {
    pub removed: Vec<String>,
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub failed: Vec<String>,
}

impl RackDiff {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty()
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.failed.is_empty()
    }
}

/// Live effect units of one layer, keyed by effect id
pub struct EffectRack {
    factory: Arc<dyn EffectFactory>,
    units: HashMap<String, Box<dyn EffectUnit>>,
}

impl fmt::Debug for EffectRack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectRack")
            .field("factory", &self.factory)
            .field("units", &self.units.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EffectRack {
    pub fn new(factory: Arc<dyn EffectFactory>) -> Self {
        Self {
            factory,
            units: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.units.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.units.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Diff the held units against `effects`
    ///
    /// `output` is the bus input while the layer plays and `None` while it
    /// is stopped. A unit that fails to build or connect is skipped without
    /// affecting the rest.
    pub fn reconcile(
        &mut self,
        ctx: &Arc<AudioContext>,
        effects: &[&NoiseEffect],
        output: Option<NodeId>,
    ) -> RackDiff {
        let mut diff = RackDiff::default();
        let wanted: HashSet<&str> = effects.iter().map(|e| e.id.as_str()).collect();

        let stale: Vec<String> = self
            .units
            .keys()
            .filter(|id| !wanted.contains(id.as_str()))
            .cloned()
            .collect();
        for id in stale {
            if let Some(mut unit) = self.units.remove(&id) {
                unit.disconnect();
                unit.dispose();
            }
            diff.removed.push(id);
        }

        for effect in effects {
            match self.units.get_mut(&effect.id) {
                Some(unit) => {
                    unit.apply(effect);
                    diff.updated.push(effect.id.clone());
                }
                None => match self.factory.create(ctx, effect) {
                    Ok(unit) => {
                        self.units.insert(effect.id.clone(), unit);
                        diff.created.push(effect.id.clone());
                    }
                    Err(e) => {
                        warn!(effect = %effect.id, error = %e, "[FX] effect skipped");
                        diff.failed.push(effect.id.clone());
                        continue;
                    }
                },
            }
            if let Some(unit) = self.units.get_mut(&effect.id) {
                route(&effect.id, unit.as_mut(), output);
            }
        }

        if !diff.is_empty() {
            debug!(
                removed = ?diff.removed,
                created = ?diff.created,
                updated = diff.updated.len(),
                failed = ?diff.failed,
                "[FX] reconciled"
            );
        }
        diff
    }

    /// Disconnect every unit, keeping them for the next start
    pub fn detach_all(&mut self) {
        for unit in self.units.values_mut() {
            unit.disconnect();
        }
    }

    /// Dispose and forget every unit
    pub fn clear(&mut self) {
        for (_, mut unit) in self.units.drain() {
            unit.disconnect();
            unit.dispose();
        }
    }
}

fn route(id: &str, unit: &mut dyn EffectUnit, output: Option<NodeId>) {
    match output {
        Some(destination) if !unit.is_connected() => {
            if let Err(e) = unit.connect(destination) {
                warn!(effect = %id, error = %e, "[FX] effect could not connect");
            }
        }
        None if unit.is_connected() => unit.disconnect(),
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording effect doubles shared by engine tests

    use super::*;
    use crate::error::LayertoneError;
    use parking_lot::Mutex;

    /// Lifecycle of one mock unit
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct UnitLog {
        pub serial: usize,
        pub effect_id: String,
        pub noise_type: Option<NoiseType>,
        pub gain: f32,
        pub pan: f32,
        pub connected_to: Option<NodeId>,
        pub connects: usize,
        pub disconnects: usize,
        pub disposed: bool,
    }

    #[derive(Debug)]
    pub struct MockUnit {
        log: Arc<Mutex<UnitLog>>,
    }

    impl EffectUnit for MockUnit {
        fn set_type(&mut self, noise_type: NoiseType) {
            self.log.lock().noise_type = Some(noise_type);
        }
        fn set_gain(&mut self, gain: f32) {
            self.log.lock().gain = gain;
        }
        fn set_pan(&mut self, pan: f32) {
            self.log.lock().pan = pan;
        }
        fn connect(&mut self, destination: NodeId) -> Result<()> {
            let mut log = self.log.lock();
            log.connected_to = Some(destination);
            log.connects += 1;
            Ok(())
        }
        fn disconnect(&mut self) {
            let mut log = self.log.lock();
            if log.connected_to.take().is_some() {
                log.disconnects += 1;
            }
        }
        fn dispose(&mut self) {
            self.log.lock().disposed = true;
        }
        fn is_connected(&self) -> bool {
            self.log.lock().connected_to.is_some()
        }
    }

    /// Factory that records every unit it builds
    #[derive(Debug, Default)]
    pub struct MockFactory {
        pub units: Mutex<Vec<Arc<Mutex<UnitLog>>>>,
        /// Effect ids whose construction fails
        pub broken: Mutex<HashSet<String>>,
    }

    impl MockFactory {
        pub fn logs_for(&self, effect_id: &str) -> Vec<UnitLog> {
            self.units
                .lock()
                .iter()
                .map(|log| log.lock().clone())
                .filter(|log| log.effect_id == effect_id)
                .collect()
        }

        pub fn created(&self) -> usize {
            self.units.lock().len()
        }
    }

    impl EffectFactory for MockFactory {
        fn create(&self, _ctx: &Arc<AudioContext>, effect: &NoiseEffect) -> Result<Box<dyn EffectUnit>> {
            if self.broken.lock().contains(&effect.id) {
                return Err(LayertoneError::EffectUnavailable {
                    effect_id: effect.id.clone(),
                    reason: "mock failure".into(),
                });
            }
            let mut units = self.units.lock();
            let log = Arc::new(Mutex::new(UnitLog {
                serial: units.len(),
                effect_id: effect.id.clone(),
                ..UnitLog::default()
            }));
            units.push(Arc::clone(&log));
            let mut unit = MockUnit { log };
            unit.apply(effect);
            Ok(Box::new(unit))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MockFactory;
    use super::*;
    use pretty_assertions::assert_eq;

    fn noise(id: &str, gain: f32) -> NoiseEffect {
        NoiseEffect::new(id, NoiseType::Pink, gain, 0.0)
    }

    fn setup() -> (Arc<AudioContext>, Arc<MockFactory>, EffectRack, NodeId) {
        let ctx = AudioContext::with_sample_rate(48000);
        let factory = Arc::new(MockFactory::default());
        let rack = EffectRack::new(Arc::clone(&factory) as Arc<dyn EffectFactory>);
        let bus = ctx.create_gain(1.0);
        (ctx, factory, rack, bus)
    }

    #[test]
    fn test_reconcile_is_a_diff() {
        let (ctx, factory, mut rack, bus) = setup();
        let (a, b, c) = (noise("a", 0.1), noise("b", 0.2), noise("c", 0.3));

        rack.reconcile(&ctx, &[&a, &b], Some(bus));
        let b2 = noise("b", 0.9);
        let diff = rack.reconcile(&ctx, &[&b2, &c], Some(bus));

        assert_eq!(diff.removed, vec!["a".to_string()]);
        assert_eq!(diff.updated, vec!["b".to_string()]);
        assert_eq!(diff.created, vec!["c".to_string()]);
        assert_eq!(factory.created(), 3);

        let a_log = &factory.logs_for("a")[0];
        assert!(a_log.disposed);
        assert_eq!(a_log.connected_to, None);

        let b_logs = factory.logs_for("b");
        assert_eq!(b_logs.len(), 1);
        assert_eq!(b_logs[0].gain, 0.9);
        assert_eq!(b_logs[0].connects, 1);
        assert_eq!(rack.ids(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_stopped_layer_leaves_units_unconnected() {
        let (ctx, factory, mut rack, bus) = setup();
        let a = noise("a", 0.25);
        rack.reconcile(&ctx, &[&a], None);
        assert_eq!(factory.logs_for("a")[0].connected_to, None);

        rack.reconcile(&ctx, &[&a], Some(bus));
        assert_eq!(factory.logs_for("a")[0].connected_to, Some(bus));

        rack.detach_all();
        assert!(rack.contains("a"));
        assert_eq!(factory.logs_for("a")[0].disconnects, 1);
    }

    #[test]
    fn test_failed_effect_does_not_block_others() {
        let (ctx, factory, mut rack, bus) = setup();
        factory.broken.lock().insert("bad".into());
        let (bad, good) = (noise("bad", 0.5), noise("good", 0.5));

        let diff = rack.reconcile(&ctx, &[&bad, &good], Some(bus));
        assert_eq!(diff.failed, vec!["bad".to_string()]);
        assert_eq!(diff.created, vec!["good".to_string()]);
        assert_eq!(rack.len(), 1);
    }

    #[test]
    fn test_noise_unit_routes_through_graph() {
        let ctx = AudioContext::with_sample_rate(48000);
        let bus = ctx.create_gain(1.0);
        let mut rack = EffectRack::new(Arc::new(NoiseUnitFactory));
        let a = noise("a", 0.25);

        let before = ctx.node_count();
        rack.reconcile(&ctx, &[&a], Some(bus));
        assert_eq!(ctx.node_count(), before + 1);
        assert_eq!(ctx.inputs_of(bus).len(), 1);

        rack.clear();
        assert!(rack.is_empty());
        assert_eq!(ctx.node_count(), before);
        assert!(ctx.inputs_of(bus).is_empty());
    }
}
