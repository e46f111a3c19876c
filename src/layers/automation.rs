//! One-shot automation ramps
//!
//! Each ramp runs as its own task stepping at a fixed tick. The step
//! callback writes the interpolated value wherever the engine needs it and
//! may end the ramp early by returning `false`. Ramps are keyed by effect id:
//! an id that is running or has already finished is never started again
//! until it leaves the effect list.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use crate::layers::model::ParamAutomation;

/// Ramp tasks owned by one engine
#[derive(Debug)]
pub struct AutomationRunner {
    tick: Duration,
    running: HashMap<String, JoinHandle<()>>,
    finished: HashSet<String>,
}

impl AutomationRunner {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick: tick.max(Duration::from_millis(1)),
            running: HashMap::new(),
            finished: HashSet::new(),
        }
    }

    /// Whether `id` is running or already ran to completion
    pub fn is_known(&self, id: &str) -> bool {
        self.running.contains_key(id) || self.finished.contains(id)
    }

    pub fn is_running(&self, id: &str) -> bool {
        self.running.contains_key(id)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Spawn a ramp unless its id is already known
    ///
    /// `step(value, done)` is called once per tick; the last call carries
    /// `ramp.to` with `done == true`. Returns whether a task was spawned.
    pub fn begin<F>(&mut self, runtime: &Handle, ramp: &ParamAutomation, step: F) -> bool
    where
        F: FnMut(f32, bool) -> bool + Send + 'static,
    {
        if self.is_known(&ramp.id) {
            return false;
        }
        debug!(
            id = %ramp.id,
            target = ?ramp.target,
            from = ramp.from,
            to = ramp.to,
            secs = ramp.duration_sec,
            "[AUTO] ramp started"
        );
        let task = runtime.spawn(run_ramp(ramp.clone(), self.tick, step));
        self.running.insert(ramp.id.clone(), task);
        true
    }

    /// Record that a ramp reached its end
    pub fn complete(&mut self, id: &str) {
        if self.running.remove(id).is_some() {
            self.finished.insert(id.to_string());
            debug!(%id, "[AUTO] ramp finished");
        }
    }

    /// Cancel ramps and forget finished ids that are not in `ids`
    pub fn retain(&mut self, ids: &HashSet<&str>) {
        self.running.retain(|id, task| {
            let keep = ids.contains(id.as_str());
            if !keep {
                task.abort();
                debug!(%id, "[AUTO] ramp cancelled");
            }
            keep
        });
        self.finished.retain(|id| ids.contains(id.as_str()));
    }

    /// Cancel every running ramp; finished ids stay finished
    pub fn cancel_all(&mut self) {
        for (id, task) in self.running.drain() {
            task.abort();
            debug!(%id, "[AUTO] ramp cancelled");
        }
    }
}

impl Drop for AutomationRunner {
    fn drop(&mut self) {
        for task in self.running.values() {
            task.abort();
        }
    }
}

async fn run_ramp<F>(ramp: ParamAutomation, tick: Duration, mut step: F)
where
    F: FnMut(f32, bool) -> bool + Send + 'static,
{
    if ramp.duration_sec <= 0.0 || !ramp.duration_sec.is_finite() {
        step(ramp.to, true);
        return;
    }

    let started = Instant::now();
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let elapsed = started.elapsed().as_secs_f32();
        let done = elapsed >= ramp.duration_sec;
        if !step(ramp.value_at(elapsed), done) || done {
            break;
        }
    }
}
