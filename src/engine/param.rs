//! Audio parameter automation
//!
//! An `AudioParam` is a value with a timeline of scheduled events evaluated
//! against the audio clock. Event semantics follow the familiar web-audio
//! model: step changes, linear ramps that end at their event time, and
//! exponential approaches toward a target with a time constant.

/// A scheduled change on a parameter timeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamEvent {
    /// Jump to `value` at `time`
    SetValue { value: f32, time: f64 },
    /// Ramp linearly from the previous point so that `value` is reached at `time`
    LinearRamp { value: f32, time: f64 },
    /// Approach `target` exponentially starting at `time`
    SetTarget {
        target: f32,
        time: f64,
        time_constant: f64,
    },
}

impl ParamEvent {
    /// Time at which the event takes effect
    pub fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. }
            | ParamEvent::LinearRamp { time, .. }
            | ParamEvent::SetTarget { time, .. } => time,
        }
    }
}

/// Automatable parameter
#[derive(Debug, Clone, PartialEq)]
pub struct AudioParam {
    value: f32,
    min: f32,
    max: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    /// Create a parameter with a range; the initial value is clamped
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        Self {
            value: value.clamp(min, max),
            min,
            max,
            events: Vec::new(),
        }
    }

    /// Parameter without a meaningful range
    pub fn unbounded(value: f32) -> Self {
        Self::new(value, f32::MIN, f32::MAX)
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    /// Scheduled events, oldest first
    pub fn events(&self) -> &[ParamEvent] {
        &self.events
    }

    /// Whether any event still affects the value after `time`
    pub fn has_pending_events(&self, time: f64) -> bool {
        self.events.iter().any(|ev| match *ev {
            ParamEvent::SetTarget { .. } => true,
            other => other.time() > time,
        })
    }

    /// Set the value immediately, dropping the whole timeline
    pub fn set_value(&mut self, value: f32) {
        self.events.clear();
        self.value = value.clamp(self.min, self.max);
    }

    /// Schedule a step change
    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        self.insert(ParamEvent::SetValue { value, time });
    }

    /// Schedule a linear ramp ending at `end_time`
    pub fn linear_ramp_to_value_at_time(&mut self, value: f32, end_time: f64) {
        self.insert(ParamEvent::LinearRamp {
            value,
            time: end_time,
        });
    }

    /// Schedule an exponential approach toward `target`
    pub fn set_target_at_time(&mut self, target: f32, start_time: f64, time_constant: f64) {
        self.insert(ParamEvent::SetTarget {
            target,
            time: start_time,
            time_constant: time_constant.max(1e-6),
        });
    }

    /// Remove every event at or after `time`
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|ev| ev.time() < time);
    }

    /// Freeze the value the timeline would have at `time` and drop the rest
    ///
    /// Everything before `time` collapses into a single step, so the list
    /// never grows across repeated reschedules.
    pub fn cancel_and_hold_at_time(&mut self, time: f64) {
        let held = self.value_at(time);
        self.events.clear();
        self.value = held;
        self.events.push(ParamEvent::SetValue { value: held, time });
    }

    /// Evaluate the timeline at `time`, clamped to the parameter range
    pub fn value_at(&self, time: f64) -> f32 {
        self.raw_value_at(time).clamp(self.min, self.max)
    }

    /// Drop events that no longer influence values at or after `time`
    pub fn prune(&mut self, time: f64) {
        if self.events.is_empty() || self.has_pending_events(time) {
            return;
        }
        self.value = self.value_at(time);
        self.events.clear();
    }

    fn insert(&mut self, event: ParamEvent) {
        // Stable: a later event scheduled at the same time lands after earlier ones.
        let idx = self
            .events
            .iter()
            .position(|ev| ev.time() > event.time())
            .unwrap_or(self.events.len());
        self.events.insert(idx, event);
    }

    fn raw_value_at(&self, time: f64) -> f32 {
        let mut value = self.value;
        let mut anchor_time = 0.0_f64;

        for (i, event) in self.events.iter().enumerate() {
            match *event {
                ParamEvent::SetValue { value: v, time: t } => {
                    if t > time {
                        return value;
                    }
                    value = v;
                    anchor_time = t;
                }
                ParamEvent::LinearRamp { value: v, time: t } => {
                    if t > time {
                        let span = t - anchor_time;
                        if span <= 0.0 {
                            return v;
                        }
                        let frac = ((time - anchor_time) / span).clamp(0.0, 1.0) as f32;
                        return value + (v - value) * frac;
                    }
                    value = v;
                    anchor_time = t;
                }
                ParamEvent::SetTarget {
                    target,
                    time: t,
                    time_constant,
                } => {
                    if t > time {
                        return value;
                    }
                    // A set-target runs until the next event begins.
                    let next_time = match self.events.get(i + 1) {
                        Some(ParamEvent::LinearRamp { .. }) => {
                            // The ramp interpolates from where the curve started.
                            anchor_time = t;
                            continue;
                        }
                        Some(next) if next.time() <= time => Some(next.time()),
                        _ => None,
                    };
                    let end = next_time.unwrap_or(time);
                    let elapsed = (end - t).max(0.0);
                    let decay = (-elapsed / time_constant).exp() as f32;
                    value = target + (value - target) * decay;
                    if next_time.is_none() {
                        return value;
                    }
                    anchor_time = end;
                }
            }
        }

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_initial_value_clamped() {
        let param = AudioParam::new(5.0, 0.0, 1.0);
        assert_relative_eq!(param.value_at(0.0), 1.0);
    }

    #[test]
    fn test_set_value_clears_timeline() {
        let mut param = AudioParam::new(0.0, 0.0, 1.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0);
        param.set_value(0.25);
        assert!(param.events().is_empty());
        assert_relative_eq!(param.value_at(2.0), 0.25);
    }

    #[test]
    fn test_linear_ramp_interpolates() {
        let mut param = AudioParam::new(0.0, 0.0, 1.0);
        param.set_value_at_time(0.0, 0.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0);
        assert_relative_eq!(param.value_at(0.0), 0.0);
        assert_relative_eq!(param.value_at(0.5), 0.5, epsilon = 1e-6);
        assert_relative_eq!(param.value_at(1.0), 1.0);
        assert_relative_eq!(param.value_at(3.0), 1.0);
    }

    #[test]
    fn test_set_value_at_time_is_a_step() {
        let mut param = AudioParam::unbounded(1.0);
        param.set_value_at_time(4.0, 0.5);
        assert_relative_eq!(param.value_at(0.49), 1.0);
        assert_relative_eq!(param.value_at(0.5), 4.0);
    }

    #[test]
    fn test_set_target_approaches_exponentially() {
        let mut param = AudioParam::unbounded(0.0);
        param.set_target_at_time(1.0, 0.0, 0.1);
        // One time constant covers ~63.2% of the distance.
        assert_relative_eq!(param.value_at(0.1), 0.632_12, epsilon = 1e-3);
        assert!(param.value_at(1.0) > 0.9999);
    }

    #[test]
    fn test_set_target_stops_at_next_event() {
        let mut param = AudioParam::unbounded(0.0);
        param.set_target_at_time(1.0, 0.0, 0.1);
        param.set_value_at_time(-1.0, 0.2);
        assert_relative_eq!(param.value_at(0.3), -1.0);
    }

    #[test]
    fn test_cancel_and_hold_mid_ramp() {
        let mut param = AudioParam::new(0.0, 0.0, 1.0);
        param.set_value_at_time(0.0, 0.0);
        param.linear_ramp_to_value_at_time(1.0, 1.0);
        param.cancel_and_hold_at_time(0.25);
        assert_eq!(param.events().len(), 1);
        assert_relative_eq!(param.value_at(0.9), 0.25, epsilon = 1e-6);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let mut param = AudioParam::unbounded(0.0);
        param.set_value_at_time(1.0, 0.1);
        param.set_value_at_time(2.0, 0.5);
        param.cancel_scheduled_values(0.3);
        assert_eq!(param.events().len(), 1);
        assert_relative_eq!(param.value_at(1.0), 1.0);
    }

    #[test]
    fn test_ramp_then_target_gate_shape() {
        let mut param = AudioParam::new(0.0, 0.0, 1.0);
        param.cancel_and_hold_at_time(0.0);
        param.linear_ramp_to_value_at_time(1.0, 0.005);
        param.set_target_at_time(0.0, 0.005, 0.02);
        assert_relative_eq!(param.value_at(0.005), 1.0, epsilon = 1e-4);
        assert!(param.value_at(0.1) < 0.01);
    }

    #[test]
    fn test_prune_keeps_final_value() {
        let mut param = AudioParam::new(0.0, 0.0, 1.0);
        param.linear_ramp_to_value_at_time(0.5, 0.1);
        param.prune(0.2);
        assert!(param.events().is_empty());
        assert_relative_eq!(param.value_at(0.3), 0.5);
    }
}
