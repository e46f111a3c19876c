//! Audio clock and context lifecycle state machine
//!
//! The clock only advances while the context is running; a suspended
//! context holds its time, and a closed context can never run again.

use std::fmt;

use tracing::debug;

/// Lifecycle states of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextState {
    /// Created or suspended; the clock is frozen (default state)
    #[default]
    Suspended,
    /// Rendering advances the clock
    Running,
    /// Torn down; terminal
    Closed,
}

impl fmt::Display for ContextState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContextState::Suspended => write!(f, "suspended"),
            ContextState::Running => write!(f, "running"),
            ContextState::Closed => write!(f, "closed"),
        }
    }
}

/// Tracks lifecycle state and the sample-accurate audio time
#[derive(Debug, Clone)]
pub struct AudioClock {
    state: ContextState,
    frames_rendered: u64,
    sample_rate: u32,
}

impl AudioClock {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            state: ContextState::Suspended,
            frames_rendered: 0,
            sample_rate,
        }
    }

    /// Suspended -> Running; returns false when closed
    pub fn resume(&mut self) -> bool {
        match self.state {
            ContextState::Suspended => {
                self.state = ContextState::Running;
                debug!(at = self.current_time(), "[CLOCK] resumed");
                true
            }
            ContextState::Running => true,
            ContextState::Closed => false,
        }
    }

    /// Running -> Suspended; no-op otherwise
    pub fn suspend(&mut self) {
        if self.state == ContextState::Running {
            self.state = ContextState::Suspended;
            debug!(at = self.current_time(), "[CLOCK] suspended");
        }
    }

    /// Any -> Closed
    pub fn close(&mut self) {
        self.state = ContextState::Closed;
    }

    /// Advance by rendered frames; only counts while running
    pub fn advance(&mut self, frames: u64) {
        if self.state == ContextState::Running {
            self.frames_rendered += frames;
        }
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ContextState::Running
    }

    pub fn is_closed(&self) -> bool {
        self.state == ContextState::Closed
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Current audio time in seconds
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }
}
