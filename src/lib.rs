//! Layertone - layered tone engine
//!
//! Binaural-beat pairs, gated isochronic pulses and looping ambient beds,
//! each driven by its own engine and mixed through a shared mastering bus.
//!
//! # Architecture
//!
//! - `engine`: an in-process audio graph with sample-accurate parameter
//!   automation, pulled in fixed render quanta
//! - `dsp`: the sample kernels behind the graph's nodes
//! - `bus`: one mastering chain per audio context
//! - `layers`: per-layer engines, effect reconciliation and automation

pub mod bus;
pub mod cli;
pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod layers;

pub use bus::MasterBus;
pub use config::{BusConfig, EngineConfig};
pub use engine::{shared_context, shutdown_shared_context, AudioContext};
pub use error::{LayertoneError, Result};
pub use layers::{create_engine, LayerEngine, LayerMixer, LayerPatch, PlayState, SoundLayer};
