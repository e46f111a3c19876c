//! Audio Engine Module
//!
//! In-process audio runtime the layer engines drive:
//! - Audio buffers and level helpers
//! - Automatable parameters
//! - The node graph, its clock and pull rendering
//! - WAV import/export
//! - The process-wide shared context

pub mod buffer;
pub mod context;
pub mod io;
pub mod node;
pub mod param;
pub mod shared;
pub mod transport;

pub use buffer::{AudioBuffer, ChannelLayout};
pub use context::{AudioContext, ContextId};
pub use io::{export_wav, import_wav, resample, WavEncoding};
pub use node::{NodeId, ParamKind};
pub use param::AudioParam;
pub use shared::{shared_context, shutdown_shared_context};
pub use transport::{AudioClock, ContextState};
