//! DSP kernels
//!
//! Sample-level building blocks behind the graph's node kinds. Nothing here
//! knows about nodes, parameters or the audio clock.

mod analyser;
mod biquad;
mod compressor;
mod noise;
mod oscillator;
mod panner;
mod saturation;

pub use analyser::Analyser;
pub use biquad::{Biquad, FilterType};
pub use compressor::{Compressor, CompressorParams};
pub use noise::{NoiseGenerator, NoiseSettings, NoiseType};
pub use oscillator::{Oscillator, Waveform};
pub use panner::{equal_power_gains, pan_frame};
pub use saturation::{soft_clip, soft_clip_curve, WaveShaper};
