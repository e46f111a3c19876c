//! CLI Module
//!
//! Offline rendering front end for the layer engines.

pub mod commands;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Layertone - layered binaural, isochronic and ambient tone renderer
#[derive(Parser, Debug)]
#[command(name = "layertone-cli")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render a set of layers through the master bus into a WAV file
    #[command(name = "render")]
    Render(RenderArgs),

    /// Print a summary of the master bus soft-clip curve
    #[command(name = "curve")]
    Curve {
        /// Soft-clip amount in (0, 1]
        #[arg(short, long, default_value_t = 0.5)]
        amount: f32,

        /// Number of curve points
        #[arg(short, long, default_value_t = 2048)]
        samples: usize,
    },
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    /// JSON array of layer configurations
    #[arg(short, long)]
    pub layers: PathBuf,

    /// Length of the render in seconds
    #[arg(short, long, default_value_t = 10.0)]
    pub seconds: f32,

    /// Output WAV path
    #[arg(short, long)]
    pub out: PathBuf,

    /// Engine configuration JSON
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory of ambient loops (`<key>.wav`)
    #[arg(long)]
    pub samples: Option<PathBuf>,

    /// Output bit depth: 16, 24 or 32 (float)
    #[arg(long, default_value_t = 16)]
    pub bits: u16,
}
