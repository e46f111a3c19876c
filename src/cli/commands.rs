//! CLI Command Implementations

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::bus::MasterBus;
use crate::config::EngineConfig;
use crate::dsp::soft_clip_curve;
use crate::engine::{export_wav, AudioBuffer, AudioContext, WavEncoding};
use crate::layers::{EngineDeps, LayerMixer, SampleLibrary, SoundLayer};

use super::RenderArgs;

/// Render length of one paced block
const BLOCK_MS: u64 = 20;

/// Render the layers flagged `isPlaying` into a WAV file.
///
/// Rendering is paced against the wall clock so the timer-driven isochronic
/// gate and automation ramps land where they would during live playback.
pub async fn render(args: &RenderArgs) -> anyhow::Result<()> {
    if !(args.seconds.is_finite() && args.seconds > 0.0) {
        bail!("--seconds must be positive, got {}", args.seconds);
    }
    let encoding = WavEncoding::from_bits(args.bits)?;
    let config = load_config(args.config.as_deref())?;
    let layers = load_layers(&args.layers)?;

    let samples = match &args.samples {
        Some(dir) => {
            let library = SampleLibrary::with_dir(dir);
            library.load_dir(config.sample_rate);
            library
        }
        None => SampleLibrary::new(),
    };

    let ctx = AudioContext::new(&config);
    let sample_rate = ctx.sample_rate();
    let deps = EngineDeps::new(config).with_samples(Arc::new(samples));
    let mut mixer = LayerMixer::new(Arc::clone(&ctx), deps);

    let mut autoplay = Vec::new();
    for layer in layers {
        let id = layer.id.clone();
        let playing = layer.is_playing;
        if let Err(e) = mixer.add_layer(layer) {
            warn!(layer = %id, error = %e, "[CLI] layer skipped");
            continue;
        }
        if playing {
            autoplay.push(id);
        }
    }
    for id in &autoplay {
        mixer
            .start_layer(id)
            .await
            .with_context(|| format!("starting layer {id}"))?;
    }
    info!(
        layers = mixer.len(),
        playing = autoplay.len(),
        seconds = args.seconds,
        "[CLI] rendering"
    );

    let total = (args.seconds as f64 * sample_rate as f64).round() as usize;
    let block = (sample_rate as u64 * BLOCK_MS / 1000).max(1) as usize;
    let mut rendered = AudioBuffer::with_channels(2, 0, sample_rate);
    let mut ticker = interval(Duration::from_millis(BLOCK_MS));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    while rendered.len() < total {
        ticker.tick().await;
        let frames = block.min(total - rendered.len());
        rendered.append(&mixer.render(frames));
    }

    mixer.stop_all().await;
    mixer.dispose();
    MasterBus::dispose_for(&ctx);
    ctx.close();

    export_wav(&rendered, &args.out, encoding)
        .with_context(|| format!("writing {}", args.out.display()))?;
    println!(
        "Rendered {:.2}s ({} frames, peak {:.3}) to {}",
        rendered.duration_secs(),
        rendered.len(),
        rendered.peak(),
        args.out.display()
    );
    Ok(())
}

/// Print the soft-clip transfer curve at a few probe points.
pub fn curve(amount: f32, samples: usize) -> anyhow::Result<()> {
    if !(amount > 0.0 && amount <= 1.0) {
        bail!("--amount must be in (0, 1], got {amount}");
    }
    if samples < 2 {
        bail!("--samples must be at least 2");
    }
    let curve = soft_clip_curve(amount, samples);
    let last = curve.len() - 1;

    println!("Soft-clip curve: amount {amount}, k = {}, {samples} points", 2.0 * amount);
    for x in [-1.0_f32, -0.5, -0.25, 0.0, 0.25, 0.5, 1.0] {
        let idx = (((x + 1.0) / 2.0) * last as f32).round() as usize;
        println!("  x = {x:+.2}  ->  y = {:+.4}", curve[idx.min(last)]);
    }
    let monotonic = curve.windows(2).all(|w| w[0] <= w[1]);
    println!("Monotonic: {monotonic}");
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading engine config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn load_layers(path: &Path) -> anyhow::Result<Vec<SoundLayer>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading layers {}", path.display()))?;
    let layers: Vec<SoundLayer> = serde_json::from_str(&text)
        .with_context(|| format!("parsing layers {}", path.display()))?;
    Ok(layers)
}
