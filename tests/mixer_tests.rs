//! Mixer integration: layer set management and mixed rendering

use std::f32::consts::TAU;
use std::sync::Arc;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use layertone::engine::{AudioBuffer, AudioContext, ChannelLayout};
use layertone::layers::{
    EngineDeps, LayerMixer, LayerPatch, LayerType, PlayState, SampleLibrary, SoundLayer, Waveform,
};
use layertone::{EngineConfig, LayertoneError};

fn mixer_with(samples: SampleLibrary) -> LayerMixer {
    let deps = EngineDeps::new(EngineConfig::default()).with_samples(Arc::new(samples));
    LayerMixer::new(AudioContext::with_sample_rate(48000), deps)
}

fn loop_buffer() -> AudioBuffer {
    let mut buffer = AudioBuffer::new(24000, ChannelLayout::Stereo, 48000);
    for ch in 0..2 {
        for (i, s) in buffer.channel_mut(ch).iter_mut().enumerate() {
            *s = 0.4 * (TAU * 330.0 * i as f32 / 48000.0).sin();
        }
    }
    buffer
}

#[tokio::test]
async fn test_full_mix_stays_bounded() {
    let samples = SampleLibrary::new();
    samples.register("rain", loop_buffer());
    let mut mixer = mixer_with(samples);

    mixer
        .add_layer(SoundLayer::binaural("beat", 220.0, 6.0).with_volume(1.0))
        .unwrap();
    mixer
        .add_layer(
            SoundLayer::isochronic("pulse", 330.0, 8.0)
                .with_volume(1.0)
                .with_wave(Waveform::Square),
        )
        .unwrap();
    mixer
        .add_layer(SoundLayer::ambient("bed", "rain").with_volume(1.0))
        .unwrap();

    assert_eq!(mixer.start_all().await.unwrap(), 3);
    let out = mixer.render(24000);

    assert_eq!(out.num_channels(), 2);
    assert_eq!(out.len(), 24000);
    assert!(out.is_finite());
    assert!(out.peak() > 0.05);
    assert!(out.peak() <= 1.0, "peak {}", out.peak());

    let mut wave = [0u8; 512];
    mixer.bus().unwrap().waveform_data(&mut wave);
    assert!(wave.iter().any(|&b| b != 128));
    mixer.dispose();
}

#[tokio::test]
async fn test_suspended_context_renders_silence() {
    let mut mixer = mixer_with(SampleLibrary::new());
    mixer.add_layer(SoundLayer::binaural("a", 200.0, 4.0)).unwrap();
    let out = mixer.render(1024);
    assert_eq!(out.peak(), 0.0);
    assert_eq!(mixer.engine_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_callback_sees_every_transition() {
    let mut mixer = mixer_with(SampleLibrary::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    mixer.on_play_state(move |id, playing| sink.lock().push(format!("{id}:{playing}")));

    mixer.add_layer(SoundLayer::binaural("a", 200.0, 4.0)).unwrap();
    mixer.add_layer(SoundLayer::isochronic("b", 200.0, 10.0)).unwrap();

    mixer.start_all().await.unwrap();
    mixer.stop_layer("a").await.unwrap();
    mixer.stop_all().await;

    assert_eq!(*log.lock(), vec!["a:true", "b:true", "a:false", "b:false"]);
    assert!(mixer.layers().iter().all(|l| !l.is_playing));
}

#[tokio::test(start_paused = true)]
async fn test_updates_reach_live_engine() {
    let mut mixer = mixer_with(SampleLibrary::new());
    mixer.add_layer(SoundLayer::binaural("a", 200.0, 4.0)).unwrap();
    mixer.start_layer("a").await.unwrap();

    mixer
        .update_layer(
            "a",
            LayerPatch {
                base_freq: Some(300.0),
                beat_offset: Some(10.0),
                ..LayerPatch::default()
            },
        )
        .unwrap();

    let engine = mixer.engine("a").unwrap().layer();
    assert_eq!(engine.base_freq, 300.0);
    assert_eq!(engine.beat_offset, 10.0);
    assert_eq!(mixer.layer("a").unwrap().base_freq, 300.0);
}

#[tokio::test(start_paused = true)]
async fn test_same_type_replace_keeps_engine() {
    let mut mixer = mixer_with(SampleLibrary::new());
    mixer.add_layer(SoundLayer::isochronic("a", 200.0, 10.0)).unwrap();
    assert_eq!(mixer.start_layer("a").await.unwrap(), PlayState::Playing);

    mixer
        .replace_layer(SoundLayer::isochronic("a", 250.0, 6.0).with_volume(0.3))
        .await
        .unwrap();
    let engine = mixer.engine("a").unwrap();
    assert_eq!(engine.layer_type(), LayerType::Isochronic);
    assert!(engine.is_playing());
    assert_eq!(engine.layer().pulse_freq, 6.0);
    assert_eq!(engine.layer().volume, 0.3);
}

#[tokio::test]
async fn test_closed_context_is_reported() {
    let mut mixer = mixer_with(SampleLibrary::new());
    mixer.add_layer(SoundLayer::binaural("a", 200.0, 4.0)).unwrap();
    mixer.context().close();

    assert!(matches!(
        mixer.start_layer("a").await,
        Err(LayertoneError::AudioUnavailable { .. })
    ));
    assert!(!mixer.layer("a").unwrap().is_playing);
}
