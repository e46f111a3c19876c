//! Error handling for Layertone
//!
//! Graph-level failures are mostly recovered inside the engines; the
//! variants here are what escapes to callers, plus the internal failures
//! the engines catch and log.

use thiserror::Error;

/// Result type alias for Layertone operations
pub type Result<T> = std::result::Result<T, LayertoneError>;

/// Main error type for Layertone operations
#[derive(Error, Debug)]
pub enum LayertoneError {
    // Host Errors
    #[error("Audio unavailable: {reason}")]
    AudioUnavailable { reason: String },

    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    // Graph Errors
    #[error("Audio node not found: {node}")]
    NodeNotFound { node: u64 },

    #[error("Effect unit unavailable for '{effect_id}': {reason}")]
    EffectUnavailable { effect_id: String, reason: String },

    // Sample Errors
    #[error("Ambient sample not found: {key}")]
    SampleNotFound { key: String },

    #[error("Invalid audio: {reason}")]
    InvalidAudio { reason: String },

    // Layer Errors
    #[error("Layer limit reached: at most {max} layers")]
    LayerLimit { max: usize },

    #[error("Layer not found: {id}")]
    LayerNotFound { id: String },

    // Configuration Errors
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

impl LayertoneError {
    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            LayertoneError::AudioUnavailable { .. } => "AUDIO_UNAVAILABLE",
            LayertoneError::InvalidState { .. } => "INVALID_STATE",
            LayertoneError::NodeNotFound { .. } => "NODE_NOT_FOUND",
            LayertoneError::EffectUnavailable { .. } => "EFFECT_UNAVAILABLE",
            LayertoneError::SampleNotFound { .. } => "SAMPLE_NOT_FOUND",
            LayertoneError::InvalidAudio { .. } => "INVALID_AUDIO",
            LayertoneError::LayerLimit { .. } => "LAYER_LIMIT",
            LayertoneError::LayerNotFound { .. } => "LAYER_NOT_FOUND",
            LayertoneError::Config { .. } => "CONFIG_ERROR",
            LayertoneError::Io(_) => "IO_ERROR",
            LayertoneError::Serialization(_) => "SERIALIZATION_ERROR",
            LayertoneError::Wav(_) => "WAV_ERROR",
        }
    }

    /// Check if the engine can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            LayertoneError::AudioUnavailable { .. } | LayertoneError::Config { .. }
        )
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            LayertoneError::AudioUnavailable { .. } => vec![
                "Audio output is not available in this environment",
                "Create a new audio context after the previous one was closed",
            ],
            LayertoneError::EffectUnavailable { .. } => vec![
                "The effect was skipped; other effects keep running",
                "Remove and re-add the effect to retry",
            ],
            LayertoneError::SampleNotFound { .. } => vec![
                "Register the sample with SampleLibrary::insert",
                "Check that <key>.wav exists in the samples directory",
            ],
            LayertoneError::LayerLimit { .. } => vec!["Remove a layer before adding another"],
            LayertoneError::Config { .. } => vec![
                "Check the engine configuration file is valid JSON",
                "Delete the file to fall back to defaults",
            ],
            _ => vec![],
        }
    }
}
