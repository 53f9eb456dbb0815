//! Error taxonomy shared by every pipeline stage.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StudioError {
    /// Missing credential or unusable settings. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The text-generation service failed or returned no usable script.
    #[error("script generation failed: {0}")]
    Generation(String),

    /// The TTS request or its audio stream failed.
    #[error("speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No playback mechanism on this host.
    #[error("playback unavailable: {0}")]
    PlaybackUnavailable(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

pub type Result<T> = std::result::Result<T, StudioError>;
