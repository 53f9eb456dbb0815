//! Local audio playback.
//!
//! Playback failures are never fatal: a missing file, a missing player and
//! a decoder or device failure are each reported and then swallowed.

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::Path;
use std::process::{Command, Stdio};

use rodio::{Decoder, OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use crate::config::{PlayerBackend, PlayerConfig};
use crate::error::{Result, StudioError};

/// Blocking playback capability.
pub trait AudioPlayer: Send + Sync {
    /// Play `path` to completion. Never fails; problems are reported.
    fn play_audio(&self, path: &Path) {
        if !path.exists() {
            warn!("Audio file not found at {}", path.display());
            return;
        }

        match self.try_play(path) {
            Ok(()) => debug!("Finished playing {}", path.display()),
            Err(e @ StudioError::PlaybackUnavailable(_)) => warn!("{e}"),
            Err(e) => warn!("Error playing audio: {e}"),
        }
    }

    /// Play an existing file, surfacing the failure kind.
    fn try_play(&self, path: &Path) -> Result<()>;
}

pub fn build_player(config: &PlayerConfig) -> Box<dyn AudioPlayer> {
    match config.backend {
        PlayerBackend::Command => {
            info!("Audio player: {} (command)", config.program);
            Box::new(CommandPlayer::new(&config.program, &config.args))
        }
        PlayerBackend::Rodio => {
            info!("Audio player: rodio");
            Box::new(RodioPlayer)
        }
    }
}

/// Runs a host player program with the file path as its last argument.
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(program: &str, args: &[String]) -> Self {
        Self {
            program: program.to_string(),
            args: args.to_vec(),
        }
    }
}

impl AudioPlayer for CommandPlayer {
    fn try_play(&self, path: &Path) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .stdin(Stdio::null())
            .status()
            .map_err(|e| {
                if e.kind() == ErrorKind::NotFound {
                    StudioError::PlaybackUnavailable(format!(
                        "'{}' command not found on this host",
                        self.program
                    ))
                } else {
                    StudioError::Playback(format!("failed to run {}: {e}", self.program))
                }
            })?;

        if !status.success() {
            return Err(StudioError::Playback(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}

/// Decodes the file in-process and plays it on the default output device.
pub struct RodioPlayer;

impl AudioPlayer for RodioPlayer {
    fn try_play(&self, path: &Path) -> Result<()> {
        let mut stream = OutputStreamBuilder::open_default_stream().map_err(|e| {
            StudioError::PlaybackUnavailable(format!("no audio output device: {e}"))
        })?;
        stream.log_on_drop(false);

        let file = File::open(path)?;
        let source = Decoder::new(BufReader::new(file))
            .map_err(|e| StudioError::Playback(format!("cannot decode {}: {e}", path.display())))?;

        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(stream.mixer());
        sink.append(source);
        sink.sleep_until_end();
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_not_played() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.mp3");
        // `touch` would create the file if playback were attempted.
        let player = CommandPlayer::new("touch", &[]);

        player.play_audio(&path);

        assert!(!path.exists());
    }

    #[test]
    fn existing_file_is_passed_as_last_argument() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp3");
        std::fs::write(&path, b"AB").unwrap();
        let marker = dir.path().join("marker");
        let script = format!("cp \"$0\" '{}'", marker.display());
        let player = CommandPlayer::new("sh", &["-c".to_string(), script]);

        player.play_audio(&path);

        assert_eq!(std::fs::read(&marker).unwrap(), b"AB");
    }

    #[test]
    fn unknown_program_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp3");
        std::fs::write(&path, b"data").unwrap();
        let player = CommandPlayer::new("tts-studio-no-such-player", &[]);

        assert!(matches!(
            player.try_play(&path),
            Err(StudioError::PlaybackUnavailable(_))
        ));
        player.play_audio(&path);
    }

    #[test]
    fn non_zero_exit_is_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.mp3");
        std::fs::write(&path, b"data").unwrap();
        let player = CommandPlayer::new("false", &[]);

        assert!(matches!(player.try_play(&path), Err(StudioError::Playback(_))));
        player.play_audio(&path);
    }
}
