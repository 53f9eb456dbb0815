//! Prompt → script → audio file → playback orchestration.
//!
//! Each stage is awaited before the next starts. The first failing stage
//! short-circuits the run; playback problems are reported by the player
//! and never fail a run.
//!
//! Playback runs on a blocking thread and cannot be interrupted. If a run is
//! cancelled mid-playback the clip plays to its end, and runtime shutdown
//! waits for it. Audio that is not kept is removed when playback ends,
//! cancelled or not.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::player::{build_player, AudioPlayer};
use crate::script::{AnthropicScriptGenerator, Prompt, TextGenerator};
use crate::speech::{ElevenLabsSynthesizer, SpeechSynthesizer};

/// Stage notifications emitted while a run is in progress.
#[derive(Debug)]
pub enum Progress<'a> {
    GeneratingScript,
    ScriptReady(&'a str),
    SynthesizingAudio,
    AudioSaved(&'a Path),
    Playing,
}

/// Result of a completed run with timing breakdown.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub script: String,
    pub audio_path: PathBuf,
    pub audio_bytes: u64,
    pub generate_ms: i64,
    pub synthesize_ms: i64,
    pub playback_ms: i64,
}

pub struct Pipeline {
    generator: Box<dyn TextGenerator>,
    synthesizer: Box<dyn SpeechSynthesizer>,
    player: Arc<dyn AudioPlayer>,
    keep_audio: bool,
}

impl Pipeline {
    pub fn new(
        generator: Box<dyn TextGenerator>,
        synthesizer: Box<dyn SpeechSynthesizer>,
        player: Arc<dyn AudioPlayer>,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            player,
            keep_audio: true,
        }
    }

    /// Build the production pipeline. Fails if either credential is missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let generator = AnthropicScriptGenerator::new(&config.anthropic)?;
        let synthesizer = ElevenLabsSynthesizer::new(&config.elevenlabs, &config.output.dir)?;
        let player: Arc<dyn AudioPlayer> = Arc::from(build_player(&config.player));

        Ok(Self::new(Box::new(generator), Box::new(synthesizer), player)
            .keep_audio(config.output.keep_audio))
    }

    pub fn keep_audio(mut self, keep: bool) -> Self {
        self.keep_audio = keep;
        self
    }

    pub async fn run(
        &self,
        prompt: &Prompt,
        mut on_progress: impl FnMut(Progress<'_>),
    ) -> Result<RunOutcome> {
        on_progress(Progress::GeneratingScript);
        let t_gen = Instant::now();
        let script = self.generator.generate_script(prompt).await?;
        let generate_ms = t_gen.elapsed().as_millis() as i64;
        on_progress(Progress::ScriptReady(&script));

        on_progress(Progress::SynthesizingAudio);
        let t_synth = Instant::now();
        let audio_path = self.synthesizer.generate_audio(&script, None).await?;
        let synthesize_ms = t_synth.elapsed().as_millis() as i64;
        on_progress(Progress::AudioSaved(&audio_path));
        let cleanup = (!self.keep_audio).then(|| RemoveOnDrop(audio_path.clone()));

        let audio_bytes = match tokio::fs::metadata(&audio_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                debug!("Could not stat {}: {e}", audio_path.display());
                0
            }
        };

        on_progress(Progress::Playing);
        let t_play = Instant::now();
        let player = Arc::clone(&self.player);
        let play_path = audio_path.clone();
        let playback = tokio::task::spawn_blocking(move || {
            player.play_audio(&play_path);
            drop(cleanup);
        });
        if let Err(e) = playback.await {
            warn!("Playback task failed: {e}");
        }
        let playback_ms = t_play.elapsed().as_millis() as i64;

        info!(
            "Run complete: gen={generate_ms}ms synth={synthesize_ms}ms play={playback_ms}ms ({audio_bytes} bytes)"
        );

        Ok(RunOutcome {
            script,
            audio_path,
            audio_bytes,
            generate_ms,
            synthesize_ms,
            playback_ms,
        })
    }
}

/// Deletes an audio file that is not kept.
struct RemoveOnDrop(PathBuf);

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.0) {
            Ok(()) => debug!("Removed {}", self.0.display()),
            Err(e) => warn!("Failed to remove {}: {e}", self.0.display()),
        }
    }
}
