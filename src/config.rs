//! Configuration management for tts-studio.
//!
//! Loads settings from YAML files in standard locations and resolves the
//! two service credentials from the process environment. Components never
//! read the environment themselves; they receive their section of this
//! struct at construction time.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

/// Opaque API credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Returns `None` for empty or whitespace-only values.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.trim().to_string()))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnthropicConfig {
    pub api_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub timeout_secs: u64,
    /// Environment variable holding the credential.
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.anthropic.com".into(),
            model: "claude-4-5-sonnet-20251022".into(),
            max_tokens: 1024,
            system_prompt: "You are a professional scriptwriter. Convert the following user prompt \
                            into a natural, engaging spoken script suitable for text-to-speech. \
                            Do not include stage directions, just the text to be spoken."
                .into(),
            timeout_secs: 60,
            api_key_env: "ANTHROPIC_API_KEY".into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ElevenLabsConfig {
    pub api_url: String,
    /// Voice identity, "Rachel" by default.
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub timeout_secs: u64,
    pub api_key_env: String,
    #[serde(skip)]
    pub api_key: Option<ApiKey>,
}

impl Default for ElevenLabsConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.elevenlabs.io".into(),
            voice_id: "21m00Tcm4TlvDq8ikWAM".into(),
            model_id: "eleven_monolingual_v1".into(),
            output_format: "mp3_44100_128".into(),
            timeout_secs: 120,
            api_key_env: "ELEVENLABS_API_KEY".into(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: PathBuf,
    /// When false, the audio file is deleted after playback.
    pub keep_audio: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            keep_audio: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlayerBackend {
    /// Host command-line player (afplay on macOS, ffplay elsewhere).
    Command,
    /// In-process decoding and playback through rodio.
    Rodio,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub backend: PlayerBackend,
    pub program: String,
    pub args: Vec<String>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let (program, args): (&str, &[&str]) = if cfg!(target_os = "macos") {
            ("afplay", &[])
        } else {
            ("ffplay", &["-nodisp", "-autoexit", "-loglevel", "quiet"])
        };

        Self {
            backend: PlayerBackend::Command,
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Defaults to ~/.tts-studio-history when unset.
    pub dir: Option<PathBuf>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
        }
    }
}

impl HistoryConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        self.dir
            .clone()
            .unwrap_or_else(crate::history::default_history_dir)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub anthropic: AnthropicConfig,
    pub elevenlabs: ElevenLabsConfig,
    pub output: OutputConfig,
    pub player: PlayerConfig,
    pub history: HistoryConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/tts-studio/config.yaml
    /// 3. /etc/tts-studio/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/tts-studio/config.yaml")),
                Some(PathBuf::from("/etc/tts-studio/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    /// Read both credentials from the environment variables named in config.
    pub fn resolve_credentials(&mut self) {
        self.anthropic.api_key = read_key(&self.anthropic.api_key_env);
        self.elevenlabs.api_key = read_key(&self.elevenlabs.api_key_env);
    }

    /// Names of the environment variables whose credential is still missing.
    pub fn missing_credentials(&self) -> Vec<&str> {
        let mut missing = Vec::new();
        if self.anthropic.api_key.is_none() {
            missing.push(self.anthropic.api_key_env.as_str());
        }
        if self.elevenlabs.api_key.is_none() {
            missing.push(self.elevenlabs.api_key_env.as_str());
        }
        missing
    }
}

fn read_key(var: &str) -> Option<ApiKey> {
    std::env::var(var).ok().and_then(ApiKey::new)
}
