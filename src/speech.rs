//! Speech synthesis through the ElevenLabs streaming TTS API.
//!
//! The response body is consumed chunk by chunk into `<path>.part`, which is
//! renamed onto the destination only once the stream has ended cleanly.
//! A failed stream never leaves a file at the returned path.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{ApiKey, ElevenLabsConfig};
use crate::error::{Result, StudioError};

const AUDIO_EXTENSION: &str = "mp3";

/// Remote speech synthesis capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `script` into `output_path`, or a fresh unique file when `None`.
    async fn generate_audio(&self, script: &str, output_path: Option<&Path>) -> Result<PathBuf>;
}

/// Finite, non-restartable sequence of audio chunks.
#[async_trait]
pub trait ChunkStream: Send {
    /// `Ok(None)` marks the end of the stream.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>>;
}

#[async_trait]
impl ChunkStream for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.chunk().await.map_err(|e| {
            if e.is_timeout() {
                StudioError::Synthesis("audio stream timed out".into())
            } else {
                StudioError::Synthesis(format!("audio stream interrupted: {e}"))
            }
        })
    }
}

/// Drain `stream` into `path` in arrival order. Returns the number of bytes written.
///
/// If the future is dropped before completion the partial file is removed too.
pub async fn write_chunks<S>(stream: &mut S, path: &Path) -> Result<u64>
where
    S: ChunkStream + ?Sized,
{
    let partial = PartialFile::new(partial_path(path));

    let written = drain_into(stream, partial.path()).await?;
    tokio::fs::rename(partial.path(), path).await?;
    partial.disarm();

    Ok(written)
}

async fn drain_into<S>(stream: &mut S, partial: &Path) -> Result<u64>
where
    S: ChunkStream + ?Sized,
{
    let mut file = tokio::fs::File::create(partial).await?;
    let mut written = 0u64;

    while let Some(chunk) = stream.next_chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}

/// Removes the `.part` file on drop unless disarmed.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed partial audio file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove partial audio file {}: {e}", self.path.display()),
        }
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

pub struct ElevenLabsSynthesizer {
    client: Client,
    api_url: String,
    voice_id: String,
    model_id: String,
    output_format: String,
    output_dir: PathBuf,
    api_key: ApiKey,
}

impl ElevenLabsSynthesizer {
    /// Fails with `Configuration` when no credential is present. Performs no I/O.
    pub fn new(config: &ElevenLabsConfig, output_dir: &Path) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            StudioError::Configuration(format!(
                "missing API key: {} not found in environment variables",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| StudioError::Configuration(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            voice_id: config.voice_id.clone(),
            model_id: config.model_id.clone(),
            output_format: config.output_format.clone(),
            output_dir: output_dir.to_path_buf(),
            api_key,
        })
    }

    fn unique_output_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("output_{}.{AUDIO_EXTENSION}", Uuid::new_v4()))
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    async fn generate_audio(&self, script: &str, output_path: Option<&Path>) -> Result<PathBuf> {
        let path = match output_path {
            Some(p) => p.to_path_buf(),
            None => self.unique_output_path(),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = format!("{}/v1/text-to-speech/{}/stream", self.api_url, self.voice_id);
        let body = json!({
            "text": script,
            "model_id": self.model_id,
        });
        debug!("Requesting speech for {} chars (voice {})", script.len(), self.voice_id);

        let mut resp = self
            .client
            .post(&url)
            .query(&[("output_format", self.output_format.as_str())])
            .header("xi-api-key", self.api_key.expose())
            .header(ACCEPT, "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    StudioError::Synthesis(format!("cannot connect to {}", self.api_url))
                } else if e.is_timeout() {
                    StudioError::Synthesis("request timed out".into())
                } else {
                    StudioError::Synthesis(format!("request failed: {e}"))
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let detail = resp.text().await.unwrap_or_default();
            return Err(StudioError::Synthesis(format!(
                "service returned status {status}: {}",
                detail.trim()
            )));
        }

        let written = write_chunks(&mut resp, &path).await?;
        info!("Wrote {written} bytes of audio to {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    use mockito::{Matcher, Server};
    use tempfile::TempDir;

    /// What an in-memory stream does once its queued chunks run out.
    #[derive(Clone, Copy)]
    enum StreamEnd {
        Finish,
        Fail,
        Stall,
    }

    struct ScriptedStream {
        chunks: VecDeque<Bytes>,
        end: StreamEnd,
    }

    impl ScriptedStream {
        fn new(chunks: &[&'static [u8]]) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Bytes::from_static(*c)).collect(),
                end: StreamEnd::Finish,
            }
        }
    }

    #[async_trait]
    impl ChunkStream for ScriptedStream {
        async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
            match self.chunks.pop_front() {
                Some(chunk) => Ok(Some(chunk)),
                None => match self.end {
                    StreamEnd::Finish => Ok(None),
                    StreamEnd::Fail => Err(StudioError::Synthesis("connection reset".into())),
                    StreamEnd::Stall => std::future::pending().await,
                },
            }
        }
    }

    fn config_for(url: &str) -> ElevenLabsConfig {
        ElevenLabsConfig {
            api_url: url.to_string(),
            voice_id: "voice".into(),
            api_key: ApiKey::new("tts-key"),
            ..ElevenLabsConfig::default()
        }
    }

    #[tokio::test]
    async fn chunks_are_concatenated_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.mp3");
        let mut stream = ScriptedStream::new(&[b"ID3", b"", b"\x00\xff", b"tail"]);

        let written = write_chunks(&mut stream, &path).await.unwrap();

        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&path).unwrap(), b"ID3\x00\xfftail");
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn failed_stream_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.mp3");
        let mut stream = ScriptedStream::new(&[b"A", b"B"]);
        stream.end = StreamEnd::Fail;

        let err = write_chunks(&mut stream, &path).await.unwrap_err();

        assert!(matches!(err, StudioError::Synthesis(_)));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn cancelled_stream_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.mp3");
        let mut stream = ScriptedStream::new(&[b"A"]);
        stream.end = StreamEnd::Stall;

        let result =
            tokio::time::timeout(Duration::from_millis(200), write_chunks(&mut stream, &path)).await;

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_key_fails_before_any_request() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let config = ElevenLabsConfig {
            api_url: server.url(),
            ..ElevenLabsConfig::default()
        };
        let result = ElevenLabsSynthesizer::new(&config, Path::new("."));

        assert!(matches!(result, Err(StudioError::Configuration(msg)) if msg.contains("ELEVENLABS_API_KEY")));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn explicit_path_is_returned_with_streamed_audio() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/text-to-speech/voice/stream")
            .match_query(Matcher::UrlEncoded(
                "output_format".into(),
                "mp3_44100_128".into(),
            ))
            .match_header("xi-api-key", "tts-key")
            .match_body(Matcher::Json(json!({
                "text": "Test text",
                "model_id": "eleven_monolingual_v1"
            })))
            .with_status(200)
            .with_header("content-type", "audio/mpeg")
            .with_chunked_body(|w| {
                w.write_all(b"chunk1")?;
                w.write_all(b"chunk2")
            })
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("test_output.mp3");
        let synth = ElevenLabsSynthesizer::new(&config_for(&server.url()), dir.path()).unwrap();

        let path = synth
            .generate_audio("Test text", Some(&target))
            .await
            .unwrap();

        assert_eq!(path, target);
        assert_eq!(std::fs::read(&path).unwrap(), b"chunk1chunk2");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn generated_paths_are_unique() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/text-to-speech/voice/stream")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("audio")
            .expect(2)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let synth = ElevenLabsSynthesizer::new(&config_for(&server.url()), dir.path()).unwrap();

        let first = synth.generate_audio("one", None).await.unwrap();
        let second = synth.generate_audio("two", None).await.unwrap();

        assert_ne!(first, second);
        for path in [&first, &second] {
            assert_eq!(path.parent(), Some(dir.path()));
            assert_eq!(path.extension().and_then(|e| e.to_str()), Some("mp3"));
            assert_eq!(std::fs::read(path).unwrap(), b"audio");
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_synthesis_error() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/text-to-speech/voice/stream")
            .match_query(Matcher::Any)
            .with_status(401)
            .with_body(r#"{"detail":{"status":"invalid_api_key"}}"#)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("never.mp3");
        let synth = ElevenLabsSynthesizer::new(&config_for(&server.url()), dir.path()).unwrap();

        let err = synth
            .generate_audio("text", Some(&target))
            .await
            .unwrap_err();

        assert!(matches!(err, StudioError::Synthesis(msg) if msg.contains("401")));
        assert!(!target.exists());
    }
}
