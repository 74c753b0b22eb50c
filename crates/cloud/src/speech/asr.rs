// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ASR provider seam.
//!
//! The recognizer itself is an external collaborator; this trait is what the
//! multiplexer needs from it: open a push-audio stream for one language
//! configuration and read interim/final events until the stream dies.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::StreamKey;

/// Language configuration for one recognizer stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    /// BCP-47 code of the spoken language.
    pub transcribe: String,
    /// Target language for translation variants.
    pub translate: Option<String>,
}

impl LanguageSpec {
    /// Derive the recognizer configuration from a language-parameterized
    /// stream key. Base tags have no recognizer.
    pub fn from_key(key: &StreamKey) -> Option<Self> {
        match key {
            StreamKey::Transcription { language } => {
                Some(Self { transcribe: language.clone(), translate: None })
            }
            StreamKey::Translation { source, target } => {
                Some(Self { transcribe: source.clone(), translate: Some(target.clone()) })
            }
            _ => None,
        }
    }
}

/// One recognized utterance, interim or final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsrResult {
    pub result_id: String,
    pub text: String,
    /// Milliseconds relative to recognizer start.
    pub start_ms: u64,
    pub end_ms: u64,
    pub speaker_id: Option<String>,
}

/// Events a recognizer stream produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrEvent {
    Interim(AsrResult),
    Final(AsrResult),
    /// The provider tore this stream down; the stream is dead but the
    /// session is not.
    Canceled { reason: String },
}

/// A live recognizer stream: write audio in, read events out.
pub struct AsrStream {
    pub audio_tx: mpsc::Sender<Bytes>,
    pub events: mpsc::Receiver<AsrEvent>,
}

/// Pluggable recognizer backend.
#[async_trait]
pub trait AsrProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Start continuous recognition for one language configuration.
    async fn open_stream(&self, spec: &LanguageSpec) -> anyhow::Result<AsrStream>;
}

/// Provider used when no ASR endpoint is configured; every open fails.
pub struct DisabledAsrProvider;

#[async_trait]
impl AsrProvider for DisabledAsrProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn open_stream(&self, spec: &LanguageSpec) -> anyhow::Result<AsrStream> {
        anyhow::bail!("no ASR endpoint configured (wanted {})", spec.transcribe)
    }
}
