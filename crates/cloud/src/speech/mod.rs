// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cloud-side speech pipeline: the per-language ASR stream multiplexer.
//!
//! The session's set of recognizer streams always mirrors the minimal
//! language projection of its subscriptions. Inbound audio bytes are opaque
//! here — the same bytes go to every push-audio sink. Recognizer events are
//! stamped with session-relative times and fanned out by the router; English
//! base transcription also feeds the session transcript buffer.

pub mod asr;
pub mod provider;

pub use asr::{AsrEvent, AsrProvider, AsrResult, AsrStream, DisabledAsrProvider, LanguageSpec};
pub use provider::StreamingWsProvider;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::protocol::StreamKey;
use crate::router;
use crate::session::{TranscriptSegment, UserSession};
use crate::state::CloudState;

struct RunningStream {
    id: u64,
    audio_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
}

/// The session's live recognizer streams, keyed by language stream key.
#[derive(Default)]
pub struct SessionStreams {
    inner: Mutex<HashMap<StreamKey, RunningStream>>,
    next_id: AtomicU64,
}

impl SessionStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stream keys, unordered.
    pub async fn keys(&self) -> Vec<StreamKey> {
        self.inner.lock().await.keys().cloned().collect()
    }

    /// Stop every stream. Used at session end.
    pub async fn shutdown(&self) {
        let mut streams = self.inner.lock().await;
        for (_, stream) in streams.drain() {
            stream.cancel.cancel();
        }
    }

    async fn remove_if_same(&self, key: &StreamKey, id: u64) {
        let mut streams = self.inner.lock().await;
        if streams.get(key).is_some_and(|s| s.id == id) {
            streams.remove(key);
        }
    }
}

/// Reconcile the session's recognizer streams with the minimal language set.
///
/// Called after every subscription change for the session; the streams map
/// equals the minimal set once this returns.
pub async fn sync_streams(state: &Arc<CloudState>, session: &Arc<UserSession>) {
    if session.is_ended().await {
        return;
    }
    let minimal = state.subscriptions.minimal_language_set(&session.session_id).await;
    let mut streams = session.streams.inner.lock().await;

    let current: Vec<StreamKey> = streams.keys().cloned().collect();
    for key in current {
        if !minimal.contains(&key) {
            if let Some(stream) = streams.remove(&key) {
                stream.cancel.cancel();
                tracing::info!(
                    session_id = %session.session_id,
                    key = %key,
                    "stopped recognizer stream"
                );
            }
        }
    }

    for key in minimal {
        if streams.contains_key(&key) {
            continue;
        }
        let Some(spec) = LanguageSpec::from_key(&key) else {
            continue;
        };
        match state.asr.open_stream(&spec).await {
            Ok(stream) => {
                tracing::info!(
                    session_id = %session.session_id,
                    key = %key,
                    provider = state.asr.name(),
                    "started recognizer stream"
                );
                let running = spawn_relay(state, session, key.clone(), stream);
                streams.insert(key, running);
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %session.session_id,
                    key = %key,
                    err = %e,
                    "failed to start recognizer stream"
                );
            }
        }
    }
}

/// Write one inbound audio chunk to every push-audio sink.
pub async fn feed_audio(session: &Arc<UserSession>, bytes: &Bytes) {
    if !session.is_transcribing.load(Ordering::Relaxed) {
        return;
    }
    let streams = session.streams.inner.lock().await;
    for stream in streams.values() {
        // Audio is droppable: a saturated sink loses the chunk, not the stream.
        let _ = stream.audio_tx.try_send(bytes.clone());
    }
}

/// Apply the debounced capture state.
pub async fn set_transcribing(state: &Arc<CloudState>, session: &Arc<UserSession>, enabled: bool) {
    session.is_transcribing.store(enabled, Ordering::Relaxed);
    tracing::debug!(
        session_id = %session.session_id,
        enabled,
        "transcription state"
    );
    if enabled {
        // Make sure the streams exist before audio starts flowing.
        sync_streams(state, session).await;
    }
}

fn spawn_relay(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    key: StreamKey,
    stream: AsrStream,
) -> RunningStream {
    let id = session.streams.next_id.fetch_add(1, Ordering::Relaxed);
    let origin_ms = session.elapsed_ms();
    let cancel = CancellationToken::new();

    let AsrStream { audio_tx, mut events } = stream;
    let relay_cancel = cancel.clone();
    let state = Arc::clone(state);
    let session_task = Arc::clone(session);
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = relay_cancel.cancelled() => break,
                _ = session_task.cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(AsrEvent::Interim(result)) => {
                        handle_transcript(&state, &session_task, &key, result, false, origin_ms)
                            .await;
                    }
                    Some(AsrEvent::Final(result)) => {
                        handle_transcript(&state, &session_task, &key, result, true, origin_ms)
                            .await;
                    }
                    Some(AsrEvent::Canceled { reason }) => {
                        tracing::warn!(
                            session_id = %session_task.session_id,
                            key = %key,
                            reason,
                            "recognizer canceled"
                        );
                        session_task.streams.remove_if_same(&key, id).await;
                        break;
                    }
                    None => {
                        session_task.streams.remove_if_same(&key, id).await;
                        break;
                    }
                },
            }
        }
    });

    RunningStream { id, audio_tx, cancel }
}

fn is_english_transcription(key: &StreamKey) -> bool {
    matches!(key, StreamKey::Transcription { language } if language.starts_with("en"))
}

async fn handle_transcript(
    state: &Arc<CloudState>,
    session: &Arc<UserSession>,
    key: &StreamKey,
    result: AsrResult,
    is_final: bool,
    origin_ms: u64,
) {
    let start_ms = origin_ms + result.start_ms;
    let end_ms = origin_ms + result.end_ms;

    if is_english_transcription(key) {
        if let StreamKey::Transcription { language } = key {
            session.transcript.write().await.insert(TranscriptSegment {
                result_id: result.result_id.clone(),
                speaker_id: result.speaker_id.clone(),
                text: result.text.clone(),
                is_final,
                timestamp_ms: start_ms,
                language: language.clone(),
            });
        }
    }

    let mut data = serde_json::Map::new();
    data.insert("resultId".to_owned(), result.result_id.clone().into());
    data.insert("text".to_owned(), result.text.clone().into());
    data.insert("isFinal".to_owned(), is_final.into());
    data.insert("startTime".to_owned(), start_ms.into());
    data.insert("endTime".to_owned(), end_ms.into());
    if let Some(speaker) = &result.speaker_id {
        data.insert("speakerId".to_owned(), speaker.clone().into());
    }
    match key {
        StreamKey::Transcription { language } => {
            data.insert("transcribeLanguage".to_owned(), language.clone().into());
        }
        StreamKey::Translation { source, target } => {
            data.insert("transcribeLanguage".to_owned(), source.clone().into());
            data.insert("translateLanguage".to_owned(), target.clone().into());
        }
        _ => {}
    }

    router::deliver(state, session, key, serde_json::Value::Object(data)).await;

    if is_final && is_english_transcription(key) {
        router::match_commands(state, session, &result.text).await;
    }
}

#[cfg(test)]
#[path = "speech_tests.rs"]
mod tests;
