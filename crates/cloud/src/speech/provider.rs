// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Streaming WebSocket ASR provider.
//!
//! Speaks the provider's streaming protocol: one WebSocket per recognizer
//! stream, a JSON `start` frame describing the language configuration,
//! binary PCM frames upstream, JSON result frames downstream.

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use super::asr::{AsrEvent, AsrProvider, AsrResult, AsrStream, LanguageSpec};

const AUDIO_QUEUE: usize = 64;
const EVENT_QUEUE: usize = 64;

/// Recognizer backend streaming over a provider WebSocket.
pub struct StreamingWsProvider {
    endpoint: String,
    api_key: Option<String>,
    region: Option<String>,
}

impl StreamingWsProvider {
    pub fn new(endpoint: String, api_key: Option<String>, region: Option<String>) -> Self {
        Self { endpoint, api_key, region }
    }
}

/// Result frame from the provider.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
enum ProviderFrame {
    Interim(ProviderResult),
    Final(ProviderResult),
    Canceled {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderResult {
    #[serde(default)]
    result_id: Option<String>,
    text: String,
    #[serde(default)]
    start_ms: u64,
    #[serde(default)]
    end_ms: u64,
    #[serde(default)]
    speaker_id: Option<String>,
}

impl ProviderResult {
    fn into_result(self) -> AsrResult {
        AsrResult {
            result_id: self.result_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            text: self.text,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            speaker_id: self.speaker_id,
        }
    }
}

#[async_trait]
impl AsrProvider for StreamingWsProvider {
    fn name(&self) -> &str {
        "streaming-ws"
    }

    async fn open_stream(&self, spec: &LanguageSpec) -> anyhow::Result<AsrStream> {
        let mut request = self.endpoint.clone().into_client_request()?;
        if let Some(key) = &self.api_key {
            request
                .headers_mut()
                .insert("authorization", format!("Bearer {key}").parse()?);
        }
        if let Some(region) = &self.region {
            request.headers_mut().insert("x-region", region.parse()?);
        }

        let (ws, _response) = connect_async(request).await?;
        let (mut ws_tx, mut ws_rx) = ws.split();

        let start = serde_json::json!({
            "type": "start",
            "transcribeLanguage": spec.transcribe,
            "translateLanguage": spec.translate,
            "format": "pcm16le",
            "sampleRate": 16_000,
        });
        ws_tx.send(Message::Text(start.to_string().into())).await?;

        let (audio_tx, mut audio_rx) = mpsc::channel::<Bytes>(AUDIO_QUEUE);
        let (event_tx, events) = mpsc::channel::<AsrEvent>(EVENT_QUEUE);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    chunk = audio_rx.recv() => {
                        match chunk {
                            Some(bytes) => {
                                if ws_tx.send(Message::Binary(bytes)).await.is_err() {
                                    break;
                                }
                            }
                            // Sink dropped: the stream was stopped.
                            None => {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                break;
                            }
                        }
                    }
                    frame = ws_rx.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ProviderFrame>(&text) {
                                    Ok(ProviderFrame::Interim(r)) => {
                                        if event_tx.send(AsrEvent::Interim(r.into_result())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ProviderFrame::Final(r)) => {
                                        if event_tx.send(AsrEvent::Final(r.into_result())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(ProviderFrame::Canceled { reason }) => {
                                        let reason = reason.unwrap_or_else(|| "provider canceled".to_owned());
                                        let _ = event_tx.send(AsrEvent::Canceled { reason }).await;
                                        break;
                                    }
                                    Err(e) => {
                                        tracing::debug!(err = %e, "unparseable provider frame");
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = event_tx
                                    .send(AsrEvent::Canceled { reason: "provider closed".to_owned() })
                                    .await;
                                break;
                            }
                            Some(Err(e)) => {
                                let _ = event_tx
                                    .send(AsrEvent::Canceled { reason: e.to_string() })
                                    .await;
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
        });

        Ok(AsrStream { audio_tx, events })
    }
}
