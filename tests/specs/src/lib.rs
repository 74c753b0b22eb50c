// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario tests.
//!
//! Boots the real cloud server in-process on an ephemeral port with a
//! scripted ASR provider and a webhook sink, then drives it with glasses
//! and TPA WebSocket clients plus plain HTTP.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use lumencloud::catalog::{AppCommand, AppKind, AppRecord};
use lumencloud::config::CloudConfig;
use lumencloud::speech::{AsrEvent, AsrProvider, AsrResult, AsrStream, LanguageSpec};
use lumencloud::state::CloudState;
use lumencloud::transport::auth::{hash_api_key, GlassesClaims};

pub const JWT_SECRET: &str = "spec-secret";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Mint a glasses bearer token for a user.
pub fn mint_token(email: &str) -> anyhow::Result<String> {
    let claims = GlassesClaims {
        email: email.to_owned(),
        exp: lumencloud::state::epoch_ms() / 1000 + 3600,
    };
    Ok(encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET.as_bytes()))?)
}

// -- Scripted ASR provider ----------------------------------------------------

/// ASR provider the tests drive by hand: observe opened streams, push
/// interim/final/canceled events.
pub struct ScriptedAsr {
    handles: Mutex<HashMap<String, mpsc::Sender<AsrEvent>>>,
    opened: AtomicU64,
}

impl ScriptedAsr {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { handles: Mutex::new(HashMap::new()), opened: AtomicU64::new(0) })
    }

    fn spec_key(spec: &LanguageSpec) -> String {
        match &spec.translate {
            Some(target) => format!("{}-to-{target}", spec.transcribe),
            None => spec.transcribe.clone(),
        }
    }

    pub fn open_count(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub async fn is_open(&self, key: &str) -> bool {
        self.handles.lock().await.get(key).is_some_and(|tx| !tx.is_closed())
    }

    /// Push an event into an open stream; `false` when it was torn down.
    pub async fn emit(&self, key: &str, event: AsrEvent) -> bool {
        let handles = self.handles.lock().await;
        match handles.get(key) {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    pub fn final_result(text: &str) -> AsrEvent {
        AsrEvent::Final(AsrResult {
            result_id: uuid_like(),
            text: text.to_owned(),
            start_ms: 0,
            end_ms: 900,
            speaker_id: None,
        })
    }
}

fn uuid_like() -> String {
    format!("r-{}", lumencloud::state::epoch_ms())
}

#[async_trait]
impl AsrProvider for ScriptedAsr {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn open_stream(&self, spec: &LanguageSpec) -> anyhow::Result<AsrStream> {
        let (audio_tx, mut audio_rx) = mpsc::channel(64);
        let (event_tx, events) = mpsc::channel(64);
        self.handles.lock().await.insert(Self::spec_key(spec), event_tx);
        self.opened.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move { while audio_rx.recv().await.is_some() {} });
        Ok(AsrStream { audio_tx, events })
    }
}

// -- Webhook sink -------------------------------------------------------------

/// Tiny HTTP server that records every webhook the cloud posts at it.
pub struct WebhookSink {
    pub base_url: String,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl WebhookSink {
    pub async fn start() -> anyhow::Result<Self> {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        let app = axum::Router::new().route(
            "/webhook",
            axum::routing::post(
                move |axum::Json(body): axum::Json<serde_json::Value>| {
                    let sink = Arc::clone(&sink);
                    async move {
                        sink.lock().await.push(body);
                        axum::Json(serde_json::json!({ "success": true }))
                    }
                },
            ),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { base_url: format!("http://{addr}"), received })
    }

    pub async fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().await.clone()
    }

    /// Wait until a webhook matching the predicate arrives.
    pub async fn wait_for<F>(&self, what: &str, pred: F) -> anyhow::Result<serde_json::Value>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            if let Some(hit) = self.received.lock().await.iter().find(|v| pred(v)) {
                return Ok(hit.clone());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("no webhook matching {what}");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

// -- Cloud under test ---------------------------------------------------------

/// An in-process cloud server plus its seams.
pub struct TestCloud {
    pub state: Arc<CloudState>,
    pub asr: Arc<ScriptedAsr>,
    pub sink: WebhookSink,
    pub base_url: String,
    pub ws_base: String,
    _state_dir: tempfile::TempDir,
}

impl TestCloud {
    pub async fn start() -> anyhow::Result<Self> {
        Self::start_with(|_| {}).await
    }

    /// Start a cloud with config overrides applied on top of spec-test
    /// defaults (fast mic debounce, short webhook budget).
    pub async fn start_with(configure: impl FnOnce(&mut CloudConfig)) -> anyhow::Result<Self> {
        ensure_crypto();

        let state_dir = tempfile::tempdir()?;
        let sink = WebhookSink::start().await?;
        let asr = ScriptedAsr::new();

        let mut config = CloudConfig {
            host: "127.0.0.1".to_owned(),
            port: 0,
            jwt_secret: JWT_SECRET.to_owned(),
            public_host: "placeholder".to_owned(),
            internal_host: None,
            asr_endpoint: None,
            asr_key: None,
            asr_region: None,
            app_catalog: None,
            state_dir: state_dir.path().to_path_buf(),
            loading_timeout_ms: 5000,
            reconnect_grace_ms: 60_000,
            mic_debounce_ms: 100,
            transcript_retention_min: 30,
            heartbeat_dead_ms: 90_000,
            webhook_timeout_ms: 2000,
            health_sweep_ms: 100,
        };
        configure(&mut config);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        config.public_host = addr.to_string();

        let state = Arc::new(CloudState::new(
            config,
            asr.clone() as Arc<dyn AsrProvider>,
            CancellationToken::new(),
        )?);
        seed_catalog(&state, &sink.base_url).await;

        let serve_state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = lumencloud::serve(serve_state, listener).await {
                eprintln!("test cloud exited: {e:#}");
            }
        });

        Ok(Self {
            state,
            asr,
            sink,
            base_url: format!("http://{addr}"),
            ws_base: format!("ws://{addr}"),
            _state_dir: state_dir,
        })
    }

    pub fn api_key(package: &str) -> String {
        format!("key-{package}")
    }
}

impl Drop for TestCloud {
    fn drop(&mut self) {
        self.state.shutdown.cancel();
    }
}

/// Catalog fixture: two standard apps, a captions app, and a notes app with
/// a voice command, all webhooking into the sink.
async fn seed_catalog(state: &Arc<CloudState>, sink_url: &str) {
    let record = |package: &str, kind: AppKind, commands: Vec<AppCommand>| AppRecord {
        package_name: package.to_owned(),
        kind,
        public_url: sink_url.to_owned(),
        api_key_hash: hash_api_key(&TestCloud::api_key(package)),
        is_system: false,
        commands,
        settings: vec![serde_json::json!({ "key": "theme", "value": "dark" })],
    };

    state.catalog.insert(record("com.example.captions", AppKind::Background, vec![])).await;
    state
        .catalog
        .insert(record(
            "com.example.notes",
            AppKind::Background,
            vec![AppCommand { id: "take_note".to_owned(), phrase: "take a note".to_owned() }],
        ))
        .await;
    state.catalog.insert(record("com.example.nav", AppKind::Standard, vec![])).await;
    state.catalog.insert(record("com.example.teleprompt", AppKind::Standard, vec![])).await;
}

// -- WebSocket clients --------------------------------------------------------

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A connected WebSocket client with JSON helpers.
pub struct WsClient {
    tx: WsSink,
    rx: WsSource,
}

impl WsClient {
    async fn connect(url: &str, bearer: Option<&str>) -> anyhow::Result<Self> {
        let mut request = url.into_client_request()?;
        if let Some(token) = bearer {
            request
                .headers_mut()
                .insert("authorization", format!("Bearer {token}").parse()?);
        }
        let (ws, _resp) = tokio_tungstenite::connect_async(request).await?;
        let (tx, rx) = ws.split();
        Ok(Self { tx, rx })
    }

    pub async fn send_json(&mut self, value: serde_json::Value) -> anyhow::Result<()> {
        self.tx.send(Message::Text(value.to_string().into())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, bytes: Vec<u8>) -> anyhow::Result<()> {
        self.tx.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    pub async fn close(&mut self) -> anyhow::Result<()> {
        self.tx.send(Message::Close(None)).await?;
        Ok(())
    }

    /// Next text frame as JSON, within the receive timeout.
    pub async fn recv_json(&mut self) -> anyhow::Result<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = tokio::time::timeout(remaining, self.rx.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a frame"))?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match msg {
                Message::Text(text) => return Ok(serde_json::from_str(&text)?),
                Message::Close(_) => anyhow::bail!("connection closed"),
                _ => {}
            }
        }
    }

    /// Next binary frame, within the receive timeout. Text frames are
    /// dropped.
    pub async fn recv_binary(&mut self) -> anyhow::Result<Vec<u8>> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = tokio::time::timeout(remaining, self.rx.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for a binary frame"))?
                .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
            match msg {
                Message::Binary(bytes) => return Ok(bytes.to_vec()),
                Message::Close(_) => anyhow::bail!("connection closed"),
                _ => {}
            }
        }
    }

    /// Drain frames until one satisfies the predicate.
    pub async fn recv_until<F>(&mut self, what: &str, pred: F) -> anyhow::Result<serde_json::Value>
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("timed out waiting for {what}");
            }
            let frame = self.recv_json().await?;
            if pred(&frame) {
                return Ok(frame);
            }
        }
    }

    /// Wait for the connection to close (or error), within the timeout.
    pub async fn recv_close(&mut self) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let msg = tokio::time::timeout(remaining, self.rx.next())
                .await
                .map_err(|_| anyhow::anyhow!("timed out waiting for close"))?;
            match msg {
                None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return Ok(()),
                _ => {}
            }
        }
    }
}

/// Connect a glasses companion and complete the `connection_init` handshake.
/// Returns the client and the server-issued session id.
pub async fn connect_glasses(cloud: &TestCloud, email: &str) -> anyhow::Result<(WsClient, String)> {
    let token = mint_token(email)?;
    let mut client =
        WsClient::connect(&format!("{}/glasses", cloud.ws_base), Some(&token)).await?;
    client.send_json(serde_json::json!({ "type": "connection_init" })).await?;
    let ack = client.recv_until("connection_ack", |v| v["type"] == "connection_ack").await?;
    let session_id = ack["sessionId"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("ack missing sessionId"))?
        .to_owned();
    Ok((client, session_id))
}

/// Connect a TPA channel and bind it with `tpa_connection_init`.
pub async fn connect_tpa(
    cloud: &TestCloud,
    package: &str,
    composite_session_id: &str,
) -> anyhow::Result<WsClient> {
    let mut client = WsClient::connect(&format!("{}/tpa", cloud.ws_base), None).await?;
    client
        .send_json(serde_json::json!({
            "type": "tpa_connection_init",
            "packageName": package,
            "sessionId": composite_session_id,
            "apiKey": TestCloud::api_key(package),
            "timestamp": lumencloud::state::epoch_ms(),
        }))
        .await?;
    let ack = client
        .recv_until("tpa ack", |v| {
            v["type"] == "tpa_connection_ack" || v["type"] == "tpa_connection_error"
        })
        .await?;
    if ack["type"] != "tpa_connection_ack" {
        anyhow::bail!("bind failed: {ack}");
    }
    Ok(client)
}
