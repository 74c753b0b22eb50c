// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenario tests over real WebSocket and HTTP connections.

use std::time::Duration;

use lumen_specs::{
    connect_glasses, connect_tpa, ensure_crypto, ScriptedAsr, TestCloud, WsClient,
};

const CAPTIONS: &str = "com.example.captions";
const NOTES: &str = "com.example.notes";
const NAV: &str = "com.example.nav";
const TELEPROMPT: &str = "com.example.teleprompt";

fn composite(session_id: &str, package: &str) -> String {
    format!("{session_id}-{package}")
}

fn active_apps(frame: &serde_json::Value) -> Vec<String> {
    frame["userSession"]["activeApps"]
        .as_array()
        .map(|apps| {
            apps.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect()
        })
        .unwrap_or_default()
}

/// Expect silence on a TPA channel for a short window.
async fn expect_no_frame(client: &mut WsClient) -> anyhow::Result<()> {
    let result = tokio::time::timeout(Duration::from_millis(300), client.recv_json()).await;
    if let Ok(Ok(frame)) = result {
        anyhow::bail!("unexpected frame: {frame}");
    }
    Ok(())
}

// -- HTTP surface -------------------------------------------------------------

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/v1/health", cloud.base_url)).await?.json().await?;
    assert_eq!(resp["status"], "running");
    assert_eq!(resp["sessionCount"], 0);
    Ok(())
}

#[tokio::test]
async fn register_validates_fields_and_key() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/register", cloud.base_url))
        .json(&serde_json::json!({ "packageName": CAPTIONS }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], false);

    let resp = client
        .post(format!("{}/register", cloud.base_url))
        .json(&serde_json::json!({
            "packageName": CAPTIONS,
            "apiKey": "wrong",
            "webhookUrl": format!("{}/webhook", cloud.sink.base_url),
        }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 401);

    let resp = client
        .post(format!("{}/register", cloud.base_url))
        .json(&serde_json::json!({
            "packageName": CAPTIONS,
            "apiKey": TestCloud::api_key(CAPTIONS),
            "webhookUrl": format!("{}/webhook", cloud.sink.base_url),
        }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 201);
    let body: serde_json::Value = resp.json().await?;
    assert_eq!(body["success"], true);
    assert!(body["registrationId"].is_string());
    Ok(())
}

#[tokio::test]
async fn heartbeat_unknown_registration_is_404() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let resp = reqwest::Client::new()
        .post(format!("{}/heartbeat", cloud.base_url))
        .json(&serde_json::json!({ "registrationId": "nope" }))
        .send()
        .await?;
    assert_eq!(resp.status().as_u16(), 404);
    Ok(())
}

// -- Auth ---------------------------------------------------------------------

#[tokio::test]
async fn bad_bearer_token_gets_a_typed_auth_error() -> anyhow::Result<()> {
    ensure_crypto();
    let cloud = TestCloud::start().await?;

    let mut request = tokio_tungstenite::tungstenite::client::IntoClientRequest::
        into_client_request(format!("{}/glasses", cloud.ws_base).as_str())?;
    request.headers_mut().insert("authorization", "Bearer not-a-jwt".parse()?);
    let (ws, _) = tokio_tungstenite::connect_async(request).await?;
    let (_tx, mut rx) = futures_util::StreamExt::split(ws);

    let msg = tokio::time::timeout(Duration::from_secs(5), futures_util::StreamExt::next(&mut rx))
        .await?
        .ok_or_else(|| anyhow::anyhow!("closed without a frame"))??;
    let text = match msg {
        tokio_tungstenite::tungstenite::Message::Text(t) => t.to_string(),
        other => anyhow::bail!("expected text frame, got {other:?}"),
    };
    let frame: serde_json::Value = serde_json::from_str(&text)?;
    assert_eq!(frame["type"], "auth_error");
    assert_eq!(cloud.state.sessions.len().await, 0, "auth failure must not create a session");
    Ok(())
}

// -- Scenario: start then stop ------------------------------------------------

#[tokio::test]
async fn start_then_stop_round_trip() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;

    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": CAPTIONS }))
        .await?;

    let hook = cloud
        .sink
        .wait_for("session_request", |v| v["type"] == "session_request")
        .await?;
    assert_eq!(hook["sessionId"], composite(&session_id, CAPTIONS));
    assert_eq!(hook["userId"], "mira@example.com");
    assert!(hook["augmentOSWebsocketUrl"].as_str().is_some_and(|u| u.ends_with("/tpa")));

    let mut tpa = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;

    let frame = glasses
        .recv_until("captions active", |v| {
            v["type"] == "app_state_change"
                && v["userSession"]["activeApps"]
                    .as_array()
                    .is_some_and(|a| a.iter().any(|p| p == CAPTIONS))
        })
        .await?;
    assert!(active_apps(&frame).contains(&CAPTIONS.to_owned()));

    glasses
        .send_json(serde_json::json!({ "type": "stop_app", "packageName": CAPTIONS }))
        .await?;

    let stopped = tpa.recv_until("app_stopped", |v| v["type"] == "app_stopped").await?;
    assert_eq!(stopped["reason"], "user_disabled");
    tpa.recv_close().await?;

    glasses
        .recv_until("captions gone", |v| {
            v["type"] == "app_state_change"
                && v["userSession"]["activeApps"]
                    .as_array()
                    .is_some_and(|a| !a.iter().any(|p| p == CAPTIONS))
        })
        .await?;
    Ok(())
}

// -- Scenario: language switch ------------------------------------------------

#[tokio::test]
async fn language_switch_retargets_the_recognizer() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": CAPTIONS }))
        .await?;
    let mut tpa = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;

    tpa.send_json(serde_json::json!({
        "type": "subscription_update",
        "packageName": CAPTIONS,
        "sessionId": composite(&session_id, CAPTIONS),
        "subscriptions": ["transcription:en-US"],
    }))
    .await?;

    // Media subscription appeared: the glasses hear mic-on immediately.
    let mic = glasses
        .recv_until("mic on", |v| v["type"] == "microphone_state_change")
        .await?;
    assert_eq!(mic["isMicrophoneEnabled"], true);

    wait_for_stream(&cloud, "en-US").await?;
    assert!(cloud.asr.emit("en-US", ScriptedAsr::final_result("hello world")).await);
    let data = tpa.recv_until("en transcript", |v| v["type"] == "data_stream").await?;
    assert_eq!(data["streamType"], "transcription:en-US");
    assert_eq!(data["data"]["text"], "hello world");
    assert_eq!(data["data"]["isFinal"], true);

    tpa.send_json(serde_json::json!({
        "type": "subscription_update",
        "packageName": CAPTIONS,
        "sessionId": composite(&session_id, CAPTIONS),
        "subscriptions": ["transcription:es-ES"],
    }))
    .await?;
    wait_for_stream(&cloud, "es-ES").await?;

    assert!(
        !cloud.asr.emit("en-US", ScriptedAsr::final_result("too late")).await,
        "the en-US recognizer must be torn down"
    );
    assert!(cloud.asr.emit("es-ES", ScriptedAsr::final_result("hola mundo")).await);
    let data = tpa.recv_until("es transcript", |v| v["type"] == "data_stream").await?;
    assert_eq!(data["streamType"], "transcription:es-ES");
    assert_eq!(data["data"]["text"], "hola mundo");
    Ok(())
}

async fn wait_for_stream(cloud: &TestCloud, key: &str) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cloud.asr.is_open(key).await {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("recognizer {key} never opened");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(())
}

// -- Scenario: translation fan-out --------------------------------------------

#[tokio::test]
async fn one_translation_event_reaches_both_subscribers_once() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;

    for package in [CAPTIONS, NOTES] {
        glasses
            .send_json(serde_json::json!({ "type": "start_app", "packageName": package }))
            .await?;
    }
    let mut tpa_a = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;
    let mut tpa_b = connect_tpa(&cloud, NOTES, &composite(&session_id, NOTES)).await?;

    for (package, tpa) in [(CAPTIONS, &mut tpa_a), (NOTES, &mut tpa_b)] {
        tpa.send_json(serde_json::json!({
            "type": "subscription_update",
            "packageName": package,
            "sessionId": composite(&session_id, package),
            "subscriptions": ["translation:es-ES-to-en-US"],
        }))
        .await?;
    }
    wait_for_stream(&cloud, "es-ES-to-en-US").await?;
    assert_eq!(cloud.asr.open_count(), 1, "a shared key must open one recognizer");

    assert!(cloud
        .asr
        .emit("es-ES-to-en-US", ScriptedAsr::final_result("good morning"))
        .await);

    for tpa in [&mut tpa_a, &mut tpa_b] {
        let data = tpa.recv_until("translation", |v| v["type"] == "data_stream").await?;
        assert_eq!(data["streamType"], "translation:es-ES-to-en-US");
        assert_eq!(data["data"]["translateLanguage"], "en-US");
        assert_eq!(data["data"]["text"], "good morning");
        expect_no_frame(tpa).await?;
    }
    Ok(())
}

// -- Scenario: STANDARD exclusivity -------------------------------------------

#[tokio::test]
async fn starting_a_standard_app_displaces_the_previous_one() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;

    glasses.send_json(serde_json::json!({ "type": "start_app", "packageName": NAV })).await?;
    let mut nav = connect_tpa(&cloud, NAV, &composite(&session_id, NAV)).await?;
    glasses
        .recv_until("nav active", |v| {
            v["type"] == "app_state_change"
                && v["userSession"]["activeApps"].as_array().is_some_and(|a| {
                    a.iter().any(|p| p == NAV)
                })
        })
        .await?;

    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": TELEPROMPT }))
        .await?;

    let stopped = nav.recv_until("app_stopped", |v| v["type"] == "app_stopped").await?;
    assert_eq!(stopped["reason"], "replaced_by_standard_app");

    let mut teleprompt =
        connect_tpa(&cloud, TELEPROMPT, &composite(&session_id, TELEPROMPT)).await?;
    let frame = glasses
        .recv_until("teleprompt active", |v| {
            v["type"] == "app_state_change"
                && v["userSession"]["activeApps"].as_array().is_some_and(|a| {
                    a.iter().any(|p| p == TELEPROMPT)
                })
        })
        .await?;
    assert_eq!(active_apps(&frame), vec![TELEPROMPT.to_owned()]);
    expect_no_frame(&mut teleprompt).await?;
    Ok(())
}

// -- Scenario: audio fan-out and command activation ---------------------------

#[tokio::test]
async fn audio_chunks_fan_out_as_binary() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": CAPTIONS }))
        .await?;
    let mut tpa = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;

    tpa.send_json(serde_json::json!({
        "type": "subscription_update",
        "packageName": CAPTIONS,
        "sessionId": composite(&session_id, CAPTIONS),
        "subscriptions": ["audio_chunk"],
    }))
    .await?;
    glasses.recv_until("mic on", |v| v["type"] == "microphone_state_change").await?;

    glasses.send_binary(vec![7u8; 320]).await?;
    let bytes = tpa.recv_binary().await?;
    assert_eq!(bytes, vec![7u8; 320]);
    Ok(())
}

#[tokio::test]
async fn a_final_english_transcript_activates_a_command() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": NOTES }))
        .await?;
    let mut tpa = connect_tpa(&cloud, NOTES, &composite(&session_id, NOTES)).await?;

    tpa.send_json(serde_json::json!({
        "type": "subscription_update",
        "packageName": NOTES,
        "sessionId": composite(&session_id, NOTES),
        "subscriptions": ["transcription:en-US"],
    }))
    .await?;
    wait_for_stream(&cloud, "en-US").await?;

    assert!(cloud
        .asr
        .emit("en-US", ScriptedAsr::final_result("could you Take A Note about milk"))
        .await);

    let activation = tpa
        .recv_until("command_activate", |v| v["type"] == "command_activate")
        .await?;
    assert_eq!(activation["commandId"], "take_note");
    assert_eq!(activation["spokenPhrase"], "take a note");
    assert_eq!(activation["sessionId"], composite(&session_id, NOTES));
    Ok(())
}

// -- Scenario: display arbitration --------------------------------------------

#[tokio::test]
async fn display_requests_forward_and_withdraw() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": CAPTIONS }))
        .await?;
    let mut tpa = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;

    tpa.send_json(serde_json::json!({
        "type": "display_event",
        "packageName": CAPTIONS,
        "sessionId": composite(&session_id, CAPTIONS),
        "view": "main",
        "layout": { "layoutType": "text_wall", "text": "hello" },
    }))
    .await?;

    let shown = glasses
        .recv_until("layout shown", |v| {
            v["type"] == "display_event" && v["view"] == "main"
        })
        .await?;
    assert_eq!(shown["layout"]["text"], "hello");

    // Stopping the app withdraws its display.
    glasses
        .send_json(serde_json::json!({ "type": "stop_app", "packageName": CAPTIONS }))
        .await?;
    let cleared = glasses
        .recv_until("layout cleared", |v| {
            v["type"] == "display_event"
                && v["view"] == "main"
                && v["layout"]["layoutType"] == "empty"
        })
        .await?;
    assert_eq!(cleared["layout"]["layoutType"], "empty");
    Ok(())
}

// -- Scenario: reconnection grace ---------------------------------------------

#[tokio::test]
async fn reconnect_inside_grace_keeps_the_session() -> anyhow::Result<()> {
    let cloud = TestCloud::start_with(|c| c.reconnect_grace_ms = 2000).await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses.close().await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (_glasses, new_session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    assert_eq!(new_session_id, session_id, "reconnect inside grace must adopt");
    Ok(())
}

#[tokio::test]
async fn reconnect_past_grace_starts_a_new_session() -> anyhow::Result<()> {
    let cloud = TestCloud::start_with(|c| c.reconnect_grace_ms = 200).await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses.close().await?;

    tokio::time::sleep(Duration::from_millis(600)).await;
    let (_glasses, new_session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    assert_ne!(new_session_id, session_id, "reconnect past grace must start fresh");
    Ok(())
}

// -- Scenario: registration recovery ------------------------------------------

#[tokio::test]
async fn restart_recovers_live_sessions() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let http = reqwest::Client::new();

    let resp: serde_json::Value = http
        .post(format!("{}/register", cloud.base_url))
        .json(&serde_json::json!({
            "packageName": CAPTIONS,
            "apiKey": TestCloud::api_key(CAPTIONS),
            "webhookUrl": format!("{}/webhook", cloud.sink.base_url),
        }))
        .send()
        .await?
        .json()
        .await?;
    let registration_id = resp["registrationId"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("missing registrationId"))?
        .to_owned();

    let resp: serde_json::Value = http
        .post(format!("{}/heartbeat", cloud.base_url))
        .json(&serde_json::json!({ "registrationId": registration_id }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["success"], true);

    // A session with the package active whose TPA channel then dies.
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": CAPTIONS }))
        .await?;
    let mut tpa = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;
    glasses
        .recv_until("captions active", |v| {
            v["type"] == "app_state_change"
                && v["userSession"]["activeApps"].as_array().is_some_and(|a| {
                    a.iter().any(|p| p == CAPTIONS)
                })
        })
        .await?;
    tpa.close().await?;

    // Wait for the unbind before asking for recovery.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let session = cloud
            .state
            .sessions
            .get(&session_id)
            .await
            .ok_or_else(|| anyhow::anyhow!("session vanished"))?;
        if !session.has_app_channel(CAPTIONS).await {
            break;
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("TPA channel never unbound");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let resp: serde_json::Value = http
        .post(format!("{}/restart", cloud.base_url))
        .json(&serde_json::json!({ "registrationId": registration_id }))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(resp["success"], true);
    assert_eq!(resp["recoveredSessions"], 1);

    let recovery = cloud
        .sink
        .wait_for("session_recovery", |v| v["type"] == "session_recovery")
        .await?;
    assert_eq!(recovery["sessionId"], composite(&session_id, CAPTIONS));
    assert_eq!(recovery["userId"], "mira@example.com");
    Ok(())
}

// -- Subscription / mic consistency -------------------------------------------

#[tokio::test]
async fn dropping_media_subscriptions_disables_the_mic() -> anyhow::Result<()> {
    let cloud = TestCloud::start().await?;
    let (mut glasses, session_id) = connect_glasses(&cloud, "mira@example.com").await?;
    glasses
        .send_json(serde_json::json!({ "type": "start_app", "packageName": CAPTIONS }))
        .await?;
    let mut tpa = connect_tpa(&cloud, CAPTIONS, &composite(&session_id, CAPTIONS)).await?;

    tpa.send_json(serde_json::json!({
        "type": "subscription_update",
        "packageName": CAPTIONS,
        "sessionId": composite(&session_id, CAPTIONS),
        "subscriptions": ["transcription:en-US"],
    }))
    .await?;
    let mic = glasses
        .recv_until("mic on", |v| v["type"] == "microphone_state_change")
        .await?;
    assert_eq!(mic["isMicrophoneEnabled"], true);

    tpa.send_json(serde_json::json!({
        "type": "subscription_update",
        "packageName": CAPTIONS,
        "sessionId": composite(&session_id, CAPTIONS),
        "subscriptions": ["button_press"],
    }))
    .await?;
    let mic = glasses
        .recv_until("mic off", |v| v["type"] == "microphone_state_change")
        .await?;
    assert_eq!(mic["isMicrophoneEnabled"], false);
    Ok(())
}
