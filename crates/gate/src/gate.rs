// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Silent/Speaking gate.
//!
//! Two inputs arrive independently: raw PCM for the VAD ring, and encoded
//! transport frames for the cloud. While silent, encoded frames only fill a
//! rolling prefix buffer; on the silent→speaking edge the gate emits
//! `vad:true`, flushes the prefix, and passes frames live until speech ends.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::ring::SampleRing;
use crate::vad::{VadEngine, FRAME_SAMPLES};

/// PCM sample rate the gate expects.
pub const SAMPLE_RATE_HZ: usize = 16_000;

/// VAD poll granularity.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Silent,
    Speaking,
}

/// Output the gate hands to the uplink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutput {
    /// Speech started or ended; forwarded to the cloud as a `vad` message.
    Vad(bool),
    /// An encoded audio frame to transmit.
    Audio(Bytes),
}

/// Tunables for the gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Probability at or above which a frame counts as speech.
    pub speech_threshold: f32,
    /// Consecutive silent frames before speaking→silent.
    pub silence_hangover_frames: u32,
    /// Rolling prefix retained while silent.
    pub prebuffer_ms: u64,
    /// Duration of one encoded transport frame.
    pub frame_ms: u64,
    /// Debug bypass: transmit audio even while silent.
    pub bypass_gate: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.5,
            silence_hangover_frames: 8,
            prebuffer_ms: 220,
            frame_ms: 10,
            bypass_gate: false,
        }
    }
}

impl GateConfig {
    fn prebuffer_frames(&self) -> usize {
        (self.prebuffer_ms / self.frame_ms.max(1)) as usize
    }
}

/// Voice-activity gate for one uplink.
pub struct VadGate {
    engine: Box<dyn VadEngine>,
    config: GateConfig,
    state: GateState,
    ring: SampleRing,
    cursor: u64,
    prebuffer: VecDeque<Bytes>,
    silent_streak: u32,
}

impl VadGate {
    pub fn new(engine: Box<dyn VadEngine>, config: GateConfig) -> Self {
        Self {
            engine,
            config,
            state: GateState::Silent,
            // One second of PCM feeds the VAD.
            ring: SampleRing::new(SAMPLE_RATE_HZ),
            cursor: 0,
            prebuffer: VecDeque::new(),
            silent_streak: 0,
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    /// Feed raw PCM into the VAD ring.
    pub fn push_pcm(&mut self, samples: &[i16]) {
        self.ring.write(samples);
    }

    /// Feed one encoded transport frame.
    ///
    /// Returns the frame when it should be transmitted now (speaking, or the
    /// debug bypass); otherwise it joins the rolling prefix.
    pub fn push_encoded(&mut self, frame: Bytes) -> Option<Bytes> {
        if self.state == GateState::Speaking || self.config.bypass_gate {
            return Some(frame);
        }
        self.prebuffer.push_back(frame);
        let cap = self.config.prebuffer_frames();
        while self.prebuffer.len() > cap {
            self.prebuffer.pop_front();
        }
        None
    }

    /// Run the VAD over every complete frame since the last poll.
    ///
    /// Called on the poll cadence; returns transition events and, on the
    /// silent→speaking edge, the flushed prefix frames.
    pub fn poll(&mut self) -> Vec<GateOutput> {
        if !self.engine.is_ready() {
            return Vec::new();
        }

        let mut outputs = Vec::new();
        let mut frame = [0i16; FRAME_SAMPLES];

        // Skip ahead if the ring lapped the cursor.
        if self.cursor < self.ring.oldest() {
            self.cursor = self.ring.oldest();
        }

        while self.ring.read_frame(self.cursor, &mut frame) {
            self.cursor += FRAME_SAMPLES as u64;
            let probability = self.engine.predict(&frame);
            let is_speech = probability >= self.config.speech_threshold;

            match self.state {
                GateState::Silent if is_speech => {
                    self.state = GateState::Speaking;
                    self.silent_streak = 0;
                    tracing::debug!(probability, "speech started");
                    outputs.push(GateOutput::Vad(true));
                    for buffered in self.prebuffer.drain(..) {
                        outputs.push(GateOutput::Audio(buffered));
                    }
                }
                GateState::Speaking if !is_speech => {
                    self.silent_streak += 1;
                    if self.silent_streak >= self.config.silence_hangover_frames {
                        self.state = GateState::Silent;
                        self.silent_streak = 0;
                        tracing::debug!("speech ended");
                        outputs.push(GateOutput::Vad(false));
                    }
                }
                GateState::Speaking => {
                    self.silent_streak = 0;
                }
                GateState::Silent => {}
            }
        }

        outputs
    }
}

/// Drive a gate from PCM and encoded-frame channels until cancelled.
///
/// Polls the VAD at [`POLL_INTERVAL`] granularity and forwards everything
/// the gate emits to `out_tx` in order.
pub async fn run_gate(
    mut gate: VadGate,
    mut pcm_rx: mpsc::Receiver<Vec<i16>>,
    mut frame_rx: mpsc::Receiver<Bytes>,
    out_tx: mpsc::Sender<GateOutput>,
    cancel: CancellationToken,
) {
    let mut timer = tokio::time::interval(POLL_INTERVAL);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            samples = pcm_rx.recv() => {
                match samples {
                    Some(samples) => gate.push_pcm(&samples),
                    None => break,
                }
            }

            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if let Some(live) = gate.push_encoded(frame) {
                            if out_tx.send(GateOutput::Audio(live)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }

            _ = timer.tick() => {
                for output in gate.poll() {
                    if out_tx.send(output).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
