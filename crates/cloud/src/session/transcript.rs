// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rolling transcript buffer: a bounded sequence of segments covering the
//! trailing retention window, pruned on every insert.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One recognized speech segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub result_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_id: Option<String>,
    pub text: String,
    pub is_final: bool,
    /// Milliseconds since session start. Monotone non-decreasing across the
    /// buffer.
    pub timestamp_ms: u64,
    pub language: String,
}

/// Bounded transcript history for one session.
///
/// The buffer holds finalized segments plus at most one trailing interim:
/// an interim insert replaces the previous interim, a final insert replaces
/// the trailing interim (if any) and sticks.
#[derive(Debug)]
pub struct TranscriptBuffer {
    segments: VecDeque<TranscriptSegment>,
    retention: Duration,
}

impl TranscriptBuffer {
    pub fn new(retention: Duration) -> Self {
        Self { segments: VecDeque::new(), retention }
    }

    /// Insert a segment, enforcing interim-replacement semantics, timestamp
    /// monotonicity, and the retention window.
    pub fn insert(&mut self, mut segment: TranscriptSegment) {
        if self.segments.back().is_some_and(|s| !s.is_final) {
            self.segments.pop_back();
        }

        if let Some(last) = self.segments.back() {
            segment.timestamp_ms = segment.timestamp_ms.max(last.timestamp_ms);
        }
        let newest = segment.timestamp_ms;
        self.segments.push_back(segment);

        let retention_ms = self.retention.as_millis() as u64;
        while self
            .segments
            .front()
            .is_some_and(|s| s.timestamp_ms + retention_ms < newest)
        {
            self.segments.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &TranscriptSegment> {
        self.segments.iter()
    }
}

#[cfg(test)]
#[path = "transcript_tests.rs"]
mod tests;
