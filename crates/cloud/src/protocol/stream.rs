// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed stream keys for the subscription registry and router.

use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Transcription language assumed when a payload carries none.
pub const DEFAULT_TRANSCRIBE_LANGUAGE: &str = "en-US";

/// Typed identifier of a data stream a TPA can subscribe to.
///
/// Base tags name fixed sensor/event streams. Transcription and translation
/// keys are parameterized by BCP-47 language codes and compare structurally,
/// so `transcription:en-US` from two packages is the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StreamKey {
    ButtonPress,
    HeadPosition,
    PhoneNotification,
    NotificationDismissed,
    Vad,
    LocationUpdate,
    CalendarEvent,
    AudioChunk,
    GlassesBattery,
    PhoneBattery,
    Transcription { language: String },
    Translation { source: String, target: String },
}

impl StreamKey {
    /// Shorthand for a transcription key.
    pub fn transcription(language: &str) -> Self {
        Self::Transcription { language: language.to_owned() }
    }

    /// Shorthand for a translation key.
    pub fn translation(source: &str, target: &str) -> Self {
        Self::Translation { source: source.to_owned(), target: target.to_owned() }
    }

    /// Whether this key is parameterized by language and therefore requires
    /// an ASR stream instance.
    pub fn is_language_stream(&self) -> bool {
        matches!(self, Self::Transcription { .. } | Self::Translation { .. })
    }

    /// Whether subscribing to this key requires microphone capture on the
    /// glasses.
    pub fn requires_media(&self) -> bool {
        matches!(
            self,
            Self::Transcription { .. } | Self::Translation { .. } | Self::AudioChunk | Self::Vad
        )
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ButtonPress => f.write_str("button_press"),
            Self::HeadPosition => f.write_str("head_position"),
            Self::PhoneNotification => f.write_str("phone_notification"),
            Self::NotificationDismissed => f.write_str("notification_dismissed"),
            Self::Vad => f.write_str("vad"),
            Self::LocationUpdate => f.write_str("location_update"),
            Self::CalendarEvent => f.write_str("calendar_event"),
            Self::AudioChunk => f.write_str("audio_chunk"),
            Self::GlassesBattery => f.write_str("glasses_battery"),
            Self::PhoneBattery => f.write_str("phone_battery"),
            Self::Transcription { language } => write!(f, "transcription:{language}"),
            Self::Translation { source, target } => write!(f, "translation:{source}-to-{target}"),
        }
    }
}

impl FromStr for StreamKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(language) = s.strip_prefix("transcription:") {
            if language.is_empty() {
                anyhow::bail!("transcription key missing language: {s:?}");
            }
            return Ok(Self::Transcription { language: language.to_owned() });
        }
        if let Some(pair) = s.strip_prefix("translation:") {
            let (source, target) = pair
                .split_once("-to-")
                .ok_or_else(|| anyhow::anyhow!("translation key missing `-to-`: {s:?}"))?;
            if source.is_empty() || target.is_empty() {
                anyhow::bail!("translation key missing language: {s:?}");
            }
            return Ok(Self::Translation {
                source: source.to_owned(),
                target: target.to_owned(),
            });
        }
        match s {
            // A bare `transcription` subscription gets the default language.
            "transcription" => Ok(Self::Transcription {
                language: DEFAULT_TRANSCRIBE_LANGUAGE.to_owned(),
            }),
            "button_press" => Ok(Self::ButtonPress),
            "head_position" => Ok(Self::HeadPosition),
            "phone_notification" => Ok(Self::PhoneNotification),
            "notification_dismissed" => Ok(Self::NotificationDismissed),
            "vad" => Ok(Self::Vad),
            "location_update" => Ok(Self::LocationUpdate),
            "calendar_event" => Ok(Self::CalendarEvent),
            "audio_chunk" => Ok(Self::AudioChunk),
            "glasses_battery" => Ok(Self::GlassesBattery),
            "phone_battery" => Ok(Self::PhoneBattery),
            other => anyhow::bail!("unknown stream key: {other:?}"),
        }
    }
}

impl Serialize for StreamKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
#[path = "stream_tests.rs"]
mod tests;
