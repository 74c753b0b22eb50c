// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire codec: typed glasses↔cloud and TPA↔cloud messages.
//!
//! All text frames are JSON discriminated by a `type` field; binary frames
//! carry opaque audio and never enter this module. Stream identifiers are
//! typed [`StreamKey`]s rather than raw strings so language-parameterized
//! subscriptions compare structurally.

pub mod glasses;
pub mod stream;
pub mod tpa;

pub use glasses::{CloudToGlassesMessage, GlassesMessage, UserSessionSnapshot, VadStatus};
pub use stream::{StreamKey, DEFAULT_TRANSCRIBE_LANGUAGE};
pub use tpa::{CloudToTpaMessage, TpaMessage};
