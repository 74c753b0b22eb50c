// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

/// Error codes for the cloud core.
///
/// Errors that affect only a single package stay local to that package;
/// errors on the glasses channel degrade to a grace-window disconnect. No
/// error ever crosses between sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloudError {
    /// Missing or invalid bearer token / TPA API key.
    AuthFailure,
    /// Malformed JSON or unknown discriminant; the channel stays open.
    ProtocolError,
    /// Request referenced fields that are missing or invalid.
    BadRequest,
    /// The catalog has no record for the package.
    AppNotFound,
    /// The TPA did not bind its channel within the loading timeout.
    AppStartTimeout,
    /// Outbound webhook failed; non-fatal for start and stop.
    WebhookFailure,
    /// The ASR provider canceled a single recognizer stream.
    RecognizerCanceled,
    /// The glasses or TPA channel failed; triggers the disconnect transition.
    ChannelError,
    /// Unknown session id.
    SessionNotFound,
    /// Unknown registration id.
    RegistrationNotFound,
    /// The session has ended; all inbound operations return not-found.
    SessionEnded,
    Internal,
}

impl CloudError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::AuthFailure => 401,
            Self::ProtocolError | Self::BadRequest => 400,
            Self::AppNotFound
            | Self::SessionNotFound
            | Self::RegistrationNotFound
            | Self::SessionEnded => 404,
            Self::AppStartTimeout => 504,
            Self::WebhookFailure => 502,
            Self::RecognizerCanceled | Self::ChannelError | Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "AUTH_FAILURE",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::BadRequest => "BAD_REQUEST",
            Self::AppNotFound => "APP_NOT_FOUND",
            Self::AppStartTimeout => "APP_START_TIMEOUT",
            Self::WebhookFailure => "WEBHOOK_FAILURE",
            Self::RecognizerCanceled => "RECOGNIZER_CANCELED",
            Self::ChannelError => "CHANNEL_ERROR",
            Self::SessionNotFound => "SESSION_NOT_FOUND",
            Self::RegistrationNotFound => "REGISTRATION_NOT_FOUND",
            Self::SessionEnded => "SESSION_ENDED",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            success: false,
            error: ErrorBody { code: self.as_str().to_owned(), message: message.into() },
        };
        (status, Json(body))
    }
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for CloudError {}

/// HTTP error envelope: `{success: false, error: {code, message}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
