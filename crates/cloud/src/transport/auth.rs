// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel authentication: glasses bearer JWTs and TPA API keys.

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CloudError;

/// Claims the identity provider puts in a glasses bearer token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlassesClaims {
    /// The user's email; used as `userId` throughout the core.
    pub email: String,
    pub exp: u64,
}

/// Verify a glasses bearer token against the shared identity secret.
pub fn verify_glasses_token(token: &str, secret: &str) -> Result<GlassesClaims, CloudError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    decode::<GlassesClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| CloudError::AuthFailure)
}

/// Extract a bearer token from HTTP headers.
pub fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

/// Sha-256 hex digest of a raw API key, as stored in catalog records.
pub fn hash_api_key(api_key: &str) -> String {
    let digest = Sha256::digest(api_key.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Constant-time string comparison to prevent timing side-channel attacks.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
