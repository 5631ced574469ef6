//! Confirmation tokens binding an approval to one exact request.
//!
//! Tokens are unsigned: they detect staleness and accidental or naive
//! tampering (Layer 1). They do not authorize anything. A deployment that
//! needs an unforgeable gate plugs an [`ExecutionAuthority`] into the engine.

use crate::error::{codes, ErrorCategory, LedgerGateError};
use crate::intent::Intent;
use crate::types::Blocker;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub const TOKEN_PREFIX: &str = "lgct1.";
const TOKEN_TAG: &str = "ledgergate/confirm";
const TOKEN_VERSION: u8 = 1;
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 20 * 60;

/// Decoded token contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmClaims {
    pub v: u8,
    pub tag: String,
    pub run_id: String,
    pub network: String,
    pub intent_hash: String,
    pub issued_at: DateTime<Utc>,
    pub nonce: String,
}

/// Why a token was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenRejection {
    Undecodable,
    NetworkMismatch,
    Expired,
    TamperDetected,
}

impl TokenRejection {
    pub fn reason(self) -> &'static str {
        match self {
            Self::Undecodable => "undecodable",
            Self::NetworkMismatch => "network-mismatch",
            Self::Expired => "expired",
            Self::TamperDetected => "tamper-detected",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            Self::Undecodable => codes::CONFIRM_TOKEN_UNDECODABLE,
            Self::NetworkMismatch => codes::CONFIRM_TOKEN_NETWORK_MISMATCH,
            Self::Expired => codes::CONFIRM_TOKEN_EXPIRED,
            Self::TamperDetected => codes::CONFIRM_TOKEN_TAMPER_DETECTED,
        }
    }

    pub fn to_blocker(self) -> Blocker {
        let (reason, remediation) = match self {
            Self::Undecodable => (
                "confirm token could not be decoded",
                "pass the confirmToken returned by the analysis phase unmodified",
            ),
            Self::NetworkMismatch => (
                "confirm token was issued for a different network",
                "re-run analysis on the target network and use the new confirmToken",
            ),
            Self::Expired => (
                "confirm token is older than its time limit",
                "re-run analysis to obtain a fresh confirmToken",
            ),
            Self::TamperDetected => (
                "confirm token does not match this run and intent",
                "re-run analysis for the exact intent being executed and use the new confirmToken",
            ),
        };
        Blocker::new(self.code(), ErrorCategory::Confirmation, reason, remediation)
    }
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// Issues and verifies confirmation tokens.
#[derive(Debug, Clone)]
pub struct ConfirmTokenAuthority {
    ttl: Duration,
}

impl Default for ConfirmTokenAuthority {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TOKEN_TTL_SECS))
    }
}

impl ConfirmTokenAuthority {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, run_id: &str, intent: &Intent) -> Result<String, LedgerGateError> {
        self.issue_at(run_id, intent, Utc::now())
    }

    pub fn issue_at(
        &self,
        run_id: &str,
        intent: &Intent,
        issued_at: DateTime<Utc>,
    ) -> Result<String, LedgerGateError> {
        let claims = ConfirmClaims {
            v: TOKEN_VERSION,
            tag: TOKEN_TAG.to_string(),
            run_id: run_id.to_string(),
            network: intent.network.clone(),
            intent_hash: intent.intent_hash(),
            issued_at,
            nonce: Uuid::new_v4().simple().to_string(),
        };
        let bytes = serde_json::to_vec(&claims)?;
        Ok(format!("{TOKEN_PREFIX}{}", URL_SAFE_NO_PAD.encode(bytes)))
    }

    pub fn verify(
        &self,
        token: &str,
        run_id: &str,
        intent: &Intent,
    ) -> Result<ConfirmClaims, TokenRejection> {
        self.verify_at(token, run_id, intent, Utc::now())
    }

    /// Checks run in a fixed order: decode and tag, network, age, binding.
    pub fn verify_at(
        &self,
        token: &str,
        run_id: &str,
        intent: &Intent,
        now: DateTime<Utc>,
    ) -> Result<ConfirmClaims, TokenRejection> {
        let claims = decode(token).ok_or(TokenRejection::Undecodable)?;
        if claims.v != TOKEN_VERSION || claims.tag != TOKEN_TAG {
            return Err(TokenRejection::Undecodable);
        }

        if claims.network != intent.network {
            return Err(TokenRejection::NetworkMismatch);
        }

        if now - claims.issued_at > self.ttl {
            return Err(TokenRejection::Expired);
        }

        // A token from the future was not produced by this authority's clock.
        let from_future = claims.issued_at - now > Duration::seconds(60);
        if from_future || claims.run_id != run_id || claims.intent_hash != intent.intent_hash() {
            return Err(TokenRejection::TamperDetected);
        }

        Ok(claims)
    }
}

/// Decode without any checks. `None` when the token is not ours or not JSON.
pub fn decode(token: &str) -> Option<ConfirmClaims> {
    let encoded = token.trim().strip_prefix(TOKEN_PREFIX)?;
    let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Verdict from an out-of-process enforcement service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityVerdict {
    Allow,
    Deny { reason: String },
}

/// Layer-2 seam consulted right before broadcast.
///
/// Implementations hold material the caller cannot forge (a server-side
/// signing key, an enclave, a remote policy service).
#[async_trait]
pub trait ExecutionAuthority: Send + Sync {
    fn name(&self) -> &str;

    async fn authorize(
        &self,
        run_id: &str,
        intent: &Intent,
        claims: Option<&ConfirmClaims>,
    ) -> Result<AuthorityVerdict, LedgerGateError>;
}
