//! Verification of inbound signed requests
//!
//! Endpoints that receive dispatched jobs or callbacks run every request
//! through an [`InboundVerifier`] before acting on the body.

use crate::Signer;
use crate::signature::headers;
use bytes::Bytes;
use courier_config::RuntimeEnvironment;
use http::{HeaderMap, Request, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, error};

/// Accepted inbound request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// The signature matched the raw body
    Verified { message_id: Option<String> },
    /// Verification is disabled for this runtime
    Skipped,
}

/// Why an inbound request was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    MissingSignature,
    InvalidSignature,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingSignature => "Signature header not found.",
            Self::InvalidSignature => "Invalid request signature.",
        }
    }
}

/// Rejected inbound request, mapped to `401 Unauthorized`
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{} ({})", .reason.as_str(), .status)]
pub struct InboundRejection {
    pub status: StatusCode,
    pub reason: RejectionReason,
    pub message_id: Option<String>,
}

impl InboundRejection {
    fn new(reason: RejectionReason, message_id: Option<String>) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            reason,
            message_id,
        }
    }
}

/// Verifies the `Upstash-Signature` header of inbound requests
#[derive(Debug, Clone)]
pub struct InboundVerifier {
    signer: Signer,
    runtime: RuntimeEnvironment,
    enforce: bool,
}

impl InboundVerifier {
    pub fn new(signer: Signer, runtime: RuntimeEnvironment) -> Self {
        Self {
            signer,
            runtime,
            enforce: false,
        }
    }

    /// Verify even outside production
    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    pub fn is_enforced(&self) -> bool {
        self.runtime.is_production() || self.enforce
    }

    /// Verify a request given its URL, headers and raw body.
    ///
    /// `raw_body` must be the bytes as received, before any JSON parsing.
    pub fn verify(
        &self,
        url: &str,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> Result<InboundOutcome, InboundRejection> {
        if !self.is_enforced() {
            debug!(url = %url, runtime = %self.runtime, "Skipping signature verification");
            return Ok(InboundOutcome::Skipped);
        }

        let message_id = header_str(headers, headers::MESSAGE_ID).map(str::to_owned);

        let Some(signature) = header_str(headers, headers::SIGNATURE) else {
            error!(
                alert = true,
                url = %url,
                message_id = message_id.as_deref().unwrap_or("-"),
                "Inbound request is missing its signature header"
            );
            return Err(InboundRejection::new(
                RejectionReason::MissingSignature,
                message_id,
            ));
        };

        if !self.signer.verify(raw_body, signature) {
            error!(
                alert = true,
                url = %url,
                message_id = message_id.as_deref().unwrap_or("-"),
                "Invalid request signature"
            );
            return Err(InboundRejection::new(
                RejectionReason::InvalidSignature,
                message_id,
            ));
        }

        Ok(InboundOutcome::Verified { message_id })
    }

    /// Verify an `http::Request` carrying its raw body
    pub fn verify_request(
        &self,
        request: &Request<Bytes>,
    ) -> Result<InboundOutcome, InboundRejection> {
        self.verify(
            &request.uri().to_string(),
            request.headers(),
            request.body(),
        )
    }

    /// Verify, then parse the raw body as JSON
    pub fn receive<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &HeaderMap,
        raw_body: &[u8],
    ) -> crate::Result<T> {
        self.verify(url, headers, raw_body)?;
        Ok(serde_json::from_slice(raw_body)?)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}
