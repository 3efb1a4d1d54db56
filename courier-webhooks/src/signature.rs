//! Payload signature generation and verification

use crate::{Result, WebhookError};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer keyed with the shared signing secret.
///
/// Signatures are lowercase hex. The key never appears in `Debug` output.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// Create a signer from a non-empty secret
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(WebhookError::ConfigError(
                "Signing secret cannot be empty".to_string(),
            ));
        }

        let mac = HmacSha256::new_from_slice(secret)
            .map_err(|e| WebhookError::ConfigError(e.to_string()))?;

        Ok(Self { mac })
    }

    /// Sign a payload
    pub fn sign(&self, payload: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Check a hex signature against a payload.
    ///
    /// Returns `false` for anything that is not a well-formed signature of the
    /// right length. The comparison is constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature.trim()) else {
            return false;
        };

        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.verify_slice(&expected).is_ok()
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key", &"[redacted]").finish()
    }
}

/// Header names used on dispatched requests
pub mod headers {
    /// Hex HMAC-SHA256 of the raw request body
    pub const SIGNATURE: &str = "Upstash-Signature";

    /// Message id of the job being delivered
    pub const MESSAGE_ID: &str = "Upstash-Message-Id";

    /// Number of earlier delivery attempts for this message
    pub const RETRIED: &str = "Upstash-Retried";
}
