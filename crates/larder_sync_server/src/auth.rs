//! Bearer-token authentication.
//!
//! Tokens are signed with HMAC-SHA256 and carry their issue time so the
//! server can expire them.
//!
//! ## Token Format
//!
//! - 16 bytes: device ID
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature over the first 24 bytes
//!
//! Total: 56 bytes, URL-safe base64 (no padding) for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const PAYLOAD_LEN: usize = 24;
const TOKEN_LEN: usize = PAYLOAD_LEN + 32;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks device tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for a device, issued now.
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the key cannot be used for signing.
    pub fn create_token(&self, device_id: Uuid) -> ServerResult<String> {
        self.create_token_at(device_id, now_millis())
    }

    /// Creates a token with an explicit issue time (Unix millis).
    ///
    /// # Errors
    ///
    /// Returns `Internal` if the key cannot be used for signing.
    pub fn create_token_at(&self, device_id: Uuid, issued_at: u64) -> ServerResult<String> {
        let mut data = Vec::with_capacity(TOKEN_LEN);
        data.extend_from_slice(device_id.as_bytes());
        data.extend_from_slice(&issued_at.to_be_bytes());

        let signature = self.mac(&data)?.finalize().into_bytes();
        data.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(data))
    }

    /// Validates a token and returns the device it was issued to.
    ///
    /// # Errors
    ///
    /// Returns `NotAuthorized` for malformed, forged or expired tokens.
    pub fn validate_token(&self, token: &str) -> ServerResult<Uuid> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        let (payload, signature) = bytes.split_at(PAYLOAD_LEN);
        self.mac(payload)?
            .verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let (device, issued) = payload.split_at(16);
        let device_id = Uuid::from_slice(device)
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        let issued: [u8; 8] = issued
            .try_into()
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        let issued_at = u64::from_be_bytes(issued);

        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued_at.saturating_add(expiry_millis) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(device_id)
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
