//! Pickup authorization tokens.
//!
//! A token is `<subject>:<issued_at>:<signature>` where `issued_at` is unix
//! seconds in base36 and `signature` is the URL-safe base64 HMAC-SHA256 of
//! everything before the last separator. Nothing is stored server-side: a
//! token is valid iff its signature checks out under the current key and it
//! is younger than the TTL supplied at verification time.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::clock::Clock;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TTL_HOURS: u32 = 48;
pub const MIN_KEY_BYTES: usize = 32;

const SEPARATOR: char = ':';
const SALT: &[u8] = b"parceldesk.pickup-token";

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("token signature mismatch")]
    Tampered,

    #[error("malformed token")]
    Malformed,
}

/// Validity window of a pickup token. Not embedded in the token, so the same
/// value must be used when issuing and verifying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtl {
    hours: u32,
}

impl TokenTtl {
    pub fn hours(hours: u32) -> Self {
        Self { hours }
    }

    pub fn as_hours(&self) -> u32 {
        self.hours
    }

    pub fn as_duration(&self) -> Duration {
        Duration::hours(i64::from(self.hours))
    }
}

impl Default for TokenTtl {
    fn default() -> Self {
        Self::hours(DEFAULT_TTL_HOURS)
    }
}

impl fmt::Display for TokenTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}h", self.hours)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Issues and verifies pickup tokens with a process-wide HMAC key.
pub struct PickupSigner {
    key: Zeroizing<Vec<u8>>,
    clock: Arc<dyn Clock>,
}

impl PickupSigner {
    pub fn new(key: &[u8], clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        if key.len() < MIN_KEY_BYTES {
            anyhow::bail!(
                "signing key must be at least {} bytes, got {}",
                MIN_KEY_BYTES,
                key.len()
            );
        }
        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            clock,
        })
    }

    /// Build a signer from a hex-encoded key (`keygen` output).
    pub fn from_hex(key_hex: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let key = Zeroizing::new(
            hex::decode(key_hex.trim())
                .map_err(|e| anyhow::anyhow!("signing key is not valid hex: {}", e))?,
        );
        Self::new(&key, clock)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Sign `parcel_id` with the current time.
    pub fn issue(&self, parcel_id: &str, ttl: TokenTtl) -> IssuedToken {
        let issued_at = self.clock.now();
        let secs = u64::try_from(issued_at.timestamp()).unwrap_or(0);
        let signed = format!("{}{}{}", parcel_id, SEPARATOR, to_base36(secs));
        let signature = URL_SAFE_NO_PAD.encode(self.signature(&signed));

        IssuedToken {
            token: format!("{}{}{}", signed, SEPARATOR, signature),
            issued_at,
            expires_at: issued_at + ttl.as_duration(),
        }
    }

    /// Check a token and return the parcel id it was issued for.
    ///
    /// The signature is checked before the timestamp is interpreted, so any
    /// edit to subject or timestamp surfaces as `Tampered`.
    pub fn verify(&self, token: &str, ttl: TokenTtl) -> Result<String, TokenError> {
        let mut parts = token.rsplitn(3, SEPARATOR);
        let (signature, issued, subject) = match (parts.next(), parts.next(), parts.next()) {
            (Some(sig), Some(ts), Some(sub)) if !sig.is_empty() && !ts.is_empty() && !sub.is_empty() => {
                (sig, ts, sub)
            }
            _ => return Err(TokenError::Malformed),
        };

        let signed = &token[..token.len() - signature.len() - SEPARATOR.len_utf8()];
        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| TokenError::Tampered)?;
        let expected = self.signature(signed);
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(TokenError::Tampered);
        }

        let issued_at = u64::from_str_radix(issued, 36)
            .ok()
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .ok_or(TokenError::Malformed)?;

        if self.clock.now() - issued_at > ttl.as_duration() {
            return Err(TokenError::Expired);
        }

        Ok(subject.to_string())
    }

    fn signature(&self, signed: &str) -> [u8; 32] {
        let mut mac = HmacSha256::new_from_slice(&self.key).expect("HMAC can take key of any size");
        mac.update(SALT);
        mac.update(signed.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }
}

impl fmt::Debug for PickupSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PickupSigner").field("key", &"<redacted>").finish()
    }
}

/// Generate a random signing key, hex encoded.
pub fn generate_key_hex() -> String {
    use rand::RngCore;

    let mut key = Zeroizing::new([0u8; MIN_KEY_BYTES]);
    rand::rngs::OsRng.fill_bytes(&mut key[..]);
    hex::encode(&key[..])
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
