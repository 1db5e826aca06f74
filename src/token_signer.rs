//! Tamper-proof, time-limited tokens.
//!
//! A token is `encode(salt || expires_at || mac) "$" text`, where the mac is an HMAC-SHA256 over
//! the salt, the big-endian expiry in Unix seconds and the text.
//! Tokens are verified without any I/O, so repeated verification attempts cost only a hash.

use crate::config::AuthConfig;
use crate::cookie_codec;
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt::{Debug, Formatter};
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

const SALT_LENGTH: usize = 4;
const EXPIRY_LENGTH: usize = 8;
const MAC_LENGTH: usize = 32;
const TOKEN_LENGTH: usize = SALT_LENGTH + EXPIRY_LENGTH + MAC_LENGTH;

/// The outcome of verifying a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// Signed by this signer and not yet expired.
    Valid,
    /// Signed by this signer, but past its lifetime.
    Expired,
    /// Not a token of this signer: garbled, forged, or signed with another key.
    Invalid,
}

/// Issues and verifies signed tokens.
pub trait TokenSigner: Debug + Send + Sync {
    /// Create a token carrying `text`, valid from `now` for the signer's lifetime.
    fn new_token(&self, text: &str, now: DateTime<Utc>) -> anyhow::Result<String>;

    /// Verify that `token` was issued by this signer for `text`.
    fn check_token(
        &self,
        token: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TokenCheck>;
}

/// [`TokenSigner`] keyed with a secret that lives as long as the process.
#[derive(Clone, Copy)]
pub struct HmacTokenSigner {
    key: [u8; 32],
    lifetime: Duration,
}

impl HmacTokenSigner {
    /// Create a signer with a fresh random key.
    pub fn new(lifetime: Duration) -> Self {
        let mut key = [0; 32];
        OsRng.fill_bytes(&mut key);
        Self::with_key(key, lifetime)
    }

    /// Create a signer with a fresh random key issuing nonces for `config.nonce_lifetime()`.
    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.nonce_lifetime())
    }

    /// Create a signer with the given key.
    pub fn with_key(key: [u8; 32], lifetime: Duration) -> Self {
        Self { key, lifetime }
    }

    /// The lifetime of issued tokens.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    fn mac(&self, head: &[u8], text: &str) -> anyhow::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|error| anyhow!("cannot key token signer: {error}"))?;
        mac.update(head);
        mac.update(text.as_bytes());
        Ok(mac)
    }
}

impl TokenSigner for HmacTokenSigner {
    fn new_token(&self, text: &str, now: DateTime<Utc>) -> anyhow::Result<String> {
        let lifetime = i64::try_from(self.lifetime.as_secs())?;
        let expires_at = now.timestamp().saturating_add(lifetime);

        let mut buffer = Vec::with_capacity(TOKEN_LENGTH);
        let mut salt = [0; SALT_LENGTH];
        OsRng.fill_bytes(&mut salt);
        buffer.extend_from_slice(&salt);
        buffer.extend_from_slice(&expires_at.to_be_bytes());
        let mac = self.mac(&buffer, text)?.finalize().into_bytes();
        buffer.extend_from_slice(&mac);

        Ok(format!("{}${text}", cookie_codec::encode(&buffer)))
    }

    fn check_token(
        &self,
        token: &str,
        text: &str,
        now: DateTime<Utc>,
    ) -> anyhow::Result<TokenCheck> {
        let Some((encoded, received_text)) = token.split_once('$') else {
            return Ok(TokenCheck::Invalid);
        };
        if received_text != text {
            return Ok(TokenCheck::Invalid);
        }
        let Some(decoded) = cookie_codec::decode(encoded) else {
            return Ok(TokenCheck::Invalid);
        };
        if decoded.len() != TOKEN_LENGTH {
            return Ok(TokenCheck::Invalid);
        }

        let (head, mac) = decoded.split_at(SALT_LENGTH + EXPIRY_LENGTH);
        if self.mac(head, text)?.verify_slice(mac).is_err() {
            return Ok(TokenCheck::Invalid);
        }

        let mut expiry = [0; EXPIRY_LENGTH];
        expiry.copy_from_slice(&head[SALT_LENGTH..]);
        if now.timestamp() > i64::from_be_bytes(expiry) {
            Ok(TokenCheck::Expired)
        } else {
            Ok(TokenCheck::Valid)
        }
    }
}

impl Debug for HmacTokenSigner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokenSigner")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}
