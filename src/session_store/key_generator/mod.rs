//! Generation of session keys, session ids and XSRF tokens.

use crate::cookie_codec;
use crate::session::{AccountId, SessionKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU32, Ordering};

/// Number of random bytes in a generated token.
pub const RANDOM_BYTES: usize = 20;

/// A type with the ability to generate unguessable tokens bound to an account.
///
/// Tokens have the layout `encode(varint(account) || random bytes)`; the same layout is used
/// for session keys, session ids and XSRF tokens.
pub trait SessionKeyGenerator: Send + Sync {
    /// Generate a token, i.e. a string that is a valid HTTP cookie value.
    fn generate_token(&self, account_id: AccountId) -> String;

    /// Generate a session key.
    fn generate_key(&self, account_id: AccountId) -> SessionKey {
        SessionKey::from_token(self.generate_token(account_id))
    }
}

/// The default key generator with focus on security.
/// It draws [`RANDOM_BYTES`] bytes from the operating system's random source.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSessionKeyGenerator;

impl SessionKeyGenerator for DefaultSessionKeyGenerator {
    fn generate_token(&self, account_id: AccountId) -> String {
        let mut random = [0; RANDOM_BYTES];
        OsRng.fill_bytes(&mut random);
        encode_token(account_id, &random)
    }
}

/// A debug key generator whose "random" bytes are an ascending counter.
#[derive(Debug, Default)]
pub struct DebugSessionKeyGenerator {
    next_index: AtomicU32,
}

impl DebugSessionKeyGenerator {
    /// The token the `index`th call of [`SessionKeyGenerator::generate_token`] returns.
    pub fn token_at(account_id: AccountId, index: u32) -> String {
        let mut bytes = [0; RANDOM_BYTES];
        bytes[RANDOM_BYTES - 4..].copy_from_slice(&index.to_be_bytes());
        encode_token(account_id, &bytes)
    }
}

impl SessionKeyGenerator for DebugSessionKeyGenerator {
    fn generate_token(&self, account_id: AccountId) -> String {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        Self::token_at(account_id, index)
    }
}

fn encode_token(account_id: AccountId, random: &[u8; RANDOM_BYTES]) -> String {
    let mut buffer = Vec::with_capacity(5 + RANDOM_BYTES);
    cookie_codec::write_var_u32(&mut buffer, account_id.get());
    buffer.extend_from_slice(random);
    cookie_codec::encode(&buffer)
}

/// The account a generated token was minted for, if it has the generated layout.
pub fn account_of_token(token: &str) -> Option<AccountId> {
    let bytes = cookie_codec::decode(token)?;
    let (account, used) = cookie_codec::read_var_u32(&bytes)?;
    (bytes.len() - used == RANDOM_BYTES).then_some(AccountId::new(account))
}
