//! Correlation id generation.
//!
//! Ids pair a `call` with its `call-ret`. They are 16 bytes from the system
//! CSPRNG (`ring::rand::SystemRandom`), encoded as unpadded base64url, which
//! keeps them at 22 characters on the wire.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

/// Random bytes per correlation id.
pub const CALL_ID_BYTES: usize = 16;

/// The system random number generator failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("system random number generator failed")]
pub struct EntropyError;

/// Source of correlation ids.
#[derive(Debug)]
pub struct IdGenerator {
    rng: SystemRandom,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// Draw a fresh id.
    pub fn next_id(&self) -> Result<String, EntropyError> {
        let mut bytes = [0u8; CALL_ID_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| EntropyError)?;
        Ok(BASE64.encode(bytes))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
