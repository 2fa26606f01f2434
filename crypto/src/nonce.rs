//! Random nonce generation.

use audit_types::Nonce;
use rand::RngCore;

use crate::CryptoError;

/// Nonce length used when the configuration does not say otherwise.
pub const DEFAULT_NONCE_LEN: usize = 20;

/// Generate a fresh random nonce of `len` bytes from the OS RNG.
pub fn make_nonce(len: usize) -> Result<Nonce, CryptoError> {
    if len == 0 {
        return Err(CryptoError::EmptyNonce);
    }
    let mut bytes = vec![0u8; len];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    Ok(Nonce::new(bytes))
}
