use crate::error::{VaultError, VaultResult};
use rand::RngCore;

/// Largest request served by `random_bytes`
pub const MAX_RANDOM_BYTES: usize = 128;

/// Cryptographically secure random bytes, 1..=128 per call
pub fn random_bytes(count: usize) -> VaultResult<Vec<u8>> {
    if count == 0 || count > MAX_RANDOM_BYTES {
        return Err(VaultError::Validation(format!(
            "Random byte count must be between 1 and {}, got {}",
            MAX_RANDOM_BYTES, count
        )));
    }
    let mut bytes = vec![0u8; count];
    rand::rng().fill_bytes(&mut bytes);
    Ok(bytes)
}
