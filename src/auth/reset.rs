use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Reset tokens are valid for this long after issuance.
pub const RESET_TOKEN_WINDOW: Duration = Duration::minutes(10);

const RESET_TOKEN_BYTES: usize = 32;

/// A freshly generated reset token. `raw` goes to the user, `hash` to storage.
#[derive(Debug, Clone)]
pub struct GeneratedResetToken {
    pub raw: String,
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

pub struct ResetTokenManager;

impl ResetTokenManager {
    pub fn generate() -> GeneratedResetToken {
        Self::generate_at(OffsetDateTime::now_utc())
    }

    pub fn generate_at(now: OffsetDateTime) -> GeneratedResetToken {
        let mut bytes = [0u8; RESET_TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let hash = Self::hash_token(&raw);
        GeneratedResetToken {
            raw,
            hash,
            expires_at: now + RESET_TOKEN_WINDOW,
        }
    }

    /// Deterministic SHA-256 digest, hex encoded. Used both to store and to look up.
    pub fn hash_token(raw: &str) -> String {
        hex::encode(Sha256::digest(raw.as_bytes()))
    }

    /// Both the digest and the expiry must hold.
    pub fn verify(
        raw: &str,
        stored_hash: &str,
        stored_expiry: OffsetDateTime,
        now: OffsetDateTime,
    ) -> bool {
        let computed = Self::hash_token(raw);
        let digest_matches = constant_time_eq(computed.as_bytes(), stored_hash.as_bytes());
        let unexpired = now < stored_expiry;
        digest_matches && unexpired
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
