//! PKCE verifier and S256 challenge

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Only challenge method sent to providers
pub const CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

/// Fresh verifier from 64 random bytes, with its challenge
#[must_use]
pub fn generate_pkce_pair() -> PkcePair {
    let mut random = [0u8; VERIFIER_BYTES];
    rand::rng().fill_bytes(&mut random);

    let code_verifier = URL_SAFE_NO_PAD.encode(random);
    let code_challenge = code_challenge_s256(&code_verifier);

    PkcePair {
        code_verifier,
        code_challenge,
    }
}

#[must_use]
pub fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
