use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use nanoid::nanoid;
use sha2::{Digest, Sha256};

/// 64 characters from nanoid's URL-safe alphabet, inside RFC 7636's 43..=128.
pub fn generate_code_verifier() -> String {
    nanoid!(64)
}

/// `BASE64URL(SHA256(verifier))`
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash.as_slice())
}
