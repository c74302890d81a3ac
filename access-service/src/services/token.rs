//! Token wire format, hashing and masking.
//!
//! A token is `<scope prefix><64 hex chars>`, e.g. `F_3f9c…` for a family
//! token. The hex segment is 32 random bytes. Only a salted SHA-256 of the
//! full token is persisted, together with a short unsalted lookup key that
//! narrows the search without being usable as a verifier.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::ScopeKind;

/// Length of every scope prefix (`E_`, `C_`, `F_`).
pub const PREFIX_LEN: usize = 2;

/// Length of the hexadecimal segment after the prefix.
pub const HEX_SEGMENT_LEN: usize = 64;

/// Anything shorter is malformed regardless of shape.
pub const MIN_TOKEN_LEN: usize = 20;

/// Number of hex chars of SHA-256(token) kept as the lookup key.
const LOOKUP_KEY_LEN: usize = 16;

const TOKEN_RANDOM_BYTES: usize = 32;
const SALT_BYTES: usize = 16;

/// Mint a new plaintext token for `kind`.
///
/// The plaintext is returned to the caller once and never stored.
pub fn generate_token(kind: ScopeKind) -> String {
    let mut random_bytes = [0u8; TOKEN_RANDOM_BYTES];
    OsRng.fill_bytes(&mut random_bytes);
    format!("{}{}", kind.token_prefix(), hex::encode(random_bytes))
}

/// Generate a fresh per-token salt, hex encoded.
pub fn generate_salt() -> String {
    let mut salt = [0u8; SALT_BYTES];
    OsRng.fill_bytes(&mut salt);
    hex::encode(salt)
}

/// Check the structural shape of a presented token.
///
/// Returns the scope announced by the prefix when the token is well formed.
/// This performs no I/O and costs the same for every input of a given length.
pub fn parse_token_format(token: &str) -> Option<ScopeKind> {
    if token.len() < MIN_TOKEN_LEN
        || token.len() != PREFIX_LEN + HEX_SEGMENT_LEN
        || !token.is_ascii()
    {
        return None;
    }

    let (prefix, body) = token.split_at(PREFIX_LEN);
    let kind = ScopeKind::from_token_prefix(prefix)?;

    if body.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(kind)
    } else {
        None
    }
}

/// Lookup key stored next to the salted hash.
pub fn lookup_key(token: &str) -> String {
    let digest = hex::encode(Sha256::digest(token.as_bytes()));
    digest[..LOOKUP_KEY_LEN].to_string()
}

/// Salted SHA-256 of the token, hex encoded.
pub fn hash_token(token: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison of a presented token against a stored hash.
pub fn verify_token(token: &str, salt: &str, stored_hash: &str) -> bool {
    let computed = hash_token(token, salt);
    let computed = computed.as_bytes();
    let stored = stored_hash.as_bytes();

    computed.len() == stored.len() && bool::from(computed.ct_eq(stored))
}

/// Short, non-reversible rendering of a token for logs and audit rows.
///
/// Keeps the scope prefix plus four characters for well-formed tokens, and
/// never more than a third of the input otherwise.
pub fn mask_token(token: &str) -> String {
    let keep = if parse_token_format(token).is_some() {
        PREFIX_LEN + 4
    } else {
        (token.chars().count() / 3).min(PREFIX_LEN + 4)
    };

    let visible: String = token.chars().take(keep).collect();
    format!("{}…", visible)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_token_shape() {
        for kind in [ScopeKind::Event, ScopeKind::Course, ScopeKind::Family] {
            let token = generate_token(kind);
            assert_eq!(token.len(), PREFIX_LEN + HEX_SEGMENT_LEN);
            assert!(token.starts_with(kind.token_prefix()));
            assert_eq!(parse_token_format(&token), Some(kind));
        }
    }

    #[test]
    fn test_generated_tokens_are_unique() {
        assert_ne!(
            generate_token(ScopeKind::Family),
            generate_token(ScopeKind::Family)
        );
    }

    #[test]
    fn test_short_tokens_are_malformed() {
        assert_eq!(parse_token_format(""), None);
        assert_eq!(parse_token_format("F_abc"), None);
        assert_eq!(parse_token_format(&format!("F_{}", "a".repeat(17))), None);
    }

    #[test]
    fn test_unknown_prefix_is_malformed() {
        assert_eq!(parse_token_format(&format!("X_{}", "a".repeat(64))), None);
        assert_eq!(parse_token_format(&format!("f_{}", "a".repeat(64))), None);
    }

    #[test]
    fn test_non_hex_body_is_malformed() {
        assert_eq!(parse_token_format(&format!("E_{}z", "a".repeat(63))), None);
        assert_eq!(parse_token_format(&format!("E_{}", "a".repeat(65))), None);
    }

    #[test]
    fn test_hash_depends_on_salt() {
        let token = generate_token(ScopeKind::Event);
        let (salt_a, salt_b) = (generate_salt(), generate_salt());

        assert_ne!(hash_token(&token, &salt_a), hash_token(&token, &salt_b));
        assert!(verify_token(&token, &salt_a, &hash_token(&token, &salt_a)));
        assert!(!verify_token(&token, &salt_b, &hash_token(&token, &salt_a)));
    }

    #[test]
    fn test_lookup_key_is_not_the_hash() {
        let token = generate_token(ScopeKind::Course);
        let key = lookup_key(&token);

        assert_eq!(key.len(), 16);
        assert!(!token.contains(&key));
    }

    #[test]
    fn test_mask_keeps_only_prefix() {
        let token = format!("F_{}", "ab".repeat(32));
        assert_eq!(mask_token(&token), "F_abab…");

        // Malformed input never reveals more than a third of itself.
        assert_eq!(mask_token("abcdef"), "ab…");
        assert_eq!(mask_token(""), "…");
    }
}
