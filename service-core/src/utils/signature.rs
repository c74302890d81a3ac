use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Errors returned when a signed asset URL does not verify.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("signed URL expired")]
    Expired,
    #[error("signature mismatch")]
    Mismatch,
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Generate the HMAC-SHA256 signature for a time-limited asset URL.
///
/// Format: HMAC-SHA256(storage_key|expires|disposition, secret), hex encoded.
/// The disposition is part of the payload so a preview URL cannot be turned
/// into a download URL by editing the query string.
pub fn generate_asset_signature(
    secret: &str,
    storage_key: &str,
    expires: i64,
    disposition: &str,
) -> Result<String, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;

    let payload = format!("{}|{}|{}", storage_key, expires, disposition);
    mac.update(payload.as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a signed asset URL using constant-time comparison.
///
/// `now` is the verifier's clock in unix seconds; a URL is valid up to and
/// including its `expires` second.
pub fn validate_asset_signature(
    secret: &str,
    storage_key: &str,
    expires: i64,
    disposition: &str,
    signature: &str,
    now: i64,
) -> Result<(), SignatureError> {
    if now > expires {
        return Err(SignatureError::Expired);
    }

    let expected = generate_asset_signature(secret, storage_key, expires, disposition)?;
    let expected_bytes = expected.as_bytes();
    let signature_bytes = signature.as_bytes();

    if expected_bytes.len() != signature_bytes.len() {
        return Err(SignatureError::Mismatch);
    }

    if bool::from(expected_bytes.ct_eq(signature_bytes)) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}
