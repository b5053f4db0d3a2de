//! HMAC-SHA256 request signing for the control plane (C4, spec §6/§7).
//!
//! Every state-changing control-plane endpoint and the inbound orchestration
//! webhook carries a single `X-Signature: sha256=<64 hex>` header. The
//! verifier accepts if the digest matches either of two canonical forms of
//! the body: the raw bytes captured before parsing, or a deterministic
//! re-serialization of the parsed JSON with sorted object keys. Accepting
//! both means a caller that re-serializes a payload before signing it (a
//! common JSON library quirk) is not rejected just for not matching byte
//! for byte.

mod error;

pub use error::{SigningError, SigningResult};

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::env;
use subtle::ConstantTimeEq;

pub const SIGNATURE_HEADER: &str = "X-Signature";

type HmacSha256 = Hmac<Sha256>;

/// Resolves the shared signing secret from the environment variable named
/// in configuration (`SigningConfig::secret_env_var`), so the secret itself
/// never appears in a config file.
pub fn resolve_secret(secret_env_var: &str) -> SigningResult<String> {
    env::var(secret_env_var).map_err(|_| SigningError::SecretUnavailable(secret_env_var.to_string()))
}

fn hmac_hex(secret: &str, bytes: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(bytes);
    hex::encode(mac.finalize().into_bytes())
}

/// Sign `body`, returning the full `X-Signature` header value
/// (`sha256=<64 hex>`) over the raw bytes. Exposed mainly for tests and for
/// any internal client that calls its own control plane; the binary's HTTP
/// layer only ever verifies.
pub fn sign(body: &str, secret: &str) -> String {
    format!("sha256={}", hmac_hex(secret, body.as_bytes()))
}

/// Every canonical re-serialization of `body` that a signer is allowed to
/// have signed over: the raw bytes always, plus a sorted-key
/// re-serialization if `body` parses as JSON.
fn canonical_forms(body: &str) -> Vec<Vec<u8>> {
    let mut forms = vec![body.as_bytes().to_vec()];
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        if let Ok(sorted) = serde_json::to_string(&value) {
            if sorted.as_bytes() != forms[0] {
                forms.push(sorted.into_bytes());
            }
        }
    }
    forms
}

/// Verify a request's `X-Signature` header against `body`.
///
/// Returns `Ok(())` if the header is present, well-formed, and its digest
/// matches any canonical form of `body`. Errors distinguish a
/// missing/malformed header (401) from a digest mismatch (403), so the
/// HTTP layer can map each to the right status code via `ErrorKind`.
pub fn verify(body: &str, signature_header: Option<&str>, secret: &str) -> SigningResult<()> {
    let header = signature_header
        .filter(|h| !h.is_empty())
        .ok_or(SigningError::MissingHeader)?;

    let provided = header
        .strip_prefix("sha256=")
        .filter(|hex| hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or(SigningError::MissingHeader)?;

    let matches = canonical_forms(body).iter().any(|candidate| {
        let expected = hmac_hex(secret, candidate);
        expected.as_bytes().ct_eq(provided.as_bytes()).into()
    });

    if matches {
        Ok(())
    } else {
        Err(SigningError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SECRET: &str = "test-signing-secret";

    #[test]
    fn signature_produced_by_sign_is_accepted_by_verify() {
        let body = r#"{"hello":"world"}"#;
        let header = sign(body, SECRET);
        assert!(verify(body, Some(&header), SECRET).is_ok());
    }

    #[test]
    fn sorted_key_reserialization_is_also_accepted() {
        let value = json!({"b": 2, "a": 1});
        let canonical = serde_json::to_string(&value).unwrap();
        let header = sign(&canonical, SECRET);

        // a caller that signed the object with keys in a different order
        let unsorted = r#"{"b":2,"a":1}"#;
        assert!(verify(unsorted, Some(&header), SECRET).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = sign("original", SECRET);
        let result = verify("tampered", Some(&header), SECRET);
        assert!(matches!(result, Err(SigningError::InvalidSignature)));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = sign("body", SECRET);
        let result = verify("body", Some(&header), "other-secret");
        assert!(matches!(result, Err(SigningError::InvalidSignature)));
    }

    #[test]
    fn missing_header_is_rejected_before_touching_the_secret() {
        let result = verify("body", None, SECRET);
        assert!(matches!(result, Err(SigningError::MissingHeader)));
    }

    #[test]
    fn malformed_header_without_sha256_prefix_is_rejected() {
        let result = verify("body", Some("deadbeef"), SECRET);
        assert!(matches!(result, Err(SigningError::MissingHeader)));
    }

    #[test]
    fn header_with_wrong_length_digest_is_rejected() {
        let result = verify("body", Some("sha256=abc123"), SECRET);
        assert!(matches!(result, Err(SigningError::MissingHeader)));
    }
}
