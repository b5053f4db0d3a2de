//! Secret redaction for anything destined for logs or HTTP responses.
//!
//! Mirrors `fc_secrets::SecretService::mask_reference`'s "keep a hint, blank
//! the rest" approach, generalized to scan free-form strings for known
//! token shapes rather than only masking a known reference.

use regex::Regex;
use std::sync::OnceLock;

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            // bearer / authorization tokens
            Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-_\.]{10,}").unwrap(),
            // hex digests (hmac signatures, api keys)
            Regex::new(r"\b[a-f0-9]{32,}\b").unwrap(),
            // generic key=value secrets
            Regex::new(r"(?i)(api[_-]?key|token|secret|password)\s*[:=]\s*\S+").unwrap(),
        ]
    })
}

/// Replace any recognizable secret-shaped substring with `***REDACTED***`.
pub fn redact(input: &str) -> String {
    let mut out = input.to_string();
    for pattern in patterns() {
        out = pattern.replace_all(&out, "***REDACTED***").into_owned();
    }
    out
}

/// Mask a reference string the way a secrets provider mask would: keep the
/// first few characters (e.g. a provider prefix) and blank the rest.
pub fn mask_reference(reference: &str) -> String {
    if reference.len() <= 8 {
        return "***".to_string();
    }
    let visible = &reference[..6];
    format!("{visible}***")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_bearer_token() {
        let input = "Authorization: Bearer abcdef1234567890xyz";
        let redacted = redact(input);
        assert!(!redacted.contains("abcdef1234567890xyz"));
        assert!(redacted.contains("***REDACTED***"));
    }

    #[test]
    fn redacts_key_value_secret() {
        let input = "signing_secret=sssh-this-is-secret";
        let redacted = redact(input);
        assert!(!redacted.contains("sssh-this-is-secret"));
    }

    #[test]
    fn leaves_plain_text_untouched() {
        let input = "hello world, this is a normal reply";
        assert_eq!(redact(input), input);
    }

    #[test]
    fn mask_reference_keeps_prefix_hint() {
        let masked = mask_reference("aws-sm://prod/twinclaw/signing");
        assert!(masked.starts_with("aws-sm"));
        assert!(masked.ends_with("***"));
    }
}
