//! Webhook signature and shared-secret verification.
//!
//! Meta-style webhooks sign the raw request body:
//!
//! ```text
//! X-Hub-Signature-256: sha256=<hex of HMAC-SHA256(secret, body)>
//! ```
//!
//! Verification fails closed: once a secret is configured, an absent or
//! malformed header rejects the request.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq as _;

const BLOCK_SIZE: usize = 64;
const SIGNATURE_PREFIX: &str = "sha256=";

/// HMAC-SHA256 per RFC 2104. Keys longer than the SHA-256 block size are
/// hashed down first.
pub fn hmac_sha256(key: &[u8], message: &[u8]) -> [u8; 32] {
  let mut key_block = [0u8; BLOCK_SIZE];
  if key.len() > BLOCK_SIZE {
    key_block[..32].copy_from_slice(&Sha256::digest(key));
  } else {
    key_block[..key.len()].copy_from_slice(key);
  }

  let mut ipad = [0x36u8; BLOCK_SIZE];
  let mut opad = [0x5cu8; BLOCK_SIZE];
  for i in 0..BLOCK_SIZE {
    ipad[i] ^= key_block[i];
    opad[i] ^= key_block[i];
  }

  let inner = Sha256::new().chain_update(ipad).chain_update(message).finalize();
  let outer = Sha256::new().chain_update(opad).chain_update(inner).finalize();
  outer.into()
}

/// Constant-time equality for shared secrets (admin key, signatures).
/// Length is not hidden; the comparison of the bytes is.
pub fn secrets_match(a: &[u8], b: &[u8]) -> bool {
  a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Check an `X-Hub-Signature-256` header against the raw body.
///
/// - verification disabled: always accepted
/// - no secret configured while verification is enabled: always rejected
/// - absent header, wrong prefix, or non-hex digest: rejected
pub fn verify_webhook_signature(
  enabled: bool,
  secret: Option<&str>,
  header: Option<&str>,
  body: &[u8],
) -> bool {
  if !enabled {
    return true;
  }
  let Some(secret) = secret.filter(|s| !s.is_empty()) else {
    return false;
  };
  let Some(claimed_hex) = header.and_then(|h| h.strip_prefix(SIGNATURE_PREFIX)) else {
    return false;
  };
  let Ok(claimed) = hex::decode(claimed_hex.trim()) else {
    return false;
  };

  let expected = hmac_sha256(secret.as_bytes(), body);
  secrets_match(&claimed, &expected)
}

#[cfg(test)]
mod tests {
  use super::*;

  // RFC 4231 test case 2.
  #[test]
  fn hmac_matches_rfc4231_case_2() {
    let tag = hmac_sha256(b"Jefe", b"what do ya want for nothing?");
    assert_eq!(
      hex::encode(tag),
      "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
    );
  }

  // RFC 4231 test case 1.
  #[test]
  fn hmac_matches_rfc4231_case_1() {
    let key = [0x0b_u8; 20];
    let tag = hmac_sha256(&key, b"Hi There");
    assert_eq!(
      hex::encode(tag),
      "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
    );
  }

  // RFC 4231 test case 6 exercises the long-key path.
  #[test]
  fn hmac_hashes_oversized_keys() {
    let key = [0xaa_u8; 131];
    let tag = hmac_sha256(&key, b"Test Using Larger Than Block-Size Key - Hash Key First");
    assert_eq!(
      hex::encode(tag),
      "60e431591ee0b67f0d8a26aacbf5b77f8e0bc6213728c5140546040f0ee37f54"
    );
  }

  #[test]
  fn valid_signature_is_accepted() {
    let body = b"{\"entry\":[]}";
    let header = format!("sha256={}", hex::encode(hmac_sha256(b"secret", body)));
    assert!(verify_webhook_signature(true, Some("secret"), Some(&header), body));
  }

  #[test]
  fn tampered_body_is_rejected() {
    let header = format!(
      "sha256={}",
      hex::encode(hmac_sha256(b"secret", b"{\"entry\":[]}"))
    );
    assert!(!verify_webhook_signature(
      true,
      Some("secret"),
      Some(&header),
      b"{\"entry\":[{}]}"
    ));
  }

  #[test]
  fn missing_or_malformed_header_fails_closed() {
    assert!(!verify_webhook_signature(true, Some("secret"), None, b"x"));
    assert!(!verify_webhook_signature(true, Some("secret"), Some("md5=abc"), b"x"));
    assert!(!verify_webhook_signature(
      true,
      Some("secret"),
      Some("sha256=nothex"),
      b"x"
    ));
  }

  #[test]
  fn missing_secret_fails_closed_when_enabled() {
    assert!(!verify_webhook_signature(true, None, Some("sha256=00"), b"x"));
    assert!(!verify_webhook_signature(true, Some(""), Some("sha256=00"), b"x"));
  }

  #[test]
  fn disabled_verification_accepts_anything() {
    assert!(verify_webhook_signature(false, None, None, b"x"));
  }

  #[test]
  fn secret_comparison_requires_equal_bytes() {
    assert!(secrets_match(b"abc", b"abc"));
    assert!(!secrets_match(b"abc", b"abd"));
    assert!(!secrets_match(b"abc", b"abcd"));
  }
}
