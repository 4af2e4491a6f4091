use base64::{engine, Engine};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

pub const SIGNATURE_HEADER: &str = "x-twilio-signature";

/// Compute the provider's request signature: HMAC-SHA1 over the canonical URL followed by every
/// form parameter as `key || value`, sorted by key (then value), base64 encoded.
pub fn compute_signature(params: &[(String, String)], shared_secret: &str, canonical_url: &str) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();

    // HMAC accepts keys of any length
    let mut mac = match HmacSha1::new_from_slice(shared_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(canonical_url.as_bytes());
    for (key, value) in sorted {
        mac.update(key.as_bytes());
        mac.update(value.as_bytes());
    }
    engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Check an inbound webhook. A missing header is never valid.
pub fn validate_signature(
    params: &[(String, String)],
    signature: Option<&str>,
    shared_secret: &str,
    canonical_url: &str,
) -> bool {
    let Some(signature) = signature else {
        return false;
    };
    let expected = compute_signature(params, shared_secret, canonical_url);
    if expected.is_empty() {
        return false;
    }
    expected.as_bytes().ct_eq(signature.trim().as_bytes()).into()
}
