//! HMAC-SHA-256 over canonical payload bytes, lowercase hex on the wire.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub fn sign(secret: &str, payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time verification. Signatures that fail to decode or have the
/// wrong length are rejected, never panicked on.
pub fn verify(secret: &str, payload: &[u8], submitted: &str) -> bool {
    let Ok(submitted) = hex::decode(submitted.trim()) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("hmac accepts any key length"));
    mac.update(payload);
    mac.verify_slice(&submitted).is_ok()
}
