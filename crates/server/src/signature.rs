use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

/// Verify the webhook signature: base64(HMAC-SHA256(channel secret, raw
/// body)) against the `X-Signature` header. Comparison happens inside
/// `verify_slice`, which is constant-time, so a spoofed tenant cannot feel
/// its way toward a valid signature.
pub fn verify_signature(channel_secret: &str, body: &[u8], provided: &str) -> bool {
    if channel_secret.is_empty() || provided.is_empty() {
        return false;
    }

    let Ok(provided_mac) = BASE64.decode(provided.trim()) else {
        return false;
    };

    type HmacSha256 = Hmac<Sha256>;
    let mut mac = match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&provided_mac).is_ok()
}

/// Sign a body the way the platform does. Used by tests and the tenant
/// onboarding smoke checks.
pub fn compute_signature(channel_secret: &str, body: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(channel_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    BASE64.encode(mac.finalize().into_bytes())
}
