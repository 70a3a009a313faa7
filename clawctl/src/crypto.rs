use base64::{Engine as _, engine::general_purpose};

/// Generates a gateway proxy token with 256 bits of entropy.
///
/// The token is formatted as `ck-{base64url_encoded_random_bytes}`. It is the only credential
/// a claw holds for inference; the real upstream key never leaves the controller.
///
/// # Examples
///
/// ```ignore
/// let token = generate_proxy_token();
/// assert!(token.starts_with("ck-"));
/// assert_eq!(token.len(), 46); // "ck-" + 43 base64url chars
/// ```
pub fn generate_proxy_token() -> String {
    let key_bytes: [u8; 32] = rand::random();
    format!("ck-{}", general_purpose::URL_SAFE_NO_PAD.encode(key_bytes))
}

/// Constant-time byte comparison to prevent timing attacks.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
