//! Identity id lookup from the bearer token.
//!
//! Access tokens are JWTs; when the caller does not know its identity id, the
//! claims segment usually carries it. The signature is not verified, the
//! remote service does that.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

/// Claim keys checked in order of preference.
const IDENTITY_CLAIMS: [&str; 4] = ["identity_canonical_id", "identity_id", "sub", "user_id"];

/// Extract the identity id from a JWT access token's claims.
///
/// Returns `None` for tokens that are not JWTs or carry none of the known
/// claims.
pub fn identity_id_from_token(token: &str) -> Option<String> {
    let claims = token.split('.').nth(1)?;
    // Tolerate padded segments; URL_SAFE_NO_PAD rejects trailing '='
    let bytes = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;

    IDENTITY_CLAIMS.iter().find_map(|key| {
        claims
            .get(*key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    })
}
