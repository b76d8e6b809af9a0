//! Bearer-token authentication for the API and HMAC signature verification
//! for webhooks.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::config::AuthConfig;
use crate::state::AppContext;

fn check_auth(auth: &AuthConfig, bearer: Option<&str>) -> Result<(), (StatusCode, &'static str)> {
    if !auth.enabled {
        return Ok(());
    }

    let Some(expected) = auth.api_key.as_deref() else {
        return Err((StatusCode::UNAUTHORIZED, "Authentication required"));
    };

    match bearer {
        Some(token) if token == expected => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "Authentication required")),
    }
}

/// Middleware for API key authentication
pub async fn api_auth_middleware(
    State(ctx): State<AppContext>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, (StatusCode, &'static str)> {
    let bearer = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    check_auth(&ctx.config.server.auth, bearer)?;

    Ok(next.run(request).await)
}

/// Generate a random API key for programmatic access
pub fn generate_api_key() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Generate a random webhook signature secret
pub fn generate_secret() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Verify an HMAC-SHA256 webhook signature (format: `sha256=<hex>`).
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };

    mac.update(body);

    let expected_sig = signature.strip_prefix("sha256=").unwrap_or(signature);

    let expected_bytes = match hex::decode(expected_sig) {
        Ok(b) => b,
        Err(_) => return false,
    };

    mac.verify_slice(&expected_bytes).is_ok()
}

/// Compute the signature a sender should attach. Used by tests and the
/// documentation examples; senders in other languages mirror this.
pub fn sign_webhook_body(secret: &str, body: &[u8]) -> Option<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
