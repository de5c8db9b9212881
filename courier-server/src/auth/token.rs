//! Bearer credential helpers.
//!
//! Tokens are opaque to the delivery core. Only their SHA-256 digest is
//! stored.

use axum::http::{HeaderMap, header};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use cookie::Cookie;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Cookie consulted when neither header nor query parameter carries a token.
pub const TOKEN_COOKIE: &str = "courier-token";

#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Generates a fresh URL-safe token.
#[must_use]
pub fn new_token() -> String {
    let mut raw = [0u8; 32];
    raw[..16].copy_from_slice(Uuid::new_v4().as_bytes());
    raw[16..].copy_from_slice(Uuid::new_v4().as_bytes());
    URL_SAFE_NO_PAD.encode(raw)
}

/// Finds the credential presented with a request: `Authorization: Bearer`,
/// then the `token` query parameter, then the [`TOKEN_COOKIE`] cookie.
#[must_use]
pub fn extract_token(headers: &HeaderMap, query_token: Option<&str>) -> Option<String> {
    bearer_token(headers)
        .or_else(|| query_token.map(str::to_string))
        .or_else(|| cookie_token(headers))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.to_string())
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| Cookie::split_parse(value).flatten())
        .find(|cookie| cookie.name() == TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
}
