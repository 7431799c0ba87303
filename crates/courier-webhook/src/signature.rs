//! Validates an inbound webhook request against a provider's declared
//! `SignatureSpec` before the adapter ever sees the body: HMAC-SHA256 over
//! the raw bytes (grounded in the teacher's `mediator::sign_webhook`), or a
//! compact JWT-HS256 whose claims bind the request body and URL.

use courier_adapter::{SignatureAlgorithm, SignatureSpec};
use hmac::{Hmac, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header '{0}'")]
    MissingHeader(&'static str),

    #[error("signature mismatch")]
    Mismatch,

    #[error("malformed signature header: {0}")]
    Malformed(String),
}

/// Validates `body`/`url` against `spec`, using `header_value` (the raw
/// value of `spec.header_name`, already looked up by the caller) and
/// `secret` (the channel config value named by `spec.secret_config_key`).
pub fn validate(spec: &SignatureSpec, header_value: Option<&str>, secret: &str, body: &[u8], url: &str) -> Result<(), SignatureError> {
    let header_value = header_value.ok_or(SignatureError::MissingHeader(spec.header_name))?;
    match spec.algorithm {
        SignatureAlgorithm::HmacSha256 => validate_hmac(header_value, secret, body),
        SignatureAlgorithm::JwtHs256 => validate_jwt(header_value, secret, body, url),
    }
}

fn validate_hmac(header_value: &str, secret: &str, body: &[u8]) -> Result<(), SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    let expected = hex::encode(mac.finalize().into_bytes());

    let candidate = header_value.strip_prefix("sha256=").unwrap_or(header_value);
    if constant_time_eq(expected.as_bytes(), candidate.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

#[derive(Debug, Deserialize)]
struct BodyUrlClaims {
    payload_hash: Option<String>,
    url_hash: Option<String>,
}

fn validate_jwt(token: &str, secret: &str, body: &[u8], url: &str) -> Result<(), SignatureError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<BodyUrlClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    if let Some(expected_payload_hash) = data.claims.payload_hash.as_deref() {
        let actual = hex::encode(Sha256::digest(body));
        if !constant_time_eq(actual.as_bytes(), expected_payload_hash.as_bytes()) {
            return Err(SignatureError::Mismatch);
        }
    }
    if let Some(expected_url_hash) = data.claims.url_hash.as_deref() {
        let actual = hex::encode(Sha256::digest(url.as_bytes()));
        if !constant_time_eq(actual.as_bytes(), expected_url_hash.as_bytes()) {
            return Err(SignatureError::Mismatch);
        }
    }
    Ok(())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    #[test]
    fn hmac_matches_expected_digest() {
        let secret = "topsecret";
        let body = b"hello world";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        let spec = SignatureSpec { header_name: "X-Sig", algorithm: SignatureAlgorithm::HmacSha256, secret_config_key: "secret" };
        assert!(validate(&spec, Some(&sig), secret, body, "https://example.com/hook").is_ok());
    }

    #[test]
    fn hmac_mismatch_is_rejected() {
        let spec = SignatureSpec { header_name: "X-Sig", algorithm: SignatureAlgorithm::HmacSha256, secret_config_key: "secret" };
        assert!(validate(&spec, Some("deadbeef"), "topsecret", b"hello world", "https://example.com/hook").is_err());
    }

    #[test]
    fn jwt_with_matching_body_and_url_hash_passes() {
        let secret = "jwtsecret";
        let body = b"{\"originator\":\"+31612345678\"}";
        let url = "https://example.com/c/mbd/abc/receive";
        let claims = json!({
            "payload_hash": format!("{:x}", Sha256::digest(body)),
            "url_hash": format!("{:x}", Sha256::digest(url.as_bytes())),
        });
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();

        let spec = SignatureSpec { header_name: "Messagebird-Signature-Jwt", algorithm: SignatureAlgorithm::JwtHs256, secret_config_key: "secret" };
        assert!(validate(&spec, Some(&token), secret, body, url).is_ok());
    }

    #[test]
    fn jwt_with_tampered_body_is_rejected() {
        let secret = "jwtsecret";
        let url = "https://example.com/c/mbd/abc/receive";
        let claims = json!({
            "payload_hash": format!("{:x}", Sha256::digest(b"original body")),
            "url_hash": format!("{:x}", Sha256::digest(url.as_bytes())),
        });
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap();

        let spec = SignatureSpec { header_name: "Messagebird-Signature-Jwt", algorithm: SignatureAlgorithm::JwtHs256, secret_config_key: "secret" };
        assert!(validate(&spec, Some(&token), secret, b"tampered body", url).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        let spec = SignatureSpec { header_name: "X-Sig", algorithm: SignatureAlgorithm::HmacSha256, secret_config_key: "secret" };
        assert!(matches!(validate(&spec, None, "topsecret", b"body", "url"), Err(SignatureError::MissingHeader("X-Sig"))));
    }
}
