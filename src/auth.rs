//! Request signing for the FieldClimate API.
//!
//! The provider has shipped two incompatible HMAC-SHA256 schemes. Both are
//! stateless: every call (including every retry) computes a fresh timestamp
//! and signature.

use clap::ValueEnum;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, DATE};
use reqwest::Method;
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::credentials::ApiKeys;
use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthScheme {
    /// `Authorization: hmac <public>:<signature>` keyed by the HTTP `Date` header
    #[default]
    HmacDate,
    /// `X-Public-Key` / `X-Signature` / `X-Timestamp` keyed by a Unix timestamp, body included
    SignedHeaders,
}

/// Produces the authentication headers for one outbound request.
pub trait Signer: Send + Sync {
    fn sign(
        &self,
        method: &Method,
        path: &str,
        now: SystemTime,
        body: Option<&str>,
    ) -> Result<HeaderMap, ApiError>;
}

/// Hex-encoded HMAC-SHA256 of `message` keyed by `secret`.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, ApiError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ApiError::Generic(format!("Invalid HMAC key: {}", e)))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

fn header_value(value: &str) -> Result<HeaderValue, ApiError> {
    HeaderValue::from_str(value)
        .map_err(|e| ApiError::Generic(format!("Invalid header value: {}", e)))
}

/// Signs `METHOD + path + date + public_key` and sends the date in the `Date` header.
pub struct HmacDateSigner {
    keys: ApiKeys,
}

impl HmacDateSigner {
    pub fn new(keys: ApiKeys) -> Self {
        Self { keys }
    }
}

impl Signer for HmacDateSigner {
    fn sign(
        &self,
        method: &Method,
        path: &str,
        now: SystemTime,
        _body: Option<&str>,
    ) -> Result<HeaderMap, ApiError> {
        let date = httpdate::fmt_http_date(now);
        let message = format!(
            "{}{}{}{}",
            method.as_str(),
            path,
            date,
            self.keys.public_key
        );
        let signature = hmac_sha256_hex(&self.keys.private_key, &message)?;

        let mut headers = HeaderMap::new();
        headers.insert(DATE, header_value(&date)?);
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("hmac {}:{}", self.keys.public_key, signature))?,
        );
        Ok(headers)
    }
}

/// Signs `method + path + unix_seconds [+ body]` with the method lowercased.
pub struct SignedHeadersSigner {
    keys: ApiKeys,
}

impl SignedHeadersSigner {
    pub fn new(keys: ApiKeys) -> Self {
        Self { keys }
    }
}

impl Signer for SignedHeadersSigner {
    fn sign(
        &self,
        method: &Method,
        path: &str,
        now: SystemTime,
        body: Option<&str>,
    ) -> Result<HeaderMap, ApiError> {
        let timestamp = now
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ApiError::Generic(format!("System clock before Unix epoch: {}", e)))?
            .as_secs();
        let message = format!(
            "{}{}{}{}",
            method.as_str().to_lowercase(),
            path,
            timestamp,
            body.unwrap_or("")
        );
        let signature = hmac_sha256_hex(&self.keys.private_key, &message)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-public-key"),
            header_value(&self.keys.public_key)?,
        );
        headers.insert(
            HeaderName::from_static("x-signature"),
            header_value(&signature)?,
        );
        headers.insert(
            HeaderName::from_static("x-timestamp"),
            header_value(&timestamp.to_string())?,
        );
        Ok(headers)
    }
}

pub fn build_signer(scheme: AuthScheme, keys: ApiKeys) -> Box<dyn Signer> {
    match scheme {
        AuthScheme::HmacDate => Box::new(HmacDateSigner::new(keys)),
        AuthScheme::SignedHeaders => Box::new(SignedHeadersSigner::new(keys)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn keys() -> ApiKeys {
        ApiKeys {
            public_key: "pub-123".to_string(),
            private_key: "secret-456".to_string(),
        }
    }

    fn fixed_time() -> SystemTime {
        // 2023-11-14T22:13:20Z
        UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_hmac_matches_rfc4231_case_2() {
        let sig = hmac_sha256_hex("Jefe", "what do ya want for nothing?").unwrap();
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_date_signer_headers() {
        let signer = HmacDateSigner::new(keys());
        let headers = signer
            .sign(&Method::GET, "/user/stations", fixed_time(), None)
            .unwrap();

        let date = headers.get(DATE).unwrap().to_str().unwrap();
        assert_eq!(date, "Tue, 14 Nov 2023 22:13:20 GMT");

        let expected = hmac_sha256_hex(
            "secret-456",
            "GET/user/stationsTue, 14 Nov 2023 22:13:20 GMTpub-123",
        )
        .unwrap();
        let auth = headers.get(AUTHORIZATION).unwrap().to_str().unwrap();
        assert_eq!(auth, format!("hmac pub-123:{}", expected));
    }

    #[test]
    fn test_signed_headers_signer_covers_body() {
        let signer = SignedHeadersSigner::new(keys());
        let without_body = signer
            .sign(&Method::POST, "/station/X", fixed_time(), None)
            .unwrap();
        let with_body = signer
            .sign(&Method::POST, "/station/X", fixed_time(), Some("{\"a\":1}"))
            .unwrap();

        assert_eq!(without_body.get("x-public-key").unwrap(), "pub-123");
        assert_eq!(without_body.get("x-timestamp").unwrap(), "1700000000");
        assert_ne!(
            without_body.get("x-signature").unwrap(),
            with_body.get("x-signature").unwrap()
        );

        let expected =
            hmac_sha256_hex("secret-456", "post/station/X1700000000{\"a\":1}").unwrap();
        assert_eq!(with_body.get("x-signature").unwrap().to_str().unwrap(), expected);
    }

    #[test]
    fn test_signature_changes_with_time() {
        let signer = build_signer(AuthScheme::HmacDate, keys());
        let first = signer
            .sign(&Method::GET, "/user/stations", fixed_time(), None)
            .unwrap();
        let later = signer
            .sign(
                &Method::GET,
                "/user/stations",
                fixed_time() + Duration::from_secs(1),
                None,
            )
            .unwrap();
        assert_ne!(first.get(AUTHORIZATION), later.get(AUTHORIZATION));
    }
}
