//! Shared fixtures: a wiremock-backed issuer and ephemeral signing keys
#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::jwk::{
    AlgorithmParameters, CommonParameters, EllipticCurve, EllipticCurveKeyParameters,
    EllipticCurveKeyType, Jwk, KeyAlgorithm, PublicKeyUse,
};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use serde_json::json;
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dpop_verify::VerifierConfig;

/// Ephemeral P-256 key pair for signing test tokens and proofs
pub struct TestKey {
    encoding_key: EncodingKey,
    x: String,
    y: String,
}

impl TestKey {
    pub fn generate() -> Self {
        let secret = p256::SecretKey::random(&mut OsRng);
        let der = secret.to_pkcs8_der().expect("encode test key");
        let encoding_key = EncodingKey::from_ec_der(der.as_bytes());

        let point = secret.public_key().to_encoded_point(false);
        Self {
            encoding_key,
            x: URL_SAFE_NO_PAD.encode(point.x().expect("x coordinate")),
            y: URL_SAFE_NO_PAD.encode(point.y().expect("y coordinate")),
        }
    }

    /// Public JWK as it would appear in the issuer's key set
    pub fn public_jwk(&self, kid: &str) -> Jwk {
        Jwk {
            common: CommonParameters {
                public_key_use: Some(PublicKeyUse::Signature),
                key_operations: None,
                key_algorithm: Some(KeyAlgorithm::ES256),
                key_id: Some(kid.to_string()),
                x509_url: None,
                x509_chain: None,
                x509_sha1_fingerprint: None,
                x509_sha256_fingerprint: None,
            },
            algorithm: AlgorithmParameters::EllipticCurve(EllipticCurveKeyParameters {
                key_type: EllipticCurveKeyType::EC,
                curve: EllipticCurve::P256,
                x: self.x.clone(),
                y: self.y.clone(),
            }),
        }
    }

    /// The bare public JWK a client would embed in its proofs
    pub fn proof_jwk(&self) -> serde_json::Value {
        json!({ "kty": "EC", "crv": "P-256", "x": self.x, "y": self.y })
    }

    /// RFC 7638 thumbprint, computed independently of the crate under test
    pub fn thumbprint(&self) -> String {
        let canonical = format!(
            r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#,
            self.x, self.y
        );
        URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
    }

    pub fn sign_access_token(&self, kid: &str, claims: &serde_json::Value) -> String {
        self.sign_access_token_with_typ(kid, Some("at+jwt"), claims)
    }

    pub fn sign_access_token_with_typ(
        &self,
        kid: &str,
        typ: Option<&str>,
        claims: &serde_json::Value,
    ) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.typ = typ.map(str::to_string);
        header.kid = Some(kid.to_string());
        encode(&header, claims, &self.encoding_key).expect("sign access token")
    }

    pub fn sign_proof(&self, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.typ = Some("dpop+jwt".to_string());
        header.jwk = Some(serde_json::from_value(self.proof_jwk()).expect("proof jwk"));
        encode(&header, claims, &self.encoding_key).expect("sign proof")
    }
}

/// JWK set body for the given `(kid, key)` pairs
pub fn jwk_set(entries: &[(&str, &TestKey)]) -> serde_json::Value {
    let keys: Vec<serde_json::Value> = entries
        .iter()
        .map(|(kid, key)| serde_json::to_value(key.public_jwk(kid)).expect("serialize jwk"))
        .collect();
    json!({ "keys": keys })
}

/// Issuer double serving a key set over wiremock
pub struct MockIssuer {
    pub server: MockServer,
    pub issuer: String,
    pub jwks_endpoint: String,
}

impl MockIssuer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();
        let jwks_endpoint = format!("{issuer}/jwks");
        Self {
            server,
            issuer,
            jwks_endpoint,
        }
    }

    pub async fn mock_jwks(&self, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_jwks_delayed(&self, body: serde_json::Value, delay: Duration) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(body)
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    pub async fn mock_jwks_error(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serve an OpenID discovery document pointing at the JWKS endpoint
    pub async fn mock_discovery(&self) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.issuer,
                "jwks_uri": self.jwks_endpoint,
            })))
            .mount(&self.server)
            .await;
    }

    /// How many times the JWKS endpoint has been hit
    pub async fn jwks_hits(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|requests| {
                requests
                    .iter()
                    .filter(|request| request.url.path() == "/jwks")
                    .count()
            })
            .unwrap_or(0)
    }

    /// Configuration pointing straight at this issuer's key set
    pub fn config(&self) -> VerifierConfig {
        VerifierConfig::new(&self.issuer).with_key_set_uri(&self.jwks_endpoint)
    }
}

pub fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs() as i64
}

/// Claims for a token bound to `jkt`, or an unbound one when `None`
pub fn access_token_claims(issuer: &str, jkt: Option<&str>) -> serde_json::Value {
    let now = current_timestamp();
    let mut claims = json!({
        "iss": issuer,
        "sub": "https://id.example/profile#me",
        "webid": "https://id.example/profile#me",
        "client_id": "https://client.example/id",
        "iat": now,
        "exp": now + 600,
    });
    if let Some(jkt) = jkt {
        claims["cnf"] = json!({ "jkt": jkt });
    }
    claims
}

/// Well-formed proof claims covering `method` and `uri`
pub fn proof_claims(method: &str, uri: &str, access_token: &str) -> serde_json::Value {
    json!({
        "jti": uuid::Uuid::new_v4().to_string(),
        "htm": method,
        "htu": uri,
        "iat": current_timestamp(),
        "ath": sha256_hash(access_token),
    })
}

pub fn sha256_hash(input: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_issuer_serves_jwks() {
        let issuer = MockIssuer::start().await;
        let key = TestKey::generate();
        issuer.mock_jwks(jwk_set(&[("k1", &key)])).await;

        let body: serde_json::Value = reqwest::get(&issuer.jwks_endpoint)
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["keys"][0]["kid"], "k1");
        assert_eq!(issuer.jwks_hits().await, 1);
    }

    #[test]
    fn test_thumbprint_is_stable() {
        let key = TestKey::generate();
        assert_eq!(key.thumbprint(), key.thumbprint());
        // 32 bytes of SHA-256, base64url without padding
        assert_eq!(key.thumbprint().len(), 43);
    }
}
