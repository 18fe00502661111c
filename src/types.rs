//! Claim and key types shared across the verification pipeline
//!
//! These model the two credentials a resource server receives on a
//! proof-of-possession request: the access token's claim set and the
//! proof JWT with its embedded public key. Serde attribute names follow
//! the registered JOSE / OAuth claim names exactly.

use std::collections::HashMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::VerifyError;

/// JWS algorithms accepted for access tokens and proofs
///
/// The verifier pins exactly one algorithm from configuration; header
/// values are compared against it before any signature work, so a
/// credential cannot steer verification onto a different scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SigningAlgorithm {
    /// ECDSA over P-256 with SHA-256 (the common choice for proof keys)
    #[default]
    #[serde(rename = "ES256")]
    ES256,
    /// RSASSA-PKCS1-v1_5 with SHA-256
    #[serde(rename = "RS256")]
    RS256,
    /// RSASSA-PSS with SHA-256
    #[serde(rename = "PS256")]
    PS256,
}

impl SigningAlgorithm {
    /// JOSE `alg` name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ES256 => "ES256",
            Self::RS256 => "RS256",
            Self::PS256 => "PS256",
        }
    }

    pub(crate) fn as_jwt_algorithm(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::ES256 => jsonwebtoken::Algorithm::ES256,
            Self::RS256 => jsonwebtoken::Algorithm::RS256,
            Self::PS256 => jsonwebtoken::Algorithm::PS256,
        }
    }
}

impl std::fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Claim set of a decoded access token
///
/// Registered claims are typed; everything else lands in `additional`
/// so downstream authorization can inspect claims this crate does not
/// interpret. Requiredness of `iss` and `exp` is enforced during
/// decoding, not by this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject the token was issued to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Token issuer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Issued-at time, seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiry time, seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Key confirmation carrying the bound proof-key thumbprint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cnf: Option<Confirmation>,
    /// WebID of the agent, on issuers that mint one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webid: Option<String>,
    /// OAuth client the token was issued through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Remaining claims, preserved verbatim
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

impl AccessClaims {
    /// Thumbprint of the proof key this token is bound to, if any
    pub fn dpop_thumbprint(&self) -> Option<&str> {
        self.cnf.as_ref().and_then(|cnf| cnf.jkt.as_deref())
    }
}

/// `cnf` (confirmation) claim of a proof-of-possession token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Confirmation {
    /// RFC 7638 thumbprint of the holder's public key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jkt: Option<String>,
    /// Other confirmation members, preserved verbatim
    #[serde(flatten)]
    pub additional: HashMap<String, serde_json::Value>,
}

/// JOSE header of a proof JWT
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofHeader {
    /// Token type, `dpop+jwt` on well-formed proofs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    /// Signature algorithm name
    pub alg: String,
    /// Public key the proof claims to be signed with
    pub jwk: ProofJwk,
}

/// Claim set of a proof JWT
///
/// `jti`, `htm`, `htu` and `iat` are mandatory; a proof missing any of
/// them fails to parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofClaims {
    /// Unique proof identifier, checked against the replay cache
    pub jti: String,
    /// HTTP method the proof covers
    pub htm: String,
    /// HTTP URI the proof covers, without query or fragment
    pub htu: String,
    /// Proof creation time, seconds since the Unix epoch
    pub iat: i64,
    /// Base64url SHA-256 hash of the accompanying access token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ath: Option<String>,
    /// Server-issued nonce, echoed when one was handed out
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Parsed but not yet verified proof JWT
#[derive(Debug, Clone)]
pub struct ProofParts {
    /// Decoded JOSE header
    pub header: ProofHeader,
    /// Decoded claim set
    pub claims: ProofClaims,
}

/// Public key embedded in a proof header
///
/// Tagged on `kty` so RSA and EC keys deserialize from their natural
/// JWK shape. The optional `d` member never belongs in a proof; it is
/// declared here solely so its presence can be detected and rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum ProofJwk {
    /// RSA public key
    #[serde(rename = "RSA")]
    Rsa {
        /// Key use, `sig` when present
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        use_: Option<String>,
        /// Modulus, base64url
        n: String,
        /// Public exponent, base64url
        e: String,
        /// Private exponent; must not appear in a proof
        #[serde(skip_serializing_if = "Option::is_none")]
        d: Option<String>,
    },
    /// Elliptic-curve public key
    #[serde(rename = "EC")]
    Ec {
        /// Key use, `sig` when present
        #[serde(rename = "use", skip_serializing_if = "Option::is_none")]
        use_: Option<String>,
        /// Curve name, `P-256` for ES256 keys
        crv: String,
        /// X coordinate, base64url
        x: String,
        /// Y coordinate, base64url
        y: String,
        /// Private scalar; must not appear in a proof
        #[serde(skip_serializing_if = "Option::is_none")]
        d: Option<String>,
    },
}

impl ProofJwk {
    /// RFC 7638 thumbprint of this key
    ///
    /// Hashes the canonical JWK form: required members only, sorted
    /// lexicographically, serialized without whitespace.
    pub fn thumbprint(&self) -> String {
        let canonical = match self {
            Self::Ec { crv, x, y, .. } => serde_json::json!({
                "crv": crv,
                "kty": "EC",
                "x": x,
                "y": y,
            }),
            Self::Rsa { n, e, .. } => serde_json::json!({
                "e": e,
                "kty": "RSA",
                "n": n,
            }),
        };
        let hash = Sha256::digest(canonical.to_string().as_bytes());
        URL_SAFE_NO_PAD.encode(hash)
    }

    /// Whether the key smuggles private material
    pub fn has_private_material(&self) -> bool {
        match self {
            Self::Rsa { d, .. } | Self::Ec { d, .. } => d.is_some(),
        }
    }

    /// Build a verification key from the public components
    pub(crate) fn decoding_key(&self) -> Result<DecodingKey, VerifyError> {
        match self {
            Self::Ec { crv, x, y, .. } => {
                if crv != "P-256" {
                    return Err(VerifyError::Malformed {
                        reason: format!("unsupported proof key curve: {crv}"),
                    });
                }
                DecodingKey::from_ec_components(x, y).map_err(|e| VerifyError::Malformed {
                    reason: format!("invalid EC key components: {e}"),
                })
            }
            Self::Rsa { n, e, .. } => {
                DecodingKey::from_rsa_components(n, e).map_err(|err| VerifyError::Malformed {
                    reason: format!("invalid RSA key components: {err}"),
                })
            }
        }
    }
}
