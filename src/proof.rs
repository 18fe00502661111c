//! Proof JWT parsing and verification primitives
//!
//! A proof is verified in stages: structural parse, header checks
//! against the pinned algorithm, signature verification with the
//! embedded key, then the request-binding checks (`htm`/`htu`, `ath`,
//! freshness). Each stage maps its failures onto one rejection reason.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::{decode, Validation};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use url::Url;

use crate::errors::VerifyError;
use crate::types::{ProofClaims, ProofParts, SigningAlgorithm};
use crate::DPOP_JWT_TYPE;

/// Split a compact proof JWT into its decoded header and claims
///
/// No signature work happens here; the parts come back untrusted. Any
/// structural defect (wrong segment count, bad base64url, missing
/// mandatory claims) is malformed.
pub fn parse_proof(raw: &str) -> Result<ProofParts, VerifyError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(VerifyError::Malformed {
            reason: "empty proof".to_string(),
        });
    }

    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 {
        return Err(VerifyError::Malformed {
            reason: format!("expected 3 JWT segments, found {}", segments.len()),
        });
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(segments[0])
        .map_err(|e| VerifyError::Malformed {
            reason: format!("proof header is not base64url: {e}"),
        })?;
    let header = serde_json::from_slice(&header_bytes).map_err(|e| VerifyError::Malformed {
        reason: format!("proof header does not parse: {e}"),
    })?;

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(segments[1])
        .map_err(|e| VerifyError::Malformed {
            reason: format!("proof claims are not base64url: {e}"),
        })?;
    let claims = serde_json::from_slice(&claims_bytes).map_err(|e| VerifyError::Malformed {
        reason: format!("proof claims do not parse: {e}"),
    })?;

    Ok(ProofParts { header, claims })
}

/// Verify the proof's header and signature with its embedded key
///
/// The header must carry `typ: dpop+jwt` and the configured algorithm
/// by name before any signature math runs; a key smuggling private
/// material is rejected outright.
pub fn verify_proof_signature(
    raw: &str,
    parts: &ProofParts,
    algorithm: SigningAlgorithm,
) -> Result<(), VerifyError> {
    match parts.header.typ.as_deref() {
        Some(DPOP_JWT_TYPE) => {}
        Some(other) => {
            return Err(VerifyError::UnsupportedType {
                found: other.to_string(),
            })
        }
        None => {
            return Err(VerifyError::UnsupportedType {
                found: "(absent)".to_string(),
            })
        }
    }

    if parts.header.alg != algorithm.as_str() {
        return Err(VerifyError::UnsupportedAlgorithm {
            found: parts.header.alg.clone(),
        });
    }

    if parts.header.jwk.has_private_material() {
        return Err(VerifyError::Malformed {
            reason: "proof key carries private material".to_string(),
        });
    }

    let key = parts.header.jwk.decoding_key()?;

    let mut validation = Validation::new(algorithm.as_jwt_algorithm());
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    decode::<ProofClaims>(raw.trim(), &key, &validation).map_err(|e| VerifyError::Malformed {
        reason: format!("proof signature invalid: {e}"),
    })?;

    Ok(())
}

/// Base64url SHA-256 hash of an access token, as carried in `ath`
pub fn access_token_hash(access_token: &str) -> String {
    let hash = Sha256::digest(access_token.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Check a proof's `ath` claim against the presented access token
///
/// Absent or empty `ath` and an empty token all answer `false`; this
/// check never errors. The comparison is constant-time.
pub fn verify_access_token_hash(access_token: &str, ath: Option<&str>) -> bool {
    let expected = match ath {
        Some(expected) if !expected.is_empty() => expected,
        _ => return false,
    };
    if access_token.is_empty() {
        return false;
    }
    constant_time_eq(&access_token_hash(access_token), expected)
}

/// Check that the proof covers this request's method and URI
///
/// Methods compare case-insensitively. The request URI is stripped of
/// query and fragment, then compared to `htu` exactly; the proof's own
/// `htu` is taken as sent.
pub fn verify_http_binding(
    claims: &ProofClaims,
    method: &str,
    uri: &str,
) -> Result<(), VerifyError> {
    if !claims.htm.eq_ignore_ascii_case(method) {
        return Err(VerifyError::UriOrMethodMismatch {
            reason: format!("proof covers method {}, request used {}", claims.htm, method),
        });
    }

    let expected = clean_request_uri(uri)?;
    if claims.htu != expected {
        return Err(VerifyError::UriOrMethodMismatch {
            reason: format!("proof covers {}, request was {}", claims.htu, expected),
        });
    }

    Ok(())
}

/// Check that the proof's `iat` sits within the freshness window
///
/// Distance from the server clock in either direction counts, so
/// far-future proofs fail the same way stale ones do.
pub fn verify_freshness(claims: &ProofClaims, window: Duration) -> Result<(), VerifyError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| VerifyError::Expired {
            reason: "system clock predates the Unix epoch".to_string(),
        })?
        .as_secs() as i64;

    let distance = (now - claims.iat).abs();
    let window_secs = window.as_secs() as i64;
    if distance > window_secs {
        return Err(VerifyError::Expired {
            reason: format!("proof iat is {distance}s from now, window is {window_secs}s"),
        });
    }

    Ok(())
}

/// Request URI with query and fragment removed
pub fn clean_request_uri(uri: &str) -> Result<String, VerifyError> {
    let parsed = Url::parse(uri).map_err(|e| VerifyError::Malformed {
        reason: format!("request URI does not parse: {e}"),
    })?;
    let host = parsed.host_str().ok_or_else(|| VerifyError::Malformed {
        reason: "request URI has no host".to_string(),
    })?;

    let mut clean = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        clean.push_str(&format!(":{port}"));
    }
    clean.push_str(parsed.path());
    Ok(clean)
}

pub(crate) fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}
