//! Access-token decoding against the issuer's key set
//!
//! Header checks (type allow-list, pinned algorithm, key id) run
//! before any key material is fetched, so garbage tokens never cost a
//! network round trip. Signature and claim validation then run with
//! the key named by `kid`.

use jsonwebtoken::{decode, decode_header, Validation};
use tracing::debug;

use crate::config::VerifierConfig;
use crate::errors::VerifyError;
use crate::jwks::RemoteKeySet;
use crate::types::{AccessClaims, SigningAlgorithm};
use crate::ACCESS_TOKEN_TYPES;

// Tolerated clock difference with the issuer when checking `exp`.
const EXPIRY_LEEWAY_SECS: u64 = 60;

/// Decoder for access tokens minted by one expected issuer
#[derive(Debug, Clone)]
pub struct TokenDecoder {
    expected_issuer: String,
    algorithm: SigningAlgorithm,
    keys: RemoteKeySet,
}

impl TokenDecoder {
    pub fn new(config: &VerifierConfig, keys: RemoteKeySet) -> Self {
        Self {
            expected_issuer: config.expected_issuer.clone(),
            algorithm: config.allowed_algorithm,
            keys,
        }
    }

    /// Decode and validate an access token, returning its claims
    ///
    /// Enforces the `typ` allow-list, the configured algorithm, the
    /// expected issuer and the token lifetime. `exp` and `iss` are
    /// mandatory claims.
    pub async fn decode(&self, token: &str) -> Result<AccessClaims, VerifyError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(VerifyError::Malformed {
                reason: "empty access token".to_string(),
            });
        }

        let header = decode_header(token).map_err(|e| VerifyError::Malformed {
            reason: format!("access token header does not parse: {e}"),
        })?;

        match header.typ.as_deref() {
            Some(typ) if ACCESS_TOKEN_TYPES
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(typ)) => {}
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

        if header.alg != self.algorithm.as_jwt_algorithm() {
            return Err(VerifyError::UnsupportedAlgorithm {
                found: format!("{:?}", header.alg),
            });
        }

        let kid = header.kid.ok_or_else(|| VerifyError::Malformed {
            reason: "access token header has no kid".to_string(),
        })?;
        debug!(kid = %kid, "resolving verification key for access token");
        let key = self.keys.decoding_key(&kid).await?;

        let mut validation = Validation::new(self.algorithm.as_jwt_algorithm());
        validation.set_issuer(&[&self.expected_issuer]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.leeway = EXPIRY_LEEWAY_SECS;
        validation.validate_aud = false;

        let data =
            decode::<AccessClaims>(token, &key, &validation).map_err(map_decode_error)?;
        Ok(data.claims)
    }
}

fn map_decode_error(e: jsonwebtoken::errors::Error) -> VerifyError {
    use jsonwebtoken::errors::ErrorKind;

    match e.kind() {
        ErrorKind::ExpiredSignature => VerifyError::Expired {
            reason: "access token expiry has passed".to_string(),
        },
        ErrorKind::ImmatureSignature => VerifyError::Expired {
            reason: "access token is not yet valid".to_string(),
        },
        ErrorKind::InvalidIssuer => VerifyError::IssuerMismatch {
            reason: "access token names a different issuer".to_string(),
        },
        ErrorKind::MissingRequiredClaim(claim) if claim.as_str() == "iss" => {
            VerifyError::IssuerMismatch {
                reason: "access token has no iss claim".to_string(),
            }
        }
        ErrorKind::MissingRequiredClaim(claim) => VerifyError::Malformed {
            reason: format!("access token has no {claim} claim"),
        },
        _ => VerifyError::Malformed {
            reason: format!("access token rejected: {e}"),
        },
    }
}
