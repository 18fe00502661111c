//! The verification pipeline
//!
//! [`DpopVerifier`] runs every check a resource server needs before
//! trusting a proof-of-possession request: access-token decoding,
//! proof parse and signature, request binding (`htm`/`htu`), token
//! hash, key-thumbprint confirmation, freshness and replay. The stages
//! run in that order and stop at the first failure.
//!
//! Outcomes are three-valued. `Rejected` means the credentials are
//! defective and a `401` is warranted; `Indeterminate` means this
//! verifier could not finish (keys unreachable, deadline passed) and
//! the request should get a `503` rather than burning the client's
//! credentials. Rejection reasons are logged here and never belong in
//! responses.

use std::sync::Arc;

use http::{HeaderMap, Method};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::{BindingPolicy, VerifierConfig};
use crate::decoder::TokenDecoder;
use crate::errors::{ConfigError, RejectionReason, VerifyError};
use crate::headers::{self, AuthScheme};
use crate::jwks::RemoteKeySet;
use crate::proof;
use crate::replay::{MemoryReplayCache, ReplayCache};
use crate::types::AccessClaims;

/// Claims and key binding of an accepted request
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// Claim set of the accepted access token
    pub claims: AccessClaims,
    /// Thumbprint of the proof key the request was bound to, `None`
    /// when the request was accepted as plain bearer
    pub thumbprint: Option<String>,
}

/// Three-valued outcome of a verification
#[derive(Debug)]
pub enum VerifiedBinding {
    /// Every check passed
    Accepted(VerifiedToken),
    /// The credentials are defective; answer `401`
    Rejected(VerifyError),
    /// The verifier could not finish; answer `503` and let the client
    /// retry the same credentials
    Indeterminate(VerifyError),
}

impl VerifiedBinding {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    /// The verified token, when accepted
    pub fn token(&self) -> Option<&VerifiedToken> {
        match self {
            Self::Accepted(token) => Some(token),
            _ => None,
        }
    }

    /// Why the request was not accepted, when it wasn't
    pub fn rejection(&self) -> Option<RejectionReason> {
        match self {
            Self::Accepted(_) => None,
            Self::Rejected(e) | Self::Indeterminate(e) => Some(e.reason()),
        }
    }

    fn from_error(error: VerifyError) -> Self {
        let reason = error.reason();
        if error.is_indeterminate() {
            warn!(reason = reason.as_str(), error = %error, "verification could not complete");
            Self::Indeterminate(error)
        } else {
            warn!(reason = reason.as_str(), error = %error, "rejected credentials");
            Self::Rejected(error)
        }
    }
}

/// Resource-server verifier for DPoP-bound access tokens
///
/// Cheap to clone; clones share the key cache and replay cache.
#[derive(Debug, Clone)]
pub struct DpopVerifier {
    config: Arc<VerifierConfig>,
    decoder: TokenDecoder,
    replay: Arc<dyn ReplayCache>,
}

impl DpopVerifier {
    /// Build a verifier, validating the configuration first
    pub fn new(config: VerifierConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = RemoteKeySet::from_config(&config);
        let decoder = TokenDecoder::new(&config, keys);
        Ok(Self {
            config: Arc::new(config),
            decoder,
            replay: Arc::new(MemoryReplayCache::new()),
        })
    }

    /// Swap in a shared replay cache (for multi-replica deployments)
    pub fn with_replay_cache(mut self, cache: Arc<dyn ReplayCache>) -> Self {
        self.replay = cache;
        self
    }

    /// Verify an access token and companion proof against a request
    ///
    /// `method` and `uri` describe the request being authorized; the
    /// URI may carry query and fragment, which are ignored. The whole
    /// pipeline runs under the configured deadline and a deadline
    /// overrun is indeterminate, never an acceptance.
    pub async fn verify(
        &self,
        access_token: &str,
        proof: &str,
        method: &str,
        uri: &str,
    ) -> VerifiedBinding {
        let deadline = self.config.verify_deadline;
        match timeout(deadline, self.run_pipeline(access_token, proof, method, uri)).await {
            Ok(Ok(token)) => {
                debug!(
                    sub = token.claims.sub.as_deref().unwrap_or("(none)"),
                    bound = token.thumbprint.is_some(),
                    "accepted request credentials"
                );
                VerifiedBinding::Accepted(token)
            }
            Ok(Err(e)) => VerifiedBinding::from_error(e),
            Err(_) => VerifiedBinding::from_error(VerifyError::Timeout {
                deadline_ms: deadline.as_millis() as u64,
            }),
        }
    }

    /// Verify a token presented without any proof
    ///
    /// A token bound to a key must come with a proof, so it is
    /// rejected here regardless of policy. Unbound tokens pass only
    /// under [`BindingPolicy::BearerAllowed`].
    pub async fn verify_bearer(&self, access_token: &str) -> VerifiedBinding {
        let deadline = self.config.verify_deadline;
        let claims = match timeout(deadline, self.decoder.decode(access_token)).await {
            Ok(Ok(claims)) => claims,
            Ok(Err(e)) => return VerifiedBinding::from_error(e),
            Err(_) => {
                return VerifiedBinding::from_error(VerifyError::Timeout {
                    deadline_ms: deadline.as_millis() as u64,
                })
            }
        };

        if claims.dpop_thumbprint().is_some() {
            return VerifiedBinding::from_error(VerifyError::KeyMismatch);
        }

        match self.config.binding_policy {
            BindingPolicy::BearerAllowed => {
                debug!(
                    sub = claims.sub.as_deref().unwrap_or("(none)"),
                    "accepted bearer credentials"
                );
                VerifiedBinding::Accepted(VerifiedToken {
                    claims,
                    thumbprint: None,
                })
            }
            BindingPolicy::Required => VerifiedBinding::from_error(VerifyError::KeyMismatch),
        }
    }

    /// Verify straight from request method, target URI and headers
    ///
    /// Picks the flow from the `Authorization` scheme: `DPoP` requires
    /// a companion proof header, `Bearer` ignores one if present.
    pub async fn verify_request(
        &self,
        method: &Method,
        uri: &str,
        headers: &HeaderMap,
    ) -> VerifiedBinding {
        let credentials = match headers::from_headers(headers) {
            Ok(credentials) => credentials,
            Err(e) => return VerifiedBinding::from_error(e),
        };

        match credentials.scheme {
            AuthScheme::Dpop => {
                let proof = match credentials.proof {
                    Some(proof) => proof,
                    None => {
                        return VerifiedBinding::from_error(VerifyError::Malformed {
                            reason: "DPoP scheme without a DPoP header".to_string(),
                        })
                    }
                };
                self.verify(&credentials.access_token, &proof, method.as_str(), uri)
                    .await
            }
            AuthScheme::Bearer => self.verify_bearer(&credentials.access_token).await,
        }
    }

    async fn run_pipeline(
        &self,
        access_token: &str,
        proof_jwt: &str,
        method: &str,
        uri: &str,
    ) -> Result<VerifiedToken, VerifyError> {
        let claims = self.decoder.decode(access_token).await?;

        let parts = proof::parse_proof(proof_jwt)?;
        proof::verify_proof_signature(proof_jwt, &parts, self.config.allowed_algorithm)?;
        proof::verify_http_binding(&parts.claims, method, uri)?;

        if !proof::verify_access_token_hash(access_token, parts.claims.ath.as_deref()) {
            return Err(VerifyError::HashMismatch);
        }

        let proof_thumbprint = parts.header.jwk.thumbprint();
        match claims.dpop_thumbprint() {
            Some(expected) => {
                if !proof::constant_time_eq(&proof_thumbprint, expected) {
                    return Err(VerifyError::KeyMismatch);
                }
            }
            None => {
                // Unbound token: the proof confirms nothing, so the
                // request stands or falls as plain bearer
                return match self.config.binding_policy {
                    BindingPolicy::BearerAllowed => Ok(VerifiedToken {
                        claims,
                        thumbprint: None,
                    }),
                    BindingPolicy::Required => Err(VerifyError::KeyMismatch),
                };
            }
        }

        proof::verify_freshness(&parts.claims, self.config.proof_freshness_window)?;

        if !self
            .replay
            .check_and_record(&parts.claims.jti, self.config.replay_ttl())
            .await
        {
            return Err(VerifyError::Replay {
                jti: parts.claims.jti.clone(),
            });
        }

        Ok(VerifiedToken {
            claims,
            thumbprint: Some(proof_thumbprint),
        })
    }
}
