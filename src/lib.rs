//! DPoP (RFC 9449) verification for resource servers
//!
//! This crate answers one question: should a request carrying an
//! access token and a DPoP proof be served? [`DpopVerifier`] decodes
//! the token against the issuer's published key set, verifies the
//! proof with its embedded key, and checks the bindings that make
//! proof-of-possession hold:
//!
//! - `htm`/`htu` cover the request's method and URI
//! - `ath` hashes the presented access token
//! - the proof key's RFC 7638 thumbprint equals the token's `cnf.jkt`
//! - the proof is fresh and its `jti` has not been spent
//!
//! The outcome is three-valued. A defect in the credentials is
//! `Rejected` with one of a closed set of [`RejectionReason`]s; when
//! the verifier itself cannot finish (issuer keys unreachable,
//! deadline passed) the outcome is `Indeterminate`, which deserves a
//! `503` instead of a `401`. The verifier never accepts by default:
//! every unclear situation fails closed.
//!
//! The accepted signature algorithm is fixed in [`VerifierConfig`],
//! never taken from credential headers, so a token or proof cannot
//! steer verification onto a weaker scheme.
//!
//! # Example
//!
//! ```no_run
//! use dpop_verify::{DpopVerifier, VerifiedBinding, VerifierConfig};
//!
//! # async fn handle_request(access_token: &str, proof: &str) {
//! let verifier = DpopVerifier::new(VerifierConfig::new("https://issuer.example"))
//!     .expect("configuration is valid");
//!
//! match verifier
//!     .verify(access_token, proof, "GET", "https://api.example/inbox")
//!     .await
//! {
//!     VerifiedBinding::Accepted(token) => {
//!         println!("authorized subject: {:?}", token.claims.sub);
//!     }
//!     VerifiedBinding::Rejected(_) => { /* answer 401 */ }
//!     VerifiedBinding::Indeterminate(_) => { /* answer 503 */ }
//! }
//! # }
//! ```
//!
//! For servers sitting directly on `http`, [`DpopVerifier::verify_request`]
//! takes the method, target URI and header map and picks the `DPoP` or
//! `Bearer` flow from the `Authorization` scheme itself.

pub mod config;
pub mod decoder;
pub mod errors;
pub mod headers;
pub mod jwks;
pub mod proof;
pub mod replay;
pub mod types;
pub mod verifier;

pub use config::{BindingPolicy, RetryPolicy, VerifierConfig};
pub use decoder::TokenDecoder;
pub use errors::{ConfigError, RejectionReason, VerifyError};
pub use headers::{AuthScheme, RequestCredentials, DPOP_HEADER};
pub use jwks::{KeySource, RemoteKeySet};
pub use replay::{MemoryReplayCache, ReplayCache};
pub use types::{
    AccessClaims, Confirmation, ProofClaims, ProofHeader, ProofJwk, ProofParts, SigningAlgorithm,
};
pub use verifier::{DpopVerifier, VerifiedBinding, VerifiedToken};

/// JOSE `typ` every proof must carry
pub const DPOP_JWT_TYPE: &str = "dpop+jwt";

/// Accepted `typ` values for access tokens, compared case-insensitively
pub const ACCESS_TOKEN_TYPES: &[&str] = &["JWT", "at+jwt"];

/// Default freshness window for proof `iat`, in seconds
pub const DEFAULT_PROOF_FRESHNESS_SECS: u64 = 60;

/// Default key-set cache lifetime, in seconds
pub const DEFAULT_KEY_CACHE_TTL_SECS: u64 = 600;

/// Result alias for verification outcomes
pub type Result<T> = std::result::Result<T, VerifyError>;
