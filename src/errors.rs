//! Error types for token decoding and proof verification
//!
//! Every failure in the pipeline maps onto a closed set of rejection
//! reasons so that callers can log and meter outcomes without parsing
//! error strings. The full error text stays on the server side; wire
//! responses should carry only the appropriate status code.

use thiserror::Error;

/// Verification pipeline errors
#[derive(Debug, Error)]
pub enum VerifyError {
    /// Credential could not be parsed at all
    #[error("malformed credential: {reason}")]
    Malformed {
        /// What failed to parse
        reason: String,
    },

    /// No verification key could be obtained for the token
    #[error("verification key unavailable: {reason}")]
    KeyUnavailable {
        /// Why the key could not be obtained
        reason: String,
    },

    /// Token or proof carried a `typ` header outside the allow-list
    #[error("unsupported token type: {found}")]
    UnsupportedType {
        /// The `typ` value that was presented
        found: String,
    },

    /// Header algorithm differs from the configured one
    #[error("unsupported signing algorithm: {found}")]
    UnsupportedAlgorithm {
        /// The `alg` value that was presented
        found: String,
    },

    /// Token `iss` claim does not match the expected issuer
    #[error("issuer mismatch: {reason}")]
    IssuerMismatch {
        /// Which issuer check failed
        reason: String,
    },

    /// Token lifetime or proof freshness window violated
    #[error("credential expired: {reason}")]
    Expired {
        /// Which temporal check failed
        reason: String,
    },

    /// Proof `htm`/`htu` does not describe the presented request
    #[error("proof does not cover this request: {reason}")]
    UriOrMethodMismatch {
        /// Which of method or URI diverged
        reason: String,
    },

    /// Proof `ath` does not hash the presented access token
    #[error("proof hash does not match presented access token")]
    HashMismatch,

    /// Proof key thumbprint does not match the token `cnf.jkt` binding
    #[error("proof key does not match token confirmation thumbprint")]
    KeyMismatch,

    /// Proof identifier was already accepted within the replay window
    #[error("proof identifier already seen: {jti}")]
    Replay {
        /// The replayed `jti`
        jti: String,
    },

    /// Verification did not complete before the configured deadline
    #[error("verification exceeded deadline of {deadline_ms}ms")]
    Timeout {
        /// Deadline in milliseconds
        deadline_ms: u64,
    },
}

impl VerifyError {
    /// Stable rejection reason for this error
    pub fn reason(&self) -> RejectionReason {
        match self {
            Self::Malformed { .. } => RejectionReason::Malformed,
            Self::KeyUnavailable { .. } => RejectionReason::KeyUnavailable,
            Self::UnsupportedType { .. } => RejectionReason::UnsupportedType,
            Self::UnsupportedAlgorithm { .. } => RejectionReason::UnsupportedAlgorithm,
            Self::IssuerMismatch { .. } => RejectionReason::IssuerMismatch,
            Self::Expired { .. } => RejectionReason::Expired,
            Self::UriOrMethodMismatch { .. } => RejectionReason::UriOrMethodMismatch,
            Self::HashMismatch => RejectionReason::HashMismatch,
            Self::KeyMismatch => RejectionReason::KeyMismatch,
            Self::Replay { .. } => RejectionReason::Replay,
            Self::Timeout { .. } => RejectionReason::Timeout,
        }
    }

    /// Whether this error reflects verifier-side trouble rather than a
    /// defect in the presented credentials.
    ///
    /// Indeterminate outcomes (key fetch failures, deadline overruns)
    /// should surface as `503` rather than `401`: the client may retry
    /// the same credentials later.
    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::KeyUnavailable { .. } | Self::Timeout { .. })
    }
}

/// Closed set of rejection reasons, suitable for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    /// Credential failed to parse
    Malformed,
    /// Verification key could not be obtained
    KeyUnavailable,
    /// `typ` header outside the allow-list
    UnsupportedType,
    /// `alg` header differs from the configured algorithm
    UnsupportedAlgorithm,
    /// `iss` claim mismatch
    IssuerMismatch,
    /// Lifetime or freshness violation
    Expired,
    /// `htm`/`htu` does not cover the request
    UriOrMethodMismatch,
    /// `ath` does not hash the presented token
    HashMismatch,
    /// Proof key differs from the token binding
    KeyMismatch,
    /// Proof identifier reuse
    Replay,
    /// Deadline overrun
    Timeout,
}

impl RejectionReason {
    /// Stable snake_case tag for structured log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::KeyUnavailable => "key_unavailable",
            Self::UnsupportedType => "unsupported_type",
            Self::UnsupportedAlgorithm => "unsupported_algorithm",
            Self::IssuerMismatch => "issuer_mismatch",
            Self::Expired => "expired",
            Self::UriOrMethodMismatch => "uri_or_method_mismatch",
            Self::HashMismatch => "hash_mismatch",
            Self::KeyMismatch => "key_mismatch",
            Self::Replay => "replay",
            Self::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised while validating verifier configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No expected issuer was provided
    #[error("expected issuer must not be empty")]
    MissingIssuer,

    /// Neither a key-set URI nor an issuer discovery URI was provided
    #[error("either a key-set URI or an issuer discovery URI is required")]
    MissingKeySource,

    /// A field holds a value outside its valid range
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending configuration field
        field: &'static str,
        /// Why the value is invalid
        reason: String,
    },
}
