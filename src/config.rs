//! Verifier configuration
//!
//! All knobs the pipeline consults live here, deserializable from the
//! host application's config format. Only `expected_issuer` has no
//! default; everything else falls back to conservative values.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;
use crate::types::SigningAlgorithm;
use crate::{DEFAULT_KEY_CACHE_TTL_SECS, DEFAULT_PROOF_FRESHNESS_SECS};

/// Configuration for a [`DpopVerifier`](crate::DpopVerifier)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Issuer every access token must name in its `iss` claim
    pub expected_issuer: String,

    /// Direct URI of the issuer's JWK set, skipping discovery
    #[serde(default)]
    pub key_set_uri: Option<String>,

    /// Issuer base URI to resolve the key-set location from
    ///
    /// Resolution tries OpenID Connect discovery first and falls back
    /// to `{issuer}/.well-known/jwks`. Ignored when `key_set_uri` is
    /// set.
    #[serde(default)]
    pub issuer_uri: Option<String>,

    /// The single signature algorithm accepted for tokens and proofs
    #[serde(default)]
    pub allowed_algorithm: SigningAlgorithm,

    /// Accepted distance between a proof's `iat` and the server clock
    #[serde(default = "default_freshness_window")]
    pub proof_freshness_window: Duration,

    /// How long accepted proof identifiers are remembered
    ///
    /// Defaults to the freshness window: once a proof has aged out it
    /// can no longer be accepted, so remembering its `jti` longer buys
    /// nothing.
    #[serde(default)]
    pub replay_ttl: Option<Duration>,

    /// How long a fetched key set is served from cache
    #[serde(default = "default_key_cache_ttl")]
    pub key_cache_ttl: Duration,

    /// Timeout for a single key-set HTTP request
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: Duration,

    /// Overall deadline for one verification, network included
    #[serde(default = "default_verify_deadline")]
    pub verify_deadline: Duration,

    /// Minimum spacing between key-set refetches
    ///
    /// Bounds how often a flood of unknown-key tokens can hit the
    /// issuer.
    #[serde(default = "default_min_refresh_interval")]
    pub min_refresh_interval: Duration,

    /// Retry policy for key-set fetches
    #[serde(default)]
    pub fetch_retry: RetryPolicy,

    /// Whether tokens without a key binding are acceptable
    #[serde(default)]
    pub binding_policy: BindingPolicy,
}

impl VerifierConfig {
    /// Configuration for the given issuer, resolving keys by discovery
    pub fn new(expected_issuer: impl Into<String>) -> Self {
        let expected_issuer = expected_issuer.into();
        Self {
            issuer_uri: Some(expected_issuer.clone()),
            expected_issuer,
            key_set_uri: None,
            allowed_algorithm: SigningAlgorithm::default(),
            proof_freshness_window: default_freshness_window(),
            replay_ttl: None,
            key_cache_ttl: default_key_cache_ttl(),
            fetch_timeout: default_fetch_timeout(),
            verify_deadline: default_verify_deadline(),
            min_refresh_interval: default_min_refresh_interval(),
            fetch_retry: RetryPolicy::default(),
            binding_policy: BindingPolicy::default(),
        }
    }

    /// Fetch keys from this URI instead of resolving via the issuer
    pub fn with_key_set_uri(mut self, uri: impl Into<String>) -> Self {
        self.key_set_uri = Some(uri.into());
        self
    }

    /// Accept only this signature algorithm
    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.allowed_algorithm = algorithm;
        self
    }

    /// Override the proof freshness window
    pub fn with_freshness_window(mut self, window: Duration) -> Self {
        self.proof_freshness_window = window;
        self
    }

    /// Remember accepted proof identifiers for this long
    pub fn with_replay_ttl(mut self, ttl: Duration) -> Self {
        self.replay_ttl = Some(ttl);
        self
    }

    /// Override the key-set cache lifetime
    pub fn with_key_cache_ttl(mut self, ttl: Duration) -> Self {
        self.key_cache_ttl = ttl;
        self
    }

    /// Override the overall verification deadline
    pub fn with_verify_deadline(mut self, deadline: Duration) -> Self {
        self.verify_deadline = deadline;
        self
    }

    /// Override the minimum spacing between key-set refetches
    pub fn with_min_refresh_interval(mut self, interval: Duration) -> Self {
        self.min_refresh_interval = interval;
        self
    }

    /// Override the key-fetch retry policy
    pub fn with_fetch_retry(mut self, policy: RetryPolicy) -> Self {
        self.fetch_retry = policy;
        self
    }

    /// Set the policy for tokens without a key binding
    pub fn with_binding_policy(mut self, policy: BindingPolicy) -> Self {
        self.binding_policy = policy;
        self
    }

    /// Effective replay cache TTL
    pub fn replay_ttl(&self) -> Duration {
        self.replay_ttl.unwrap_or(self.proof_freshness_window)
    }

    /// Check the configuration for holes before building a verifier
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_issuer.trim().is_empty() {
            return Err(ConfigError::MissingIssuer);
        }
        if self.key_set_uri.is_none() && self.issuer_uri.is_none() {
            return Err(ConfigError::MissingKeySource);
        }
        if self.proof_freshness_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "proof_freshness_window",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.verify_deadline.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "verify_deadline",
                reason: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

fn default_freshness_window() -> Duration {
    Duration::from_secs(DEFAULT_PROOF_FRESHNESS_SECS)
}

fn default_key_cache_ttl() -> Duration {
    Duration::from_secs(DEFAULT_KEY_CACHE_TTL_SECS)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_verify_deadline() -> Duration {
    Duration::from_secs(5)
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(5)
}

/// Handling of access tokens that carry no `cnf.jkt` binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingPolicy {
    /// Reject unbound tokens; every request needs proof-of-possession
    #[default]
    Required,
    /// Accept unbound tokens as plain bearer credentials
    BearerAllowed,
}

/// Retry policy for key-set fetches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// Fixed interval between attempts
    Fixed {
        /// Time interval between retry attempts
        interval: Duration,
        /// Maximum number of retry attempts (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Exponential backoff
    Exponential {
        /// Base delay for exponential backoff calculation
        base: Duration,
        /// Maximum delay between retry attempts
        max_delay: Duration,
        /// Maximum number of retry attempts (None for unlimited)
        max_attempts: Option<u32>,
    },
    /// Never retry
    Never,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            max_attempts: Some(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt`, or `None` to give up
    pub(crate) fn delay(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::Fixed {
                interval,
                max_attempts,
            } => {
                if let Some(max) = max_attempts {
                    if attempt >= *max {
                        return None;
                    }
                }
                Some(*interval)
            }
            Self::Exponential {
                base,
                max_delay,
                max_attempts,
            } => {
                if let Some(max) = max_attempts {
                    if attempt >= *max {
                        return None;
                    }
                }
                let base_delay = base.as_millis() as u64 * 2u64.pow(attempt.min(32));
                let max_delay_ms = max_delay.as_millis() as u64;
                let capped = base_delay.min(max_delay_ms);
                // Add ±25% jitter to prevent thundering herd
                let jitter_range = capped / 4;
                let jitter_offset = if jitter_range > 0 {
                    // Use simple deterministic-ish jitter from attempt number
                    // (avoids adding rand dependency just for this)
                    let hash = (attempt as u64)
                        .wrapping_mul(6364136223846793005)
                        .wrapping_add(1442695040888963407);
                    hash % (jitter_range * 2)
                } else {
                    0
                };
                let final_delay = capped
                    .saturating_sub(jitter_range)
                    .saturating_add(jitter_offset);
                Some(Duration::from_millis(final_delay))
            }
            Self::Never => None,
        }
    }
}
