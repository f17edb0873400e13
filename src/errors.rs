// =============================================================================
// Error Taxonomy — kinds, not type names
// =============================================================================
//
// §7 of the engine spec distinguishes errors by how they propagate, not by
// where they originate. `ValidationError` and `InternalInvariantError` are
// the only variants that ever reach a caller of `scan`/`query`; everything
// else is recovered internally (RetryEnvelope, detectors) and reflected as
// degradation in the audit log rather than as a returned `Err`.
// =============================================================================

use thiserror::Error;

/// Errors surfaced to callers of the public engine API.
#[derive(Debug, Error)]
pub enum MomentumError {
    /// Bad input: malformed symbol, weights that don't sum to 1.0, etc.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// A constructor invariant failed inside the engine itself. Indicates a
    /// bug, not bad caller input; the whole scan aborts when this occurs.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

/// Bad-input conditions rejected before any work is attempted.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("symbol {0:?} does not match ^[A-Z]{{1,5}}$")]
    InvalidSymbol(String),

    #[error("strength {0} is out of range [0, 100] or NaN")]
    InvalidStrength(f64),

    #[error("composite weights must sum to 1.0, got {0}")]
    WeightsDoNotSumToOne(f64),

    #[error("metadata variant {0} does not match signal type {1}")]
    MetadataTypeMismatch(&'static str, &'static str),

    #[error("catalyst detected_at ({detected_at}) precedes published_at ({published_at}) or is more than 24h after it")]
    CatalystWindowViolation {
        detected_at: chrono::DateTime<chrono::Utc>,
        published_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("headline must be a non-empty, trimmed string")]
    EmptyHeadline,

    #[error("pre-market signal detected outside the pre-market window: {0}")]
    OutsidePremarketWindow(chrono::DateTime<chrono::Utc>),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(f64),
}

/// Errors an adapter port (§6.1) may raise. RetryEnvelope classifies these
/// into retryable vs terminal before deciding whether to retry.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Network blip, rate limit, 5xx — safe to retry.
    #[error("transient adapter failure: {0}")]
    Transient(String),

    /// Auth failure, malformed contract response — retrying won't help.
    #[error("terminal adapter failure: {0}")]
    Terminal(String),

    /// The retry envelope exhausted all attempts for this call.
    #[error("adapter call exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    /// The circuit breaker for this endpoint is OPEN; the call fast-failed.
    #[error("circuit open for endpoint {endpoint}")]
    CircuitOpen { endpoint: String },

    /// The call did not finish before its per-call timeout.
    #[error("adapter call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl AdapterError {
    /// Whether RetryEnvelope should attempt this call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdapterError::Transient(_) | AdapterError::Timeout(_))
    }
}
