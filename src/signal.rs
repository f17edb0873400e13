// =============================================================================
// Signal Model — common record + enums + validation invariants
// =============================================================================
//
// Pure data, no I/O, no time source. `detected_at` is always supplied by the
// caller (the Engine supplies the clock) so this module stays trivially
// testable. Signals are immutable after construction; the only way to build
// one is through the `make_*` factory functions below, each of which enforces
// the invariants in the engine spec and fails with `ValidationError` rather
// than producing a malformed record.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ValidationError;

/// Opaque, stable identifier for a signal's lifetime.
pub type SignalId = Uuid;

/// The kind of opportunity a signal represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Catalyst,
    PremarketMover,
    BullFlag,
    Composite,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Catalyst => "CATALYST",
            Self::PremarketMover => "PREMARKET_MOVER",
            Self::BullFlag => "BULL_FLAG",
            Self::Composite => "COMPOSITE",
        };
        write!(f, "{s}")
    }
}

/// News catalyst classification, in the priority order the classifier checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CatalystType {
    Earnings,
    Fda,
    Merger,
    Product,
    Analyst,
    Other,
}

/// Type-specific metadata. The variant in use must always match the
/// containing signal's `SignalType` — enforced by the `make_*` constructors,
/// never by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SignalMetadata {
    Catalyst(CatalystEvent),
    PremarketMover(PreMarketMover),
    BullFlag(BullFlagPattern),
    Composite(CompositeView),
}

impl SignalMetadata {
    fn matches(&self, ty: SignalType) -> bool {
        matches!(
            (self, ty),
            (SignalMetadata::Catalyst(_), SignalType::Catalyst)
                | (SignalMetadata::PremarketMover(_), SignalType::PremarketMover)
                | (SignalMetadata::BullFlag(_), SignalType::BullFlag)
                | (SignalMetadata::Composite(_), SignalType::Composite)
        )
    }
}

/// `CatalystEvent` metadata (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalystEvent {
    pub catalyst_type: CatalystType,
    pub headline: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
}

/// `PreMarketMover` metadata (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreMarketMover {
    pub price_change_pct: f64,
    pub volume_ratio: f64,
    pub reference_price: f64,
    pub current_price: f64,
    pub baseline_volume: f64,
}

/// `BullFlagPattern` metadata (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BullFlagPattern {
    pub pole_start: chrono::NaiveDate,
    pub pole_end: chrono::NaiveDate,
    pub pole_low: f64,
    pub pole_high: f64,
    pub pole_gain_pct: f64,

    pub flag_start: chrono::NaiveDate,
    pub flag_end: chrono::NaiveDate,
    pub flag_low: f64,
    pub flag_high: f64,
    pub flag_range_pct: f64,
    pub flag_slope_pct: f64,

    pub breakout_price: f64,
    pub price_target: f64,
    pub pattern_valid: bool,
}

/// Per-type score contributing to a `COMPOSITE` signal, plus the id of the
/// underlying per-detector signal it was computed from (if any existed for
/// that symbol).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContributingScore {
    pub signal_type: SignalType,
    pub score: f64,
    pub signal_id: Option<SignalId>,
}

/// `COMPOSITE` metadata: a view over the per-type scores that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeView {
    pub contributions: Vec<ContributingScore>,
}

/// A detected opportunity. Immutable after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub symbol: String,
    #[serde(rename = "type")]
    pub signal_type: SignalType,
    pub strength: f64,
    pub detected_at: DateTime<Utc>,
    pub metadata: SignalMetadata,
}

/// Matches `^[A-Z]{1,5}$` without pulling in the `regex` crate for a
/// five-character check.
fn validate_symbol(symbol: &str) -> Result<(), ValidationError> {
    let valid = (1..=5).contains(&symbol.len())
        && symbol.bytes().all(|b| b.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidSymbol(symbol.to_string()))
    }
}

fn validate_strength(strength: f64) -> Result<(), ValidationError> {
    if strength.is_nan() || !(0.0..=100.0).contains(&strength) {
        Err(ValidationError::InvalidStrength(strength))
    } else {
        Ok(())
    }
}

fn validate_positive(value: f64) -> Result<(), ValidationError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonPositivePrice(value))
    }
}

/// Build a `CATALYST` signal, enforcing the 24h publish-window invariant.
pub fn make_catalyst(
    symbol: &str,
    strength: f64,
    detected_at: DateTime<Utc>,
    metadata: CatalystEvent,
) -> Result<Signal, ValidationError> {
    validate_symbol(symbol)?;
    validate_strength(strength)?;

    if metadata.headline.trim().is_empty() {
        return Err(ValidationError::EmptyHeadline);
    }
    if metadata.published_at > detected_at {
        return Err(ValidationError::CatalystWindowViolation {
            detected_at,
            published_at: metadata.published_at,
        });
    }
    if detected_at - metadata.published_at > chrono::Duration::hours(24) {
        return Err(ValidationError::CatalystWindowViolation {
            detected_at,
            published_at: metadata.published_at,
        });
    }

    Ok(Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        signal_type: SignalType::Catalyst,
        strength,
        detected_at,
        metadata: SignalMetadata::Catalyst(metadata),
    })
}

/// Build a `PREMARKET_MOVER` signal. The caller (the PreMarketScanner) is
/// responsible for only calling this once `Clock::is_premarket` is already
/// known to be true for `detected_at` — this constructor re-checks nothing
/// about wall-clock time since `SignalModel` has no time source of its own;
/// callers pass `is_premarket` through explicitly so the invariant is still
/// enforced at construction time.
pub fn make_premarket(
    symbol: &str,
    strength: f64,
    detected_at: DateTime<Utc>,
    is_premarket: bool,
    metadata: PreMarketMover,
) -> Result<Signal, ValidationError> {
    validate_symbol(symbol)?;
    validate_strength(strength)?;
    validate_positive(metadata.reference_price)?;
    validate_positive(metadata.current_price)?;

    if !is_premarket {
        return Err(ValidationError::OutsidePremarketWindow(detected_at));
    }

    Ok(Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        signal_type: SignalType::PremarketMover,
        strength,
        detected_at,
        metadata: SignalMetadata::PremarketMover(metadata),
    })
}

/// Build a `BULL_FLAG` signal. Only valid (`pattern_valid = true`) patterns
/// are ever constructed — the detector never emits invalid patterns as
/// signals, so this constructor rejects `pattern_valid = false` outright.
pub fn make_bull_flag(
    symbol: &str,
    strength: f64,
    detected_at: DateTime<Utc>,
    metadata: BullFlagPattern,
) -> Result<Signal, ValidationError> {
    validate_symbol(symbol)?;
    validate_strength(strength)?;
    validate_positive(metadata.pole_low)?;
    validate_positive(metadata.pole_high)?;
    validate_positive(metadata.flag_low)?;
    validate_positive(metadata.flag_high)?;

    if !metadata.pattern_valid {
        return Err(ValidationError::MetadataTypeMismatch("invalid", "BULL_FLAG"));
    }

    Ok(Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        signal_type: SignalType::BullFlag,
        strength,
        detected_at,
        metadata: SignalMetadata::BullFlag(metadata),
    })
}

/// Build a `COMPOSITE` signal from a ranker-computed strength and the
/// per-type scores that produced it.
pub fn make_composite(
    symbol: &str,
    strength: f64,
    detected_at: DateTime<Utc>,
    contributions: Vec<ContributingScore>,
) -> Result<Signal, ValidationError> {
    validate_symbol(symbol)?;
    validate_strength(strength)?;

    Ok(Signal {
        id: Uuid::new_v4(),
        symbol: symbol.to_string(),
        signal_type: SignalType::Composite,
        strength,
        detected_at,
        metadata: SignalMetadata::Composite(CompositeView { contributions }),
    })
}

impl Signal {
    /// Defensive invariant check: metadata variant must match `signal_type`.
    /// Used by the audit-log round-trip tests and by the Engine's internal
    /// assertions (§8).
    pub fn metadata_matches_type(&self) -> bool {
        self.metadata.matches(self.signal_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn symbol_accepts_one_to_five_uppercase_letters() {
        assert!(validate_symbol("A").is_ok());
        assert!(validate_symbol("AAPL").is_ok());
        assert!(validate_symbol("ABCDE").is_ok());
    }

    #[test]
    fn symbol_rejects_lowercase_digits_and_overlength() {
        assert!(validate_symbol("aapl").is_err());
        assert!(validate_symbol("AAPL1").is_err());
        assert!(validate_symbol("ABCDEF").is_err());
        assert!(validate_symbol("").is_err());
    }

    #[test]
    fn strength_rejects_nan_and_out_of_range() {
        assert!(validate_strength(f64::NAN).is_err());
        assert!(validate_strength(-0.1).is_err());
        assert!(validate_strength(100.1).is_err());
        assert!(validate_strength(0.0).is_ok());
        assert!(validate_strength(100.0).is_ok());
    }

    #[test]
    fn catalyst_rejects_published_after_detected() {
        let detected = now();
        let published = detected + chrono::Duration::minutes(5);
        let err = make_catalyst(
            "AAPL",
            80.0,
            detected,
            CatalystEvent {
                catalyst_type: CatalystType::Earnings,
                headline: "Apple earnings beat".into(),
                published_at: published,
                source: "wire".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::CatalystWindowViolation { .. }));
    }

    #[test]
    fn catalyst_rejects_stale_publish_beyond_24h() {
        let detected = now();
        let published = detected - chrono::Duration::hours(25);
        let err = make_catalyst(
            "AAPL",
            80.0,
            detected,
            CatalystEvent {
                catalyst_type: CatalystType::Earnings,
                headline: "Apple earnings beat".into(),
                published_at: published,
                source: "wire".into(),
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::CatalystWindowViolation { .. }));
    }

    #[test]
    fn catalyst_accepts_exactly_24h() {
        let detected = now();
        let published = detected - chrono::Duration::hours(24);
        let signal = make_catalyst(
            "AAPL",
            80.0,
            detected,
            CatalystEvent {
                catalyst_type: CatalystType::Earnings,
                headline: "Apple earnings beat".into(),
                published_at: published,
                source: "wire".into(),
            },
        )
        .unwrap();
        assert!(signal.metadata_matches_type());
    }

    #[test]
    fn premarket_rejects_when_outside_window() {
        let err = make_premarket(
            "AAPL",
            60.0,
            now(),
            false,
            PreMarketMover {
                price_change_pct: 6.0,
                volume_ratio: 3.0,
                reference_price: 100.0,
                current_price: 106.0,
                baseline_volume: 1000.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::OutsidePremarketWindow(_)));
    }

    #[test]
    fn premarket_rejects_non_positive_price() {
        let err = make_premarket(
            "AAPL",
            60.0,
            now(),
            true,
            PreMarketMover {
                price_change_pct: 6.0,
                volume_ratio: 3.0,
                reference_price: 0.0,
                current_price: 106.0,
                baseline_volume: 1000.0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::NonPositivePrice(_)));
    }

    #[test]
    fn bull_flag_rejects_invalid_pattern() {
        let err = make_bull_flag(
            "AAPL",
            70.0,
            now(),
            BullFlagPattern {
                pole_start: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
                pole_end: chrono::NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(),
                pole_low: 100.0,
                pole_high: 120.0,
                pole_gain_pct: 20.0,
                flag_start: chrono::NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
                flag_end: chrono::NaiveDate::from_ymd_opt(2025, 3, 5).unwrap(),
                flag_low: 113.5,
                flag_high: 118.0,
                flag_range_pct: 3.96,
                flag_slope_pct: -1.0,
                breakout_price: 118.0,
                price_target: 138.0,
                pattern_valid: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::MetadataTypeMismatch(..)));
    }

    #[test]
    fn composite_metadata_matches_type() {
        let signal = make_composite(
            "AAPL",
            77.0,
            now(),
            vec![ContributingScore {
                signal_type: SignalType::BullFlag,
                score: 90.0,
                signal_id: None,
            }],
        )
        .unwrap();
        assert!(signal.metadata_matches_type());
        assert_eq!(signal.signal_type, SignalType::Composite);
    }
}
