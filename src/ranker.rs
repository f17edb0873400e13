// =============================================================================
// MomentumRanker — per-symbol composite scoring over detector output
// =============================================================================
//
// Pure function over a `Vec<Signal>`, same shape as `signals/weighted_score.rs`:
// group by symbol, take the strongest signal of each type (missing types
// default to 0.0), combine with the configured weights, and emit one
// COMPOSITE signal per symbol that had at least one underlying signal.
// Strength computation never touches the network or the audit log; only the
// Engine decides what happens to the result.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::config::CompositeWeights;
use crate::signal::{self, ContributingScore, Signal, SignalType};

pub struct MomentumRanker {
    weights: CompositeWeights,
}

impl MomentumRanker {
    pub fn new(weights: CompositeWeights) -> Self {
        Self { weights }
    }

    /// Group `signals` by symbol, compute one COMPOSITE signal per symbol,
    /// and return the combined list sorted by strength descending (ties
    /// broken by symbol ascending, then `detected_at` ascending — §4.8,
    /// §8's determinism property). The per-detector signals themselves are
    /// included unchanged alongside the COMPOSITE signals.
    pub fn rank(&self, signals: Vec<Signal>, detected_at: DateTime<Utc>) -> Vec<Signal> {
        let mut by_symbol: HashMap<String, Vec<Signal>> = HashMap::new();
        for signal in signals {
            by_symbol.entry(signal.symbol.clone()).or_default().push(signal);
        }

        let mut output = Vec::new();

        for (symbol, group) in by_symbol {
            let catalyst = max_score_and_id(&group, SignalType::Catalyst);
            let premarket = max_score_and_id(&group, SignalType::PremarketMover);
            let bull_flag = max_score_and_id(&group, SignalType::BullFlag);

            let composite_strength = (self.weights.catalyst * catalyst.0
                + self.weights.premarket * premarket.0
                + self.weights.bull_flag * bull_flag.0)
                .clamp(0.0, 100.0);
            let composite_strength = round_to(composite_strength, 1);

            let contributions = vec![
                ContributingScore {
                    signal_type: SignalType::Catalyst,
                    score: catalyst.0,
                    signal_id: catalyst.1,
                },
                ContributingScore {
                    signal_type: SignalType::PremarketMover,
                    score: premarket.0,
                    signal_id: premarket.1,
                },
                ContributingScore {
                    signal_type: SignalType::BullFlag,
                    score: bull_flag.0,
                    signal_id: bull_flag.1,
                },
            ];

            match signal::make_composite(&symbol, composite_strength, detected_at, contributions) {
                Ok(composite) => output.push(composite),
                Err(e) => warn!(symbol, error = %e, "dropping malformed composite signal"),
            }

            output.extend(group);
        }

        output.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.symbol.cmp(&b.symbol))
                .then_with(|| a.detected_at.cmp(&b.detected_at))
        });

        output
    }
}

fn max_score_and_id(group: &[Signal], ty: SignalType) -> (f64, Option<crate::signal::SignalId>) {
    group
        .iter()
        .filter(|s| s.signal_type == ty)
        .max_by(|a, b| a.strength.partial_cmp(&b.strength).unwrap_or(std::cmp::Ordering::Equal))
        .map(|s| (s.strength, Some(s.id)))
        .unwrap_or((0.0, None))
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
