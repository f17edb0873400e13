// =============================================================================
// BullFlagDetector — pole + flag recognition over daily OHLCV
// =============================================================================
//
// The pattern-matching core is pure and deterministic (no I/O, no time
// source) the way `indicators/rsi.rs` is: given the same bars it always
// produces the same pattern or `None`. The detector wrapper around it does
// the adapter fetch + retry + per-symbol isolation, following the same
// shape as `news_catalyst.rs` and `premarket_scanner.rs`.
//
// Step 1 — Pole: scan windows of 1-3 consecutive bars ending at each index
//          whose low sits on the window's first bar and high on its last
//          (the run-up happens across the window, not before it), accept
//          the ones with gain >= `pole_min_gain_pct`, and pick the most
//          recent such window (ties broken by larger gain, then by smaller
//          width).
// Step 2 — Flag: starting right after the pole, scan windows of 2-5 bars,
//          require a tight low-slope consolidation capped by the pole high,
//          and pick the longest window that satisfies every constraint.
// Step 3 — Project a breakout price (the flag high) and a price target
//          (breakout + pole height).
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::adapters::{DailyBar, HistoricalAdapter};
use crate::audit_log::{AuditLog, AuditRecord};
use crate::retry::RetryEnvelope;
use crate::signal::{self, BullFlagPattern, Signal};

const LOOKBACK_DAYS: u32 = 100;
const POLE_WIDTHS: [usize; 3] = [1, 2, 3];
const FLAG_WIDTHS: [usize; 4] = [2, 3, 4, 5];

/// Parameters the pure pattern matcher needs; pulled out of the full engine
/// config so unit tests can construct them directly.
#[derive(Debug, Clone, Copy)]
pub struct BullFlagParams {
    pub pole_min_gain_pct: f64,
    pub flag_range_min_pct: f64,
    pub flag_range_max_pct: f64,
}

impl Default for BullFlagParams {
    fn default() -> Self {
        Self {
            pole_min_gain_pct: 8.0,
            flag_range_min_pct: 3.0,
            flag_range_max_pct: 5.0,
        }
    }
}

struct PoleCandidate {
    start_idx: usize,
    end_idx: usize,
    width: usize,
    gain_pct: f64,
    low: f64,
    high: f64,
}

fn window_high_low(bars: &[DailyBar], start: usize, end_inclusive: usize) -> (f64, f64) {
    let slice = &bars[start..=end_inclusive];
    let high = slice.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
    let low = slice.iter().fold(f64::MAX, |acc, b| acc.min(b.low));
    (high, low)
}

/// Find the most recent qualifying pole. Among all windows with
/// `gain_pct >= pole_min_gain_pct`, the candidate with the greatest
/// `end_idx` wins; ties break on larger `gain_pct`, then on smaller
/// `width` (§4.7).
fn find_pole(bars: &[DailyBar], params: &BullFlagParams) -> Option<PoleCandidate> {
    let mut best: Option<PoleCandidate> = None;

    for end_idx in 0..bars.len() {
        for &width in &POLE_WIDTHS {
            if width > end_idx + 1 {
                continue;
            }
            let start_idx = end_idx + 1 - width;
            let (high, low) = window_high_low(bars, start_idx, end_idx);
            if low <= 0.0 {
                continue;
            }
            // A genuine pole's low is set on its first bar and its high on
            // its last bar; the run-up happens across the window. A window
            // whose extremes are both already present on an earlier bar is
            // just the real pole smuggling trailing (already consolidating)
            // bars into its tail, which would shadow the actual pole and
            // leave no bars for the flag that follows it.
            if low != bars[start_idx].low || high != bars[end_idx].high {
                continue;
            }
            let gain_pct = (high - low) / low * 100.0;
            if gain_pct < params.pole_min_gain_pct {
                continue;
            }

            let candidate = PoleCandidate {
                start_idx,
                end_idx,
                width,
                gain_pct,
                low,
                high,
            };

            best = Some(match best {
                None => candidate,
                Some(current) => {
                    if candidate.end_idx > current.end_idx {
                        candidate
                    } else if candidate.end_idx < current.end_idx {
                        current
                    } else if candidate.gain_pct > current.gain_pct {
                        candidate
                    } else if candidate.gain_pct < current.gain_pct {
                        current
                    } else if candidate.width < current.width {
                        candidate
                    } else {
                        current
                    }
                }
            });
        }
    }

    best
}

struct FlagCandidate {
    end_idx: usize,
    width: usize,
    low: f64,
    high: f64,
    range_pct: f64,
    slope_pct: f64,
}

/// Find the longest qualifying flag immediately following the pole.
fn find_flag(bars: &[DailyBar], pole: &PoleCandidate, params: &BullFlagParams) -> Option<FlagCandidate> {
    let mut best: Option<FlagCandidate> = None;
    let flag_start = pole.end_idx + 1;

    for &width in &FLAG_WIDTHS {
        let end_idx = flag_start + width - 1;
        if end_idx >= bars.len() {
            continue;
        }

        let (high, low) = window_high_low(bars, flag_start, end_idx);
        if low <= 0.0 {
            continue;
        }
        let range_pct = (high - low) / low * 100.0;
        let close_first = bars[flag_start].close;
        let close_last = bars[end_idx].close;
        if close_first <= 0.0 {
            continue;
        }
        let slope_pct = (close_last - close_first) / close_first * 100.0;

        let qualifies = range_pct >= params.flag_range_min_pct
            && range_pct <= params.flag_range_max_pct
            && slope_pct <= 0.0
            && high <= pole.high;

        if !qualifies {
            continue;
        }

        let candidate = FlagCandidate {
            end_idx,
            width,
            low,
            high,
            range_pct,
            slope_pct,
        };

        best = match best {
            None => Some(candidate),
            Some(current) if candidate.width > current.width => Some(candidate),
            Some(current) => Some(current),
        };
    }

    best
}

/// `40 + 3*(pole_gain_pct - 8) - 5*max(0, flag_range_pct - 4) + 2*max(0, -flag_slope_pct)`,
/// clamped to [0, 100].
pub fn strength_for(pole_gain_pct: f64, flag_range_pct: f64, flag_slope_pct: f64) -> f64 {
    let score = 40.0 + 3.0 * (pole_gain_pct - 8.0) - 5.0 * (flag_range_pct - 4.0).max(0.0)
        + 2.0 * (-flag_slope_pct).max(0.0);
    score.clamp(0.0, 100.0)
}

/// Run the full pole + flag recognizer over `bars` (ascending by date, at
/// most [`LOOKBACK_DAYS`] entries). Returns `None` when there isn't enough
/// data, a price is non-positive, or no valid pattern exists — invalid
/// patterns are never returned, matching §4.7's "not emitted as invalid
/// signals".
pub fn detect(bars: &[DailyBar], params: &BullFlagParams) -> Option<BullFlagPattern> {
    // Smallest possible combination is a 1-day pole followed by a 2-day
    // flag: 3 bars. Fewer than that and there's nothing to scan.
    if bars.len() < 3 {
        return None;
    }
    if bars.iter().any(|b| b.open <= 0.0 || b.high <= 0.0 || b.low <= 0.0 || b.close <= 0.0) {
        return None;
    }

    let pole = find_pole(bars, params)?;
    let flag = find_flag(bars, &pole, params)?;

    let breakout_price = flag.high;
    let pole_height = pole.high - pole.low;
    let price_target = breakout_price + pole_height;

    let pattern_valid = (1..=3).contains(&pole.width)
        && pole.gain_pct >= params.pole_min_gain_pct
        && (2..=5).contains(&flag.width)
        && flag.range_pct >= params.flag_range_min_pct
        && flag.range_pct <= params.flag_range_max_pct
        && flag.slope_pct <= 0.0;

    if !pattern_valid {
        return None;
    }

    Some(BullFlagPattern {
        pole_start: bars[pole.start_idx].date,
        pole_end: bars[pole.end_idx].date,
        pole_low: pole.low,
        pole_high: pole.high,
        pole_gain_pct: pole.gain_pct,
        flag_start: bars[pole.end_idx + 1].date,
        flag_end: bars[flag.end_idx].date,
        flag_low: flag.low,
        flag_high: flag.high,
        flag_range_pct: flag.range_pct,
        flag_slope_pct: flag.slope_pct,
        breakout_price,
        price_target,
        pattern_valid,
    })
}

pub struct BullFlagDetector {
    adapter: Option<Arc<dyn HistoricalAdapter>>,
    retry: RetryEnvelope,
    concurrency_limit: usize,
    params: BullFlagParams,
    audit_log: Arc<AuditLog>,
}

impl BullFlagDetector {
    pub fn new(
        adapter: Option<Arc<dyn HistoricalAdapter>>,
        retry: RetryEnvelope,
        concurrency_limit: usize,
        params: BullFlagParams,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        Self {
            adapter,
            retry,
            concurrency_limit,
            params,
            audit_log,
        }
    }

    pub async fn scan(&self, symbols: &[String], scan_id: &str, now: DateTime<Utc>) -> (Vec<Signal>, bool) {
        let Some(adapter) = self.adapter.clone() else {
            warn!(scan_id, "historical adapter not configured, skipping bull-flag scan");
            return (Vec::new(), true);
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit.max(1)));

        let tasks = symbols.iter().map(|symbol| {
            let adapter = adapter.clone();
            let semaphore = semaphore.clone();
            let symbol = symbol.clone();
            let scan_id = scan_id.to_string();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                self.scan_symbol(adapter, &symbol, now, &scan_id).await
            }
        });

        let results = futures_util::future::join_all(tasks).await;
        let degraded = results.iter().any(|(_, failed)| *failed);
        let signals = results.into_iter().filter_map(|(signal, _)| signal).collect();
        (signals, degraded)
    }

    async fn scan_symbol(
        &self,
        adapter: Arc<dyn HistoricalAdapter>,
        symbol: &str,
        now: DateTime<Utc>,
        scan_id: &str,
    ) -> (Option<Signal>, bool) {
        let bars = match self
            .retry
            .run(|| {
                let adapter = adapter.clone();
                let symbol = symbol.to_string();
                async move { adapter.get_daily_bars(&symbol, LOOKBACK_DAYS).await }
            })
            .await
        {
            Ok(bars) => bars,
            Err(err) => {
                warn!(scan_id, symbol, error = %err, "historical adapter call failed, skipping symbol");
                self.audit_log
                    .log(AuditRecord::error(scan_id, now, Some(symbol), "AdapterExhausted", &err.to_string()));
                return (None, true);
            }
        };

        let Some(pattern) = detect(&bars, &self.params) else {
            return (None, false);
        };
        let strength = strength_for(pattern.pole_gain_pct, pattern.flag_range_pct, pattern.flag_slope_pct);

        let signal = match signal::make_bull_flag(symbol, strength, now, pattern) {
            Ok(signal) => {
                info!(scan_id, symbol, strength, "bull flag pattern detected");
                Some(signal)
            }
            Err(e) => {
                warn!(scan_id, symbol, error = %e, "dropping malformed bull flag signal");
                None
            }
        };
        (signal, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, open: f64, high: f64, low: f64, close: f64) -> DailyBar {
        DailyBar {
            date: chrono::NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1_000_000.0,
        }
    }

    #[test]
    fn pole_gain_exactly_at_threshold_is_accepted() {
        // 2-day pole: low=100, high=108 -> gain exactly 8.0%.
        let bars = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, 108.0, 100.0, 108.0),
            bar(3, 108.0, 108.0, 105.0, 106.0),
            bar(4, 106.0, 106.5, 104.0, 104.5),
        ];
        let params = BullFlagParams::default();
        let pole = find_pole(&bars, &params);
        assert!(pole.is_some());
        assert!((pole.unwrap().gain_pct - 8.0).abs() < 1e-9);
    }

    #[test]
    fn pole_gain_just_below_threshold_is_rejected() {
        let bars = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, 107.99, 100.0, 107.99),
        ];
        let params = BullFlagParams::default();
        assert!(find_pole(&bars, &params).is_none());
    }

    #[test]
    fn flag_range_boundaries_accept_3_and_5_reject_outside() {
        assert!(strength_for(8.0, 3.0, 0.0) > 0.0); // sanity: function runs

        let params = BullFlagParams::default();

        // range exactly 3.0%: low=100, high=103
        let pole_high = 120.0;
        let candidate_ok = PoleCandidate {
            start_idx: 0,
            end_idx: 1,
            width: 2,
            gain_pct: 20.0,
            low: 100.0,
            high: pole_high,
        };
        let bars_exact_3 = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, pole_high, 100.0, pole_high),
            bar(3, 118.0, 103.0, 100.0, 103.0),
            bar(4, 103.0, 102.0, 100.0, 101.0),
        ];
        let flag = find_flag(&bars_exact_3, &candidate_ok, &params);
        assert!(flag.is_some());
        assert!((flag.unwrap().range_pct - 3.0).abs() < 1e-6);

        let bars_2_99 = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, pole_high, 100.0, pole_high),
            bar(3, 118.0, 102.99, 100.0, 102.99),
            bar(4, 102.99, 101.0, 100.0, 100.5),
        ];
        let flag_2_99 = find_flag(&bars_2_99, &candidate_ok, &params);
        assert!(flag_2_99.is_none());
    }

    #[test]
    fn full_projection_matches_exact_example() {
        // 2-day pole low=100 high=120 (gain 20%), 3-day flag high=118 low=113.5
        // (range ~3.96%), descending closes.
        let bars = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, 120.0, 100.0, 120.0),
            bar(3, 118.0, 118.0, 115.0, 117.0),
            bar(4, 117.0, 116.0, 114.0, 115.5),
            bar(5, 115.5, 115.0, 113.5, 114.0),
        ];
        let params = BullFlagParams::default();
        let pattern = detect(&bars, &params).expect("expected a valid bull flag pattern");
        assert!(pattern.pattern_valid);
        assert!((pattern.breakout_price - 118.0).abs() < 1e-9);
        assert!((pattern.price_target - 138.0).abs() < 1e-9);
    }

    #[test]
    fn pole_selection_does_not_shadow_the_genuine_run_up_with_a_trailing_window() {
        // Same bars as `full_projection_matches_exact_example`: the window
        // bars[1..=2] (bar2, bar3) also clears the gain threshold because
        // it inherits bar2's high=120/low=100, but its high isn't actually
        // set on its own last bar (bar3.high=118), so it must lose out to
        // the real pole ending at bar2.
        let bars = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, 120.0, 100.0, 120.0),
            bar(3, 118.0, 118.0, 115.0, 117.0),
            bar(4, 117.0, 116.0, 114.0, 115.5),
            bar(5, 115.5, 115.0, 113.5, 114.0),
        ];
        let params = BullFlagParams::default();
        let pole = find_pole(&bars, &params).expect("expected a qualifying pole");
        assert_eq!(pole.end_idx, 1);
        assert_eq!(pole.start_idx, 0);
    }

    #[test]
    fn insufficient_bars_skips_symbol() {
        let bars = vec![bar(1, 100.0, 105.0, 99.0, 104.0)];
        let params = BullFlagParams::default();
        assert!(detect(&bars, &params).is_none());
    }

    #[test]
    fn non_positive_price_skips_symbol() {
        let bars = vec![
            bar(1, 100.0, 100.0, 0.0, 100.0),
            bar(2, 100.0, 120.0, 100.0, 120.0),
            bar(3, 118.0, 118.0, 113.0, 114.0),
        ];
        let params = BullFlagParams::default();
        assert!(detect(&bars, &params).is_none());
    }

    #[test]
    fn no_qualifying_flag_yields_no_pattern() {
        // Pole qualifies but the flag always rises (positive slope) so no
        // window satisfies `flag_slope_pct <= 0`.
        let bars = vec![
            bar(1, 100.0, 100.0, 100.0, 100.0),
            bar(2, 100.0, 120.0, 100.0, 120.0),
            bar(3, 120.0, 122.0, 119.0, 121.0),
            bar(4, 121.0, 123.0, 120.0, 122.0),
        ];
        let params = BullFlagParams::default();
        assert!(detect(&bars, &params).is_none());
    }
}
