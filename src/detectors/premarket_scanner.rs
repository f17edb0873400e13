// =============================================================================
// PreMarketScanner — quote+volume fetch in window -> threshold filter -> signal
// =============================================================================
//
// The window check always runs before any network call (§4.6, step 1) so a
// scan outside 04:00-09:30 NY never spends adapter budget. Per-symbol
// fetches are isolated the same way `news_catalyst.rs` isolates them: one
// failed symbol never stops the rest.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::adapters::{HistoricalAdapter, PremarketQuote, QuoteAdapter};
use crate::audit_log::{AuditLog, AuditRecord};
use crate::clock::MarketCalendar;
use crate::retry::RetryEnvelope;
use crate::signal::{self, PreMarketMover, Signal};

const TRAILING_BASELINE_DAYS: u32 = 10;

/// `(current - reference) / reference * 100`.
pub fn price_change_pct(reference: f64, current: f64) -> f64 {
    (current - reference) / reference * 100.0
}

/// `cumulative_volume / baseline`, or `1.0` if no baseline is available —
/// a ratio of 1.0 always fails the `volume_ratio_min` threshold (default
/// 2.0), which is the documented rejection mechanism for missing baselines
/// (§3, §9 Open Questions).
pub fn volume_ratio(cumulative_volume: f64, baseline: Option<f64>) -> f64 {
    match baseline {
        Some(b) if b > 0.0 => cumulative_volume / b,
        _ => 1.0,
    }
}

/// `min(100, 10*|pct| + 10*log2(max(1, ratio)))`, clamped to [0, 100].
pub fn strength_for(price_change_pct: f64, volume_ratio: f64) -> f64 {
    let score = 10.0 * price_change_pct.abs() + 10.0 * volume_ratio.max(1.0).log2();
    score.min(100.0).max(0.0)
}

pub struct PreMarketScanner {
    quote_adapter: Option<Arc<dyn QuoteAdapter>>,
    historical_adapter: Option<Arc<dyn HistoricalAdapter>>,
    retry: RetryEnvelope,
    concurrency_limit: usize,
    min_change_pct: f64,
    min_volume_ratio: f64,
    audit_log: Arc<AuditLog>,
}

impl PreMarketScanner {
    pub fn new(
        quote_adapter: Option<Arc<dyn QuoteAdapter>>,
        historical_adapter: Option<Arc<dyn HistoricalAdapter>>,
        retry: RetryEnvelope,
        concurrency_limit: usize,
        min_change_pct: f64,
        min_volume_ratio: f64,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        Self {
            quote_adapter,
            historical_adapter,
            retry,
            concurrency_limit,
            min_change_pct,
            min_volume_ratio,
            audit_log,
        }
    }

    pub async fn scan(
        &self,
        symbols: &[String],
        scan_id: &str,
        clock: &dyn MarketCalendar,
    ) -> (Vec<Signal>, bool) {
        let now = clock.now_utc();

        if !clock.is_premarket(now) {
            info!(scan_id, "outside pre-market window, skipping scan");
            self.audit_log.log(AuditRecord::error(
                scan_id,
                now,
                None,
                "SKIP_WINDOW",
                "not in pre-market window [04:00, 09:30) America/New_York",
            ));
            return (Vec::new(), false);
        }

        let Some(quote_adapter) = self.quote_adapter.clone() else {
            warn!(scan_id, "quote adapter not configured, skipping pre-market scan");
            return (Vec::new(), true);
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit.max(1)));

        let tasks = symbols.iter().map(|symbol| {
            let quote_adapter = quote_adapter.clone();
            let historical_adapter = self.historical_adapter.clone();
            let semaphore = semaphore.clone();
            let symbol = symbol.clone();
            let scan_id = scan_id.to_string();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                self.scan_symbol(quote_adapter, historical_adapter, &symbol, now, &scan_id)
                    .await
            }
        });

        let results = futures_util::future::join_all(tasks).await;
        let degraded = results.iter().any(|(_, failed)| *failed);
        let signals = results.into_iter().filter_map(|(signal, _)| signal).collect();
        (signals, degraded)
    }

    async fn scan_symbol(
        &self,
        quote_adapter: Arc<dyn QuoteAdapter>,
        historical_adapter: Option<Arc<dyn HistoricalAdapter>>,
        symbol: &str,
        now: DateTime<Utc>,
        scan_id: &str,
    ) -> (Option<Signal>, bool) {
        let quote: PremarketQuote = match self
            .retry
            .run(|| {
                let quote_adapter = quote_adapter.clone();
                let symbol = symbol.to_string();
                async move { quote_adapter.get_premarket_quote(&symbol).await }
            })
            .await
        {
            Ok(quote) => quote,
            Err(err) => {
                warn!(scan_id, symbol, error = %err, "quote adapter call failed, skipping symbol");
                self.audit_log
                    .log(AuditRecord::error(scan_id, now, Some(symbol), "AdapterExhausted", &err.to_string()));
                return (None, true);
            }
        };

        let baseline = match &historical_adapter {
            Some(adapter) => {
                match self
                    .retry
                    .run(|| {
                        let adapter = adapter.clone();
                        let symbol = symbol.to_string();
                        async move { adapter.get_premarket_volume_baseline(&symbol, TRAILING_BASELINE_DAYS).await }
                    })
                    .await
                {
                    Ok(baseline) => baseline,
                    Err(err) => {
                        warn!(scan_id, symbol, error = %err, "baseline volume fetch failed, treating as unavailable");
                        None
                    }
                }
            }
            None => None,
        };

        let pct = price_change_pct(quote.reference_price, quote.current_price);
        let ratio = volume_ratio(quote.cumulative_premarket_volume, baseline);

        if pct.abs() < self.min_change_pct || ratio < self.min_volume_ratio {
            return (None, false);
        }

        let strength = strength_for(pct, ratio);

        let signal = match signal::make_premarket(
            symbol,
            strength,
            now,
            true,
            PreMarketMover {
                price_change_pct: pct,
                volume_ratio: ratio,
                reference_price: quote.reference_price,
                current_price: quote.current_price,
                baseline_volume: baseline.unwrap_or(quote.cumulative_premarket_volume),
            },
        ) {
            Ok(signal) => Some(signal),
            Err(e) => {
                warn!(scan_id, symbol, error = %e, "dropping malformed premarket signal");
                None
            }
        };
        (signal, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_change_pct_basic() {
        assert!((price_change_pct(100.0, 106.0) - 6.0).abs() < 1e-9);
        assert!((price_change_pct(100.0, 94.0) - (-6.0)).abs() < 1e-9);
    }

    #[test]
    fn volume_ratio_missing_baseline_is_one() {
        assert_eq!(volume_ratio(50_000.0, None), 1.0);
        assert_eq!(volume_ratio(50_000.0, Some(0.0)), 1.0);
    }

    #[test]
    fn volume_ratio_with_baseline() {
        assert_eq!(volume_ratio(200_000.0, Some(100_000.0)), 2.0);
    }

    #[test]
    fn missing_baseline_rejects_signal_via_threshold() {
        // ratio defaults to 1.0, which is below the default min of 2.0.
        let ratio = volume_ratio(500_000.0, None);
        assert!(ratio < 2.0);
    }

    #[test]
    fn strength_is_deterministic_and_clamped() {
        let s = strength_for(5.0, 2.0);
        assert!((0.0..=100.0).contains(&s));
        let expected = 10.0 * 5.0 + 10.0 * 2.0_f64.log2();
        assert!((s - expected).abs() < 1e-9);
    }

    #[test]
    fn strength_clamps_at_100() {
        let s = strength_for(500.0, 1000.0);
        assert_eq!(s, 100.0);
    }
}
