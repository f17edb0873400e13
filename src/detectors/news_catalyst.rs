// =============================================================================
// NewsCatalystDetector — news fetch -> 24h filter -> classification -> signal
// =============================================================================
//
// Per-symbol fetches run concurrently, bounded by a semaphore the same way
// the teacher bounds per-adapter concurrency informally through its
// `tokio::spawn`-per-symbol stream loops in `main.rs`; here it's made
// explicit and configurable (§5: "at most limit x 3 in-flight calls").
// Failures are isolated per symbol and never propagate to the Engine —
// §4.5's "never throws to the Engine" is enforced by catching every
// adapter error inside `scan_symbol` and returning an empty Vec.
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::adapters::{NewsAdapter, NewsItem};
use crate::audit_log::{AuditLog, AuditRecord};
use crate::clock::MarketCalendar;
use crate::errors::AdapterError;
use crate::retry::RetryEnvelope;
use crate::signal::{self, CatalystEvent, CatalystType, Signal};

/// Classification keywords, checked in priority order. First match wins.
const CLASSIFICATION_ORDER: &[(CatalystType, &[&str])] = &[
    (CatalystType::Earnings, &["earnings", "eps", "revenue"]),
    (CatalystType::Fda, &["fda", "approval", "clearance"]),
    (CatalystType::Merger, &["merger", "acquisition", "buyout"]),
    (CatalystType::Product, &["launch", "unveil", "release"]),
    (
        CatalystType::Analyst,
        &["upgrade", "downgrade", "initiated", "price target"],
    ),
];

/// Classify a headline into a `CatalystType` by case-insensitive keyword
/// match, deterministically: the first category in `CLASSIFICATION_ORDER`
/// with a matching keyword wins.
pub fn classify(headline: &str) -> CatalystType {
    let lower = headline.to_lowercase();
    for (catalyst_type, keywords) in CLASSIFICATION_ORDER {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            return *catalyst_type;
        }
    }
    CatalystType::Other
}

/// Per-item strength: base 50, +20 for the "hard" catalyst types, +10 if
/// published within the last 6 hours; clamped to [0, 100].
pub fn strength_for(
    catalyst_type: CatalystType,
    published_at: DateTime<Utc>,
    detected_at: DateTime<Utc>,
) -> f64 {
    let mut score = 50.0;
    if matches!(
        catalyst_type,
        CatalystType::Earnings | CatalystType::Fda | CatalystType::Merger
    ) {
        score += 20.0;
    }
    if detected_at - published_at <= chrono::Duration::hours(6) {
        score += 10.0;
    }
    score.clamp(0.0, 100.0)
}

pub struct NewsCatalystDetector {
    adapter: Option<Arc<dyn NewsAdapter>>,
    retry: RetryEnvelope,
    concurrency_limit: usize,
    audit_log: Arc<AuditLog>,
}

impl NewsCatalystDetector {
    pub fn new(
        adapter: Option<Arc<dyn NewsAdapter>>,
        retry: RetryEnvelope,
        concurrency_limit: usize,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        Self {
            adapter,
            retry,
            concurrency_limit,
            audit_log,
        }
    }

    /// Scan `symbols` for news catalysts. Returns one CATALYST signal per
    /// qualifying item across every symbol, plus whether any symbol's fetch
    /// failed (used by the Engine's DEGRADED annotation); never errors (§4.5).
    pub async fn scan(
        &self,
        symbols: &[String],
        scan_id: &str,
        clock: &dyn MarketCalendar,
    ) -> (Vec<Signal>, bool) {
        let Some(adapter) = self.adapter.clone() else {
            warn!(scan_id, "NEWS_API_KEY missing, catalyst detector disabled for this scan");
            self.audit_log.log(AuditRecord::error(
                scan_id,
                clock.now_utc(),
                None,
                "AdapterTerminal",
                "news adapter not configured (missing credential)",
            ));
            return (Vec::new(), true);
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit.max(1)));
        let now = clock.now_utc();
        let since = now - chrono::Duration::hours(24);

        let tasks = symbols.iter().map(|symbol| {
            let adapter = adapter.clone();
            let semaphore = semaphore.clone();
            let symbol = symbol.clone();
            let scan_id = scan_id.to_string();
            async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                self.scan_symbol(adapter, &symbol, since, now, &scan_id).await
            }
        });

        let results = futures_util::future::join_all(tasks).await;
        let degraded = results.iter().any(|(_, failed)| *failed);
        let signals = results.into_iter().flat_map(|(signals, _)| signals).collect();
        (signals, degraded)
    }

    async fn scan_symbol(
        &self,
        adapter: Arc<dyn NewsAdapter>,
        symbol: &str,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        scan_id: &str,
    ) -> (Vec<Signal>, bool) {
        let result = self
            .retry
            .run(|| {
                let adapter = adapter.clone();
                let symbol = symbol.to_string();
                async move { adapter.fetch(&symbol, since).await }
            })
            .await;

        let items: Vec<NewsItem> = match result {
            Ok(items) => items,
            Err(err) => {
                warn!(scan_id, symbol, error = %err, "news adapter call failed, skipping symbol");
                self.audit_log.log(AuditRecord::error(
                    scan_id,
                    now,
                    Some(symbol),
                    adapter_error_kind(&err),
                    &err.to_string(),
                ));
                return (Vec::new(), true);
            }
        };

        let mut signals = Vec::new();
        for item in items {
            if item.published_at > now || now - item.published_at > chrono::Duration::hours(24) {
                continue;
            }

            let catalyst_type = classify(&item.headline);
            let strength = strength_for(catalyst_type, item.published_at, now);

            match signal::make_catalyst(
                symbol,
                strength,
                now,
                CatalystEvent {
                    catalyst_type,
                    headline: item.headline.clone(),
                    published_at: item.published_at,
                    source: item.source.clone(),
                },
            ) {
                Ok(signal) => signals.push(signal),
                Err(e) => {
                    warn!(scan_id, symbol, error = %e, "dropping malformed catalyst item");
                }
            }
        }

        info!(scan_id, symbol, count = signals.len(), "catalyst scan complete for symbol");
        (signals, false)
    }
}

fn adapter_error_kind(err: &AdapterError) -> &'static str {
    match err {
        AdapterError::Transient(_) => "AdapterTransient",
        AdapterError::Terminal(_) => "AdapterTerminal",
        AdapterError::Exhausted { .. } => "AdapterExhausted",
        AdapterError::CircuitOpen { .. } => "CircuitOpen",
        AdapterError::Timeout(_) => "AdapterTransient",
    }
}
