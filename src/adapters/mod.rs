// =============================================================================
// Adapter Ports — external collaborator contracts (§6.1)
// =============================================================================
//
// These traits are the only thing the engine knows about news/quote/
// historical data providers. Real implementations (Polygon, Alpaca,
// Benzinga, ...) live outside this crate; the engine only ever depends on
// the trait object, matching the teacher's own separation between
// `binance::client::BinanceClient` (a concrete adapter) and the call sites
// in `strategy.rs` that only need its narrow method surface. Each adapter
// MAY be entirely absent (missing credentials) — the Engine composes
// `Option<Arc<dyn Trait>>` and degrades gracefully per §7.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::AdapterError;

/// A single news item as returned by a `NewsAdapter`.
#[derive(Debug, Clone)]
pub struct NewsItem {
    pub headline: String,
    pub published_at: DateTime<Utc>,
    pub source: String,
}

/// News source adapter (§6.1). `fetch` MUST return items newest-first and
/// MAY return an empty list; it MUST distinguish retryable from terminal
/// failures via `AdapterError` so `RetryEnvelope` can classify them.
#[async_trait]
pub trait NewsAdapter: Send + Sync {
    async fn fetch(&self, symbol: &str, since_utc: DateTime<Utc>) -> Result<Vec<NewsItem>, AdapterError>;
}

/// A pre-market quote snapshot as returned by a `QuoteAdapter`.
#[derive(Debug, Clone, Copy)]
pub struct PremarketQuote {
    pub reference_price: f64,
    pub current_price: f64,
    pub cumulative_premarket_volume: f64,
}

/// Quote source adapter (§6.1).
#[async_trait]
pub trait QuoteAdapter: Send + Sync {
    async fn get_premarket_quote(&self, symbol: &str) -> Result<PremarketQuote, AdapterError>;
}

/// One daily OHLCV bar.
#[derive(Debug, Clone, Copy)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Historical data adapter (§6.1). `get_daily_bars` returns bars ordered
/// ascending by date with no duplicates; gaps (missing trading days) are
/// allowed and are the caller's concern, not the adapter's.
#[async_trait]
pub trait HistoricalAdapter: Send + Sync {
    async fn get_daily_bars(&self, symbol: &str, lookback_days: u32) -> Result<Vec<DailyBar>, AdapterError>;

    /// Mean pre-market volume over the trailing `trailing_days` trading
    /// days, or `None` if no baseline is available.
    async fn get_premarket_volume_baseline(&self, symbol: &str, trailing_days: u32) -> Result<Option<f64>, AdapterError>;
}
