// =============================================================================
// Mock Adapters — in-memory stand-ins for NewsAdapter/QuoteAdapter/HistoricalAdapter
// =============================================================================
//
// Exposed behind `#[cfg(any(test, feature = "test-util"))]` so both this
// crate's own unit tests and the external integration tests under `tests/`
// can exercise `MomentumEngine` without a real adapter implementation — real
// implementations (Polygon, Alpaca, Benzinga, ...) are out of scope here.
// =============================================================================

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use crate::adapters::{DailyBar, HistoricalAdapter, NewsAdapter, NewsItem, PremarketQuote, QuoteAdapter};
use crate::errors::AdapterError;

/// Always returns a fixed list of news items. `fail_next` forces the next
/// `fetch` call to return a terminal error, for exercising degradation paths.
pub struct MockNewsAdapter {
    items: Vec<NewsItem>,
    fail_next: Mutex<bool>,
}

impl MockNewsAdapter {
    pub fn new(items: Vec<NewsItem>) -> Self {
        Self {
            items,
            fail_next: Mutex::new(false),
        }
    }

    pub fn with_one_item() -> Self {
        Self::new(vec![NewsItem {
            headline: "Company reports earnings beat, raises guidance".to_string(),
            published_at: Utc::now() - chrono::Duration::hours(1),
            source: "mock-wire".to_string(),
        }])
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn set_fail_next(&self, fail: bool) {
        *self.fail_next.lock() = fail;
    }
}

#[async_trait]
impl NewsAdapter for MockNewsAdapter {
    async fn fetch(&self, _symbol: &str, _since_utc: DateTime<Utc>) -> Result<Vec<NewsItem>, AdapterError> {
        if std::mem::take(&mut *self.fail_next.lock()) {
            return Err(AdapterError::Terminal("mock forced failure".to_string()));
        }
        Ok(self.items.clone())
    }
}

/// Always returns a fixed quote.
pub struct MockQuoteAdapter {
    quote: PremarketQuote,
}

impl MockQuoteAdapter {
    pub fn new(quote: PremarketQuote) -> Self {
        Self { quote }
    }

    pub fn with_strong_move() -> Self {
        Self::new(PremarketQuote {
            reference_price: 100.0,
            current_price: 107.0,
            cumulative_premarket_volume: 300_000.0,
        })
    }

    pub fn with_weak_move() -> Self {
        Self::new(PremarketQuote {
            reference_price: 100.0,
            current_price: 100.5,
            cumulative_premarket_volume: 10_000.0,
        })
    }
}

#[async_trait]
impl QuoteAdapter for MockQuoteAdapter {
    async fn get_premarket_quote(&self, _symbol: &str) -> Result<PremarketQuote, AdapterError> {
        Ok(self.quote)
    }
}

/// Always returns a fixed set of daily bars and volume baseline.
pub struct MockHistoricalAdapter {
    bars: Vec<DailyBar>,
    baseline: Option<f64>,
}

impl MockHistoricalAdapter {
    pub fn new(bars: Vec<DailyBar>, baseline: Option<f64>) -> Self {
        Self { bars, baseline }
    }

    /// Bars containing a clean 2-day pole (100 -> 120) followed by a 3-day
    /// flag (high 118, low 113.5), matching the canonical projection
    /// example: breakout_price = 118.0, price_target = 138.0.
    pub fn with_bull_flag_pattern() -> Self {
        let bar = |y, m, d, o: f64, h: f64, l: f64, c: f64| DailyBar {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 1_000_000.0,
        };
        Self::new(
            vec![
                bar(2025, 3, 1, 100.0, 100.0, 100.0, 100.0),
                bar(2025, 3, 2, 100.0, 120.0, 100.0, 120.0),
                bar(2025, 3, 3, 118.0, 118.0, 115.0, 117.0),
                bar(2025, 3, 4, 117.0, 116.0, 114.0, 115.5),
                bar(2025, 3, 5, 115.5, 115.0, 113.5, 114.0),
            ],
            Some(100_000.0),
        )
    }

    pub fn flat() -> Self {
        let bar = |y, m, d, price: f64| DailyBar {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 500_000.0,
        };
        Self::new(
            vec![
                bar(2025, 3, 1, 100.0),
                bar(2025, 3, 2, 100.0),
                bar(2025, 3, 3, 100.0),
            ],
            None,
        )
    }
}

#[async_trait]
impl HistoricalAdapter for MockHistoricalAdapter {
    async fn get_daily_bars(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<DailyBar>, AdapterError> {
        Ok(self.bars.clone())
    }

    async fn get_premarket_volume_baseline(&self, _symbol: &str, _trailing_days: u32) -> Result<Option<f64>, AdapterError> {
        Ok(self.baseline)
    }
}
