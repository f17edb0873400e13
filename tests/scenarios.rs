// End-to-end scenarios driving `MomentumEngine` through its public API with
// the mock adapters exposed via the `test-util` feature.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use momentum_engine::adapters::{DailyBar, HistoricalAdapter, NewsAdapter, NewsItem, QuoteAdapter};
use momentum_engine::audit_log::AuditLog;
use momentum_engine::clock::{FixedClock, MarketCalendar};
use momentum_engine::config::MomentumConfig;
use momentum_engine::engine::{MomentumEngine, ScanOptions, ScanOutcome};
use momentum_engine::errors::AdapterError;
use momentum_engine::signal::SignalType;
use momentum_engine::testing::{MockHistoricalAdapter, MockNewsAdapter, MockQuoteAdapter};

fn audit_log() -> Arc<AuditLog> {
    let dir = tempfile::tempdir().unwrap();
    // Leak the tempdir so the log root outlives the engine under test; each
    // test gets its own directory and the process exit cleans it up.
    let path = dir.into_path();
    Arc::new(AuditLog::new(path))
}

fn premarket_clock() -> Arc<dyn MarketCalendar> {
    // 2025-03-04 11:00 UTC = 06:00 NY, a Tuesday inside [04:00, 09:30).
    Arc::new(FixedClock::ymd_hms(2025, 3, 4, 11, 0, 0))
}

#[tokio::test]
async fn premarket_gate_closes_outside_market_hours() {
    // 2025-03-04 14:00 UTC = 09:00 NY, market open, past the 09:30 gate.
    let clock: Arc<dyn MarketCalendar> = Arc::new(FixedClock::ymd_hms(2025, 3, 4, 14, 0, 0));
    let engine = MomentumEngine::new(
        &MomentumConfig::default(),
        clock,
        audit_log(),
        Some(Arc::new(MockNewsAdapter::empty())),
        Some(Arc::new(MockQuoteAdapter::with_strong_move())),
        Some(Arc::new(MockHistoricalAdapter::flat())),
    )
    .unwrap();

    let (signals, outcome) = engine.scan(&["AAPL".to_string()], ScanOptions::default()).await.unwrap();
    assert!(signals.is_empty());
    assert_eq!(outcome, ScanOutcome::Complete);
}

#[tokio::test]
async fn catalyst_classification_is_deterministic() {
    let engine = MomentumEngine::new(
        &MomentumConfig::default(),
        premarket_clock(),
        audit_log(),
        Some(Arc::new(MockNewsAdapter::with_one_item())),
        None,
        None,
    )
    .unwrap();

    let (signals, _) = engine.scan(&["AAPL".to_string()], ScanOptions::default()).await.unwrap();
    let catalyst = signals
        .iter()
        .find(|s| s.signal_type == SignalType::Catalyst)
        .expect("expected a catalyst signal");
    assert_eq!(catalyst.strength, 80.0);
}

#[tokio::test]
async fn bull_flag_projection_matches_the_canonical_pole_and_flag() {
    let engine = MomentumEngine::new(
        &MomentumConfig::default(),
        premarket_clock(),
        audit_log(),
        None,
        None,
        Some(Arc::new(MockHistoricalAdapter::with_bull_flag_pattern())),
    )
    .unwrap();

    let (signals, _) = engine.scan(&["AAPL".to_string()], ScanOptions::default()).await.unwrap();
    let pattern = signals
        .iter()
        .find(|s| s.signal_type == SignalType::BullFlag)
        .expect("expected a bull flag signal");

    match &pattern.metadata {
        momentum_engine::signal::SignalMetadata::BullFlag(p) => {
            assert!((p.breakout_price - 118.0).abs() < 1e-9);
            assert!((p.price_target - 138.0).abs() < 1e-9);
            assert!(p.pattern_valid);
        }
        other => panic!("unexpected metadata variant: {other:?}"),
    }
}

#[tokio::test]
async fn composite_ranking_orders_ties_by_symbol() {
    // Both symbols see identical mock adapter output, so their composites
    // tie on strength; the documented tiebreak (symbol ascending) then
    // orders AAPL before MSFT. Exact weighted-sum arithmetic is already
    // covered precisely in `ranker.rs`'s unit tests.
    let engine = MomentumEngine::new(
        &MomentumConfig::default(),
        premarket_clock(),
        audit_log(),
        Some(Arc::new(MockNewsAdapter::with_one_item())),
        Some(Arc::new(MockQuoteAdapter::with_strong_move())),
        Some(Arc::new(MockHistoricalAdapter::with_bull_flag_pattern())),
    )
    .unwrap();

    let (signals, _) = engine
        .scan(&["MSFT".to_string(), "AAPL".to_string()], ScanOptions::default())
        .await
        .unwrap();

    let composites: Vec<_> = signals.iter().filter(|s| s.signal_type == SignalType::Composite).collect();
    assert_eq!(composites.len(), 2);
    assert!((composites[0].strength - composites[1].strength).abs() < 1e-9);
    assert_eq!(composites[0].symbol, "AAPL");
    assert_eq!(composites[1].symbol, "MSFT");
}

#[tokio::test]
async fn news_adapter_failure_degrades_without_failing_the_scan() {
    struct AlwaysFailsNews;

    #[async_trait]
    impl NewsAdapter for AlwaysFailsNews {
        async fn fetch(&self, _symbol: &str, _since_utc: DateTime<Utc>) -> Result<Vec<NewsItem>, AdapterError> {
            Err(AdapterError::Terminal("feed offline".to_string()))
        }
    }

    let engine = MomentumEngine::new(
        &MomentumConfig::default(),
        premarket_clock(),
        audit_log(),
        Some(Arc::new(AlwaysFailsNews)),
        Some(Arc::new(MockQuoteAdapter::with_strong_move())),
        Some(Arc::new(MockHistoricalAdapter::with_bull_flag_pattern())),
    )
    .unwrap();

    let (signals, outcome) = engine.scan(&["AAPL".to_string()], ScanOptions::default()).await.unwrap();
    assert_eq!(outcome, ScanOutcome::Complete);
    assert!(!signals.iter().any(|s| s.signal_type == SignalType::Catalyst));
    assert!(engine.last_scan_degraded());

    let composite = signals
        .iter()
        .find(|s| s.signal_type == SignalType::Composite)
        .expect("composite should still be emitted despite the news failure");
    assert!(composite.strength > 0.0);
}

#[tokio::test]
async fn deadline_partial_names_only_the_unfinished_detector() {
    struct SlowHistorical;

    #[async_trait]
    impl HistoricalAdapter for SlowHistorical {
        async fn get_daily_bars(&self, _symbol: &str, _lookback_days: u32) -> Result<Vec<DailyBar>, AdapterError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("deadline should cut this off first")
        }

        async fn get_premarket_volume_baseline(&self, _symbol: &str, _trailing_days: u32) -> Result<Option<f64>, AdapterError> {
            Ok(Some(100_000.0))
        }
    }

    let engine = MomentumEngine::new(
        &MomentumConfig::default(),
        premarket_clock(),
        audit_log(),
        Some(Arc::new(MockNewsAdapter::with_one_item())),
        Some(Arc::new(MockQuoteAdapter::with_strong_move())),
        Some(Arc::new(SlowHistorical)),
    )
    .unwrap();

    let options = ScanOptions {
        scan_types: None,
        deadline: Some(Duration::from_millis(10)),
    };
    let (signals, outcome) = engine.scan(&["AAPL".to_string()], options).await.unwrap();

    match outcome {
        ScanOutcome::Partial { unfinished } => assert_eq!(unfinished, vec!["bull_flag"]),
        ScanOutcome::Complete => panic!("expected the bull-flag detector to miss the deadline"),
    }
    assert!(signals.iter().any(|s| s.signal_type == SignalType::Catalyst));
    assert!(signals.iter().any(|s| s.signal_type == SignalType::PremarketMover));
    assert!(!signals.iter().any(|s| s.signal_type == SignalType::BullFlag));
}
