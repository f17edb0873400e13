// =============================================================================
// MomentumEngine — composition root: fan out to detectors, rank, audit, serve
// =============================================================================
//
// Mirrors the teacher's `app_state.rs` role: one struct owning every shared
// collaborator (adapters, retry envelopes, audit log, clock), constructed
// once at startup and handed out as `Arc<MomentumEngine>` to the HTTP layer.
// `scan` is the engine's only entry point that touches the network; `query`
// is a pure read over the audit log.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use crate::adapters::{HistoricalAdapter, NewsAdapter, QuoteAdapter};
use crate::audit_log::{AuditLog, AuditRecord, QueryFilter};
use crate::clock::MarketCalendar;
use crate::config::MomentumConfig;
use crate::detectors::bull_flag::{BullFlagDetector, BullFlagParams};
use crate::detectors::news_catalyst::NewsCatalystDetector;
use crate::detectors::premarket_scanner::PreMarketScanner;
use crate::errors::{MomentumError, ValidationError};
use crate::ranker::MomentumRanker;
use crate::retry::{RetryConfig, RetryEnvelope};
use crate::signal::Signal;

/// Which detector subset a scan targets (§6.2's `scan_types`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    Catalyst,
    Premarket,
    BullFlag,
}

/// The outcome of one `scan` call (§4.9, §7). `Partial` names which
/// detectors did not finish before the deadline; their results (if any
/// arrived) are still included in the returned signals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Complete,
    Partial { unfinished: Vec<&'static str> },
}

/// Optional per-call overrides for `MomentumEngine::scan`.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Restrict the scan to a subset of detectors. `None` runs all three.
    pub scan_types: Option<Vec<DetectorKind>>,
    /// Hard wall-clock deadline for the whole scan. `None` means no
    /// deadline (detectors run to completion).
    pub deadline: Option<std::time::Duration>,
}

/// IDLE/SCANNING per §4.9's state machine, exposed for the health endpoint.
/// DEGRADED is not a standing engine state — it is an annotation on the
/// individual `SCAN_COMPLETED` audit record (see `AuditRecord::degraded`)
/// and is mirrored here as `last_scan_degraded` for callers that only have
/// the health endpoint to go on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Scanning,
}

pub struct MomentumEngine {
    clock: Arc<dyn MarketCalendar>,
    audit_log: Arc<AuditLog>,
    news_detector: NewsCatalystDetector,
    premarket_detector: PreMarketScanner,
    bull_flag_detector: BullFlagDetector,
    ranker: MomentumRanker,
    scanning: AtomicBool,
    last_scan_degraded: AtomicBool,
}

impl MomentumEngine {
    /// Build the engine from `config`, validating it first (§4.8, §7) —
    /// composite weights that don't sum to 1.0 abort construction rather
    /// than silently normalizing.
    pub fn new(
        config: &MomentumConfig,
        clock: Arc<dyn MarketCalendar>,
        audit_log: Arc<AuditLog>,
        news_adapter: Option<Arc<dyn NewsAdapter>>,
        quote_adapter: Option<Arc<dyn QuoteAdapter>>,
        historical_adapter: Option<Arc<dyn HistoricalAdapter>>,
    ) -> Result<Self, MomentumError> {
        config.validate().map_err(MomentumError::Validation)?;

        let retry_config = RetryConfig {
            max_attempts: config.retry_max_attempts,
            base_delay: std::time::Duration::from_secs_f64(config.retry_base_delay_s),
            backoff_factor: config.retry_backoff_factor,
            circuit_breaker_failures: config.circuit_breaker_failures,
            circuit_breaker_cooldown: std::time::Duration::from_secs_f64(config.circuit_breaker_cooldown_s),
            ..RetryConfig::default()
        };

        let news_detector = NewsCatalystDetector::new(
            news_adapter,
            RetryEnvelope::new("news_adapter", retry_config.clone()),
            config.max_concurrency_per_adapter,
            audit_log.clone(),
        );

        let premarket_detector = PreMarketScanner::new(
            quote_adapter,
            historical_adapter.clone(),
            RetryEnvelope::new("quote_adapter", retry_config.clone()),
            config.max_concurrency_per_adapter,
            config.premarket_min_change_pct,
            config.volume_ratio_min,
            audit_log.clone(),
        );

        let bull_flag_detector = BullFlagDetector::new(
            historical_adapter,
            RetryEnvelope::new("historical_adapter", retry_config),
            config.max_concurrency_per_adapter,
            BullFlagParams {
                pole_min_gain_pct: config.pole_min_gain_pct,
                flag_range_min_pct: config.flag_range_min_pct,
                flag_range_max_pct: config.flag_range_max_pct,
            },
            audit_log.clone(),
        );

        Ok(Self {
            clock,
            audit_log,
            news_detector,
            premarket_detector,
            bull_flag_detector,
            ranker: MomentumRanker::new(config.composite_weights),
            scanning: AtomicBool::new(false),
            last_scan_degraded: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> EngineState {
        if self.scanning.load(Ordering::SeqCst) {
            EngineState::Scanning
        } else {
            EngineState::Idle
        }
    }

    /// Whether the most recently completed scan had at least one detector
    /// degrade due to an adapter failure (as opposed to a legitimate empty
    /// result). `false` before any scan has run.
    pub fn last_scan_degraded(&self) -> bool {
        self.last_scan_degraded.load(Ordering::SeqCst)
    }

    /// Validate `symbols`, run the requested detectors concurrently, rank
    /// the combined output, and return it alongside a `ScanOutcome`.
    /// Detector failures never propagate here (§4.5-§4.7); only a bad
    /// `symbols` list does (§4.9 step 1).
    pub async fn scan(&self, symbols: &[String], options: ScanOptions) -> Result<(Vec<Signal>, ScanOutcome), MomentumError> {
        for symbol in symbols {
            validate_symbol_shape(symbol)?;
        }

        let wants = |kind: DetectorKind| options.scan_types.as_ref().map(|types| types.contains(&kind)).unwrap_or(true);
        let (run_catalyst, run_premarket, run_bull_flag) = (
            wants(DetectorKind::Catalyst),
            wants(DetectorKind::Premarket),
            wants(DetectorKind::BullFlag),
        );

        let scan_id = Uuid::new_v4().to_string();
        let now = self.clock.now_utc();
        let started = Instant::now();

        self.scanning.store(true, Ordering::SeqCst);
        self.audit_log.log(AuditRecord::scan_started(&scan_id, now));
        info!(scan_id, symbol_count = symbols.len(), "scan started");

        let news_future = run_detector(run_catalyst, self.news_detector.scan(symbols, &scan_id, self.clock.as_ref()));
        let premarket_future = run_detector(run_premarket, self.premarket_detector.scan(symbols, &scan_id, self.clock.as_ref()));
        let bull_flag_future = run_detector(run_bull_flag, self.bull_flag_detector.scan(symbols, &scan_id, now));

        let (signals, degraded, outcome) = match options.deadline {
            None => {
                let (news, premarket, bull_flag) = tokio::join!(news_future, premarket_future, bull_flag_future);
                let degraded = news.1 || premarket.1 || bull_flag.1;
                (merge(news.0, premarket.0, bull_flag.0), degraded, ScanOutcome::Complete)
            }
            Some(deadline) => self.scan_with_deadline(news_future, premarket_future, bull_flag_future, deadline).await,
        };

        let ranked = self.ranker.rank(signals, now);

        for signal in &ranked {
            self.audit_log.log(AuditRecord::signal(&scan_id, now, signal));
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.last_scan_degraded.store(degraded, Ordering::SeqCst);
        match &outcome {
            ScanOutcome::Complete => {
                self.audit_log.log(AuditRecord::scan_completed(&scan_id, now, elapsed_ms, degraded));
                info!(scan_id, elapsed_ms, signal_count = ranked.len(), degraded, "scan completed");
            }
            ScanOutcome::Partial { unfinished } => {
                self.audit_log.log(AuditRecord::scan_partial(&scan_id, now, elapsed_ms));
                warn!(scan_id, elapsed_ms, ?unfinished, "scan partial: deadline exceeded");
            }
        }
        self.scanning.store(false, Ordering::SeqCst);

        Ok((ranked, outcome))
    }

    /// Race each detector against `deadline` independently rather than the
    /// whole join, so a slow bull-flag fetch (say) doesn't discard catalyst
    /// and pre-market results that already finished.
    async fn scan_with_deadline(
        &self,
        news_future: impl std::future::Future<Output = (Vec<Signal>, bool)>,
        premarket_future: impl std::future::Future<Output = (Vec<Signal>, bool)>,
        bull_flag_future: impl std::future::Future<Output = (Vec<Signal>, bool)>,
        deadline: std::time::Duration,
    ) -> (Vec<Signal>, bool, ScanOutcome) {
        let (news, premarket, bull_flag) = tokio::join!(
            tokio::time::timeout(deadline, news_future),
            tokio::time::timeout(deadline, premarket_future),
            tokio::time::timeout(deadline, bull_flag_future),
        );

        let mut signals = Vec::new();
        let mut degraded = false;
        let mut unfinished = Vec::new();

        match news {
            Ok((s, d)) => {
                signals.extend(s);
                degraded |= d;
            }
            Err(_) => unfinished.push("news_catalyst"),
        }
        match premarket {
            Ok((s, d)) => {
                signals.extend(s);
                degraded |= d;
            }
            Err(_) => unfinished.push("premarket_scanner"),
        }
        match bull_flag {
            Ok((s, d)) => {
                signals.extend(s);
                degraded |= d;
            }
            Err(_) => unfinished.push("bull_flag"),
        }

        if unfinished.is_empty() {
            (signals, degraded, ScanOutcome::Complete)
        } else {
            (signals, true, ScanOutcome::Partial { unfinished })
        }
    }

    /// Read-only pass-through to the audit log (§6.2).
    pub fn query(&self, filter: &QueryFilter) -> Vec<Signal> {
        self.audit_log.query(filter)
    }

    /// Flush the audit log writer. Called during graceful shutdown.
    pub fn flush(&self) {
        self.audit_log.flush();
    }
}

async fn run_detector(enabled: bool, fut: impl std::future::Future<Output = (Vec<Signal>, bool)>) -> (Vec<Signal>, bool) {
    if enabled {
        fut.await
    } else {
        (Vec::new(), false)
    }
}

fn merge(news: Vec<Signal>, premarket: Vec<Signal>, bull_flag: Vec<Signal>) -> Vec<Signal> {
    let mut all = news;
    all.extend(premarket);
    all.extend(bull_flag);
    all
}

fn validate_symbol_shape(symbol: &str) -> Result<(), MomentumError> {
    let valid = (1..=5).contains(&symbol.len()) && symbol.bytes().all(|b| b.is_ascii_uppercase());
    if valid {
        Ok(())
    } else {
        Err(MomentumError::Validation(ValidationError::InvalidSymbol(symbol.to_string())))
    }
}
