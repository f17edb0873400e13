// =============================================================================
// AuditLog — append-only, time-partitioned structured event sink
// =============================================================================
//
// One JSON object per line, UTF-8, newline-terminated, UTC ISO-8601
// timestamps with a trailing `Z` (§6.3). Files are partitioned by UTC date
// under `<log_root>/momentum/YYYY-MM-DD.jsonl` and never rewritten. The
// writer owns its file handle; concurrent `log` calls are serialized by a
// `parking_lot::Mutex` the way `runtime_config.rs` serializes its
// tmp-file-plus-rename save — here the invariant is "no torn line", not
// "no torn file", so a plain locked `write_all` per record is enough.
// =============================================================================

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::signal::{Signal, SignalType};

/// The event kinds that appear in the `event` field of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    ScanStarted,
    Signal,
    ScanCompleted,
    ScanPartial,
    Error,
}

/// A structured error payload, kept minimal and redacted — no stack traces,
/// no secrets, callers are responsible for scrubbing the message before it
/// reaches here (§4.4: "No PII; no secrets; callers must redact").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditError {
    pub kind: String,
    pub msg: String,
}

/// One line of the audit log, matching §6.3's wire format exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    pub scan_id: String,
    pub event: AuditEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<Signal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuditError>,
    /// Present (and `true`) on a `SCAN_COMPLETED` record only when one or
    /// more detectors returned empty due to an adapter failure rather than
    /// a legitimate empty result (§4.9's DEGRADED annotation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded: Option<bool>,
}

impl AuditRecord {
    pub fn scan_started(scan_id: &str, ts: DateTime<Utc>) -> Self {
        Self {
            timestamp: ts,
            scan_id: scan_id.to_string(),
            event: AuditEvent::ScanStarted,
            symbol: None,
            signal: None,
            ms: None,
            error: None,
            degraded: None,
        }
    }

    pub fn signal(scan_id: &str, ts: DateTime<Utc>, signal: &Signal) -> Self {
        Self {
            timestamp: ts,
            scan_id: scan_id.to_string(),
            event: AuditEvent::Signal,
            symbol: Some(signal.symbol.clone()),
            signal: Some(signal.clone()),
            ms: None,
            error: None,
            degraded: None,
        }
    }

    pub fn scan_completed(scan_id: &str, ts: DateTime<Utc>, ms_elapsed: u64, degraded: bool) -> Self {
        Self {
            timestamp: ts,
            scan_id: scan_id.to_string(),
            event: AuditEvent::ScanCompleted,
            symbol: None,
            signal: None,
            ms: Some(ms_elapsed),
            error: None,
            degraded: degraded.then_some(true),
        }
    }

    pub fn scan_partial(scan_id: &str, ts: DateTime<Utc>, ms_elapsed: u64) -> Self {
        Self {
            timestamp: ts,
            scan_id: scan_id.to_string(),
            event: AuditEvent::ScanPartial,
            symbol: None,
            signal: None,
            ms: Some(ms_elapsed),
            error: None,
            degraded: None,
        }
    }

    pub fn error(scan_id: &str, ts: DateTime<Utc>, symbol: Option<&str>, kind: &str, msg: &str) -> Self {
        Self {
            timestamp: ts,
            scan_id: scan_id.to_string(),
            event: AuditEvent::Error,
            symbol: symbol.map(String::from),
            signal: None,
            ms: None,
            error: Some(AuditError {
                kind: kind.to_string(),
                msg: msg.to_string(),
            }),
            degraded: None,
        }
    }
}

struct WriterState {
    partition_date: NaiveDate,
    file: File,
}

/// Append-only audit log, rotated daily at 00:00 UTC.
pub struct AuditLog {
    log_root: PathBuf,
    writer: Mutex<Option<WriterState>>,
}

impl AuditLog {
    pub fn new(log_root: impl Into<PathBuf>) -> Self {
        Self {
            log_root: log_root.into(),
            writer: Mutex::new(None),
        }
    }

    fn partition_dir(&self) -> PathBuf {
        self.log_root.join("momentum")
    }

    fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.partition_dir().join(format!("{}.jsonl", date.format("%Y-%m-%d")))
    }

    /// Append one record, opening (or rotating into) today's partition file
    /// as needed. Non-blocking-correct: the write itself is a single
    /// `write_all` + `flush` under the lock, so the record is durable by the
    /// time `log` returns — no background buffering to lose on a crash.
    pub fn log(&self, record: AuditRecord) {
        if let Err(e) = self.log_inner(&record) {
            error!(error = %e, "failed to write audit log record");
        }
    }

    fn log_inner(&self, record: &AuditRecord) -> std::io::Result<()> {
        let date = record.timestamp.date_naive();
        let mut guard = self.writer.lock();

        let needs_new_file = match &*guard {
            Some(state) => state.partition_date != date,
            None => true,
        };

        if needs_new_file {
            std::fs::create_dir_all(self.partition_dir())?;
            let path = self.partition_path(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            *guard = Some(WriterState {
                partition_date: date,
                file,
            });
        }

        let state = guard.as_mut().expect("writer state just initialized");
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        state.file.write_all(line.as_bytes())?;
        state.file.flush()?;
        Ok(())
    }

    /// Flush and drop the current writer handle. Called on graceful
    /// shutdown so buffered OS-level writes are forced out before exit.
    pub fn flush(&self) {
        let mut guard = self.writer.lock();
        if let Some(state) = guard.as_mut() {
            if let Err(e) = state.file.flush() {
                warn!(error = %e, "failed to flush audit log on shutdown");
            }
        }
    }

    /// Read every record across all partition files in `[start, end]`
    /// (inclusive), applying `filter` and returning a consistent ordered
    /// tail — readers never see a partially-written line because `log`
    /// always writes a complete line before returning.
    pub fn query(&self, filter: &QueryFilter) -> Vec<Signal> {
        let dates = self.dates_in_range(filter.start_utc, filter.end_utc);
        let mut matched = Vec::new();

        for date in dates {
            let path = self.partition_path(date);
            if let Err(e) = self.read_partition(&path, filter, &mut matched) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "failed to read audit partition");
                }
            }
        }

        match filter.sort_by {
            SortBy::Strength => matched.sort_by(|a, b| {
                b.strength
                    .partial_cmp(&a.strength)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            SortBy::DetectedAt => matched.sort_by_key(|s| s.detected_at),
        }

        let offset = filter.offset.unwrap_or(0);
        let limit = filter.limit.unwrap_or(DEFAULT_QUERY_PAGE_SIZE);
        matched.into_iter().skip(offset).take(limit).collect()
    }

    fn dates_in_range(&self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Vec<NaiveDate> {
        let dir = self.partition_dir();
        let mut dates: Vec<NaiveDate> = match std::fs::read_dir(&dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().into_string().ok())
                .filter_map(|name| {
                    name.strip_suffix(".jsonl")
                        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                })
                .collect(),
            Err(_) => Vec::new(),
        };

        if let Some(start) = start {
            dates.retain(|d| *d >= start.date_naive());
        }
        if let Some(end) = end {
            dates.retain(|d| *d <= end.date_naive());
        }
        dates.sort();
        dates
    }

    fn read_partition(
        &self,
        path: &Path,
        filter: &QueryFilter,
        out: &mut Vec<Signal>,
    ) -> std::io::Result<()> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "skipping malformed audit log line");
                    continue;
                }
            };

            if record.event != AuditEvent::Signal {
                continue;
            }
            let Some(signal) = record.signal else { continue };

            if filter.matches(&signal) {
                out.push(signal);
            }
        }
        Ok(())
    }
}

const DEFAULT_QUERY_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    Strength,
    DetectedAt,
}

/// Query parameters for `AuditLog::query` / `MomentumEngine::query` (§6.2).
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub symbols: Option<Vec<String>>,
    pub types: Option<Vec<SignalType>>,
    pub min_strength: Option<f64>,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
    pub sort_by: SortBy,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::Strength
    }
}

impl QueryFilter {
    fn matches(&self, signal: &Signal) -> bool {
        if let Some(symbols) = &self.symbols {
            if !symbols.iter().any(|s| s == &signal.symbol) {
                return false;
            }
        }
        if let Some(types) = &self.types {
            if !types.contains(&signal.signal_type) {
                return false;
            }
        }
        if let Some(min_strength) = self.min_strength {
            if signal.strength < min_strength {
                return false;
            }
        }
        if let Some(start) = self.start_utc {
            if signal.detected_at < start {
                return false;
            }
        }
        if let Some(end) = self.end_utc {
            if signal.detected_at > end {
                return false;
            }
        }
        true
    }
}
