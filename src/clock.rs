// =============================================================================
// Clock & MarketCalendar — the engine's single source of "now"
// =============================================================================
//
// Every stored or logged instant is UTC (`DateTime<Utc>`); local wall-clock
// time exists only as a view used to evaluate the pre-market window
// predicate. `chrono-tz` supplies the America/New_York conversion; the
// calendar itself is a trait so a holiday-aware implementation can be
// plugged in later without touching any detector (see Open Questions in
// DESIGN.md — the default here treats all weekdays as trading days).
// =============================================================================

use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use parking_lot::Mutex;

const PREMARKET_START: (u32, u32) = (4, 0);
const PREMARKET_END: (u32, u32) = (9, 30);

/// Source of "now" plus pre-market window membership, behind a trait so
/// tests can inject a fixed instant (§8's end-to-end scenarios all fix the
/// clock to a literal UTC timestamp).
pub trait MarketCalendar: Send + Sync {
    /// Current UTC instant. Two calls on the same clock in the same process
    /// never return a decreasing value.
    fn now_utc(&self) -> DateTime<Utc>;

    /// True iff `instant`, converted to America/New_York wall time, falls on
    /// a trading day in `[04:00, 09:30)` local time.
    fn is_premarket(&self, instant: DateTime<Utc>) -> bool {
        let local = instant.with_timezone(&self.timezone());
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let start = NaiveTime::from_hms_opt(PREMARKET_START.0, PREMARKET_START.1, 0).unwrap();
        let end = NaiveTime::from_hms_opt(PREMARKET_END.0, PREMARKET_END.1, 0).unwrap();
        let t = local.time();
        t >= start && t < end
    }

    /// Whether `date` is a trading day. Default: Mon–Fri, no holiday
    /// awareness (documented limitation, see §4.2 and §9).
    fn is_trading_day(&self, date: chrono::NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// The local timezone window membership is evaluated in.
    fn timezone(&self) -> Tz {
        New_York
    }
}

/// Real-time, monotonic system clock. `now_utc` is backed by
/// `chrono::Utc::now()` but clamped against the previous call's result so
/// that the monotonicity guarantee in §4.2 holds even across a backward NTP
/// step.
pub struct SystemClock {
    last: Mutex<DateTime<Utc>>,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Utc::now()),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketCalendar for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let mut last = self.last.lock();
        let now = Utc::now();
        let next = if now > *last { now } else { *last };
        *last = next;
        next
    }
}

/// A clock fixed to a single instant, for deterministic tests and for the
/// end-to-end scenarios in §8 which pin the clock to a literal timestamp.
pub struct FixedClock {
    instant: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self { instant }
    }

    /// Construct from a UTC `Ymd HMS` literal, e.g.
    /// `FixedClock::ymd_hms(2025, 3, 4, 14, 0, 0)`.
    pub fn ymd_hms(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> Self {
        Self::new(Utc.with_ymd_and_hms(y, m, d, h, mi, s).single().unwrap())
    }
}

impl MarketCalendar for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.instant
    }
}
