//! Timezone-aware parsing of human time expressions.
//!
//! Three forms, tried in order:
//! 1. relative `<n>m|h|d` — pure offset from the reference instant
//! 2. `HH:MM` — the next occurrence of that wall-clock time in the zone
//! 3. `[YYYY-]MM-DD HH:MM` — a civil date-time, year defaulting to current
//!
//! Forms 2 and 3 need a civil time in a named zone turned into an absolute
//! instant. Rather than doing calendar arithmetic with zone rules, we binary
//! search against a civil-time oracle: bracket ±24h around the naive UTC
//! interpretation and bisect to the target minute, comparing a single integer
//! encoding of the civil fields. The oracle owns the zone rules, so DST
//! gaps and overlaps resolve to whatever the bisection converges on —
//! best-effort, same as the behavior users already rely on.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use std::sync::OnceLock;

/// A calendar date plus time-of-day as observed in some zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl CivilTime {
    /// Single comparable encoding: year·10⁸ + month·10⁶ + day·10⁴ + hour·100 + minute.
    pub fn ordinal(&self) -> i64 {
        self.year as i64 * 100_000_000
            + self.month as i64 * 1_000_000
            + self.day as i64 * 10_000
            + self.hour as i64 * 100
            + self.minute as i64
    }
}

/// The civil-time oracle: what wall-clock time does `instant` read as in
/// `zone`? Injected so tests can drive fixed or fake zone tables.
pub trait CivilClock: Send + Sync {
    /// `None` when the zone name is unknown.
    fn civil_time_of(&self, instant: DateTime<Utc>, zone: &str) -> Option<CivilTime>;
}

/// Production oracle backed by the bundled IANA zone database.
pub struct TzdbClock;

impl CivilClock for TzdbClock {
    fn civil_time_of(&self, instant: DateTime<Utc>, zone: &str) -> Option<CivilTime> {
        let tz: chrono_tz::Tz = zone.parse().ok()?;
        let local = instant.with_timezone(&tz);
        Some(CivilTime {
            year: local.year(),
            month: local.month(),
            day: local.day(),
            hour: local.hour(),
            minute: local.minute(),
        })
    }
}

/// Whether `zone` names a zone the oracle understands.
pub fn is_valid_zone(zone: &str) -> bool {
    zone.parse::<chrono_tz::Tz>().is_ok()
}

fn relative_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^(\d+)([mhd])$").unwrap())
}

fn clock_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"^(\d{1,2}):(\d{2})$").unwrap())
}

fn date_time_re() -> &'static regex::Regex {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"^(?:(\d{4})-)?(\d{1,2})-(\d{1,2})\s+(\d{1,2}):(\d{2})$").unwrap()
    })
}

/// Resolve a time expression to an absolute instant, or `None` when the
/// expression is unparseable. Callers must additionally reject results that
/// are not strictly after their own notion of "now".
pub fn resolve(
    expr: &str,
    zone: &str,
    reference: DateTime<Utc>,
    clock: &dyn CivilClock,
) -> Option<DateTime<Utc>> {
    let expr = expr.trim();
    let lowered = expr.to_lowercase();

    if let Some(caps) = relative_re().captures(&lowered) {
        let value: i64 = caps[1].parse().ok()?;
        let duration = match &caps[2] {
            "m" => Duration::minutes(value),
            "h" => Duration::hours(value),
            _ => Duration::days(value),
        };
        return reference.checked_add_signed(duration);
    }

    if let Some(caps) = clock_re().captures(expr) {
        let hour: u32 = caps[1].parse().ok()?;
        let minute: u32 = caps[2].parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        let now = clock.civil_time_of(reference, zone)?;
        let mut date = NaiveDate::from_ymd_opt(now.year, now.month, now.day)?;
        // Not strictly later than the current wall clock → tomorrow.
        if hour < now.hour || (hour == now.hour && minute <= now.minute) {
            date = date.succ_opt()?;
        }
        let target = CivilTime {
            year: date.year(),
            month: date.month(),
            day: date.day(),
            hour,
            minute,
        };
        return civil_to_instant(target, zone, clock);
    }

    if let Some(caps) = date_time_re().captures(expr) {
        let year: i32 = match caps.get(1) {
            Some(y) => y.as_str().parse().ok()?,
            None => clock.civil_time_of(reference, zone)?.year,
        };
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        let hour: u32 = caps[4].parse().ok()?;
        let minute: u32 = caps[5].parse().ok()?;
        if hour > 23 || minute > 59 {
            return None;
        }
        NaiveDate::from_ymd_opt(year, month, day)?;
        let target = CivilTime {
            year,
            month,
            day,
            hour,
            minute,
        };
        return civil_to_instant(target, zone, clock);
    }

    None
}

/// Convert a civil time in a named zone to an absolute instant by bisecting
/// a ±24h bracket around the naive UTC reading of the same fields. The
/// bracket covers every real zone offset, so the boundary where the zone's
/// wall clock first reaches the target is inside it; bisect down to a
/// second and snap to the minute.
fn civil_to_instant(
    target: CivilTime,
    zone: &str,
    clock: &dyn CivilClock,
) -> Option<DateTime<Utc>> {
    let guess = Utc
        .with_ymd_and_hms(target.year, target.month, target.day, target.hour, target.minute, 0)
        .single()?;
    let mut low = guess - Duration::hours(24);
    let mut high = guess + Duration::hours(24);
    let want = target.ordinal();
    if clock.civil_time_of(high, zone)?.ordinal() < want {
        return None;
    }

    while high - low > Duration::seconds(1) {
        let mid = low + (high - low) / 2;
        let civil = clock.civil_time_of(mid, zone)?;
        if civil.ordinal() < want {
            low = mid;
        } else {
            high = mid;
        }
    }
    // `high` is within a second past the boundary.
    let secs = high.timestamp();
    Utc.timestamp_opt(secs - secs.rem_euclid(60), 0).single()
}

/// Format an instant as `YYYY-MM-DD HH:MM` wall-clock time in `zone`.
pub fn format_civil(instant: DateTime<Utc>, zone: &str, clock: &dyn CivilClock) -> Option<String> {
    let c = clock.civil_time_of(instant, zone)?;
    Some(format!(
        "{:04}-{:02}-{:02} {:02}:{:02}",
        c.year, c.month, c.day, c.hour, c.minute
    ))
}
