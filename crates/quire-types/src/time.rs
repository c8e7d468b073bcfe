use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Duration, DurationRound, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// A point on the repository timeline (UTC).
pub type Instant = DateTime<Utc>;

/// Format of the memento label appended to `fcr:versions/`.
pub const MEMENTO_LABEL_FORMAT: &str = "%Y%m%d%H%M%S";

/// Render an instant as a 14-digit memento label.
pub fn format_memento_label(instant: &Instant) -> String {
    instant.format(MEMENTO_LABEL_FORMAT).to_string()
}

/// Parse a 14-digit memento label into a UTC instant.
pub fn parse_memento_label(label: &str) -> TypeResult<Instant> {
    if label.len() != 14 || !label.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TypeError::InvalidMementoLabel(label.to_string()));
    }
    NaiveDateTime::parse_from_str(label, MEMENTO_LABEL_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|_| TypeError::InvalidMementoLabel(label.to_string()))
}

/// Drop sub-second precision. Memento instants only carry whole seconds.
pub fn truncate_to_second(instant: Instant) -> Instant {
    instant
        .duration_trunc(Duration::seconds(1))
        .unwrap_or(instant)
}

/// Half-open validity window `[from, to)`; `to == None` means still open.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Validity {
    pub from: Instant,
    pub to: Option<Instant>,
}

impl Validity {
    /// A window that has not ended.
    pub fn open(from: Instant) -> Self {
        Self { from, to: None }
    }

    /// A closed window. `to` earlier than `from` collapses to an empty window.
    pub fn closed(from: Instant, to: Instant) -> Self {
        Self {
            from,
            to: Some(to.max(from)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.to.is_none()
    }

    /// `true` when the window contains no instant.
    pub fn is_empty(&self) -> bool {
        matches!(self.to, Some(to) if to <= self.from)
    }

    /// Whether `at` falls inside the window.
    pub fn covers(&self, at: &Instant) -> bool {
        self.from <= *at && self.to.map_or(true, |to| *at < to)
    }

    /// `None` asks for "currently open", otherwise point coverage.
    pub fn visible_at(&self, as_of: Option<&Instant>) -> bool {
        match as_of {
            Some(at) => self.covers(at),
            None => self.is_open(),
        }
    }

    /// Intersection of two windows, or `None` if they do not overlap.
    pub fn intersect(&self, other: &Validity) -> Option<Validity> {
        let from = self.from.max(other.from);
        let to = match (self.to, other.to) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        };
        let window = Validity { from, to };
        (!window.is_empty()).then_some(window)
    }

    /// Close the window at `at` (no-op if already closed earlier).
    pub fn close_at(&mut self, at: Instant) {
        let at = at.max(self.from);
        self.to = Some(self.to.map_or(at, |to| to.min(at)));
    }
}

impl fmt::Debug for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {})", self.from.to_rfc3339(), to.to_rfc3339()),
            None => write!(f, "[{}, ∞)", self.from.to_rfc3339()),
        }
    }
}

/// Source of "now" for staging and index timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Utc::now()
    }
}

/// A manually driven clock for deterministic timelines.
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<Instant>,
}

impl ManualClock {
    pub fn new(start: Instant) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    pub fn set(&self, instant: Instant) {
        if let Ok(mut now) = self.now.write() {
            *now = instant;
        }
    }

    pub fn advance(&self, by: Duration) -> Instant {
        match self.now.write() {
            Ok(mut now) => {
                *now += by;
                *now
            }
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        match self.now.read() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> Instant {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn memento_label_roundtrip() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let label = format_memento_label(&instant);
        assert_eq!(label, "20240305070809");
        assert_eq!(parse_memento_label(&label).unwrap(), instant);
    }

    #[test]
    fn memento_label_rejects_bad_input() {
        assert!(parse_memento_label("2024030507080").is_err());
        assert!(parse_memento_label("2024030507080x").is_err());
        assert!(parse_memento_label("20241305070809").is_err());
    }

    #[test]
    fn truncation_drops_subseconds() {
        let instant = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(truncate_to_second(instant).timestamp_subsec_nanos(), 0);
    }

    #[test]
    fn coverage_is_half_open() {
        let w = Validity::closed(at(0), at(10));
        assert!(w.covers(&at(0)));
        assert!(w.covers(&at(9)));
        assert!(!w.covers(&at(10)));
        assert!(!w.visible_at(None));
        assert!(Validity::open(at(0)).visible_at(None));
    }

    #[test]
    fn intersect_clips_both_ends() {
        let a = Validity::closed(at(0), at(10));
        let b = Validity::open(at(5));
        assert_eq!(a.intersect(&b), Some(Validity::closed(at(5), at(10))));
        let c = Validity::closed(at(10), at(20));
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn close_at_never_extends() {
        let mut w = Validity::closed(at(0), at(5));
        w.close_at(at(8));
        assert_eq!(w.to, Some(at(5)));
        let mut open = Validity::open(at(3));
        open.close_at(at(1));
        assert_eq!(open.to, Some(at(3)));
        assert!(open.is_empty());
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(at(0));
        assert_eq!(clock.advance(Duration::seconds(3)), at(3));
        clock.set(at(100));
        assert_eq!(clock.now(), at(100));
    }

    #[test]
    fn serde_roundtrip() {
        let w = Validity::closed(at(1), at(2));
        let json = serde_json::to_string(&w).unwrap();
        let parsed: Validity = serde_json::from_str(&json).unwrap();
        assert_eq!(w, parsed);
    }
}
