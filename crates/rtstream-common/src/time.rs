//! Cycle-time arithmetic on `seconds + nanoseconds` values.
//!
//! A [`Timespec`] is used both as an absolute point on the task clock
//! ([`CycleInstant`]) and as an elapsed or cycle length ([`CycleDuration`]).
//! The sub-second field is kept normalized into `[0, 1e9)`; [`difference`]
//! borrows a whole second and [`sum`] carries one whenever needed to keep it
//! there.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

/// Nanoseconds in one second.
pub const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A normalized `seconds + nanoseconds` time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "RawTimespec")]
pub struct Timespec {
    secs: u64,
    nanos: u32,
}

/// Unchecked wire form of [`Timespec`].
#[derive(Deserialize)]
struct RawTimespec {
    secs: u64,
    nanos: u32,
}

impl TryFrom<RawTimespec> for Timespec {
    type Error = String;

    fn try_from(raw: RawTimespec) -> Result<Self, Self::Error> {
        if raw.nanos >= NANOS_PER_SEC {
            return Err(format!("nanos must be below {NANOS_PER_SEC}, got {}", raw.nanos));
        }
        Ok(Self {
            secs: raw.secs,
            nanos: raw.nanos,
        })
    }
}

/// A point on a task clock.
pub type CycleInstant = Timespec;

/// An elapsed time or cycle length.
pub type CycleDuration = Timespec;

impl Timespec {
    /// The zero value.
    pub const ZERO: Self = Self { secs: 0, nanos: 0 };

    /// Build a value, folding any whole seconds in `nanos` into `secs`.
    #[must_use]
    pub const fn new(secs: u64, nanos: u32) -> Self {
        Self {
            secs: secs + (nanos / NANOS_PER_SEC) as u64,
            nanos: nanos % NANOS_PER_SEC,
        }
    }

    /// Whole seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// Milliseconds.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self {
            secs: millis / 1_000,
            nanos: ((millis % 1_000) * 1_000_000) as u32,
        }
    }

    /// Nanoseconds.
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self {
            secs: nanos / NANOS_PER_SEC as u64,
            nanos: (nanos % NANOS_PER_SEC as u64) as u32,
        }
    }

    /// Build from a total nanosecond count, saturating at `u64::MAX` seconds.
    #[must_use]
    pub fn from_total_nanos(total: u128) -> Self {
        let per_sec = u128::from(NANOS_PER_SEC);
        let secs = u64::try_from(total / per_sec).unwrap_or(u64::MAX);
        // Remainder is below 1e9 and always fits.
        let nanos = (total % per_sec) as u32;
        Self { secs, nanos }
    }

    /// Whole-second part.
    #[must_use]
    pub const fn secs(&self) -> u64 {
        self.secs
    }

    /// Sub-second part, always below one second.
    #[must_use]
    pub const fn subsec_nanos(&self) -> u32 {
        self.nanos
    }

    /// Total nanoseconds.
    #[must_use]
    pub const fn as_nanos(&self) -> u128 {
        self.secs as u128 * NANOS_PER_SEC as u128 + self.nanos as u128
    }

    /// Total nanoseconds clamped to `u64`, for log and error fields.
    #[must_use]
    pub fn as_nanos_u64(&self) -> u64 {
        u64::try_from(self.as_nanos()).unwrap_or(u64::MAX)
    }

    /// Returns true for the zero value.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.secs == 0 && self.nanos == 0
    }

    /// `self × n`, saturating on overflow.
    #[must_use]
    pub fn saturating_mul(self, n: u64) -> Self {
        Self::from_total_nanos(self.as_nanos().saturating_mul(u128::from(n)))
    }
}

/// `end − start`, or `None` when `end` precedes `start`.
///
/// When the nanosecond part of `end` is smaller than that of `start`, one
/// second is borrowed from the whole-second difference.
#[must_use]
pub fn checked_difference(end: Timespec, start: Timespec) -> Option<Timespec> {
    if end.nanos < start.nanos {
        let secs = end.secs.checked_sub(start.secs)?.checked_sub(1)?;
        Some(Timespec {
            secs,
            nanos: NANOS_PER_SEC - start.nanos + end.nanos,
        })
    } else {
        Some(Timespec {
            secs: end.secs.checked_sub(start.secs)?,
            nanos: end.nanos - start.nanos,
        })
    }
}

/// `end − start`.
///
/// Callers guarantee `end ≥ start`. A reversed pair trips a debug assertion
/// and yields zero in release builds.
#[must_use]
pub fn difference(end: Timespec, start: Timespec) -> Timespec {
    debug_assert!(
        compare(end, start) != Ordering::Less,
        "difference: end {end} precedes start {start}"
    );
    checked_difference(end, start).unwrap_or(Timespec::ZERO)
}

/// `a + b`, carrying one second when the nanosecond parts reach one second.
#[must_use]
pub fn sum(a: Timespec, b: Timespec) -> Timespec {
    // Both parts are below 1e9, so the sum fits in u32.
    let nanos = a.nanos + b.nanos;
    let carry = u64::from(nanos / NANOS_PER_SEC);
    Timespec {
        secs: a.secs.saturating_add(b.secs).saturating_add(carry),
        nanos: nanos % NANOS_PER_SEC,
    }
}

/// Three-way comparison: seconds first, nanoseconds only on equal seconds.
#[must_use]
pub fn compare(a: Timespec, b: Timespec) -> Ordering {
    match a.secs.cmp(&b.secs) {
        Ordering::Equal => a.nanos.cmp(&b.nanos),
        unequal => unequal,
    }
}

/// Split `elapsed` into whole `period`s and the remainder.
///
/// A zero period yields `(0, elapsed)`.
#[must_use]
pub fn split_periods(elapsed: Timespec, period: Timespec) -> (u64, Timespec) {
    let period_ns = period.as_nanos();
    if period_ns == 0 {
        return (0, elapsed);
    }
    let elapsed_ns = elapsed.as_nanos();
    let whole = u64::try_from(elapsed_ns / period_ns).unwrap_or(u64::MAX);
    (whole, Timespec::from_total_nanos(elapsed_ns % period_ns))
}

impl Ord for Timespec {
    fn cmp(&self, other: &Self) -> Ordering {
        compare(*self, *other)
    }
}

impl PartialOrd for Timespec {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add for Timespec {
    type Output = Timespec;

    fn add(self, rhs: Self) -> Self::Output {
        sum(self, rhs)
    }
}

impl Sub for Timespec {
    type Output = Timespec;

    fn sub(self, rhs: Self) -> Self::Output {
        difference(self, rhs)
    }
}

impl From<Duration> for Timespec {
    fn from(d: Duration) -> Self {
        Self {
            secs: d.as_secs(),
            nanos: d.subsec_nanos(),
        }
    }
}

impl From<Timespec> for Duration {
    fn from(t: Timespec) -> Self {
        Duration::new(t.secs, t.nanos)
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "0s");
        }
        write!(f, "{}", humantime::format_duration(Duration::from(*self)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples() -> Vec<Timespec> {
        vec![
            Timespec::ZERO,
            Timespec::new(0, 1),
            Timespec::new(0, 999_999_999),
            Timespec::new(1, 0),
            Timespec::new(1, 500_000_000),
            Timespec::new(2, 1),
            Timespec::new(7, 32_000_000),
            Timespec::new(1_700_000_000, 123_456_789),
        ]
    }

    #[test]
    fn test_new_normalizes() {
        let t = Timespec::new(1, 2_500_000_000);
        assert_eq!(t.secs(), 3);
        assert_eq!(t.subsec_nanos(), 500_000_000);
    }

    #[test]
    fn test_difference_without_borrow() {
        let d = difference(Timespec::new(5, 700), Timespec::new(2, 200));
        assert_eq!(d, Timespec::new(3, 500));
    }

    #[test]
    fn test_difference_with_borrow() {
        let d = difference(Timespec::new(5, 100), Timespec::new(2, 900_000_000));
        assert_eq!(d, Timespec::new(2, 100_000_100));
    }

    #[test]
    fn test_difference_of_self_is_zero() {
        for a in samples() {
            assert!(difference(a, a).is_zero(), "{a:?}");
        }
    }

    #[test]
    fn test_checked_difference_rejects_reversed() {
        assert!(checked_difference(Timespec::new(1, 0), Timespec::new(1, 1)).is_none());
        assert!(checked_difference(Timespec::new(1, 5), Timespec::new(2, 0)).is_none());
    }

    #[test]
    fn test_sum_carries() {
        let s = sum(Timespec::new(1, 600_000_000), Timespec::new(2, 700_000_000));
        assert_eq!(s, Timespec::new(4, 300_000_000));
    }

    #[test]
    fn test_sum_is_normalized_with_single_carry() {
        for a in samples() {
            for b in samples() {
                let s = sum(a, b);
                assert!(s.subsec_nanos() < NANOS_PER_SEC);
                let carry = s.secs() - a.secs() - b.secs();
                assert!(carry <= 1, "{a:?} + {b:?}");
            }
        }
    }

    #[test]
    fn test_difference_then_sum_restores() {
        for a in samples() {
            for b in samples() {
                if b >= a {
                    assert_eq!(sum(difference(b, a), a), b, "{b:?} - {a:?}");
                }
            }
        }
    }

    #[test]
    fn test_compare_seconds_dominate() {
        // Larger nanoseconds must not win against larger seconds.
        let a = Timespec::new(1, 900_000_000);
        let b = Timespec::new(2, 100);
        assert_eq!(compare(a, b), Ordering::Less);
        assert_eq!(compare(b, a), Ordering::Greater);
    }

    #[test]
    fn test_compare_is_total_order() {
        let all = samples();
        for &a in &all {
            assert_eq!(compare(a, a), Ordering::Equal);
            for &b in &all {
                assert_eq!(compare(a, b), compare(b, a).reverse());
                for &c in &all {
                    if compare(a, b) == Ordering::Less && compare(b, c) == Ordering::Less {
                        assert_eq!(compare(a, c), Ordering::Less);
                    }
                }
            }
        }
    }

    #[test]
    fn test_split_periods() {
        let period = Timespec::from_millis(100);
        assert_eq!(
            split_periods(Timespec::from_millis(250), period),
            (2, Timespec::from_millis(50))
        );
        assert_eq!(
            split_periods(Timespec::from_millis(30), period),
            (0, Timespec::from_millis(30))
        );
        assert_eq!(
            split_periods(Timespec::from_secs(3), Timespec::ZERO),
            (0, Timespec::from_secs(3))
        );
    }

    #[test]
    fn test_duration_conversion() {
        let d = Duration::from_millis(32);
        let t = Timespec::from(d);
        assert_eq!(t, Timespec::from_millis(32));
        assert_eq!(Duration::from(t), d);
        assert_eq!(Timespec::from_nanos(1_500_000_000), Timespec::new(1, 500_000_000));
    }

    #[test]
    fn test_saturating_mul() {
        assert_eq!(Timespec::from_millis(100).saturating_mul(12), Timespec::new(1, 200_000_000));
        assert_eq!(Timespec::from_secs(u64::MAX).saturating_mul(2).secs(), u64::MAX);
    }

    #[test]
    fn test_display() {
        assert_eq!(Timespec::from_millis(32).to_string(), "32ms");
        assert_eq!(Timespec::ZERO.to_string(), "0s");
    }

    #[test]
    fn test_deserialize_rejects_unnormalized_nanos() {
        let ok: Timespec = serde_json::from_str(r#"{"secs":2,"nanos":999999999}"#).unwrap();
        assert_eq!(ok, Timespec::new(2, 999_999_999));

        let err = serde_json::from_str::<Timespec>(r#"{"secs":0,"nanos":3000000000}"#);
        assert!(err.is_err());
        let err = serde_json::from_str::<Timespec>(r#"{"secs":0,"nanos":1000000000}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_serialize_roundtrip_keeps_value() {
        let value = Timespec::new(7, 32_000_000);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"secs":7,"nanos":32000000}"#);
        assert_eq!(serde_json::from_str::<Timespec>(&json).unwrap(), value);
    }
}
