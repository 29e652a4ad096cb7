//! OSC time tags
//!
//! An OSC time tag is a 64-bit NTP timestamp: 32 bits of seconds since
//! 1900-01-01 followed by 32 bits of binary fraction. The value with all
//! seconds bits clear and a fraction of 1 is reserved to mean "immediately".

use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::CodecError;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const FRACTION_SCALE: f64 = 4_294_967_296.0; // 2^32

/// Source of wall-clock time, used to resolve the immediate sentinel
pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// The operating system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// 64-bit NTP time tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp {
    /// Seconds since 1900-01-01 00:00:00 UTC
    pub seconds: u32,
    /// Fractional second in units of 2^-32 s
    pub fraction: u32,
}

impl Timestamp {
    /// The "execute immediately" sentinel
    pub const IMMEDIATE: Timestamp = Timestamp {
        seconds: 0,
        fraction: 1,
    };

    pub const fn new(seconds: u32, fraction: u32) -> Self {
        Self { seconds, fraction }
    }

    pub const fn immediate() -> Self {
        Self::IMMEDIATE
    }

    pub const fn is_immediate(&self) -> bool {
        self.seconds == 0 && self.fraction == 1
    }

    /// The combined 64-bit wire value
    pub const fn as_bits(&self) -> u64 {
        ((self.seconds as u64) << 32) | self.fraction as u64
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self {
            seconds: (bits >> 32) as u32,
            fraction: bits as u32,
        }
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Convert Unix seconds (with fraction) to a time tag.
    ///
    /// The fraction is rounded to the nearest 2^-32 s tick.
    pub fn from_unix_time(seconds: f64) -> Result<Self, CodecError> {
        if !seconds.is_finite() {
            return Err(CodecError::TimeOutOfRange(seconds));
        }

        // split before adding the offset so the fraction keeps full precision
        let floor = seconds.floor();
        let ntp = floor + NTP_UNIX_OFFSET as f64;
        if ntp < 0.0 || ntp > u32::MAX as f64 {
            return Err(CodecError::TimeOutOfRange(seconds));
        }

        let mut whole = ntp as u64;
        let mut fraction = ((seconds - floor) * FRACTION_SCALE).round() as u64;
        if fraction >= 1 << 32 {
            // rounding carried into the next second
            whole += 1;
            fraction = 0;
        }
        if whole > u32::MAX as u64 {
            return Err(CodecError::TimeOutOfRange(seconds));
        }

        Ok(Self {
            seconds: whole as u32,
            fraction: fraction as u32,
        })
    }

    /// Convert to Unix seconds; the immediate sentinel resolves to now.
    pub fn to_unix_time(&self) -> f64 {
        self.to_unix_time_with(&SystemClock)
    }

    /// Like [`Timestamp::to_unix_time`], resolving the sentinel against `clock`
    pub fn to_unix_time_with(&self, clock: &dyn Clock) -> f64 {
        if self.is_immediate() {
            return system_time_to_unix(clock.now());
        }
        self.seconds as f64 - NTP_UNIX_OFFSET as f64 + self.fraction as f64 / FRACTION_SCALE
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_ntp = match time.duration_since(UNIX_EPOCH) {
            Ok(d) => d + Duration::from_secs(NTP_UNIX_OFFSET),
            Err(e) => Duration::from_secs(NTP_UNIX_OFFSET).saturating_sub(e.duration()),
        };
        let fraction = ((since_ntp.subsec_nanos() as u64) << 32) / 1_000_000_000;
        Self {
            seconds: since_ntp.as_secs() as u32,
            fraction: fraction as u32,
        }
    }

    /// Convert to a `SystemTime`; the immediate sentinel resolves to now.
    pub fn to_system_time(&self) -> SystemTime {
        if self.is_immediate() {
            return SystemTime::now();
        }
        let nanos = ((self.fraction as u64) * 1_000_000_000) >> 32;
        let since_ntp = Duration::new(self.seconds as u64, nanos as u32);
        let offset = Duration::from_secs(NTP_UNIX_OFFSET);
        if since_ntp >= offset {
            UNIX_EPOCH + (since_ntp - offset)
        } else {
            UNIX_EPOCH
                .checked_sub(offset - since_ntp)
                .unwrap_or(UNIX_EPOCH)
        }
    }

    /// Time remaining until this tag is due, or `None` if it is immediate or past
    pub fn delay_from(&self, now: Timestamp) -> Option<Duration> {
        if self.is_immediate() || *self <= now {
            return None;
        }
        let ticks = self.as_bits() - now.as_bits();
        let secs = ticks >> 32;
        let nanos = ((ticks & 0xFFFF_FFFF) * 1_000_000_000) >> 32;
        Some(Duration::new(secs, nanos as u32))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::IMMEDIATE
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_immediate(), other.is_immediate()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => self.as_bits().cmp(&other.as_bits()),
        }
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Self::from_system_time(time)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_immediate() {
            write!(f, "immediate")
        } else {
            write!(f, "{}.{:08x}", self.seconds, self.fraction)
        }
    }
}

fn system_time_to_unix(time: SystemTime) -> f64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock(SystemTime);

    impl Clock for FixedClock {
        fn now(&self) -> SystemTime {
            self.0
        }
    }

    #[test]
    fn test_unix_epoch() {
        let ts = Timestamp::from_unix_time(0.0).unwrap();
        assert_eq!(ts.seconds, NTP_UNIX_OFFSET as u32);
        assert_eq!(ts.fraction, 0);
    }

    #[test]
    fn test_half_second_fraction() {
        let ts = Timestamp::from_unix_time(1.5).unwrap();
        assert_eq!(ts.fraction, 1 << 31);
        assert_eq!(ts.to_unix_time(), 1.5);
    }

    #[test]
    fn test_out_of_range() {
        assert!(Timestamp::from_unix_time(-3_000_000_000.0).is_err());
        assert!(Timestamp::from_unix_time(3_000_000_000.0).is_err());
        assert!(Timestamp::from_unix_time(f64::NAN).is_err());
    }

    #[test]
    fn test_immediate_resolves_to_clock() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let clock = FixedClock(at);
        assert_eq!(
            Timestamp::IMMEDIATE.to_unix_time_with(&clock),
            1_700_000_000.0
        );
    }

    #[test]
    fn test_immediate_sorts_first() {
        let zero = Timestamp::new(0, 0);
        assert!(Timestamp::IMMEDIATE < zero);
        assert!(Timestamp::IMMEDIATE < Timestamp::now());
    }

    #[test]
    fn test_delay_from() {
        let now = Timestamp::new(100, 0);
        let later = Timestamp::new(101, 1 << 31);
        assert_eq!(later.delay_from(now), Some(Duration::from_millis(1500)));
        assert_eq!(now.delay_from(later), None);
        assert_eq!(Timestamp::IMMEDIATE.delay_from(now), None);
    }

    #[test]
    fn test_system_time_roundtrip() {
        let at = UNIX_EPOCH + Duration::new(1_600_000_000, 250_000_000);
        let ts = Timestamp::from_system_time(at);
        let back = ts.to_system_time();
        let diff = back
            .duration_since(at)
            .unwrap_or_else(|e| e.duration());
        assert!(diff < Duration::from_nanos(2));
    }
}
