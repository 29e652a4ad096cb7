//! NTP time tag tests

use oscine_core::time::NTP_UNIX_OFFSET;
use oscine_core::Timestamp;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const TICK: f64 = 1.0 / 4_294_967_296.0;

#[test]
fn test_unix_roundtrip_within_one_tick() {
    for t in [0.0, 0.5, 1.0e-9, 1_234_567_890.123_456, 2_000_000_000.999_999] {
        let ts = Timestamp::from_unix_time(t).unwrap();
        let back = ts.to_unix_time();
        // f64 loses sub-tick precision at ~2^31 s, allow one tick plus rounding noise
        assert!((back - t).abs() <= TICK + t.abs() * f64::EPSILON, "t={t} back={back}");
    }
}

#[test]
fn test_ntp_epoch_offset() {
    let ts = Timestamp::from_unix_time(-(NTP_UNIX_OFFSET as f64)).unwrap();
    assert_eq!(ts, Timestamp::new(0, 0));
}

#[test]
fn test_immediate_is_distinct() {
    assert!(Timestamp::immediate().is_immediate());
    assert_ne!(Timestamp::immediate(), Timestamp::new(0, 0));
    assert_ne!(Timestamp::immediate(), Timestamp::now());
    assert_eq!(Timestamp::immediate().as_bits(), 1);
}

#[test]
fn test_immediate_resolves_to_now() {
    let before = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64();
    let resolved = Timestamp::IMMEDIATE.to_unix_time();
    let after = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs_f64();
    assert!(resolved >= before && resolved <= after);
}

#[test]
fn test_numeric_ordering() {
    let a = Timestamp::new(10, u32::MAX);
    let b = Timestamp::new(11, 0);
    assert!(a < b);
    assert_eq!(Timestamp::from_bits(b.as_bits()), b);
}

#[test]
fn test_system_time_conversion() {
    let at = UNIX_EPOCH + Duration::from_secs(86_400);
    let ts = Timestamp::from(at);
    assert_eq!(ts.seconds as u64, NTP_UNIX_OFFSET + 86_400);
    assert_eq!(ts.fraction, 0);
    assert_eq!(ts.to_system_time(), at);
}

#[test]
fn test_display() {
    assert_eq!(Timestamp::IMMEDIATE.to_string(), "immediate");
    assert_eq!(Timestamp::new(1, 0x8000_0000).to_string(), "1.80000000");
}
