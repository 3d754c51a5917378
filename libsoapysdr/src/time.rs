//! Conversions between hardware tick counts and nanosecond timestamps.
//!
//! Both directions split the value into whole seconds and a remainder so
//! that large counts at fractional rates do not lose precision, and both
//! round the remainder to the nearest integer (halves away from zero). For
//! integer rates `time_ns_to_ticks(ticks_to_time_ns(t, r), r) == t`.
//! Results outside the `i64` range saturate at `i64::MIN` / `i64::MAX`.

const NS_PER_SEC: i64 = 1_000_000_000;

/// Convert a tick count at `rate` ticks per second into nanoseconds.
pub fn ticks_to_time_ns(ticks: i64, rate: f64) -> i64 {
    let whole_rate = rate as i64;
    if whole_rate == 0 {
        return (ticks as f64 * NS_PER_SEC as f64 / rate).round() as i64;
    }
    let full = ticks / whole_rate;
    let err = ticks - full * whole_rate;
    let part = full as f64 * (rate - whole_rate as f64);
    let frac = ((err as f64 - part) * NS_PER_SEC as f64) / rate;
    full.saturating_mul(NS_PER_SEC).saturating_add(frac.round() as i64)
}

/// Convert a time in nanoseconds into a tick count at `rate` ticks per second.
pub fn time_ns_to_ticks(time_ns: i64, rate: f64) -> i64 {
    let whole_rate = rate as i64;
    let full = time_ns / NS_PER_SEC;
    let err = time_ns - full * NS_PER_SEC;
    let part = full as f64 * (rate - whole_rate as f64);
    let frac = part + (err as f64 * rate) / NS_PER_SEC as f64;
    full.saturating_mul(whole_rate).saturating_add(frac.round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn whole_seconds() {
        assert_eq!(ticks_to_time_ns(10_000_000, 10e6), NS_PER_SEC);
        assert_eq!(time_ns_to_ticks(NS_PER_SEC, 10e6), 10_000_000);
        assert_eq!(ticks_to_time_ns(0, 2.5e6), 0);
    }

    #[test]
    fn fractional_rate() {
        // 1 s worth of ticks at 1.5 Hz
        assert_eq!(time_ns_to_ticks(NS_PER_SEC, 1.5), 2);
        assert_eq!(ticks_to_time_ns(3, 1.5), 2 * NS_PER_SEC);
    }

    #[test]
    fn sub_hertz_rate() {
        assert_eq!(ticks_to_time_ns(1, 0.5), 2 * NS_PER_SEC);
        assert_eq!(time_ns_to_ticks(4 * NS_PER_SEC, 0.5), 2);
    }

    #[test]
    fn negative_times() {
        assert_eq!(ticks_to_time_ns(-1_000, 1e6), -1_000_000);
        assert_eq!(time_ns_to_ticks(-1_000_000, 1e6), -1_000);
    }

    #[test]
    fn out_of_range_saturates() {
        assert_eq!(ticks_to_time_ns(i64::MAX / 2, 1.0), i64::MAX);
        assert_eq!(ticks_to_time_ns(i64::MIN / 2, 1.0), i64::MIN);
        assert_eq!(time_ns_to_ticks(i64::MAX, 20e9), i64::MAX);
    }

    proptest! {
        #[test]
        fn ticks_survive_integer_rates(ticks in -(1i64 << 40)..(1i64 << 40), rate in 1_000u32..100_000_000) {
            let rate = rate as f64;
            prop_assert_eq!(time_ns_to_ticks(ticks_to_time_ns(ticks, rate), rate), ticks);
        }
    }
}
