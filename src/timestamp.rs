use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// wall clock time in microseconds since epoch
pub fn now_micros() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_micros().try_into().unwrap_or(i64::MAX),
        Err(_) => {
            error!("system clock is before the epoch");
            0
        }
    }
}

/// Packet timestamps double as the id that acks refer to, so they must not repeat for packets
///  sent by the same endpoint. This clock follows the wall clock but never hands out the same
///  value twice, moving ahead by a microsecond if two stamps are requested within the same
///  microsecond (or if the wall clock jumps back).
#[derive(Default)]
pub struct TimestampClock {
    last: AtomicI64,
}

impl TimestampClock {
    pub fn new() -> TimestampClock {
        Default::default()
    }

    pub fn next_stamp(&self) -> i64 {
        self.next_stamp_at(now_micros())
    }

    fn next_stamp_at(&self, now: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let candidate = now.max(prev.saturating_add(1));
            match self.last.compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_follows_wall_clock() {
        let clock = TimestampClock::new();
        assert_eq!(clock.next_stamp_at(1000), 1000);
        assert_eq!(clock.next_stamp_at(2000), 2000);
    }

    #[test]
    fn test_same_microsecond() {
        let clock = TimestampClock::new();
        assert_eq!(clock.next_stamp_at(1000), 1000);
        assert_eq!(clock.next_stamp_at(1000), 1001);
        assert_eq!(clock.next_stamp_at(1000), 1002);
        assert_eq!(clock.next_stamp_at(1500), 1500);
    }

    #[test]
    fn test_clock_jumps_back() {
        let clock = TimestampClock::new();
        assert_eq!(clock.next_stamp_at(5000), 5000);
        assert_eq!(clock.next_stamp_at(10), 5001);
    }

    #[test]
    fn test_real_clock_is_recent() {
        // 2020-01-01
        assert!(TimestampClock::new().next_stamp() > 1_577_836_800_000_000);
    }

    #[test]
    fn test_unique_across_threads() {
        let clock = Arc::new(TimestampClock::new());

        let handles = (0..4)
            .map(|_| {
                let clock = clock.clone();
                std::thread::spawn(move || (0..1000).map(|_| clock.next_stamp()).collect::<Vec<_>>())
            })
            .collect::<Vec<_>>();

        let mut all = handles.into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect::<Vec<_>>();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 4000);
    }
}
