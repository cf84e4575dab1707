use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};

/// Wall clock and timer source for a session.
pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_utc_millis(&self) -> i64;

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// `Date.now()` and async-std timers.
pub struct BrowserClock;

impl Clock for BrowserClock {
    fn now_utc_millis(&self) -> i64 {
        js_sys::Date::now() as i64
    }

    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        async_std::task::sleep(duration).boxed_local()
    }
}

/// Maps UTC instants onto audio-context seconds.
///
/// The origin is the UTC instant at which context time was zero. It is fixed
/// once per session and never moves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    origin_utc_millis: i64,
}

impl PlaybackClock {
    /// Origin pinned to an explicit instant, as used by embedded replay.
    pub fn pinned(origin_utc_millis: i64) -> PlaybackClock {
        PlaybackClock { origin_utc_millis }
    }

    /// Origin derived from a simultaneous reading of both clocks.
    pub fn anchored(now_utc_millis: i64, context_time: f64) -> PlaybackClock {
        let elapsed_millis = (context_time * 1000.0).round() as i64;
        PlaybackClock {
            origin_utc_millis: now_utc_millis.saturating_sub(elapsed_millis),
        }
    }

    pub fn origin_utc_millis(&self) -> i64 {
        self.origin_utc_millis
    }

    pub fn context_time(&self, utc_millis: i64) -> f64 {
        utc_millis.saturating_sub(self.origin_utc_millis) as f64 / 1000.0
    }

    pub fn utc_millis(&self, context_time: f64) -> i64 {
        self.origin_utc_millis
            .saturating_add((context_time * 1000.0).round() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extreme_origins_saturate() {
        let clock = PlaybackClock::pinned(i64::MIN);
        assert_eq!(
            clock.context_time(1_700_000_000_000),
            i64::MAX as f64 / 1000.0
        );
        assert_eq!(clock.utc_millis(-1.0), i64::MIN);

        let clock = PlaybackClock::anchored(i64::MIN, 5.0);
        assert_eq!(clock.origin_utc_millis(), i64::MIN);
    }
}
