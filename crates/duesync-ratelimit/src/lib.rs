//! `RateGate`: the global admission gate guarding outbound upstream calls.
//!
//! Caps outbound calls at `safe_limit` per rolling wall-clock hour and
//! absorbs explicit upstream lock-outs. The critical invariant — check and
//! increment under the same lock, so no two callers can race past the limit
//! — is the reason this lives as its own small crate rather than inline in
//! the HTTP client, isolated the same way connection-pool bookkeeping is
//! kept to one place elsewhere in this workspace.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Abstraction over wall-clock time so tests can drive the gate with a fake
/// clock instead of `Utc::now()`.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct State {
    window_start: DateTime<Utc>,
    in_window: u32,
    blocked_until: Option<DateTime<Utc>>,
}

/// Global admission gate. Cheap to clone; all clones share the same
/// underlying counter and mutex.
#[derive(Clone)]
pub struct RateGate {
    safe_limit: u32,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<State>>,
}

/// The caller's wait was interrupted before admission was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl std::fmt::Display for Cancelled {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "admission wait cancelled")
    }
}
impl std::error::Error for Cancelled {}

fn truncate_to_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_minute(0)
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(dt)
}

impl RateGate {
    pub fn new(safe_limit: u32) -> Self {
        Self::with_clock(safe_limit, Arc::new(SystemClock))
    }

    pub fn with_clock(safe_limit: u32, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            safe_limit,
            clock,
            state: Arc::new(Mutex::new(State {
                window_start: truncate_to_hour(now),
                in_window: 0,
                blocked_until: None,
            })),
        }
    }

    /// Blocks the caller until admission is granted: lock; roll the window
    /// if the hour boundary has passed;
    /// admit if under the limit and not locked out; otherwise sleep until
    /// `max(window_end, blocked_until)` and retry.
    ///
    /// `cancel` resolves if the caller wants to give up; on cancellation no
    /// counter increment is ever applied (the increment only happens in the
    /// same critical section as the successful check).
    pub async fn admit(&self, cancel: impl std::future::Future<Output = ()>) -> Result<(), Cancelled> {
        tokio::pin!(cancel);
        loop {
            let wait = {
                let mut state = self.state.lock().expect("ratelimit mutex poisoned");
                let now = self.clock.now();

                if now >= state.window_start + ChronoDuration::hours(1) {
                    state.window_start = truncate_to_hour(now);
                    state.in_window = 0;
                    debug!(window_start = %state.window_start, "rate gate window rolled");
                }

                let window_end = state.window_start + ChronoDuration::hours(1);
                let lockout_wait = state.blocked_until.filter(|&until| now < until);

                match lockout_wait {
                    Some(until) => Some(until.max(window_end)),
                    None if state.in_window < self.safe_limit => {
                        state.in_window += 1;
                        None
                    }
                    None => Some(window_end),
                }
            };

            match wait {
                None => return Ok(()),
                Some(until) => {
                    let now = self.clock.now();
                    let delta = (until - now).to_std().unwrap_or(std::time::Duration::ZERO);
                    tokio::select! {
                        _ = tokio::time::sleep(delta) => {}
                        _ = &mut cancel => return Err(Cancelled),
                    }
                }
            }
        }
    }

    /// Convenience wrapper for callers with no cancellation signal.
    pub async fn admit_uncancellable(&self) {
        let _ = self.admit(std::future::pending()).await;
    }

    /// Records an externally imposed release time. Idempotent:
    /// the later of the existing and new `until` wins, so concurrent
    /// lock-out reports never shorten an already-recorded wait.
    pub fn note_lockout(&self, until: DateTime<Utc>) {
        let mut state = self.state.lock().expect("ratelimit mutex poisoned");
        let new_until = state.blocked_until.map_or(until, |existing| existing.max(until));
        if state.blocked_until != Some(new_until) {
            warn!(until = %new_until, "rate gate lock-out recorded");
        }
        state.blocked_until = Some(new_until);
    }

    /// Current window start, for logging/status.
    pub fn window_start(&self) -> DateTime<Utc> {
        self.state.lock().expect("ratelimit mutex poisoned").window_start
    }

    /// Requests admitted so far in the current window, for status reporting.
    pub fn in_window_count(&self) -> u32 {
        self.state.lock().expect("ratelimit mutex poisoned").in_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    struct FakeClock(AtomicI64);

    impl FakeClock {
        fn new(start: DateTime<Utc>) -> Self {
            Self(AtomicI64::new(start.timestamp()))
        }
        fn advance(&self, secs: i64) {
            self.0.fetch_add(secs, Ordering::SeqCst);
        }
        fn set(&self, dt: DateTime<Utc>) {
            self.0.store(dt.timestamp(), Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp(self.0.load(Ordering::SeqCst), 0).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn admits_up_to_the_limit_then_blocks() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let gate = RateGate::with_clock(3, clock.clone());

        for _ in 0..3 {
            gate.admit_uncancellable().await;
        }
        assert_eq!(gate.in_window_count(), 3);

        // The 4th admit should block until the window rolls; advance the
        // fake clock past the hour boundary from a background task and
        // confirm admit() unblocks rather than hanging.
        let gate2 = gate.clone();
        let handle = tokio::spawn(async move {
            gate2.admit_uncancellable().await;
        });

        tokio::task::yield_now().await;
        clock.advance(3601);
        tokio::time::advance(std::time::Duration::from_secs(3601)).await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_admitters_never_exceed_the_limit_within_a_window() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let gate = RateGate::with_clock(5, clock);

        // 64 concurrent admitters contend for 5 slots within one window;
        // spawn a task per admitter and a watchdog that cancels them after a
        // short deadline so the test terminates instead of hanging on the
        // slots that would only unblock on an hour rollover.
        let mut handles = Vec::new();
        for _ in 0..64 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                let cancel = tokio::time::sleep(std::time::Duration::from_millis(50));
                gate.admit(cancel).await
            }));
        }

        let mut admitted = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(gate.in_window_count(), 5);
    }

    #[test]
    fn note_lockout_keeps_the_later_of_two_releases() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let gate = RateGate::with_clock(10, clock.clone());
        let now = clock.now();

        gate.note_lockout(now + ChronoDuration::minutes(5));
        gate.note_lockout(now + ChronoDuration::minutes(2));

        let state = gate.state.lock().unwrap();
        assert_eq!(state.blocked_until, Some(now + ChronoDuration::minutes(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn lockout_blocks_admission_until_release_instant() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let gate = RateGate::with_clock(10, clock.clone());
        let release = clock.now() + ChronoDuration::minutes(10);
        gate.note_lockout(release);

        let gate2 = gate.clone();
        let handle = tokio::spawn(async move {
            gate2.admit_uncancellable().await;
        });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.set(release);
        tokio::time::advance(std::time::Duration::from_secs(600)).await;
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_does_not_leak_a_counter_increment() {
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let gate = RateGate::with_clock(1, clock.clone());
        gate.admit_uncancellable().await;
        assert_eq!(gate.in_window_count(), 1);

        // Gate is now saturated; a second admit with an immediate
        // cancellation must not increment the counter.
        let already_cancelled = std::future::ready(());
        let result = gate.admit(already_cancelled).await;
        assert_eq!(result, Err(Cancelled));
        assert_eq!(gate.in_window_count(), 1);
    }
}
