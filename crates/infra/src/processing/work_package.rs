//! Unit of scheduling: one claimed segment of a processor.
//!
//! A package is `Idle` until the supervisor schedules it, `Scheduled` while
//! queued for a pool thread and `InFlight` while a batch runs. Stopping is
//! cooperative: `abort` prevents further batches, `revoke` additionally
//! makes the running batch bail out before its next event. A revoked batch
//! can never commit: the flag is checked again under the coordinator lock
//! right before its staged changes and token are written.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::coordinator::ClaimedSegment;
use super::segment::Segment;
use super::token::TrackingToken;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Scheduled,
    InFlight,
}

#[derive(Debug)]
struct PackageState {
    phase: Phase,
    aborted: bool,
}

#[derive(Debug)]
pub(crate) struct WorkPackage {
    segment: Segment,
    token: Mutex<TrackingToken>,
    lease_expires_at: Mutex<DateTime<Utc>>,
    state: Mutex<PackageState>,
    idle: Condvar,
    revoked: AtomicBool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl WorkPackage {
    pub(crate) fn new(claimed: ClaimedSegment) -> Self {
        Self {
            segment: claimed.segment,
            token: Mutex::new(claimed.token),
            lease_expires_at: Mutex::new(claimed.lease_expires_at),
            state: Mutex::new(PackageState {
                phase: Phase::Idle,
                aborted: false,
            }),
            idle: Condvar::new(),
            revoked: AtomicBool::new(false),
        }
    }

    pub(crate) fn segment(&self) -> Segment {
        self.segment
    }

    pub(crate) fn token(&self) -> TrackingToken {
        lock(&self.token).clone()
    }

    pub(crate) fn lease_expires_at(&self) -> DateTime<Utc> {
        *lock(&self.lease_expires_at)
    }

    pub(crate) fn set_lease(&self, expires_at: DateTime<Utc>) {
        *lock(&self.lease_expires_at) = expires_at;
    }

    pub(crate) fn advance(&self, token: TrackingToken, lease_expires_at: DateTime<Utc>) {
        *lock(&self.token) = token;
        self.set_lease(lease_expires_at);
    }

    /// Idle → Scheduled. Returns `false` if already queued, running or aborted.
    pub(crate) fn try_schedule(&self) -> bool {
        let mut state = lock(&self.state);
        if state.aborted || state.phase != Phase::Idle {
            return false;
        }
        state.phase = Phase::Scheduled;
        true
    }

    /// Scheduled → InFlight, unless the package was aborted while queued.
    pub(crate) fn begin(&self) -> bool {
        let mut state = lock(&self.state);
        if state.aborted {
            state.phase = Phase::Idle;
            self.idle.notify_all();
            return false;
        }
        state.phase = Phase::InFlight;
        true
    }

    pub(crate) fn finish(&self) {
        let mut state = lock(&self.state);
        state.phase = Phase::Idle;
        self.idle.notify_all();
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        lock(&self.state).phase == Phase::InFlight
    }

    pub(crate) fn is_aborted(&self) -> bool {
        lock(&self.state).aborted
    }

    pub(crate) fn abort(&self) {
        lock(&self.state).aborted = true;
    }

    pub(crate) fn revoke(&self) {
        self.abort();
        self.revoked.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::SeqCst)
    }

    /// Wait until no batch is running. Returns `false` on timeout.
    ///
    /// Only meaningful after `abort`: an aborted package never starts another
    /// batch, so once it leaves `InFlight` it stays out.
    pub(crate) fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while state.phase == Phase::InFlight {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = match self.idle.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }

    /// Abort, wait up to `timeout`, then revoke if still running.
    pub(crate) fn stop(&self, timeout: Duration) -> bool {
        self.abort();
        let stopped = self.wait_idle(timeout);
        if !stopped {
            self.revoke();
        }
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn package() -> WorkPackage {
        WorkPackage::new(ClaimedSegment {
            segment: Segment::ROOT,
            token: TrackingToken::tail(),
            lease_expires_at: Utc::now(),
        })
    }

    #[test]
    fn scheduling_is_exclusive() {
        let p = package();
        assert!(p.try_schedule());
        assert!(!p.try_schedule());
        assert!(p.begin());
        assert!(p.is_in_flight());
        p.finish();
        assert!(p.try_schedule());
    }

    #[test]
    fn aborted_package_is_never_started_again() {
        let p = package();
        assert!(p.try_schedule());
        p.abort();
        assert!(!p.begin());
        assert!(!p.try_schedule());
        assert!(p.wait_idle(Duration::from_millis(1)));
    }

    #[test]
    fn stop_waits_for_in_flight_batch() {
        let p = Arc::new(package());
        assert!(p.try_schedule());
        assert!(p.begin());

        let worker = p.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            worker.finish();
        });

        assert!(p.stop(Duration::from_secs(5)));
        assert!(!p.is_revoked());
        t.join().unwrap();
    }

    #[test]
    fn stop_revokes_after_timeout() {
        let p = package();
        assert!(p.try_schedule());
        assert!(p.begin());

        assert!(!p.stop(Duration::from_millis(10)));
        assert!(p.is_revoked());
    }
}
