//! QR Countdown Timer
//!
//! [`QrSession`] holds the displayed QR and its remaining validity;
//! [`QrCountdown`] is the 1-second ticker that drives it. Only one countdown
//! runs at a time: starting a new one cancels the previous task.

use log::debug;
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

// ─────────────────────────────────────────────────────────────────────────────
// QR Session
// ─────────────────────────────────────────────────────────────────────────────

/// The QR currently shown to the user.
///
/// `qr_code` is set iff `time_left` is set and positive. Both are cleared in
/// the same call when the countdown reaches zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QrSession {
    qr_code: Option<String>,
    time_left: Option<u32>,
    #[serde(skip)]
    session: u64,
}

impl QrSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show a new QR for `ttl_secs` seconds, replacing any previous one.
    ///
    /// Returns the session id callbacks must present to update it.
    pub fn issue(&mut self, qr_code: String, ttl_secs: u32) -> u64 {
        self.session += 1;
        if ttl_secs == 0 || qr_code.is_empty() {
            self.qr_code = None;
            self.time_left = None;
        } else {
            self.qr_code = Some(qr_code);
            self.time_left = Some(ttl_secs);
        }
        self.session
    }

    /// Apply a tick from the countdown of `session`. Below 1 clears the QR.
    ///
    /// Ticks from a superseded session are ignored and return `false`.
    pub fn set_remaining(&mut self, session: u64, left: u32) -> bool {
        if session != self.session || self.qr_code.is_none() {
            return false;
        }
        if left < 1 {
            self.clear();
        } else {
            self.time_left = Some(left);
        }
        true
    }

    /// Expire `session` if it is still the current one.
    pub fn expire(&mut self, session: u64) -> bool {
        self.set_remaining(session, 0)
    }

    /// Hide the QR immediately (connected, disconnected, deleted...).
    pub fn clear(&mut self) {
        self.qr_code = None;
        self.time_left = None;
    }

    pub fn qr_code(&self) -> Option<&str> {
        self.qr_code.as_deref()
    }

    pub fn time_left(&self) -> Option<u32> {
        self.time_left
    }

    pub fn is_active(&self) -> bool {
        self.qr_code.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Countdown Task
// ─────────────────────────────────────────────────────────────────────────────

/// Single-slot countdown: `start`, `on_tick`, `on_expire`, `cancel`.
///
/// Must be used from within a tokio runtime. Dropping it cancels the
/// running countdown.
#[derive(Debug)]
pub struct QrCountdown {
    period: Duration,
    current: Mutex<Option<JoinHandle<()>>>,
}

impl Default for QrCountdown {
    fn default() -> Self {
        Self::new()
    }
}

impl QrCountdown {
    /// Countdown with 1-second resolution.
    pub fn new() -> Self {
        Self::with_period(Duration::from_secs(1))
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            current: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start counting down from `duration_secs`, replacing any running
    /// countdown.
    ///
    /// `on_tick` receives the remaining seconds after each decrement while it
    /// is still positive; `on_expire` runs once when it reaches zero.
    pub fn start<T, E>(&self, duration_secs: u32, on_tick: T, on_expire: E)
    where
        T: Fn(u32) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        self.cancel();

        if duration_secs == 0 {
            on_expire();
            return;
        }

        let period = self.period;
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut remaining = duration_secs;
            loop {
                ticker.tick().await;
                remaining = remaining.saturating_sub(1);
                if remaining < 1 {
                    on_expire();
                    break;
                }
                on_tick(remaining);
            }
        });

        *self.slot() = Some(handle);
    }

    /// Stop the running countdown, if any. Its callbacks will not fire again.
    pub fn cancel(&self) {
        if let Some(handle) = self.slot().take() {
            if !handle.is_finished() {
                debug!("[QrCountdown] Cancelling running countdown");
            }
            handle.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.slot().as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for QrCountdown {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn issue_sets_both_fields() {
        let mut qr = QrSession::new();
        qr.issue("iVBOR".into(), 40);
        assert_eq!(qr.qr_code(), Some("iVBOR"));
        assert_eq!(qr.time_left(), Some(40));
    }

    #[test]
    fn reaching_zero_clears_both_fields() {
        let mut qr = QrSession::new();
        let session = qr.issue("iVBOR".into(), 2);

        assert!(qr.set_remaining(session, 1));
        assert_eq!(qr.time_left(), Some(1));
        assert!(qr.is_active());

        assert!(qr.set_remaining(session, 0));
        assert_eq!(qr.qr_code(), None);
        assert_eq!(qr.time_left(), None);
    }

    #[test]
    fn stale_session_ticks_are_ignored() {
        let mut qr = QrSession::new();
        let first = qr.issue("first".into(), 40);
        let second = qr.issue("second".into(), 40);

        assert!(!qr.set_remaining(first, 0));
        assert_eq!(qr.qr_code(), Some("second"));
        assert!(qr.set_remaining(second, 39));
        assert_eq!(qr.time_left(), Some(39));
    }

    #[test]
    fn zero_ttl_never_shows_a_qr() {
        let mut qr = QrSession::new();
        qr.issue("iVBOR".into(), 0);
        assert!(!qr.is_active());
        assert_eq!(qr.time_left(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_ticks_then_expires() {
        let countdown = QrCountdown::new();
        let ticks = Arc::new(Mutex::new(Vec::new()));
        let expired = Arc::new(AtomicBool::new(false));

        let t = ticks.clone();
        let e = expired.clone();
        countdown.start(3, move |left| t.lock().unwrap().push(left), move || {
            e.store(true, Ordering::SeqCst)
        });
        assert!(countdown.is_running());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(*ticks.lock().unwrap(), vec![2, 1]);
        assert!(!expired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(expired.load(Ordering::SeqCst));
        assert!(!countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_cancels_previous_countdown() {
        let countdown = QrCountdown::new();
        let first_expired = Arc::new(AtomicBool::new(false));
        let first_ticks = Arc::new(Mutex::new(Vec::new()));

        let e = first_expired.clone();
        let t = first_ticks.clone();
        countdown.start(3, move |left| t.lock().unwrap().push(left), move || {
            e.store(true, Ordering::SeqCst)
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let second_ticks = Arc::new(Mutex::new(Vec::new()));
        let t2 = second_ticks.clone();
        countdown.start(40, move |left| t2.lock().unwrap().push(left), || {});

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(*first_ticks.lock().unwrap(), vec![2]);
        assert!(!first_expired.load(Ordering::SeqCst));
        assert_eq!(second_ticks.lock().unwrap().first(), Some(&39));
        assert!(countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_callbacks() {
        let countdown = QrCountdown::new();
        let expired = Arc::new(AtomicBool::new(false));
        let e = expired.clone();
        countdown.start(2, |_| {}, move || e.store(true, Ordering::SeqCst));

        countdown.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!expired.load(Ordering::SeqCst));
        assert!(!countdown.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_still_works_after_a_poisoned_slot() {
        let countdown = QrCountdown::new();
        std::thread::scope(|scope| {
            let poisoner = scope.spawn(|| {
                let _held = countdown.current.lock().unwrap();
                panic!("poison the slot");
            });
            assert!(poisoner.join().is_err());
        });
        assert!(countdown.current.is_poisoned());

        let expired = Arc::new(AtomicBool::new(false));
        let e = expired.clone();
        countdown.start(2, |_| {}, move || e.store(true, Ordering::SeqCst));
        assert!(countdown.is_running());

        countdown.cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!expired.load(Ordering::SeqCst));
        assert!(!countdown.is_running());
    }
}
