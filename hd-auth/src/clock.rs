//! Token clock: schedules the next proactive credential refresh.
//!
//! At most one refresh timer is outstanding. Every `schedule` aborts the
//! previous timer before arming a new one, so rapid credential changes can
//! never produce duplicate refreshes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use hd_core::constants::MAX_TIMER_DURATION;
use hd_core::error::HdResult;

use crate::credential::Credential;

/// Receiver of "refresh now" signals from the clock.
#[async_trait]
pub trait RefreshTrigger: Send + Sync + 'static {
    async fn on_refresh_due(&self) -> HdResult<()>;
}

/// Delay before refreshing a credential that expires at `expires_at`:
/// `max(0, (expires_at - now) - margin)`.
pub fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, margin: Duration) -> Duration {
    let margin = chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
    ((expires_at - now) - margin).to_std().unwrap_or(Duration::ZERO)
}

struct PendingRefresh {
    generation: u64,
    due_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

struct ClockInner {
    pending: Mutex<Option<PendingRefresh>>,
    generation: AtomicU64,
}

impl ClockInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, Option<PendingRefresh>> {
        // The slot holds no invariant a panicking holder could break.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Single-timer refresh scheduler.
pub struct TokenClock {
    margin: Duration,
    max_timer: Duration,
    trigger: Weak<dyn RefreshTrigger>,
    inner: Arc<ClockInner>,
}

impl TokenClock {
    /// Create a clock that signals `trigger` `margin` before expiry.
    pub fn new(margin: Duration, trigger: Weak<dyn RefreshTrigger>) -> Self {
        Self::with_max_timer(margin, trigger, MAX_TIMER_DURATION)
    }

    /// Create a clock whose individual timers never exceed `max_timer`.
    /// Longer waits are split into consecutive timers.
    pub fn with_max_timer(
        margin: Duration,
        trigger: Weak<dyn RefreshTrigger>,
        max_timer: Duration,
    ) -> Self {
        Self {
            margin,
            max_timer: max_timer.max(Duration::from_millis(1)),
            trigger,
            inner: Arc::new(ClockInner {
                pending: Mutex::new(None),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Lead time before expiry.
    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// Schedule the refresh for `credential`, replacing any pending one.
    pub fn schedule(&self, credential: &Credential) {
        self.schedule_at(credential.expires_at);
    }

    /// Schedule the refresh for a credential expiring at `expires_at`.
    pub fn schedule_at(&self, expires_at: DateTime<Utc>) {
        let delay = refresh_delay(expires_at, Utc::now(), self.margin);
        debug!(
            "token expires at {expires_at}, refresh in {}s",
            delay.as_secs()
        );
        self.arm(delay);
    }

    /// Schedule a refresh `delay` from now, replacing any pending one.
    pub fn schedule_after(&self, delay: Duration) {
        debug!("refresh re-armed in {}s", delay.as_secs());
        self.arm(delay);
    }

    /// Cancel the pending refresh, if any.
    pub fn cancel(&self) {
        if let Some(prev) = self.inner.lock().take() {
            prev.handle.abort();
            debug!("refresh timer cancelled");
        }
    }

    /// Whether a refresh is currently scheduled.
    pub fn is_armed(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Wall-clock time the pending refresh is due, if any.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().as_ref().map(|p| p.due_at)
    }

    fn arm(&self, delay: Duration) {
        // The slot stays locked until the new entry is in place, so a
        // zero-delay timer cannot fire before it is registered.
        let mut slot = self.inner.lock();
        if let Some(prev) = slot.take() {
            prev.handle.abort();
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let due_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        let handle = tokio::spawn(run_timer(
            Arc::clone(&self.inner),
            self.trigger.clone(),
            generation,
            delay,
            self.max_timer,
        ));

        *slot = Some(PendingRefresh {
            generation,
            due_at,
            handle,
        });
    }
}

impl Drop for TokenClock {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn run_timer(
    inner: Arc<ClockInner>,
    trigger: Weak<dyn RefreshTrigger>,
    generation: u64,
    delay: Duration,
    max_timer: Duration,
) {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        if remaining > max_timer {
            debug!("refresh timer clamped to {}ms, will re-arm", max_timer.as_millis());
        }
        tokio::time::sleep(remaining.min(max_timer)).await;
    }

    {
        let mut slot = inner.lock();
        match slot.as_ref() {
            Some(p) if p.generation == generation => *slot = None,
            // Superseded between wake-up and here.
            _ => return,
        }
    }

    let Some(trigger) = trigger.upgrade() else {
        return;
    };
    debug!("refresh timer fired");
    if let Err(e) = trigger.on_refresh_due().await {
        warn!("scheduled refresh failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingTrigger {
        fired: AtomicUsize,
    }

    #[async_trait]
    impl RefreshTrigger for CountingTrigger {
        async fn on_refresh_due(&self) -> HdResult<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn clock_with(trigger: &Arc<CountingTrigger>, margin: Duration) -> TokenClock {
        let weak: Weak<dyn RefreshTrigger> = Arc::downgrade(trigger) as Weak<dyn RefreshTrigger>;
        TokenClock::new(margin, weak)
    }

    fn fired(trigger: &CountingTrigger) -> usize {
        trigger.fired.load(Ordering::SeqCst)
    }

    #[test]
    fn test_refresh_delay() {
        let now = Utc::now();
        let margin = Duration::from_secs(300);
        let delay = refresh_delay(now + chrono::Duration::minutes(10), now, margin);
        assert_eq!(delay, Duration::from_secs(300));
        let delay = refresh_delay(now + chrono::Duration::minutes(1), now, margin);
        assert_eq!(delay, Duration::ZERO);
        let delay = refresh_delay(now - chrono::Duration::minutes(1), now, margin);
        assert_eq!(delay, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_after_delay() {
        let trigger = Arc::new(CountingTrigger::default());
        let clock = clock_with(&trigger, Duration::ZERO);

        clock.schedule_after(Duration::from_secs(60));
        assert!(clock.is_armed());

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(fired(&trigger), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired(&trigger), 1);
        assert!(!clock.is_armed());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired(&trigger), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_cancels_previous_timer() {
        let trigger = Arc::new(CountingTrigger::default());
        let clock = clock_with(&trigger, Duration::from_secs(300));

        clock.schedule_at(Utc::now() + chrono::Duration::minutes(10));
        assert!(clock.is_armed());
        clock.schedule_at(Utc::now() + chrono::Duration::minutes(1));

        // Within the margin: fires on the next tick.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(fired(&trigger), 1);

        // The first timer (due in ~5 minutes) must not fire.
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(fired(&trigger), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_timer_outstanding() {
        let trigger = Arc::new(CountingTrigger::default());
        let clock = clock_with(&trigger, Duration::ZERO);

        for secs in [30, 40, 50, 60] {
            clock.schedule_after(Duration::from_secs(secs));
        }

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired(&trigger), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let trigger = Arc::new(CountingTrigger::default());
        let clock = clock_with(&trigger, Duration::ZERO);

        clock.schedule_after(Duration::from_secs(5));
        clock.cancel();
        clock.cancel();
        assert!(!clock.is_armed());
        assert!(clock.due_at().is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired(&trigger), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_wait_is_split_into_clamped_timers() {
        let trigger = Arc::new(CountingTrigger::default());
        let weak: Weak<dyn RefreshTrigger> = Arc::downgrade(&trigger) as Weak<dyn RefreshTrigger>;
        let clock = TokenClock::with_max_timer(Duration::ZERO, weak, Duration::from_secs(60));

        clock.schedule_after(Duration::from_secs(150));

        // Two clamped timers have elapsed; neither triggers a refresh.
        tokio::time::sleep(Duration::from_secs(149)).await;
        assert_eq!(fired(&trigger), 0);
        assert!(clock.is_armed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired(&trigger), 1);
    }
}
