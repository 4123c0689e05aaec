//! Fire-then-re-arm periodic trigger.

use chrono::{DateTime, Duration, Utc};
use std::future::Future;

type Advance = Box<dyn Fn(DateTime<Utc>) -> DateTime<Utc> + Send + Sync>;

/// Periodic trigger with two states: armed, and firing.
///
/// The next activation is computed from the firing time before the bound
/// action runs, so a slow or failing action never causes an immediate
/// re-fire and its latency does not accumulate as drift.
pub struct PeriodicTrigger {
    /// `None` until the first firing; an unarmed trigger is due immediately
    next_activation: Option<DateTime<Utc>>,
    advance: Advance,
}

impl PeriodicTrigger {
    pub fn new(advance: impl Fn(DateTime<Utc>) -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            next_activation: None,
            advance: Box::new(advance),
        }
    }

    /// Trigger advancing by a fixed number of minutes.
    pub fn every_minutes(minutes: u32) -> Self {
        Self::new(move |now| now + Duration::minutes(i64::from(minutes)))
    }

    /// Trigger advancing by a fixed number of seconds.
    pub fn every_seconds(seconds: u32) -> Self {
        Self::new(move |now| now + Duration::seconds(i64::from(seconds)))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_activation.map_or(true, |next| now >= next)
    }

    /// Re-arm if due. Returns whether the caller should run its action.
    pub fn poll(&mut self, now: DateTime<Utc>) -> bool {
        if !self.is_due(now) {
            return false;
        }
        self.next_activation = Some((self.advance)(now));
        true
    }

    /// Run `action` if due, re-arming first.
    pub async fn fire_if_due<F, Fut, T>(&mut self, now: DateTime<Utc>, action: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if self.poll(now) {
            Some(action().await)
        } else {
            None
        }
    }

    pub fn next_activation(&self) -> Option<DateTime<Utc>> {
        self.next_activation
    }

    /// Whole seconds until the trigger is due, zero if already due.
    pub fn seconds_until_due(&self, now: DateTime<Utc>) -> i64 {
        self.next_activation
            .map(|next| (next - now).num_seconds().max(0))
            .unwrap_or(0)
    }
}

impl std::fmt::Debug for PeriodicTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicTrigger")
            .field("next_activation", &self.next_activation)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_unarmed_trigger_fires_immediately() {
        let mut trigger = PeriodicTrigger::every_minutes(60);
        assert!(trigger.is_due(t0()));
        assert_eq!(trigger.seconds_until_due(t0()), 0);

        assert!(trigger.poll(t0()));
        assert_eq!(trigger.next_activation(), Some(t0() + Duration::minutes(60)));
        assert!(!trigger.poll(t0() + Duration::minutes(59)));
        assert!(trigger.poll(t0() + Duration::minutes(60)));
    }

    #[test]
    fn test_advance_is_from_firing_time() {
        let mut trigger = PeriodicTrigger::every_seconds(30);
        trigger.poll(t0());

        // Late check: next activation counts from the late firing, not the schedule
        let late = t0() + Duration::seconds(95);
        assert!(trigger.poll(late));
        assert_eq!(trigger.seconds_until_due(late), 30);
        assert_eq!(trigger.seconds_until_due(late + Duration::seconds(45)), 0);
    }

    #[tokio::test]
    async fn test_slow_action_does_not_refire() {
        let mut trigger = PeriodicTrigger::every_seconds(10);

        let fired = trigger
            .fire_if_due(t0(), || async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                7
            })
            .await;
        assert_eq!(fired, Some(7));

        // Re-armed before the action ran
        let again = trigger.fire_if_due(t0(), || async { 8 }).await;
        assert_eq!(again, None);
        assert_eq!(trigger.seconds_until_due(t0()), 10);
    }

    #[test]
    fn test_independent_instances_do_not_synchronize() {
        let mut rebalance = PeriodicTrigger::every_minutes(1);
        let mut snapshot = PeriodicTrigger::every_seconds(20);

        assert!(rebalance.poll(t0()));
        assert!(snapshot.poll(t0()));

        let t = t0() + Duration::seconds(20);
        assert!(!rebalance.poll(t));
        assert!(snapshot.poll(t));
        assert_eq!(rebalance.seconds_until_due(t), 40);
    }

    #[test]
    fn test_blocking_driver_with_tokio_test() {
        let mut trigger = PeriodicTrigger::new(|now| now + Duration::hours(2));
        let fired = tokio_test::block_on(trigger.fire_if_due(t0(), || async { "ran" }));
        assert_eq!(fired, Some("ran"));
        assert_eq!(trigger.seconds_until_due(t0()), 7200);
    }
}
