//! Sliding-window admission control keyed by (subject, action).

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use super::identity::SubjectId;
use crate::config::{duration_from_secs, RatePolicyConfig};
use crate::infra::{Clock, SweepReport, Sweeper};

pub const ACTION_MESSAGE: &str = "message";
pub const ACTION_CONVERSATION_START: &str = "conversation_start";

/// Limit and window for one action kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatePolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RatePolicy {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }
}

impl From<&RatePolicyConfig> for RatePolicy {
    fn from(config: &RatePolicyConfig) -> Self {
        Self {
            limit: config.limit,
            window: duration_from_secs(config.window_secs),
        }
    }
}

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Checks left in the current window; `None` when the action is unlimited.
    pub remaining: Option<u32>,
    /// Earliest time a denied caller may retry.
    pub reset_time: Option<DateTime<Utc>>,
}

impl RateDecision {
    fn unlimited() -> Self {
        Self {
            allowed: true,
            remaining: None,
            reset_time: None,
        }
    }
}

/// Action keys are matched with `-` and `_` treated alike.
pub fn normalize_action(action: &str) -> String {
    action.trim().to_ascii_lowercase().replace('-', "_")
}

type WindowKey = (SubjectId, String);

/// Per-(subject, action) sliding-window limiter.
///
/// Actions without a policy are always admitted and never tracked.
pub struct RateLimiter {
    policies: HashMap<String, RatePolicy>,
    windows: Mutex<HashMap<WindowKey, VecDeque<DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new<I, S>(policies: I, clock: Arc<dyn Clock>) -> Self
    where
        I: IntoIterator<Item = (S, RatePolicy)>,
        S: AsRef<str>,
    {
        Self {
            policies: policies
                .into_iter()
                .map(|(action, policy)| (normalize_action(action.as_ref()), policy))
                .collect(),
            windows: Mutex::new(HashMap::new()),
            clock,
        }
    }

    pub fn from_config(config: &BTreeMap<String, RatePolicyConfig>, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            config
                .iter()
                .map(|(action, policy)| (action.as_str(), RatePolicy::from(policy))),
            clock,
        )
    }

    pub fn policy(&self, action: &str) -> Option<RatePolicy> {
        self.policies.get(&normalize_action(action)).copied()
    }

    /// Admit or deny one event. An admitted event is recorded immediately.
    pub fn check(&self, subject: &SubjectId, action: &str) -> RateDecision {
        let action = normalize_action(action);
        let Some(policy) = self.policies.get(&action).copied() else {
            return RateDecision::unlimited();
        };

        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let events = windows.entry((subject.clone(), action)).or_default();
        prune(events, policy.window, now);

        let count = u32::try_from(events.len()).unwrap_or(u32::MAX);
        if count < policy.limit {
            events.push_back(now);
            return RateDecision {
                allowed: true,
                remaining: Some(policy.limit - count - 1),
                reset_time: None,
            };
        }

        let reset_time = events.front().map(|oldest| {
            oldest
                .checked_add_signed(policy.window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        });
        RateDecision {
            allowed: false,
            remaining: Some(0),
            reset_time,
        }
    }

    /// Prune every window to its policy and drop the ones left empty.
    /// Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|(_, action), events| match self.policies.get(action) {
            Some(policy) => {
                prune(events, policy.window, now);
                !events.is_empty()
            }
            None => false,
        });
        before - windows.len()
    }

    /// Number of tracked (subject, action) windows.
    pub fn tracked(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn clear(&self) {
        self.windows.lock().clear();
    }
}

fn prune(events: &mut VecDeque<DateTime<Utc>>, window: Duration, now: DateTime<Utc>) {
    while events.front().is_some_and(|oldest| now - *oldest >= window) {
        events.pop_front();
    }
}

impl Sweeper for RateLimiter {
    fn sweep(&self) -> SweepReport {
        let removed = self.evict_idle();
        SweepReport {
            retired: 0,
            removed,
            remaining: self.tracked(),
            skipped: false,
        }
    }

    fn name(&self) -> &str {
        "rate_limits"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::ManualClock;

    fn limiter(limit: u32, window: Duration) -> (Arc<ManualClock>, RateLimiter) {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new([("x", RatePolicy::new(limit, window))], clock.clone());
        (clock, limiter)
    }

    fn subject() -> SubjectId {
        SubjectId::new("s")
    }

    #[test]
    fn two_per_second_walkthrough() {
        let (clock, limiter) = limiter(2, Duration::milliseconds(1000));
        let first_at = clock.now();

        let a = limiter.check(&subject(), "x");
        assert!(a.allowed);
        assert_eq!(a.remaining, Some(1));

        clock.advance(Duration::milliseconds(100));
        let b = limiter.check(&subject(), "x");
        assert!(b.allowed);
        assert_eq!(b.remaining, Some(0));

        clock.advance(Duration::milliseconds(100));
        let c = limiter.check(&subject(), "x");
        assert!(!c.allowed);
        assert_eq!(c.reset_time, Some(first_at + Duration::milliseconds(1000)));
    }

    #[test]
    fn remaining_counts_down_then_recovers_after_window() {
        let (clock, limiter) = limiter(5, Duration::seconds(60));
        let remaining: Vec<Option<u32>> = (0..5)
            .map(|_| {
                clock.advance(Duration::seconds(1));
                limiter.check(&subject(), "x").remaining
            })
            .collect();
        assert_eq!(remaining, vec![Some(4), Some(3), Some(2), Some(1), Some(0)]);
        assert!(!limiter.check(&subject(), "x").allowed);

        // first event was at +1s; exactly one window later it falls out
        clock.advance(Duration::seconds(56));
        assert!(limiter.check(&subject(), "x").allowed);
    }

    #[test]
    fn denied_checks_are_not_recorded() {
        let (clock, limiter) = limiter(1, Duration::seconds(10));
        assert!(limiter.check(&subject(), "x").allowed);
        for _ in 0..5 {
            clock.advance(Duration::seconds(1));
            assert!(!limiter.check(&subject(), "x").allowed);
        }
        clock.advance(Duration::seconds(5));
        assert!(limiter.check(&subject(), "x").allowed);
    }

    #[test]
    fn unknown_action_is_always_allowed() {
        let (_, limiter) = limiter(1, Duration::seconds(10));
        for _ in 0..50 {
            let decision = limiter.check(&subject(), "upload");
            assert!(decision.allowed);
            assert_eq!(decision.remaining, None);
        }
        assert_eq!(limiter.tracked(), 0);
    }

    #[test]
    fn subjects_and_actions_have_separate_windows() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new(
            [
                ("message", RatePolicy::new(1, Duration::hours(1))),
                ("conversation-start", RatePolicy::new(1, Duration::hours(1))),
            ],
            clock,
        );
        let a = SubjectId::new("a");
        let b = SubjectId::new("b");

        assert!(limiter.check(&a, ACTION_MESSAGE).allowed);
        assert!(!limiter.check(&a, ACTION_MESSAGE).allowed);
        assert!(limiter.check(&b, ACTION_MESSAGE).allowed);
        assert!(limiter.check(&a, ACTION_CONVERSATION_START).allowed);
    }

    #[test]
    fn action_names_are_normalized() {
        let (_, limiter) = limiter(1, Duration::seconds(10));
        assert_eq!(normalize_action("Conversation-Start"), "conversation_start");
        assert!(limiter.policy("x").is_some());
        assert!(limiter.policy(" X ").is_some());
    }

    #[test]
    fn evict_idle_drops_windows_with_no_live_events() {
        let (clock, limiter) = limiter(3, Duration::seconds(10));
        limiter.check(&SubjectId::new("old"), "x");
        clock.advance(Duration::seconds(8));
        limiter.check(&SubjectId::new("new"), "x");
        clock.advance(Duration::seconds(3));

        let report = limiter.sweep();
        assert_eq!(report.removed, 1);
        assert_eq!(report.remaining, 1);
    }

    #[test]
    fn evict_idle_prunes_each_window_to_its_policy() {
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new(
            [
                ("short", RatePolicy::new(2, Duration::seconds(10))),
                ("long", RatePolicy::new(2, Duration::days(7))),
            ],
            clock.clone(),
        );
        let s = subject();
        limiter.check(&s, "short");
        limiter.check(&s, "long");
        clock.advance(Duration::seconds(5));
        limiter.check(&s, "short");
        limiter.check(&s, "long");
        clock.advance(Duration::seconds(6));

        // the first "short" event expired, the second is still live
        assert_eq!(limiter.evict_idle(), 0);
        assert_eq!(limiter.windows.lock()[&(s.clone(), "short".to_string())].len(), 1);
        assert_eq!(limiter.check(&s, "short").remaining, Some(0));

        // a week-long window outlives the default idle horizon
        clock.advance(Duration::days(2));
        assert_eq!(limiter.evict_idle(), 1);
        assert!(!limiter.check(&s, "long").allowed);
    }

    #[test]
    fn oversized_window_from_config_is_clamped() {
        let policy = RatePolicy::from(&RatePolicyConfig {
            limit: 1,
            window_secs: u64::MAX,
        });
        assert_eq!(policy.window, duration_from_secs(crate::config::MAX_DURATION_SECS));

        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::new([("x", policy)], clock);
        assert!(limiter.check(&subject(), "x").allowed);
        assert!(limiter.check(&subject(), "x").reset_time.is_some());
    }

    #[test]
    fn from_config_uses_defaults() {
        let config = crate::config::Config::default();
        let clock = Arc::new(ManualClock::starting_now());
        let limiter = RateLimiter::from_config(&config.rate_limits, clock);
        assert_eq!(
            limiter.policy(ACTION_MESSAGE),
            Some(RatePolicy::new(100, Duration::hours(1)))
        );
        assert_eq!(
            limiter.policy("conversation-start"),
            Some(RatePolicy::new(10, Duration::hours(1)))
        );
    }
}
