/// Vote admission policy.
///
/// `RateLimiter::evaluate` is a pure decision over ledger state: it never
/// records anything. On `Allowed` the caller records the judged pair and the
/// vote time.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DAY_MS, DEFAULT_COOLDOWN_MS, DEFAULT_MAX_VOTES_PER_DAY, DEFAULT_MAX_VOTES_PER_HOUR, HOUR_MS,
    SERVER_MAX_VOTES_PER_DAY, SERVER_MAX_VOTES_PER_HOUR,
};
use crate::ledger::VoteLedger;
use crate::types::Timestamp;

/// Limits applied to one voter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitPolicy {
    /// Minimum gap between two votes. 0 disables the cooldown.
    pub cooldown_ms: u64,
    pub max_per_hour: usize,
    pub max_per_day: usize,
}

impl RateLimitPolicy {
    /// What the voting client enforces: 60/hour, 200/day, 2s apart.
    pub fn client() -> Self {
        RateLimitPolicy {
            cooldown_ms: DEFAULT_COOLDOWN_MS,
            max_per_hour: DEFAULT_MAX_VOTES_PER_HOUR,
            max_per_day: DEFAULT_MAX_VOTES_PER_DAY,
        }
    }

    /// What the vote-processing backend enforces: 50/hour, 200/day, no cooldown.
    pub fn server() -> Self {
        RateLimitPolicy {
            cooldown_ms: 0,
            max_per_hour: SERVER_MAX_VOTES_PER_HOUR,
            max_per_day: SERVER_MAX_VOTES_PER_DAY,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::client()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    Cooldown,
    AlreadyJudged,
    HourlyLimitExceeded,
    DailyLimitExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied {
        reason: DenialReason,
        retry_after_ms: Option<u64>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }
}

/// A denial with the policy that produced it, for rendering to the voter.
#[derive(Debug, Clone, Copy)]
pub struct Denial {
    pub reason: DenialReason,
    pub retry_after_ms: Option<u64>,
    pub policy: RateLimitPolicy,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.reason {
            DenialReason::Cooldown => {
                let secs = self.retry_after_ms.unwrap_or(0).div_ceil(1000);
                write!(f, "Please wait {secs} seconds before voting again")
            }
            DenialReason::AlreadyJudged => write!(f, "You have already voted on this comparison"),
            DenialReason::HourlyLimitExceeded => write!(
                f,
                "Hourly voting limit reached ({} votes/hour)",
                self.policy.max_per_hour
            ),
            DenialReason::DailyLimitExceeded => write!(
                f,
                "Daily voting limit reached ({} votes/day)",
                self.policy.max_per_day
            ),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RateLimiter {
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy) -> Self {
        RateLimiter { policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Decide whether `voter` may vote on `(a, b)` at `now`.
    ///
    /// Checks run in order and the first failure wins: cooldown, duplicate
    /// pair, hourly cap, daily cap.
    pub fn evaluate(&self, ledger: &VoteLedger, voter: &str, a: &str, b: &str, now: Timestamp) -> Decision {
        if let Some(last) = ledger.last_vote_at(voter) {
            let elapsed = now.saturating_sub(last);
            if elapsed < self.policy.cooldown_ms {
                return Decision::Denied {
                    reason: DenialReason::Cooldown,
                    retry_after_ms: Some(self.policy.cooldown_ms - elapsed),
                };
            }
        }

        if ledger.has_judged(voter, a, b) {
            return Decision::Denied { reason: DenialReason::AlreadyJudged, retry_after_ms: None };
        }

        if let Some(denied) = self.window_check(
            ledger,
            voter,
            now,
            HOUR_MS,
            self.policy.max_per_hour,
            DenialReason::HourlyLimitExceeded,
        ) {
            return denied;
        }

        if let Some(denied) = self.window_check(
            ledger,
            voter,
            now,
            DAY_MS,
            self.policy.max_per_day,
            DenialReason::DailyLimitExceeded,
        ) {
            return denied;
        }

        Decision::Allowed
    }

    /// Wrap a denial with this limiter's policy for display.
    pub fn explain(&self, decision: Decision) -> Option<Denial> {
        match decision {
            Decision::Allowed => None,
            Decision::Denied { reason, retry_after_ms } => Some(Denial {
                reason,
                retry_after_ms,
                policy: self.policy,
            }),
        }
    }

    fn window_check(
        &self,
        ledger: &VoteLedger,
        voter: &str,
        now: Timestamp,
        window_ms: u64,
        cap: usize,
        reason: DenialReason,
    ) -> Option<Decision> {
        let since = now.saturating_sub(window_ms);
        if ledger.count_since(voter, since) < cap {
            return None;
        }
        // The window frees a slot once its oldest vote ages out.
        let retry_after_ms = ledger
            .oldest_since(voter, since)
            .map(|oldest| (oldest + window_ms).saturating_sub(now).max(1));
        Some(Decision::Denied { reason, retry_after_ms })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: Timestamp = 1_700_000_000_000;

    fn limiter() -> RateLimiter {
        RateLimiter::new(RateLimitPolicy::client())
    }

    /// Record `n` votes on distinct pairs, `gap_ms` apart, ending at `end`.
    fn fill(ledger: &mut VoteLedger, voter: &str, n: usize, end: Timestamp, gap_ms: u64) {
        for i in 0..n {
            let at = end - (n - 1 - i) as u64 * gap_ms;
            ledger.record_judged(voter, &format!("x{i}"), &format!("y{i}"), at);
            ledger.mark_voted(voter, at);
        }
    }

    #[test]
    fn test_fresh_voter_is_allowed() {
        let ledger = VoteLedger::new();
        assert_eq!(limiter().evaluate(&ledger, "v", "a", "b", T0), Decision::Allowed);
    }

    #[test]
    fn test_cooldown_reports_remaining_time() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", T0);
        ledger.mark_voted("v", T0);

        let decision = limiter().evaluate(&ledger, "v", "c", "d", T0 + 1_200);
        match decision {
            Decision::Denied { reason: DenialReason::Cooldown, retry_after_ms: Some(ms) } => {
                assert!((ms as i64 - 800).abs() <= 50, "retry after {ms}");
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        assert_eq!(limiter().evaluate(&ledger, "v", "c", "d", T0 + 2_000), Decision::Allowed);
    }

    #[test]
    fn test_cooldown_outranks_duplicate() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", T0);
        ledger.mark_voted("v", T0);
        let decision = limiter().evaluate(&ledger, "v", "b", "a", T0 + 10);
        assert!(matches!(decision, Decision::Denied { reason: DenialReason::Cooldown, .. }));
    }

    #[test]
    fn test_duplicate_pair_denied_regardless_of_elapsed_time() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", T0);
        ledger.mark_voted("v", T0);

        for later in [T0 + 5_000, T0 + HOUR_MS, T0 + DAY_MS - 1] {
            assert_eq!(
                limiter().evaluate(&ledger, "v", "b", "a", later),
                Decision::Denied { reason: DenialReason::AlreadyJudged, retry_after_ms: None }
            );
        }

        // Allowed again once pruned.
        ledger.prune_older_than("v", T0);
        assert_eq!(limiter().evaluate(&ledger, "v", "a", "b", T0 + DAY_MS), Decision::Allowed);
    }

    #[test]
    fn test_hourly_cap() {
        let mut ledger = VoteLedger::new();
        fill(&mut ledger, "v", 60, T0, 3_000);
        let now = T0 + 5_000;

        match limiter().evaluate(&ledger, "v", "new", "pair", now) {
            Decision::Denied { reason: DenialReason::HourlyLimitExceeded, retry_after_ms: Some(ms) } => {
                // Oldest of the 60 was at T0 - 59 * 3s.
                let oldest = T0 - 59 * 3_000;
                assert_eq!(ms, oldest + HOUR_MS - now);
            }
            other => panic!("expected hourly limit, got {other:?}"),
        }

        // The server policy caps lower: 50 votes is already too many there.
        let mut ledger = VoteLedger::new();
        fill(&mut ledger, "v", 50, T0, 3_000);
        let server = RateLimiter::new(RateLimitPolicy::server());
        assert!(matches!(
            server.evaluate(&ledger, "v", "new", "pair", T0 + 1),
            Decision::Denied { reason: DenialReason::HourlyLimitExceeded, .. }
        ));
        assert_eq!(limiter().evaluate(&ledger, "v", "new", "pair", T0 + 5_000), Decision::Allowed);
    }

    #[test]
    fn test_daily_cap() {
        let mut ledger = VoteLedger::new();
        // 200 votes spread over ~20 hours: never more than 10 in any hour.
        fill(&mut ledger, "v", 200, T0, 6 * 60 * 1000);
        let decision = limiter().evaluate(&ledger, "v", "new", "pair", T0 + 10 * 60 * 1000);
        assert!(matches!(
            decision,
            Decision::Denied { reason: DenialReason::DailyLimitExceeded, retry_after_ms: Some(_) }
        ));
    }

    #[test]
    fn test_votes_outside_window_do_not_count() {
        let mut ledger = VoteLedger::new();
        fill(&mut ledger, "v", 60, T0, 1_000);
        let decision = limiter().evaluate(&ledger, "v", "new", "pair", T0 + HOUR_MS);
        // Window start is exactly T0 and the bound is strict, so all 60 are outside.
        assert_eq!(decision, Decision::Allowed);
    }

    #[test]
    fn test_voters_are_independent() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v1", "a", "b", T0);
        ledger.mark_voted("v1", T0);
        assert_eq!(limiter().evaluate(&ledger, "v2", "a", "b", T0 + 1), Decision::Allowed);
    }

    #[test]
    fn test_denial_messages() {
        let l = limiter();
        let cooldown = l
            .explain(Decision::Denied { reason: DenialReason::Cooldown, retry_after_ms: Some(1_200) })
            .unwrap();
        assert_eq!(cooldown.to_string(), "Please wait 2 seconds before voting again");

        let hourly = l
            .explain(Decision::Denied { reason: DenialReason::HourlyLimitExceeded, retry_after_ms: None })
            .unwrap();
        assert_eq!(hourly.to_string(), "Hourly voting limit reached (60 votes/hour)");

        assert!(l.explain(Decision::Allowed).is_none());
    }
}
