/// Simulate command: drives the whole voting pipeline against an in-memory
/// backend.
///
/// Each simulated voter has its own ledger, outbox and local store, and votes
/// according to a hidden "true" hotness per founder. The backend enforces the
/// server-side caps and fails a configurable share of calls, so the run
/// exercises rate limiting, retries and drops end to end. Time comes from a
/// manual clock, so a run is reproducible from its seed.
use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use hotsmash_core::{
    AuthenticatedIdentity, DurableVoteQueue, Entity, FlushReport, InMemoryGateway, ManualClock, MemoryStore,
    PairingError, QueueConfig, RateLimitPolicy, VotingSession, expected_score,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, info};

use crate::bail;

const FOUNDERS: &str = include_str!("founders.json");

/// 2023-11-14T22:13:20Z, an arbitrary fixed start.
const SIMULATION_START_MS: u64 = 1_700_000_000_000;

/// Accepted votes between two outbox flushes.
const FLUSH_EVERY: usize = 25;

pub struct SimulationOptions {
    pub votes: usize,
    pub voters: usize,
    pub failure_rate: f64,
    pub seed: u64,
    pub k_factor: f64,
    pub rate_limit: RateLimitPolicy,
    pub queue: QueueConfig,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub attempted: usize,
    pub accepted: usize,
    pub denied: BTreeMap<String, usize>,
    pub flushed: FlushTotals,
    pub remote_votes: u64,
    pub still_queued: usize,
    pub dropped_overflow: u64,
    pub dropped_exhausted: u64,
    pub dropped_permanent: u64,
    /// Share of founder pairs whose final rating order matches their hidden order.
    pub order_agreement: f64,
    pub rankings: Vec<Entity>,
}

#[derive(Debug, Default, Serialize)]
pub struct FlushTotals {
    pub succeeded: usize,
    pub failed: usize,
    pub dropped: usize,
}

impl FlushTotals {
    fn add(&mut self, report: FlushReport) {
        self.succeeded += report.succeeded;
        self.failed += report.failed;
        self.dropped += report.dropped;
    }
}

fn bundled_founders() -> Vec<Entity> {
    serde_json::from_str(FOUNDERS).unwrap_or_else(|e| bail(format!("Failed to parse bundled founders: {e}")))
}

pub async fn run_simulation(opts: SimulationOptions) -> SimulationReport {
    if opts.voters == 0 {
        bail("--voters must be at least 1");
    }
    if !(0.0..=1.0).contains(&opts.failure_rate) {
        bail(format!("--failure-rate must be between 0.0 and 1.0, got {}", opts.failure_rate));
    }

    let founders = bundled_founders();
    let mut rng = StdRng::seed_from_u64(opts.seed);

    // Hidden hotness, on the Elo scale.
    let truth: BTreeMap<String, f64> = founders
        .iter()
        .map(|f| (f.id.clone(), rng.random_range(800.0..1600.0)))
        .collect();

    let clock = Arc::new(ManualClock::new(SIMULATION_START_MS));
    let gateway = Arc::new(
        InMemoryGateway::new(founders)
            .with_server_policy(RateLimitPolicy::server())
            .with_clock(clock.clone()),
    );
    gateway.set_failure_rate(opts.failure_rate, opts.seed);

    let mut sessions = Vec::with_capacity(opts.voters);
    for i in 0..opts.voters {
        let store = Arc::new(MemoryStore::new());
        let queue = DurableVoteQueue::new(opts.queue, gateway.clone(), store.clone())
            .unwrap_or_else(|e| bail(format!("Failed to create vote queue: {e}")));
        let mut session = VotingSession::new(
            gateway.clone(),
            store,
            Arc::new(queue),
            Box::new(AuthenticatedIdentity::new(format!("sim-voter-{i}"))),
        )
        .unwrap_or_else(|e| bail(format!("Failed to create session: {e}")))
        .with_clock(clock.clone())
        .with_rate_limit(opts.rate_limit)
        .with_k_factor(opts.k_factor)
        .with_rng(StdRng::seed_from_u64(opts.seed.wrapping_add(i as u64 + 1)));
        session
            .refresh()
            .await
            .unwrap_or_else(|e| bail(format!("Failed to load founders: {e}")));
        sessions.push(session);
    }

    let mut report = SimulationReport::default();
    let mut since_flush = 0;

    for _ in 0..opts.votes {
        clock.advance(rng.random_range(500..4_000));
        let session = &mut sessions[rng.random_range(0..opts.voters)];

        let (left, right) = match session.get_pair() {
            Ok(pair) => pair,
            Err(PairingError::InsufficientCandidates { available }) => {
                bail(format!("Need at least 2 founders to simulate, got {available}"))
            }
            Err(e) => bail(format!("Pair selection failed: {e}")),
        };

        let p_left = expected_score(truth[&left.id], truth[&right.id]);
        let (winner, loser) = if rng.random::<f64>() < p_left { (&left, &right) } else { (&right, &left) };

        report.attempted += 1;
        let outcome = session
            .submit_vote(&winner.id, &loser.id)
            .unwrap_or_else(|e| bail(format!("Simulated vote was invalid: {e}")));

        if outcome.accepted {
            report.accepted += 1;
            since_flush += 1;
        } else if let Some(reason) = outcome.reason {
            *report.denied.entry(format!("{reason:?}")).or_default() += 1;
        }

        if since_flush >= FLUSH_EVERY {
            since_flush = 0;
            for flushed in join_all(sessions.iter().map(|s| s.flush())).await {
                report.flushed.add(flushed);
            }
        }
    }

    // Drain: every retryable vote gets its remaining attempts.
    for round in 0..=opts.queue.max_retries {
        if sessions.iter().all(|s| !s.queue().has_pending()) {
            break;
        }
        debug!(round, "draining outboxes");
        clock.advance(opts.queue.sync_interval_ms);
        for flushed in join_all(sessions.iter().map(|s| s.flush())).await {
            report.flushed.add(flushed);
        }
    }

    for session in &sessions {
        let stats = session.queue_stats();
        report.still_queued += stats.pending;
        report.dropped_overflow += stats.dropped_overflow;
        report.dropped_exhausted += stats.dropped_exhausted;
        report.dropped_permanent += stats.dropped_permanent;
    }

    report.remote_votes = gateway.total_votes();
    if let Some(session) = sessions.first_mut() {
        session
            .refresh()
            .await
            .unwrap_or_else(|e| bail(format!("Failed to reload founders: {e}")));
        report.rankings = session.rankings();
    }
    report.order_agreement = order_agreement(&report.rankings, &truth);

    info!(
        attempted = report.attempted,
        accepted = report.accepted,
        remote_votes = report.remote_votes,
        "simulation finished"
    );
    report
}

/// Fraction of founder pairs ranked in the same order as their hidden hotness.
fn order_agreement(ranked: &[Entity], truth: &BTreeMap<String, f64>) -> f64 {
    let mut agree = 0usize;
    let mut total = 0usize;
    for (i, a) in ranked.iter().enumerate() {
        for b in &ranked[i + 1..] {
            if a.rating == b.rating {
                continue;
            }
            total += 1;
            if truth[&a.id] > truth[&b.id] {
                agree += 1;
            }
        }
    }
    if total == 0 { 0.0 } else { agree as f64 / total as f64 }
}

pub fn print_report(report: &SimulationReport, top: usize) {
    eprintln!(
        "Votes: {} attempted, {} accepted, {} recorded remotely",
        report.attempted, report.accepted, report.remote_votes
    );
    for (reason, count) in &report.denied {
        eprintln!("  denied ({reason}): {count}");
    }
    eprintln!(
        "Flushes: {} applied, {} failed attempts, {} dropped",
        report.flushed.succeeded, report.flushed.failed, report.flushed.dropped
    );
    eprintln!(
        "Outbox: {} still queued | dropped {} overflow, {} exhausted, {} permanent",
        report.still_queued, report.dropped_overflow, report.dropped_exhausted, report.dropped_permanent
    );
    eprintln!("Order agreement with hidden hotness: {:.1}%\n", report.order_agreement * 100.0);

    let shown = top.min(report.rankings.len());
    crate::output::print_rankings_table(&report.rankings[..shown]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(votes: usize, failure_rate: f64) -> SimulationOptions {
        SimulationOptions {
            votes,
            voters: 4,
            failure_rate,
            seed: 42,
            k_factor: 32.0,
            rate_limit: RateLimitPolicy::client(),
            queue: QueueConfig::default(),
        }
    }

    #[test]
    fn test_bundled_founders_are_unique_and_fresh() {
        let founders = bundled_founders();
        assert_eq!(founders.len(), 40);
        let ids: std::collections::HashSet<&str> = founders.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids.len(), founders.len());
        assert!(founders.iter().all(|f| f.rating == 1200 && f.compare_count == 0));
    }

    #[tokio::test]
    async fn test_reliable_backend_applies_every_accepted_vote() {
        let report = run_simulation(options(200, 0.0)).await;
        assert_eq!(report.attempted, 200);
        assert!(report.accepted > 0);
        assert_eq!(report.still_queued, 0);
        assert_eq!(
            report.remote_votes as usize + report.dropped_permanent as usize,
            report.accepted
        );
        let total_compares: u64 = report.rankings.iter().map(|e| e.compare_count).sum();
        assert_eq!(total_compares, 2 * report.remote_votes);
    }

    #[tokio::test]
    async fn test_same_seed_same_run() {
        let a = run_simulation(options(100, 0.2)).await;
        let b = run_simulation(options(100, 0.2)).await;
        assert_eq!(a.accepted, b.accepted);
        assert_eq!(a.remote_votes, b.remote_votes);
        assert_eq!(a.rankings, b.rankings);
    }

    #[tokio::test]
    async fn test_flaky_backend_loses_nothing_silently() {
        let report = run_simulation(options(300, 0.3)).await;
        let accounted = report.remote_votes
            + report.dropped_exhausted
            + report.dropped_permanent
            + report.dropped_overflow
            + report.still_queued as u64;
        assert_eq!(accounted, report.accepted as u64);
    }

    #[test]
    fn test_order_agreement() {
        let truth: BTreeMap<String, f64> = [("a", 3.0), ("b", 2.0), ("c", 1.0)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let mut ranked = vec![Entity::new("a", "A"), Entity::new("b", "B"), Entity::new("c", "C")];
        ranked[0].rating = 1300;
        ranked[1].rating = 1200;
        ranked[2].rating = 1100;
        assert_eq!(order_agreement(&ranked, &truth), 1.0);
        ranked.reverse();
        assert_eq!(order_agreement(&ranked, &truth), 0.0);
    }
}
