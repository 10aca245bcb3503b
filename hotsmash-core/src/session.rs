/// The voting surface a client drives.
///
/// `VotingSession` owns the voter's ledger, the local founder cache and the
/// rng, and shares the outbox with whatever flushes it in the background.
/// A vote goes: validate -> rate limit -> Elo update -> record in ledger ->
/// apply to the cache -> enqueue for the gateway. Nothing in that path waits
/// on the network.
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::constants::{DAY_MS, DEFAULT_K_FACTOR, HOUR_MS, LEDGER_RETENTION_MS};
use crate::elo::compute_update;
use crate::error::{GatewayError, PairingError, StoreError, ValidationError};
use crate::gateway::{PersistenceGateway, VoteTransaction};
use crate::identity::{NoPrivileges, PrivilegePolicy, VoterIdentityProvider};
use crate::ledger::VoteLedger;
use crate::limiter::{Decision, DenialReason, RateLimitPolicy, RateLimiter};
use crate::pairing::{select_pair, total_pairs};
use crate::queue::{DurableVoteQueue, FlushReport, LifecycleEvent, QueueStats, QueuedMutation};
use crate::store::LocalStore;
use crate::types::{Entity, Timestamp, VoteRecord};

/// Result of [`VotingSession::submit_vote`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOutcome {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
    /// Human-readable denial message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_winner_rating: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_loser_rating: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutation_id: Option<String>,
}

/// Where the voter stands against their limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingStats {
    pub voter_id: String,
    pub is_authenticated: bool,
    pub is_privileged: bool,
    pub votes_last_hour: usize,
    pub votes_last_day: usize,
    pub remaining_this_hour: usize,
    pub remaining_today: usize,
    pub unique_pairs: usize,
    pub total_pairs: usize,
    pub cooldown_remaining_ms: u64,
}

pub struct VotingSession {
    gateway: Arc<dyn PersistenceGateway>,
    store: Arc<dyn LocalStore>,
    queue: Arc<DurableVoteQueue>,
    identity: Box<dyn VoterIdentityProvider>,
    privileges: Box<dyn PrivilegePolicy>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    ledger: VoteLedger,
    rng: StdRng,
    k_factor: f64,
    entities: Vec<Entity>,
}

impl VotingSession {
    /// Build a session for `identity`, loading its ledger from `store`.
    ///
    /// Defaults: system clock, client rate-limit policy, K = 32, nobody
    /// privileged, OS-seeded rng. Override with the `with_*` methods.
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        store: Arc<dyn LocalStore>,
        queue: Arc<DurableVoteQueue>,
        identity: Box<dyn VoterIdentityProvider>,
    ) -> Result<Self, StoreError> {
        let mut ledger = VoteLedger::new();
        ledger.load(store.as_ref(), identity.voter_id())?;
        debug!(
            voter = identity.voter_id(),
            judged = ledger.unique_pairs(identity.voter_id()),
            "loaded vote ledger"
        );

        Ok(VotingSession {
            gateway,
            store,
            queue,
            identity,
            privileges: Box::new(NoPrivileges),
            clock: Arc::new(SystemClock),
            limiter: RateLimiter::new(RateLimitPolicy::client()),
            ledger,
            rng: StdRng::from_os_rng(),
            k_factor: DEFAULT_K_FACTOR,
            entities: Vec::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_privileges(mut self, privileges: Box<dyn PrivilegePolicy>) -> Self {
        self.privileges = privileges;
        self
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.limiter = RateLimiter::new(policy);
        self
    }

    pub fn with_k_factor(mut self, k_factor: f64) -> Self {
        self.k_factor = k_factor;
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn voter_id(&self) -> &str {
        self.identity.voter_id()
    }

    pub fn queue(&self) -> &Arc<DurableVoteQueue> {
        &self.queue
    }

    /// The local founder cache, in the order the gateway returned it.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// Replace the local cache with the gateway's current snapshot.
    ///
    /// Last write wins: optimistic updates not yet applied remotely are
    /// overwritten, and reappear once the outbox flushes and the next
    /// refresh runs.
    pub async fn refresh(&mut self) -> Result<usize, GatewayError> {
        let entities = self.gateway.fetch_entities().await?;
        info!(count = entities.len(), "refreshed founders");
        self.entities = entities;
        Ok(self.entities.len())
    }

    /// Pick the next pair to show this voter.
    ///
    /// Pairs the voter already judged are skipped. Once every pair has been
    /// judged, any pair may be served again; voting on it is still denied
    /// until the ledger entry expires.
    pub fn get_pair(&mut self) -> Result<(Entity, Entity), PairingError> {
        let now = self.clock.now_ms();
        self.prune(now);

        let judged = self.ledger.judged_pairs(self.identity.voter_id());
        let pair = match select_pair(&self.entities, &judged, &mut self.rng) {
            Err(PairingError::NoUnjudgedPairsRemaining) => {
                debug!(voter = self.identity.voter_id(), "every pair judged, allowing repeats");
                select_pair(&self.entities, &Default::default(), &mut self.rng)
            }
            other => other,
        };
        pair.map(|(a, b)| (a.clone(), b.clone()))
    }

    /// Submit "`winner` is hotter than `loser`".
    ///
    /// Invalid input is an `Err`; a rate-limit denial is an `Ok` outcome with
    /// `accepted == false`. An accepted vote is applied to the local cache
    /// and queued; delivery happens on the next flush.
    pub fn submit_vote(&mut self, winner_id: &str, loser_id: &str) -> Result<SubmitOutcome, ValidationError> {
        if winner_id == loser_id {
            return Err(ValidationError::SameEntity(winner_id.to_string()));
        }
        let winner_idx = self.position(winner_id)?;
        let loser_idx = self.position(loser_id)?;

        let now = self.clock.now_ms();
        self.prune(now);

        let voter = self.identity.voter_id().to_string();
        let decision = self.limiter.evaluate(&self.ledger, &voter, winner_id, loser_id, now);
        if let Some(denial) = self.limiter.explain(decision) {
            debug!(voter = %voter, reason = ?denial.reason, "vote denied");
            return Ok(SubmitOutcome {
                accepted: false,
                reason: Some(denial.reason),
                message: Some(denial.to_string()),
                retry_after_ms: denial.retry_after_ms,
                new_winner_rating: None,
                new_loser_rating: None,
                mutation_id: None,
            });
        }
        debug_assert_eq!(decision, Decision::Allowed);

        let winner_before = self.entities[winner_idx].rating;
        let loser_before = self.entities[loser_idx].rating;
        let update = compute_update(winner_before as f64, loser_before as f64, self.k_factor)?;

        self.ledger.record_judged(&voter, winner_id, loser_id, now);
        self.ledger.mark_voted(&voter, now);
        self.persist_ledger(&voter);

        for (idx, rating) in [(winner_idx, update.new_winner_rating), (loser_idx, update.new_loser_rating)] {
            let entity = &mut self.entities[idx];
            entity.rating = rating;
            entity.compare_count += 1;
        }

        let mutation_id = self.next_mutation_id(now);
        let tx = VoteTransaction {
            mutation_id: mutation_id.clone(),
            winner_id: winner_id.to_string(),
            loser_id: loser_id.to_string(),
            new_winner_rating: update.new_winner_rating,
            new_loser_rating: update.new_loser_rating,
            record: VoteRecord {
                winner_id: winner_id.to_string(),
                loser_id: loser_id.to_string(),
                voter_fingerprint: voter.clone(),
                client_timestamp: now,
                winner_rating_before: winner_before,
                loser_rating_before: loser_before,
                winner_rating_after: update.new_winner_rating,
                loser_rating_after: update.new_loser_rating,
            },
        };
        self.queue.enqueue(QueuedMutation::new(tx, now));

        info!(
            voter = %voter,
            winner = winner_id,
            loser = loser_id,
            winner_rating = update.new_winner_rating,
            loser_rating = update.new_loser_rating,
            "vote accepted"
        );
        Ok(SubmitOutcome {
            accepted: true,
            reason: None,
            message: None,
            retry_after_ms: None,
            new_winner_rating: Some(update.new_winner_rating),
            new_loser_rating: Some(update.new_loser_rating),
            mutation_id: Some(mutation_id),
        })
    }

    /// Counters for this voter. Records past the retention window are pruned first.
    pub fn voting_stats(&mut self) -> VotingStats {
        let now = self.clock.now_ms();
        self.prune(now);
        let voter = self.identity.voter_id();
        let policy = self.limiter.policy();
        let votes_last_hour = self.ledger.count_since(voter, now.saturating_sub(HOUR_MS));
        let votes_last_day = self.ledger.count_since(voter, now.saturating_sub(DAY_MS));
        let cooldown_remaining_ms = self
            .ledger
            .last_vote_at(voter)
            .map_or(0, |last| policy.cooldown_ms.saturating_sub(now.saturating_sub(last)));

        VotingStats {
            voter_id: voter.to_string(),
            is_authenticated: self.identity.is_authenticated(),
            is_privileged: self.privileges.is_privileged(voter),
            votes_last_hour,
            votes_last_day,
            remaining_this_hour: policy.max_per_hour.saturating_sub(votes_last_hour),
            remaining_today: policy.max_per_day.saturating_sub(votes_last_day),
            unique_pairs: self.ledger.unique_pairs(voter),
            total_pairs: total_pairs(&self.entities),
            cooldown_remaining_ms,
        }
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats(self.clock.now_ms())
    }

    /// Votes the remote store has recorded for this voter over the last day,
    /// if the gateway can tell.
    pub async fn remote_votes_today(&self) -> Result<Option<u64>, GatewayError> {
        let since = self.clock.now_ms().saturating_sub(DAY_MS);
        self.gateway.count_votes_for_voter(self.identity.voter_id(), since).await
    }

    /// Founders by rating, highest first; ties by name.
    pub fn rankings(&self) -> Vec<Entity> {
        let mut ranked = self.entities.clone();
        ranked.sort_by(|a, b| b.rating.cmp(&a.rating).then_with(|| a.name.cmp(&b.name)));
        ranked
    }

    pub async fn flush(&self) -> FlushReport {
        self.queue.flush().await
    }

    pub async fn on_lifecycle(&self, event: LifecycleEvent) -> FlushReport {
        self.queue.on_lifecycle(event).await
    }

    fn position(&self, id: &str) -> Result<usize, ValidationError> {
        self.entities
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| ValidationError::UnknownEntity(id.to_string()))
    }

    fn prune(&mut self, now: Timestamp) {
        let voter = self.identity.voter_id().to_string();
        if self.ledger.prune_older_than(&voter, now.saturating_sub(LEDGER_RETENTION_MS)) > 0 {
            self.persist_ledger(&voter);
        }
    }

    fn persist_ledger(&self, voter: &str) {
        if let Err(e) = self.ledger.save(self.store.as_ref(), voter) {
            error!(voter, error = %e, "failed to persist vote ledger");
        }
    }

    fn next_mutation_id(&mut self, now: Timestamp) -> String {
        let suffix: u32 = self.rng.random();
        format!("vote_{now}_{suffix:08x}")
    }
}
