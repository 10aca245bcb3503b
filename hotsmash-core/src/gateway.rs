/// Boundary to the remote store that owns canonical ratings and the vote log.
///
/// Implementations must apply a vote transaction atomically: both rating
/// updates, the vote append and the global counter succeed or fail together,
/// and stay serializable under any number of concurrent callers.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::constants::{DAY_MS, HOUR_MS};
use crate::error::GatewayError;
use crate::limiter::RateLimitPolicy;
use crate::types::{Entity, EntityId, Timestamp, VoteId, VoteRecord};

/// Everything the remote needs to apply one vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteTransaction {
    /// Client-generated id, used by the remote as an idempotency key.
    pub mutation_id: String,
    pub winner_id: EntityId,
    pub loser_id: EntityId,
    pub new_winner_rating: i64,
    pub new_loser_rating: i64,
    pub record: VoteRecord,
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn fetch_entities(&self) -> Result<Vec<Entity>, GatewayError>;

    /// Apply both rating updates and append the vote record as one atomic
    /// operation.
    async fn apply_vote_transaction(&self, tx: &VoteTransaction) -> Result<VoteId, GatewayError>;

    /// Votes by `voter` strictly after `since`, if the remote can count them.
    async fn count_votes_for_voter(&self, voter: &str, since: Timestamp) -> Result<Option<u64>, GatewayError> {
        let _ = (voter, since);
        Ok(None)
    }
}

/// A vote as stored by [`InMemoryGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVote {
    pub id: VoteId,
    pub applied_at: Timestamp,
    pub record: VoteRecord,
}

#[derive(Debug, Default)]
struct GatewayState {
    /// Insertion order, so `fetch_entities` is stable.
    order: Vec<EntityId>,
    entities: HashMap<EntityId, Entity>,
    votes: Vec<StoredVote>,
    applied: HashMap<String, VoteId>,
    total_votes: u64,
}

/// Remote store held in memory.
///
/// Serializes every transaction behind one mutex. Comes with failure
/// injection (outage switch, fail-next counter, random failure rate, added
/// latency) for simulations and tests.
pub struct InMemoryGateway {
    state: Mutex<GatewayState>,
    server_policy: Option<RateLimitPolicy>,
    clock: Arc<dyn Clock>,
    outage: AtomicBool,
    fail_next: AtomicU32,
    failure_rate: Mutex<Option<(f64, StdRng)>>,
    latency: Mutex<Option<Duration>>,
}

impl InMemoryGateway {
    pub fn new(entities: Vec<Entity>) -> Self {
        let mut state = GatewayState::default();
        for entity in entities {
            if !state.entities.contains_key(&entity.id) {
                state.order.push(entity.id.clone());
            }
            state.entities.insert(entity.id.clone(), entity);
        }
        InMemoryGateway {
            state: Mutex::new(state),
            server_policy: None,
            clock: Arc::new(SystemClock),
            outage: AtomicBool::new(false),
            fail_next: AtomicU32::new(0),
            failure_rate: Mutex::new(None),
            latency: Mutex::new(None),
        }
    }

    /// Enforce per-voter hourly/daily caps on the server side.
    pub fn with_server_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.server_policy = Some(policy);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// While set, every call fails with `Unavailable`.
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` transactions with `Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Fail each transaction with probability `rate`.
    pub fn set_failure_rate(&self, rate: f64, seed: u64) {
        let mut slot = self.failure_rate.lock().unwrap_or_else(PoisonError::into_inner);
        *slot = (rate > 0.0).then(|| (rate.min(1.0), StdRng::seed_from_u64(seed)));
    }

    /// Delay every transaction by `latency` before it is applied.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn entity(&self, id: &str) -> Option<Entity> {
        self.lock_state().entities.get(id).cloned()
    }

    pub fn votes(&self) -> Vec<StoredVote> {
        self.lock_state().votes.clone()
    }

    pub fn total_votes(&self) -> u64 {
        self.lock_state().total_votes
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, GatewayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected_failure(&self) -> Option<GatewayError> {
        if self.outage.load(Ordering::SeqCst) {
            return Some(GatewayError::Unavailable("backend outage".into()));
        }
        let consumed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Some(GatewayError::Unavailable("injected failure".into()));
        }
        let mut slot = self.failure_rate.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((rate, rng)) = slot.as_mut() {
            if rng.random::<f64>() < *rate {
                return Some(GatewayError::Unavailable("random failure".into()));
            }
        }
        None
    }

    fn check_server_policy(&self, state: &GatewayState, voter: &str, now: Timestamp) -> Result<(), GatewayError> {
        let Some(policy) = self.server_policy else {
            return Ok(());
        };
        let hour_start = now.saturating_sub(HOUR_MS);
        let day_start = now.saturating_sub(DAY_MS);
        let mine = state.votes.iter().filter(|v| v.record.voter_fingerprint == voter);
        let (mut hourly, mut daily) = (0usize, 0usize);
        for vote in mine {
            if vote.applied_at > day_start {
                daily += 1;
                if vote.applied_at > hour_start {
                    hourly += 1;
                }
            }
        }
        if hourly >= policy.max_per_hour {
            return Err(GatewayError::Rejected("hourly vote limit exceeded".into()));
        }
        if daily >= policy.max_per_day {
            return Err(GatewayError::Rejected("daily vote limit exceeded".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn fetch_entities(&self) -> Result<Vec<Entity>, GatewayError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(GatewayError::Unavailable("backend outage".into()));
        }
        let state = self.lock_state();
        Ok(state.order.iter().filter_map(|id| state.entities.get(id).cloned()).collect())
    }

    async fn apply_vote_transaction(&self, tx: &VoteTransaction) -> Result<VoteId, GatewayError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.injected_failure() {
            return Err(err);
        }

        let now = self.clock.now_ms();
        let mut state = self.lock_state();

        if let Some(existing) = state.applied.get(&tx.mutation_id) {
            return Err(GatewayError::Conflict(format!(
                "mutation {} already applied as {existing}",
                tx.mutation_id
            )));
        }
        if tx.winner_id == tx.loser_id {
            return Err(GatewayError::Rejected("winner and loser must differ".into()));
        }
        for id in [&tx.winner_id, &tx.loser_id] {
            if !state.entities.contains_key(id) {
                return Err(GatewayError::NotFound(format!("founder {id}")));
            }
        }
        self.check_server_policy(&state, &tx.record.voter_fingerprint, now)?;

        // All checks passed: nothing below can fail.
        for (id, rating) in [(&tx.winner_id, tx.new_winner_rating), (&tx.loser_id, tx.new_loser_rating)] {
            if let Some(entity) = state.entities.get_mut(id) {
                entity.rating = rating;
                entity.compare_count += 1;
            }
        }
        state.total_votes += 1;
        let vote_id = format!("vote-{}", state.total_votes);
        state.votes.push(StoredVote { id: vote_id.clone(), applied_at: now, record: tx.record.clone() });
        state.applied.insert(tx.mutation_id.clone(), vote_id.clone());

        debug!(mutation_id = %tx.mutation_id, vote_id = %vote_id, "applied vote transaction");
        Ok(vote_id)
    }

    async fn count_votes_for_voter(&self, voter: &str, since: Timestamp) -> Result<Option<u64>, GatewayError> {
        let state = self.lock_state();
        let count = state
            .votes
            .iter()
            .filter(|v| v.record.voter_fingerprint == voter && v.applied_at > since)
            .count();
        Ok(Some(count as u64))
    }
}
