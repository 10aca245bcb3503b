/// hotsmash-core: head-to-head founder voting with Elo ratings.
///
/// Pair selection → rate-limited vote → Elo update → durable outbox → remote
/// store. No HTTP here: the remote store sits behind the
/// [`PersistenceGateway`] trait and device-local state behind [`LocalStore`].
///
/// Founders are identified by opaque string ids handed out by the remote
/// store. Times are Unix epoch milliseconds.
///
/// # Quick start
///
/// ```rust
/// use std::sync::Arc;
/// use hotsmash_core::{
///     AuthenticatedIdentity, DurableVoteQueue, Entity, InMemoryGateway, MemoryStore,
///     QueueConfig, VotingSession,
/// };
///
/// # tokio_test_main();
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn tokio_test_main() {
/// let gateway = Arc::new(InMemoryGateway::new(vec![
///     Entity::new("f1", "Ada"),
///     Entity::new("f2", "Bob"),
/// ]));
/// let store = Arc::new(MemoryStore::new());
/// let queue = Arc::new(DurableVoteQueue::new(QueueConfig::default(), gateway.clone(), store.clone()).unwrap());
///
/// let mut session = VotingSession::new(gateway, store, queue, Box::new(AuthenticatedIdentity::new("me"))).unwrap();
/// session.refresh().await.unwrap();
///
/// let (left, right) = session.get_pair().unwrap();
/// let outcome = session.submit_vote(&left.id, &right.id).unwrap();
/// assert!(outcome.accepted);
///
/// let report = session.flush().await;
/// assert_eq!(report.succeeded, 1);
/// # }
/// ```

pub mod clock;
pub mod constants;
pub mod elo;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod ledger;
pub mod limiter;
pub mod pairing;
pub mod queue;
pub mod session;
pub mod store;
pub mod types;

// Re-export primary public API at crate root.
pub use clock::{Clock, ManualClock, SystemClock};
pub use elo::{compute_default_update, compute_update, expected_score, RatingUpdate};
pub use error::{GatewayError, PairingError, RatingError, StoreError, ValidationError};
pub use gateway::{InMemoryGateway, PersistenceGateway, StoredVote, VoteTransaction};
pub use identity::{
    AllowlistPolicy, AuthenticatedIdentity, DeviceFingerprintIdentity, DeviceTraits, NoPrivileges,
    PrivilegePolicy, VoterIdentityProvider,
};
pub use ledger::VoteLedger;
pub use limiter::{Decision, Denial, DenialReason, RateLimitPolicy, RateLimiter};
pub use pairing::{select_pair, total_pairs};
pub use queue::{
    DurableVoteQueue, FlushReport, LifecycleEvent, QueueConfig, QueueStats, QueuedMutation, SyncHandle,
};
pub use session::{SubmitOutcome, VotingSession, VotingStats};
pub use store::{FileStore, LocalStore, MemoryStore};
pub use types::{Entity, EntityId, PairKey, Timestamp, VoteId, VoteRecord, VoterId};
