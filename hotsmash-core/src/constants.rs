/// Rating every founder starts with before their first comparison.
pub const INITIAL_RATING: i64 = 1200;

/// Default Elo K-factor. Each vote moves the two ratings by at most this much.
pub const DEFAULT_K_FACTOR: f64 = 32.0;

/// Rating gap at which the favourite is expected to win 10:1.
pub const ELO_SCALE: f64 = 400.0;

pub const HOUR_MS: u64 = 60 * 60 * 1000;
pub const DAY_MS: u64 = 24 * HOUR_MS;

/// Minimum spacing between two votes from the same voter.
pub const DEFAULT_COOLDOWN_MS: u64 = 2_000;

/// Client-side caps. The server-side policy has its own, lower hourly cap
/// (see `SERVER_MAX_VOTES_PER_HOUR`); the two are configured independently.
pub const DEFAULT_MAX_VOTES_PER_HOUR: usize = 60;
pub const DEFAULT_MAX_VOTES_PER_DAY: usize = 200;

pub const SERVER_MAX_VOTES_PER_HOUR: usize = 50;
pub const SERVER_MAX_VOTES_PER_DAY: usize = 200;

/// How long judged pairs and vote timestamps are kept in the ledger.
pub const LEDGER_RETENTION_MS: u64 = DAY_MS;

/// Outbox capacity. On overflow the oldest queued votes are dropped first.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Attempts per queued vote before it is dropped for good.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Period of the background outbox flush.
pub const DEFAULT_SYNC_INTERVAL_MS: u64 = 30_000;

/// Upper bound on a single remote apply. A timeout counts as a failed attempt.
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 3_000;

/// Rejection-sampling budget in `select_pair` before falling back to
/// enumerating the remaining unjudged pairs.
///
/// With a sparse exclusion set nearly every draw is accepted, so 64 draws
/// almost never run out. When a voter has judged most pairs the acceptance
/// rate collapses and enumeration (O(N^2) but only over N founders) is the
/// cheaper path.
pub const PAIR_SAMPLE_ATTEMPTS: usize = 64;
