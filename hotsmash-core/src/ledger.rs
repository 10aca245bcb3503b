/// Per-voter record of judged pairs and vote times.
///
/// Backs duplicate-pair suppression and the hourly/daily caps. Every judged
/// pair has exactly one record; pruning a record forgets its pair, so after
/// the retention window a voter may be served that pair again.
use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::{LocalStore, load_json, save_json};
use crate::types::{PairKey, Timestamp, VoterId};

pub const HISTORY_KEY_PREFIX: &str = "hotsmash_vote_history";
pub const LAST_VOTE_KEY_PREFIX: &str = "hotsmash_last_vote";

/// One judged pair, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerRecord {
    pub timestamp: Timestamp,
    pub pair_key: PairKey,
}

#[derive(Debug, Default, Clone)]
struct VoterLedgerEntry {
    /// Sorted by timestamp ascending.
    records: VecDeque<LedgerRecord>,
    judged: HashSet<PairKey>,
    last_vote_at: Option<Timestamp>,
}

impl VoterLedgerEntry {
    fn from_records(mut records: Vec<LedgerRecord>, last_vote_at: Option<Timestamp>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        let mut entry = VoterLedgerEntry { last_vote_at, ..Default::default() };
        for record in records {
            if entry.judged.insert(record.pair_key.clone()) {
                entry.records.push_back(record);
            }
        }
        entry
    }

    /// Index of the first record strictly newer than `since`.
    fn first_after(&self, since: Timestamp) -> usize {
        self.records.partition_point(|r| r.timestamp <= since)
    }
}

#[derive(Debug, Default, Clone)]
pub struct VoteLedger {
    voters: HashMap<VoterId, VoterLedgerEntry>,
}

impl VoteLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `voter` already judged the pair, in either orientation.
    pub fn has_judged(&self, voter: &str, a: &str, b: &str) -> bool {
        self.voters
            .get(voter)
            .is_some_and(|entry| entry.judged.contains(&PairKey::new(a, b)))
    }

    /// Record that `voter` judged the pair at `timestamp`.
    ///
    /// Idempotent: an already-judged pair is left untouched.
    pub fn record_judged(&mut self, voter: &str, a: &str, b: &str, timestamp: Timestamp) {
        let key = PairKey::new(a, b);
        let entry = self.voters.entry(voter.to_string()).or_default();
        if entry.judged.contains(&key) {
            return;
        }
        entry.judged.insert(key.clone());
        let at = entry.records.partition_point(|r| r.timestamp <= timestamp);
        entry.records.insert(at, LedgerRecord { timestamp, pair_key: key });
    }

    /// Number of votes with a timestamp strictly after `since`.
    pub fn count_since(&self, voter: &str, since: Timestamp) -> usize {
        self.voters
            .get(voter)
            .map_or(0, |entry| entry.records.len() - entry.first_after(since))
    }

    /// Oldest vote strictly after `since`, if any.
    pub fn oldest_since(&self, voter: &str, since: Timestamp) -> Option<Timestamp> {
        let entry = self.voters.get(voter)?;
        entry.records.get(entry.first_after(since)).map(|r| r.timestamp)
    }

    /// Drop every record at or before `cutoff`. Returns how many were dropped.
    pub fn prune_older_than(&mut self, voter: &str, cutoff: Timestamp) -> usize {
        let Some(entry) = self.voters.get_mut(voter) else {
            return 0;
        };
        let mut pruned = 0;
        while entry.records.front().is_some_and(|r| r.timestamp <= cutoff) {
            if let Some(record) = entry.records.pop_front() {
                entry.judged.remove(&record.pair_key);
                pruned += 1;
            }
        }
        if pruned > 0 {
            debug!(voter, pruned, cutoff, "pruned expired ledger records");
        }
        pruned
    }

    pub fn last_vote_at(&self, voter: &str) -> Option<Timestamp> {
        self.voters.get(voter).and_then(|entry| entry.last_vote_at)
    }

    pub fn mark_voted(&mut self, voter: &str, at: Timestamp) {
        let entry = self.voters.entry(voter.to_string()).or_default();
        entry.last_vote_at = Some(entry.last_vote_at.map_or(at, |prev| prev.max(at)));
    }

    pub fn unique_pairs(&self, voter: &str) -> usize {
        self.voters.get(voter).map_or(0, |entry| entry.judged.len())
    }

    pub fn judged_pairs(&self, voter: &str) -> HashSet<PairKey> {
        self.voters.get(voter).map(|entry| entry.judged.clone()).unwrap_or_default()
    }

    /// Forget everything about `voter`.
    pub fn reset(&mut self, voter: &str) {
        self.voters.remove(voter);
    }

    /// Persist `voter`'s history and last-vote time.
    pub fn save(&self, store: &dyn LocalStore, voter: &str) -> Result<(), StoreError> {
        let (records, last_vote_at) = match self.voters.get(voter) {
            Some(entry) => (entry.records.iter().cloned().collect::<Vec<_>>(), entry.last_vote_at),
            None => (Vec::new(), None),
        };
        save_json(store, &history_key(voter), &records)?;
        match last_vote_at {
            Some(at) => store.set(&last_vote_key(voter), &at.to_string()),
            None => store.remove(&last_vote_key(voter)),
        }
    }

    /// Load `voter`'s persisted state, replacing whatever is in memory.
    ///
    /// Corrupt blobs are logged and treated as empty; only store I/O errors
    /// are returned.
    pub fn load(&mut self, store: &dyn LocalStore, voter: &str) -> Result<(), StoreError> {
        let records = match load_json::<Vec<LedgerRecord>>(store, &history_key(voter)) {
            Ok(records) => records.unwrap_or_default(),
            Err(StoreError::Encode(e)) => {
                warn!(voter, error = %e, "discarding unreadable vote history");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let last_vote_at = match store.get(&last_vote_key(voter))? {
            Some(raw) => match raw.trim().parse::<Timestamp>() {
                Ok(at) => Some(at),
                Err(e) => {
                    warn!(voter, error = %e, "discarding unreadable last-vote time");
                    None
                }
            },
            None => None,
        };

        self.voters
            .insert(voter.to_string(), VoterLedgerEntry::from_records(records, last_vote_at));
        Ok(())
    }
}

fn history_key(voter: &str) -> String {
    format!("{HISTORY_KEY_PREFIX}:{voter}")
}

fn last_vote_key(voter: &str) -> String {
    format!("{LAST_VOTE_KEY_PREFIX}:{voter}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_has_judged_is_symmetric() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", 10);
        assert!(ledger.has_judged("v", "a", "b"));
        assert!(ledger.has_judged("v", "b", "a"));
        assert!(!ledger.has_judged("v", "a", "c"));
        assert!(!ledger.has_judged("other", "a", "b"));
    }

    #[test]
    fn test_record_judged_is_idempotent() {
        let mut once = VoteLedger::new();
        once.record_judged("v", "a", "b", 10);

        let mut twice = VoteLedger::new();
        twice.record_judged("v", "a", "b", 10);
        twice.record_judged("v", "a", "b", 10);
        twice.record_judged("v", "b", "a", 20);

        assert_eq!(twice.count_since("v", 0), once.count_since("v", 0));
        assert_eq!(twice.unique_pairs("v"), 1);
        assert_eq!(twice.judged_pairs("v"), once.judged_pairs("v"));
        assert_eq!(twice.oldest_since("v", 0), Some(10));
    }

    #[test]
    fn test_count_since_is_strict() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", 100);
        ledger.record_judged("v", "a", "c", 200);
        ledger.record_judged("v", "b", "c", 300);

        assert_eq!(ledger.count_since("v", 0), 3);
        assert_eq!(ledger.count_since("v", 100), 2);
        assert_eq!(ledger.count_since("v", 299), 1);
        assert_eq!(ledger.count_since("v", 300), 0);
        assert_eq!(ledger.count_since("nobody", 0), 0);
    }

    #[test]
    fn test_out_of_order_records_stay_sorted() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", 300);
        ledger.record_judged("v", "a", "c", 100);
        ledger.record_judged("v", "b", "c", 200);
        assert_eq!(ledger.oldest_since("v", 0), Some(100));
        assert_eq!(ledger.oldest_since("v", 150), Some(200));
        assert_eq!(ledger.count_since("v", 150), 2);
    }

    #[test]
    fn test_prune_forgets_pairs() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", 100);
        ledger.record_judged("v", "a", "c", 200);

        assert_eq!(ledger.prune_older_than("v", 100), 1);
        assert!(!ledger.has_judged("v", "a", "b"));
        assert!(ledger.has_judged("v", "a", "c"));
        assert_eq!(ledger.count_since("v", 0), 1);
        assert_eq!(ledger.prune_older_than("nobody", 1_000), 0);
    }

    #[test]
    fn test_mark_voted_never_moves_backwards() {
        let mut ledger = VoteLedger::new();
        assert_eq!(ledger.last_vote_at("v"), None);
        ledger.mark_voted("v", 500);
        ledger.mark_voted("v", 400);
        assert_eq!(ledger.last_vote_at("v"), Some(500));
    }

    #[test]
    fn test_reset() {
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "a", "b", 1);
        ledger.mark_voted("v", 1);
        ledger.reset("v");
        assert!(!ledger.has_judged("v", "a", "b"));
        assert_eq!(ledger.last_vote_at("v"), None);
    }

    #[test]
    fn test_save_and_load() {
        let store = MemoryStore::new();
        let mut ledger = VoteLedger::new();
        ledger.record_judged("v", "b", "a", 100);
        ledger.record_judged("v", "c", "a", 200);
        ledger.mark_voted("v", 200);
        ledger.save(&store, "v").unwrap();

        let raw = store.get("hotsmash_vote_history:v").unwrap().unwrap();
        assert_eq!(
            raw,
            r#"[{"timestamp":100,"pairKey":["a","b"]},{"timestamp":200,"pairKey":["a","c"]}]"#
        );
        assert_eq!(store.get("hotsmash_last_vote:v").unwrap().as_deref(), Some("200"));

        let mut restored = VoteLedger::new();
        restored.load(&store, "v").unwrap();
        assert!(restored.has_judged("v", "a", "b"));
        assert!(restored.has_judged("v", "a", "c"));
        assert_eq!(restored.last_vote_at("v"), Some(200));
        assert_eq!(restored.count_since("v", 0), 2);
    }

    #[test]
    fn test_load_tolerates_corrupt_blobs() {
        let store = MemoryStore::new();
        store.set("hotsmash_vote_history:v", "not json").unwrap();
        store.set("hotsmash_last_vote:v", "yesterday").unwrap();

        let mut ledger = VoteLedger::new();
        ledger.load(&store, "v").unwrap();
        assert_eq!(ledger.count_since("v", 0), 0);
        assert_eq!(ledger.last_vote_at("v"), None);
    }

    #[test]
    fn test_load_dedupes_repeated_pairs() {
        let store = MemoryStore::new();
        store
            .set(
                "hotsmash_vote_history:v",
                r#"[{"timestamp":300,"pairKey":["b","a"]},{"timestamp":100,"pairKey":["a","b"]}]"#,
            )
            .unwrap();
        let mut ledger = VoteLedger::new();
        ledger.load(&store, "v").unwrap();
        assert_eq!(ledger.count_since("v", 0), 1);
        assert_eq!(ledger.oldest_since("v", 0), Some(100));
    }
}
