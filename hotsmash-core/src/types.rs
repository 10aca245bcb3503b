use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::INITIAL_RATING;

/// Opaque founder identifier, assigned by the remote store.
pub type EntityId = String;

/// Voter identity: an account id or a device fingerprint.
pub type VoterId = String;

/// Identifier the remote store assigns to an appended vote.
pub type VoteId = String;

/// Unix epoch milliseconds.
pub type Timestamp = u64;

/// A founder being ranked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default = "initial_rating")]
    pub rating: i64,
    /// Number of comparisons this founder has taken part in.
    #[serde(default, alias = "votes")]
    pub compare_count: u64,
}

fn initial_rating() -> i64 {
    INITIAL_RATING
}

impl Entity {
    /// A freshly provisioned founder: initial rating, no comparisons.
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>) -> Self {
        Entity {
            id: id.into(),
            name: name.into(),
            company: None,
            username: None,
            image: None,
            rating: INITIAL_RATING,
            compare_count: 0,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }
}

/// Order-independent key for an unordered pair of founder ids.
///
/// `PairKey::new(a, b) == PairKey::new(b, a)`. Stored as a two-element JSON
/// array so ids containing separator characters stay unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "(EntityId, EntityId)", into = "(EntityId, EntityId)")]
pub struct PairKey {
    low: EntityId,
    high: EntityId,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            PairKey { low: a.to_string(), high: b.to_string() }
        } else {
            PairKey { low: b.to_string(), high: a.to_string() }
        }
    }

    pub fn ids(&self) -> (&str, &str) {
        (&self.low, &self.high)
    }
}

impl From<(EntityId, EntityId)> for PairKey {
    fn from((a, b): (EntityId, EntityId)) -> Self {
        PairKey::new(&a, &b)
    }
}

impl From<PairKey> for (EntityId, EntityId) {
    fn from(key: PairKey) -> Self {
        (key.low, key.high)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.low, self.high)
    }
}

/// An immutable vote, as appended to the remote vote log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub winner_id: EntityId,
    pub loser_id: EntityId,
    pub voter_fingerprint: VoterId,
    pub client_timestamp: Timestamp,
    pub winner_rating_before: i64,
    pub loser_rating_before: i64,
    pub winner_rating_after: i64,
    pub loser_rating_after: i64,
}

impl VoteRecord {
    pub fn winner_delta(&self) -> i64 {
        self.winner_rating_after - self.winner_rating_before
    }

    pub fn loser_delta(&self) -> i64 {
        self.loser_rating_after - self.loser_rating_before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(PairKey::new("a", "b"), PairKey::new("b", "a"));
        assert_eq!(PairKey::new("b", "a").ids(), ("a", "b"));
        assert_ne!(PairKey::new("a", "b"), PairKey::new("a", "c"));
    }

    #[test]
    fn test_pair_key_json_is_unambiguous() {
        let key = PairKey::new("x-y", "z");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r#"["x-y","z"]"#);

        // Stored in reverse order still normalizes.
        let back: PairKey = serde_json::from_str(r#"["z","x-y"]"#).unwrap();
        assert_eq!(back, key);
        assert_ne!(back, PairKey::new("x", "y-z"));
    }

    #[test]
    fn test_entity_accepts_legacy_votes_field() {
        let json = r#"{"id":"f1","name":"Ada","company":"Analytical","rating":1250,"votes":7}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert_eq!(entity.compare_count, 7);
        assert_eq!(entity.rating, 1250);
        assert_eq!(entity.company.as_deref(), Some("Analytical"));
        assert!(entity.image.is_none());
    }

    #[test]
    fn test_entity_defaults_to_initial_rating() {
        let entity: Entity = serde_json::from_str(r#"{"id":"f2","name":"Grace"}"#).unwrap();
        assert_eq!(entity.rating, INITIAL_RATING);
        assert_eq!(entity.compare_count, 0);
    }

    #[test]
    fn test_vote_record_deltas() {
        let record = VoteRecord {
            winner_id: "a".into(),
            loser_id: "b".into(),
            voter_fingerprint: "v".into(),
            client_timestamp: 1,
            winner_rating_before: 1200,
            loser_rating_before: 1200,
            winner_rating_after: 1216,
            loser_rating_after: 1184,
        };
        assert_eq!(record.winner_delta(), 16);
        assert_eq!(record.loser_delta(), -16);
    }
}
