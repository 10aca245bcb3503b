/// Who is voting, and who is privileged.
///
/// Rate limits and pair dedup are keyed by whatever id the provider hands
/// out: an account id when signed in, otherwise a device fingerprint that
/// persists in the local store.
use std::collections::HashSet;

use rand::Rng;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::StoreError;
use crate::store::LocalStore;
use crate::types::VoterId;

pub const FINGERPRINT_KEY: &str = "hotsmash_browser_id";

/// Hex characters kept from the fingerprint digest.
const FINGERPRINT_LEN: usize = 32;

pub trait VoterIdentityProvider: Send + Sync {
    fn voter_id(&self) -> &str;

    fn is_authenticated(&self) -> bool;
}

/// A signed-in account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    uid: VoterId,
}

impl AuthenticatedIdentity {
    pub fn new(uid: impl Into<VoterId>) -> Self {
        AuthenticatedIdentity { uid: uid.into() }
    }
}

impl VoterIdentityProvider for AuthenticatedIdentity {
    fn voter_id(&self) -> &str {
        &self.uid
    }

    fn is_authenticated(&self) -> bool {
        true
    }
}

/// Observable traits of the device the anonymous voter is using.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceTraits {
    pub user_agent: String,
    pub language: String,
    pub screen: String,
    pub timezone_offset_min: i32,
}

impl DeviceTraits {
    /// Traits for a terminal client: OS/arch, user and locale.
    pub fn from_env() -> Self {
        DeviceTraits {
            user_agent: format!(
                "hotsmash/{} ({}; {}; {})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH,
                std::env::var("USER").unwrap_or_default()
            ),
            language: std::env::var("LANG").unwrap_or_default(),
            screen: std::env::var("COLUMNS").unwrap_or_default(),
            timezone_offset_min: 0,
        }
    }
}

/// Anonymous voter identified by a device fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprintIdentity {
    fingerprint: VoterId,
}

impl DeviceFingerprintIdentity {
    /// Reuse the fingerprint saved in `store`, or derive and save a new one.
    ///
    /// A random salt is mixed in, so two identical devices still get distinct
    /// ids; the saved value is what keeps the id stable across sessions.
    pub fn load_or_create<R: Rng + ?Sized>(
        store: &dyn LocalStore,
        traits: &DeviceTraits,
        rng: &mut R,
    ) -> Result<Self, StoreError> {
        if let Some(existing) = store.get(FINGERPRINT_KEY)? {
            let existing = existing.trim();
            if !existing.is_empty() {
                return Ok(DeviceFingerprintIdentity { fingerprint: existing.to_string() });
            }
        }

        let salt: u64 = rng.random();
        let fingerprint = derive_fingerprint(traits, salt);
        store.set(FINGERPRINT_KEY, &fingerprint)?;
        info!(fingerprint = %fingerprint, "created device fingerprint");
        Ok(DeviceFingerprintIdentity { fingerprint })
    }
}

impl VoterIdentityProvider for DeviceFingerprintIdentity {
    fn voter_id(&self) -> &str {
        &self.fingerprint
    }

    fn is_authenticated(&self) -> bool {
        false
    }
}

fn derive_fingerprint(traits: &DeviceTraits, salt: u64) -> String {
    let material = format!(
        "{}|{}|{}|{}|{salt:016x}",
        traits.user_agent, traits.language, traits.screen, traits.timezone_offset_min
    );
    let digest = Sha256::digest(material.as_bytes());
    let mut encoded = hex::encode(digest);
    encoded.truncate(FINGERPRINT_LEN);
    encoded
}

/// Decides which identities get privileged treatment (moderation views,
/// stats flags). Injected at startup rather than compiled in.
pub trait PrivilegePolicy: Send + Sync {
    fn is_privileged(&self, id: &str) -> bool;
}

/// Nobody is privileged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrivileges;

impl PrivilegePolicy for NoPrivileges {
    fn is_privileged(&self, _id: &str) -> bool {
        false
    }
}

/// Privileged iff the id is on a configured list.
#[derive(Debug, Default, Clone)]
pub struct AllowlistPolicy {
    ids: HashSet<String>,
}

impl AllowlistPolicy {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AllowlistPolicy { ids: ids.into_iter().map(Into::into).collect() }
    }
}

impl PrivilegePolicy for AllowlistPolicy {
    fn is_privileged(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn traits() -> DeviceTraits {
        DeviceTraits {
            user_agent: "Mozilla/5.0".into(),
            language: "en-US".into(),
            screen: "1920x1080".into(),
            timezone_offset_min: -60,
        }
    }

    #[test]
    fn test_fingerprint_is_persisted_and_reused() {
        let store = MemoryStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let first = DeviceFingerprintIdentity::load_or_create(&store, &traits(), &mut rng).unwrap();
        assert_eq!(first.voter_id().len(), 32);
        assert!(!first.is_authenticated());

        let mut other_rng = StdRng::seed_from_u64(2);
        let second = DeviceFingerprintIdentity::load_or_create(&store, &traits(), &mut other_rng).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_salt_separates_identical_devices() {
        assert_ne!(derive_fingerprint(&traits(), 1), derive_fingerprint(&traits(), 2));
        assert_eq!(derive_fingerprint(&traits(), 1), derive_fingerprint(&traits(), 1));
    }

    #[test]
    fn test_blank_stored_fingerprint_is_replaced() {
        let store = MemoryStore::new();
        store.set(FINGERPRINT_KEY, "  ").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let id = DeviceFingerprintIdentity::load_or_create(&store, &traits(), &mut rng).unwrap();
        assert_eq!(store.get(FINGERPRINT_KEY).unwrap().as_deref(), Some(id.voter_id()));
    }

    #[test]
    fn test_authenticated_identity() {
        let id = AuthenticatedIdentity::new("uid-123");
        assert_eq!(id.voter_id(), "uid-123");
        assert!(id.is_authenticated());
    }

    #[test]
    fn test_allowlist_policy() {
        let policy = AllowlistPolicy::new(["admin-1", "admin-2"]);
        assert!(policy.is_privileged("admin-1"));
        assert!(!policy.is_privileged("someone"));
        assert!(!NoPrivileges.is_privileged("admin-1"));
    }
}
