//! Identity handles.
//!
//! An [`Identity`] is a cheap-clone handle. Two handles are "the same identity"
//! only when they point at the same allocation ([`Identity::ptr_eq`]); the
//! session store and derived values rely on that to detect changes without
//! comparing delegation payloads.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Textual principal of the anonymous identity.
pub const ANONYMOUS_PRINCIPAL: &str = "2vxsx-fae";

const PRINCIPAL_ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz234567";
const PRINCIPAL_GROUP_LEN: usize = 5;

static ANONYMOUS: LazyLock<Identity> =
    LazyLock::new(|| Identity(Arc::new(IdentityKind::Anonymous)));

/// Current time in nanoseconds since the Unix epoch.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_nanos()).ok())
        .unwrap_or(u64::MAX)
}

/// Textual principal id, e.g. `2vxsx-fae`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    pub fn anonymous() -> Self {
        Self(ANONYMOUS_PRINCIPAL.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0 == ANONYMOUS_PRINCIPAL
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Principal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        if value.is_empty() {
            anyhow::bail!("Principal cannot be empty");
        }

        let groups: Vec<&str> = value.split('-').collect();
        let last = groups.len() - 1;
        for (idx, group) in groups.iter().enumerate() {
            let len_ok = if idx == last {
                (1..=PRINCIPAL_GROUP_LEN).contains(&group.len())
            } else {
                group.len() == PRINCIPAL_GROUP_LEN
            };
            if !len_ok || !group.chars().all(|c| PRINCIPAL_ALPHABET.contains(c)) {
                anyhow::bail!("Invalid principal '{value}'");
            }
        }

        Ok(Self(value.to_string()))
    }
}

impl TryFrom<String> for Principal {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

/// Identity issued by an identity provider for a session key.
#[derive(Clone, Serialize, Deserialize)]
pub struct DelegatedIdentity {
    pub principal: Principal,
    /// Opaque delegation payload, handed back to the provider's agent as-is.
    pub delegation: String,
    /// Expiry in nanoseconds since the Unix epoch.
    pub expiration: u64,
    /// Identity provider URL the delegation came from.
    pub provider: String,
}

impl DelegatedIdentity {
    pub fn is_expired_at(&self, now_nanos: u64) -> bool {
        now_nanos >= self.expiration
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_nanos())
    }

    /// Expiry as a wall-clock timestamp.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(i64::try_from(self.expiration).unwrap_or(i64::MAX))
    }
}

impl fmt::Debug for DelegatedIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelegatedIdentity")
            .field("principal", &self.principal)
            .field("delegation", &mask_delegation(&self.delegation))
            .field("expiration", &self.expiration)
            .field("provider", &self.provider)
            .finish()
    }
}

/// Returns a masked version of a delegation payload for display.
pub fn mask_delegation(delegation: &str) -> String {
    if delegation.len() <= 16 {
        return "***".to_string();
    }
    let prefix: String = delegation.chars().take(8).collect();
    format!("{prefix}...")
}

enum IdentityKind {
    Anonymous,
    Delegated(DelegatedIdentity),
}

/// Cheap-clone identity handle.
#[derive(Clone)]
pub struct Identity(Arc<IdentityKind>);

impl Identity {
    /// The process-wide anonymous identity. Every call returns the same handle.
    pub fn anonymous() -> Self {
        ANONYMOUS.clone()
    }

    /// Wraps a delegated identity in a fresh handle.
    pub fn delegated(identity: DelegatedIdentity) -> Self {
        Self(Arc::new(IdentityKind::Delegated(identity)))
    }

    /// Handle equality: true only for clones of the same handle.
    pub fn ptr_eq(a: &Identity, b: &Identity) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(*self.0, IdentityKind::Anonymous)
    }

    pub fn principal(&self) -> Principal {
        match &*self.0 {
            IdentityKind::Anonymous => Principal::anonymous(),
            IdentityKind::Delegated(d) => d.principal.clone(),
        }
    }

    pub fn delegation(&self) -> Option<&DelegatedIdentity> {
        match &*self.0 {
            IdentityKind::Anonymous => None,
            IdentityKind::Delegated(d) => Some(d),
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            IdentityKind::Anonymous => f.write_str("Identity::Anonymous"),
            IdentityKind::Delegated(d) => f.debug_tuple("Identity::Delegated").field(d).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delegated(principal: &str) -> DelegatedIdentity {
        DelegatedIdentity {
            principal: principal.parse().unwrap(),
            delegation: "c2Vzc2lvbi1kZWxlZ2F0aW9uLXBheWxvYWQ".to_string(),
            expiration: 1_000,
            provider: "https://identity.ic0.app".to_string(),
        }
    }

    #[test]
    fn test_anonymous_is_a_singleton() {
        let a = Identity::anonymous();
        let b = Identity::default();
        assert!(Identity::ptr_eq(&a, &b));
        assert!(a.is_anonymous());
        assert_eq!(a.principal().as_str(), ANONYMOUS_PRINCIPAL);
    }

    #[test]
    fn test_delegated_handles_compare_by_pointer() {
        let a = Identity::delegated(delegated("2vxsx-fae"));
        let b = Identity::delegated(delegated("2vxsx-fae"));
        assert!(!Identity::ptr_eq(&a, &b));
        assert!(Identity::ptr_eq(&a, &a.clone()));
        assert!(!a.is_anonymous());
    }

    #[test]
    fn test_principal_parse() {
        assert!("2vxsx-fae".parse::<Principal>().is_ok());
        assert!("rdmx6-jaaaa-aaaaa-aaadq-cai".parse::<Principal>().is_ok());
        assert!("".parse::<Principal>().is_err());
        assert!("ABCDE-fae".parse::<Principal>().is_err());
        assert!("2vxs-fae".parse::<Principal>().is_err());
        assert!("2vxsx-".parse::<Principal>().is_err());
    }

    #[test]
    fn test_expiry() {
        let d = delegated("2vxsx-fae");
        assert!(!d.is_expired_at(999));
        assert!(d.is_expired_at(1_000));
    }

    #[test]
    fn test_debug_masks_delegation() {
        let identity = Identity::delegated(delegated("2vxsx-fae"));
        let debug = format!("{identity:?}");
        assert!(debug.contains("c2Vzc2lv..."));
        assert!(!debug.contains("LXBheWxvYWQ"));
    }
}
