pub mod engine;
pub mod scheduler;
pub mod selector;
pub mod state;
pub mod throttle;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Contact kind as reported by the contact store.
/// Anything the store sends that is not recognised lands in `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactKind {
    Individual,
    Group,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ContactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContactKind::Individual => write!(f, "individual"),
            ContactKind::Group => write!(f, "group"),
            ContactKind::Unknown => write!(f, "unknown"),
        }
    }
}

/// Time-bounded credential entitling display of enriched profile data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileCredential {
    pub credential: String,
    /// Milliseconds since the Unix epoch.
    pub expires_at: u64,
}

impl ProfileCredential {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }
}

/// Snapshot of a contact. Timestamps are milliseconds since the Unix epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub kind: ContactKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e164: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_last_fetched_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_credential: Option<ProfileCredential>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Contact>,
}

impl Contact {
    pub fn individual(id: impl Into<String>) -> Self {
        Self::with_kind(id, ContactKind::Individual)
    }

    pub fn group(id: impl Into<String>, members: Vec<Contact>) -> Self {
        let mut contact = Self::with_kind(id, ContactKind::Group);
        contact.members = members;
        contact
    }

    pub fn with_kind(id: impl Into<String>, kind: ContactKind) -> Self {
        Self {
            id: id.into(),
            kind,
            e164: None,
            last_activity_at: None,
            profile_last_fetched_at: None,
            profile_credential: None,
            members: Vec::new(),
        }
    }

    pub fn has_expired_credential(&self, now_ms: u64) -> bool {
        self.profile_credential
            .as_ref()
            .is_some_and(|c| c.is_expired(now_ms))
    }

    pub fn is_active_within(&self, window_ms: u64, now_ms: u64) -> bool {
        within(self.last_activity_at, window_ms, now_ms)
    }

    pub fn was_fetched_within(&self, window_ms: u64, now_ms: u64) -> bool {
        within(self.profile_last_fetched_at, window_ms, now_ms)
    }
}

fn within(timestamp: Option<u64>, window_ms: u64, now_ms: u64) -> bool {
    match timestamp {
        Some(ts) => now_ms.saturating_sub(ts) < window_ms,
        None => false,
    }
}

/// A contact chosen for refresh in the current pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub id: String,
    pub e164: Option<String>,
    /// Set when selection cleared an expired credential on this contact.
    pub credential_cleared: bool,
}

/// Source of contacts and of the local identity.
#[async_trait]
pub trait ContactProvider: Send + Sync {
    async fn list_all_contacts(&self) -> anyhow::Result<Vec<Contact>>;

    async fn local_identity_id(&self) -> Option<String>;

    /// Drops the stored profile credential of a contact (group members included).
    fn clear_profile_credential(&self, contact_id: &str) -> anyhow::Result<()>;
}

/// Network side of a refresh. Retry policy, if any, lives behind this trait.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    async fn fetch_profile(&self, id: &str, e164: Option<&str>) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_deserializes() {
        let contact: Contact = serde_json::from_str(r#"{"id":"x","kind":"broadcast"}"#).unwrap();
        assert_eq!(contact.kind, ContactKind::Unknown);
        assert!(contact.members.is_empty());
    }

    #[test]
    fn test_group_with_members_deserializes() {
        let json = r#"{
            "id": "g1",
            "kind": "group",
            "members": [{"id": "a", "kind": "individual", "e164": "+15550001"}]
        }"#;
        let contact: Contact = serde_json::from_str(json).unwrap();
        assert_eq!(contact.kind, ContactKind::Group);
        assert_eq!(contact.members[0].e164.as_deref(), Some("+15550001"));
    }

    #[test]
    fn test_credential_expiry() {
        let mut contact = Contact::individual("a");
        assert!(!contact.has_expired_credential(1_000));

        contact.profile_credential = Some(ProfileCredential {
            credential: "cred".to_string(),
            expires_at: 1_000,
        });
        assert!(!contact.has_expired_credential(999));
        assert!(contact.has_expired_credential(1_000));
    }

    #[test]
    fn test_window_checks() {
        let mut contact = Contact::individual("a");
        assert!(!contact.is_active_within(100, 1_000));
        assert!(!contact.was_fetched_within(100, 1_000));

        contact.last_activity_at = Some(950);
        contact.profile_last_fetched_at = Some(900);
        assert!(contact.is_active_within(100, 1_000));
        assert!(!contact.was_fetched_within(100, 1_000));
    }
}
