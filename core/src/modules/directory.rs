use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::{Contact, ContactProvider};
use crate::utils;

/// On-disk layout of a contacts file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectorySnapshot {
    #[serde(default)]
    pub local_id: Option<String>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
}

/// Contact provider backed by memory, optionally mirrored to a JSON file.
///
/// File-backed directories reload the file on every `list_all_contacts` so an
/// external writer can keep it current between passes. Credential clears are
/// written back with an atomic write (tmp + rename).
pub struct ContactDirectory {
    path: Option<PathBuf>,
    snapshot: Mutex<DirectorySnapshot>,
}

impl ContactDirectory {
    pub fn in_memory(local_id: Option<String>, contacts: Vec<Contact>) -> Self {
        Self {
            path: None,
            snapshot: Mutex::new(DirectorySnapshot { local_id, contacts }),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path)?;
        Ok(Self {
            path: Some(path),
            snapshot: Mutex::new(snapshot),
        })
    }

    /// First contact with this id, searching top-level contacts before group members.
    pub fn contact(&self, id: &str) -> Option<Contact> {
        let snapshot = self.lock().ok()?;
        snapshot
            .contacts
            .iter()
            .find(|c| c.id == id)
            .or_else(|| {
                snapshot
                    .contacts
                    .iter()
                    .flat_map(|c| c.members.iter())
                    .find(|m| m.id == id)
            })
            .cloned()
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, DirectorySnapshot>> {
        self.snapshot
            .lock()
            .map_err(|_| anyhow::anyhow!("contact directory lock poisoned"))
    }
}

#[async_trait]
impl ContactProvider for ContactDirectory {
    async fn list_all_contacts(&self) -> anyhow::Result<Vec<Contact>> {
        if let Some(path) = &self.path {
            let fresh = read_snapshot(path)?;
            let mut snapshot = self.lock()?;
            *snapshot = fresh;
            return Ok(snapshot.contacts.clone());
        }
        Ok(self.lock()?.contacts.clone())
    }

    async fn local_identity_id(&self) -> Option<String> {
        self.lock().ok()?.local_id.clone()
    }

    fn clear_profile_credential(&self, contact_id: &str) -> anyhow::Result<()> {
        let mut snapshot = self.lock()?;
        for contact in snapshot.contacts.iter_mut() {
            if contact.id == contact_id {
                contact.profile_credential = None;
            }
            for member in contact.members.iter_mut().filter(|m| m.id == contact_id) {
                member.profile_credential = None;
            }
        }

        if let Some(path) = &self.path {
            utils::write_json_atomic(path, &*snapshot)?;
        }
        Ok(())
    }
}

fn read_snapshot(path: &Path) -> anyhow::Result<DirectorySnapshot> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("failed to read contacts file {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("invalid contacts file {}", path.display()))
}
