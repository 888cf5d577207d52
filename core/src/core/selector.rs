use std::collections::HashSet;
use std::vec;

use log::debug;

use crate::core::{Candidate, Contact, ContactKind, ContactProvider};
use crate::RefreshConfig;

/// Picks the contacts whose profiles should be refetched in one pass.
///
/// The selector is a pull-based iterator over the contact snapshot sorted by
/// last activity (oldest first). It deduplicates by contact id, clears expired
/// profile credentials as it goes, and stops scanning as soon as
/// `max_per_pass` candidates have been produced.
///
/// Rules, applied per contact in sorted order:
/// 1. Individual with an expired credential that is the local identity or not
///    yet seen: clear the credential, emit.
/// 2. Individual not yet seen, active within the activity window and not
///    fetched within the fetched window: emit.
/// 3. Group: each member not yet seen and not fetched within the fetched
///    window is emitted, regardless of its activity.
/// 4. Any other kind yields an error and ends the scan.
pub struct CandidateSelector<'a> {
    contacts: vec::IntoIter<Contact>,
    members: Option<vec::IntoIter<Contact>>,
    provider: &'a dyn ContactProvider,
    local_id: String,
    seen: HashSet<String>,
    local_refreshed: bool,
    now_ms: u64,
    active_window_ms: u64,
    fetched_window_ms: u64,
    max: usize,
    emitted: usize,
    failed: bool,
}

impl<'a> CandidateSelector<'a> {
    pub fn new(
        mut contacts: Vec<Contact>,
        local_id: &str,
        now_ms: u64,
        config: &RefreshConfig,
        provider: &'a dyn ContactProvider,
    ) -> Self {
        // Stable: ties keep input order, missing activity sorts first.
        contacts.sort_by_key(|c| c.last_activity_at);

        let mut seen = HashSet::new();
        seen.insert(local_id.to_string());

        Self {
            contacts: contacts.into_iter(),
            members: None,
            provider,
            local_id: local_id.to_string(),
            seen,
            local_refreshed: false,
            now_ms,
            active_window_ms: config.active_window_ms(),
            fetched_window_ms: config.fetched_window_ms(),
            max: config.max_per_pass,
            emitted: 0,
            failed: false,
        }
    }

    fn consider_individual(&mut self, contact: Contact) -> anyhow::Result<Option<Candidate>> {
        let is_local = contact.id == self.local_id;

        if contact.has_expired_credential(self.now_ms)
            && ((is_local && !self.local_refreshed) || !self.seen.contains(&contact.id))
        {
            self.provider.clear_profile_credential(&contact.id)?;
            debug!("Cleared expired profile credential for {}", contact.id);
            if is_local {
                self.local_refreshed = true;
            }
            self.seen.insert(contact.id.clone());
            return Ok(Some(Candidate {
                id: contact.id,
                e164: contact.e164,
                credential_cleared: true,
            }));
        }

        if !self.seen.contains(&contact.id)
            && contact.is_active_within(self.active_window_ms, self.now_ms)
            && !contact.was_fetched_within(self.fetched_window_ms, self.now_ms)
        {
            self.seen.insert(contact.id.clone());
            return Ok(Some(candidate(contact)));
        }

        Ok(None)
    }

    fn consider_member(&mut self, member: Contact) -> Option<Candidate> {
        if self.seen.contains(&member.id)
            || member.was_fetched_within(self.fetched_window_ms, self.now_ms)
        {
            return None;
        }
        self.seen.insert(member.id.clone());
        Some(candidate(member))
    }

    fn emit(&mut self, candidate: Candidate) -> Option<anyhow::Result<Candidate>> {
        self.emitted += 1;
        if self.emitted == self.max {
            debug!("Selection reached its cap of {} contact(s)", self.max);
        }
        Some(Ok(candidate))
    }

    fn fail(&mut self, error: anyhow::Error) -> Option<anyhow::Result<Candidate>> {
        self.failed = true;
        Some(Err(error))
    }
}

impl Iterator for CandidateSelector<'_> {
    type Item = anyhow::Result<Candidate>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.emitted >= self.max {
            return None;
        }

        loop {
            if let Some(members) = self.members.as_mut() {
                if let Some(member) = members.next() {
                    match self.consider_member(member) {
                        Some(candidate) => return self.emit(candidate),
                        None => continue,
                    }
                }
                self.members = None;
            }

            let contact = self.contacts.next()?;
            match contact.kind {
                ContactKind::Individual => match self.consider_individual(contact) {
                    Ok(Some(candidate)) => return self.emit(candidate),
                    Ok(None) => {}
                    Err(e) => return self.fail(e),
                },
                ContactKind::Group => {
                    self.members = Some(contact.members.into_iter());
                }
                ContactKind::Unknown => {
                    return self.fail(anyhow::anyhow!(
                        "contact {} has unsupported kind '{}'",
                        contact.id,
                        contact.kind
                    ));
                }
            }
        }
    }
}

fn candidate(contact: Contact) -> Candidate {
    Candidate {
        id: contact.id,
        e164: contact.e164,
        credential_cleared: false,
    }
}
