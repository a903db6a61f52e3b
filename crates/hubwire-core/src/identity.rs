//! Reference-identity bookkeeping for shared messages.

use std::sync::{Arc, Weak};

use hubwire_types::message::{Message, SharedMessage};

/// A set of messages keyed by allocation, not by value.
///
/// Entries are weak, so the set never keeps a message alive; a held `Weak`
/// still pins the allocation, so an address cannot be reused while it is
/// tracked. Dead entries are pruned on insert.
#[derive(Debug, Default)]
pub(crate) struct IdentitySet {
    entries: Vec<Weak<Message>>,
}

impl IdentitySet {
    pub(crate) fn insert(&mut self, message: &SharedMessage) {
        self.prune();
        if !self.contains(message) {
            self.entries.push(Arc::downgrade(message));
        }
    }

    pub(crate) fn contains(&self, message: &SharedMessage) -> bool {
        let target = Arc::as_ptr(message);
        self.entries
            .iter()
            .any(|entry| std::ptr::eq(entry.as_ptr(), target))
    }

    pub(crate) fn prune(&mut self) {
        self.entries.retain(|entry| entry.strong_count() > 0);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
