use stratum_plan::{ActionVerb, ResourceId};

/// Queue of delayed notifications for one run.
///
/// Registrations are keyed by (target, verb): a repeat of an already-queued
/// key is absorbed into the first registration, so each unique notification
/// fires exactly once, in first-registration order, after the main walk.
#[derive(Debug, Default)]
pub struct NotificationDispatcher {
    entries: Vec<(ResourceId, ActionVerb)>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification. Returns false when the key was already queued.
    pub fn register(&mut self, target: ResourceId, verb: ActionVerb) -> bool {
        if self.entries.iter().any(|(t, v)| *t == target && *v == verb) {
            return false;
        }
        self.entries.push((target, verb));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at flush position `index`; the flush loop indexes rather than
    /// draining because a flushed notification may register further entries.
    pub fn get(&self, index: usize) -> Option<(ResourceId, ActionVerb)> {
        self.entries.get(index).cloned()
    }
}
