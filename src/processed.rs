//! Message ids the destination contracts have confirmed as completed

use crate::transfer::MessageId;

use dashmap::DashSet;

/// Filled from `TransferCompleted` events and "already processed" reverts.
/// Lets the relay path skip a submission the destination would reject anyway.
#[derive(Debug, Default)]
pub struct ProcessedSet {
    ids: DashSet<MessageId>,
}

impl ProcessedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the id was not yet known
    pub fn insert(&self, message_id: MessageId) -> bool {
        self.ids.insert(message_id)
    }

    pub fn contains(&self, message_id: &MessageId) -> bool {
        self.ids.contains(message_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
