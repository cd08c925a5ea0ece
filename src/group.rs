//! Partition fetched messages by normalized sender.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{EmailAddress, Message};

/// All messages from one sender, as positions into the fetched message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderGroup {
    /// Normalized address shared by every member.
    pub sender_key: String,
    /// Sender identity of the first member, for display.
    pub sender: EmailAddress,
    /// Indices into the message slice the group was built from, in fetch order.
    pub members: Vec<usize>,
}

impl SenderGroup {
    /// Number of messages in the group.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Resolve member indices against the slice the group was built from.
    pub fn messages<'a>(&'a self, all: &'a [Message]) -> impl Iterator<Item = &'a Message> + 'a {
        self.members.iter().filter_map(move |&i| all.get(i))
    }
}

/// Sender groups keyed by sender key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SenderGroups {
    groups: BTreeMap<String, SenderGroup>,
}

impl SenderGroups {
    pub fn get(&self, sender_key: &str) -> Option<&SenderGroup> {
        self.groups.get(sender_key)
    }

    /// Groups in sender-key order.
    pub fn iter(&self) -> impl Iterator<Item = &SenderGroup> {
        self.groups.values()
    }

    /// Number of distinct senders.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total messages across all groups.
    pub fn message_count(&self) -> usize {
        self.groups.values().map(SenderGroup::len).sum()
    }

    /// Groups with the most messages first (ties by sender key), for review.
    pub fn by_size(&self) -> Vec<&SenderGroup> {
        let mut sorted: Vec<&SenderGroup> = self.groups.values().collect();
        sorted.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.sender_key.cmp(&b.sender_key)));
        sorted
    }
}

/// Group `messages` by [`Message::sender_key`].
///
/// Total and deterministic: every message lands in exactly one group and
/// each group keeps input order.
pub fn group(messages: &[Message]) -> SenderGroups {
    let mut groups: BTreeMap<String, SenderGroup> = BTreeMap::new();
    for (idx, message) in messages.iter().enumerate() {
        let key = message.sender_key();
        groups
            .entry(key)
            .or_insert_with_key(|key| SenderGroup {
                sender_key: key.clone(),
                sender: message.sender.clone(),
                members: Vec::new(),
            })
            .members
            .push(idx);
    }
    SenderGroups { groups }
}
