//! Bounded table of the last retained message per topic
//!
//! The store lives inside the router and is only touched under the router lock, so it
//! carries no synchronization of its own.

use std::collections::HashMap;

use crate::topic;
use crate::types::{Message, TopicName};

/// Result of [`RetainedStore::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainOutcome {
    Stored,
    Replaced,
    /// The table was full and `topic` was new, the message was not kept.
    Full,
}

#[derive(Debug)]
pub struct RetainedStore {
    entries: HashMap<TopicName, Message, ahash::RandomState>,
    max: usize,
}

impl RetainedStore {
    pub fn new(max: usize) -> Self {
        Self { entries: HashMap::default(), max }
    }

    /// Upserts the message under its topic, empty payloads included.
    ///
    /// Existing entries keep priority: when the table is full a new topic is refused.
    pub fn set(&mut self, msg: Message) -> RetainOutcome {
        if let Some(slot) = self.entries.get_mut(&msg.topic) {
            *slot = msg;
            return RetainOutcome::Replaced;
        }
        if self.entries.len() >= self.max {
            return RetainOutcome::Full;
        }
        self.entries.insert(msg.topic.clone(), msg);
        RetainOutcome::Stored
    }

    #[inline]
    pub fn get(&self, topic: &str) -> Option<&Message> {
        self.entries.get(topic)
    }

    /// All retained messages whose topic is covered by `filter`.
    pub fn matches(&self, filter: &str) -> Vec<Message> {
        let mut found: Vec<Message> =
            self.entries.values().filter(|m| topic::matches(filter, &m.topic)).cloned().collect();
        found.sort_by(|a, b| a.topic.cmp(&b.topic));
        found
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
