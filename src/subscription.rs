#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;

use crate::transport::Handler;

/// A tracked topic subscription.
#[derive(Clone)]
pub(crate) struct SubscriptionEntry {
    /// Monotonic generation assigned when this entry was recorded. A pending registration only
    /// goes through while its generation is still the current one for the topic.
    pub(crate) generation: u64,
    pub(crate) handler: Handler,
    pub(crate) created_at: Instant,
}

/// Information about an active subscription.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SubscriptionInfo {
    pub topic: String,
    /// When the handler for this topic was last set
    pub created_at: Instant,
}

/// Topic → handler mapping. This is what gets replayed after a reconnection.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: DashMap<String, SubscriptionEntry>,
    next_generation: AtomicU64,
}

impl SubscriptionRegistry {
    /// Record `handler` for `topic`, replacing any previous handler. Returns the new generation.
    pub(crate) fn insert(&self, topic: &str, handler: Handler) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            topic.to_owned(),
            SubscriptionEntry {
                generation,
                handler,
                created_at: Instant::now(),
            },
        );
        generation
    }

    pub(crate) fn remove(&self, topic: &str) -> Option<SubscriptionEntry> {
        self.entries.remove(topic).map(|(_, entry)| entry)
    }

    /// Returns the handler if `generation` is still the current one for `topic`.
    pub(crate) fn current(&self, topic: &str, generation: u64) -> Option<Handler> {
        self.entries
            .get(topic)
            .filter(|entry| entry.generation == generation)
            .map(|entry| entry.handler.clone())
    }

    pub(crate) fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn topics(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of every entry, taken without holding any shard lock afterwards.
    pub(crate) fn snapshot(&self) -> Vec<(String, SubscriptionEntry)> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub(crate) fn info(&self) -> Vec<SubscriptionInfo> {
        self.entries
            .iter()
            .map(|entry| SubscriptionInfo {
                topic: entry.key().clone(),
                created_at: entry.created_at,
            })
            .collect()
    }

    /// Remove every entry, returning the topics that were tracked.
    pub(crate) fn drain(&self) -> Vec<String> {
        let topics = self.topics();
        for topic in &topics {
            self.entries.remove(topic);
        }
        topics
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topics())
            .finish_non_exhaustive()
    }
}
