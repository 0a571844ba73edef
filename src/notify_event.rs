use std::{rc::Rc, time::SystemTime};

use indexmap::{IndexMap, IndexSet};
use uuid::Uuid;

use crate::{
    AsTopic, EventId, Generation, Key, TopicId,
    journal::{JournalEntry, Marker, Recording},
    topic::AnyTopic,
};

/// Report of one delivered batch.
///
/// - `id`: unique identifier of the batch.
/// - `timestamp`: delivery time in nanoseconds since Unix epoch (truncated to `u64`).
/// - `generation`: token stamped on every topic in the batch.
/// - `journal`: entries recorded while the batch was accumulating.
/// - `keys`: union of the keys changed in the batch.
/// - `topics`: the changed topics, in order of first change.
///
/// Events are cheap to clone; every observer of the batch gets a clone of
/// the same event.
#[derive(Clone)]
pub struct NotifyEvent {
    id: EventId,
    timestamp: u64,
    generation: Generation,
    epoch: u64,
    journal: Rc<[JournalEntry]>,
    keys: Rc<IndexSet<Key>>,
    topics: Rc<IndexMap<TopicId, AnyTopic>>,
}

impl NotifyEvent {
    pub(crate) fn new(
        generation: Generation,
        epoch: u64,
        journal: Vec<JournalEntry>,
        keys: IndexSet<Key>,
        topics: IndexMap<TopicId, AnyTopic>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().as_u128(),
            timestamp: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default(),
            generation,
            epoch,
            journal: journal.into(),
            keys: Rc::new(keys),
            topics: Rc::new(topics),
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn journal(&self) -> &[JournalEntry] {
        &self.journal
    }

    pub fn keys(&self) -> impl ExactSizeIterator<Item = &Key> {
        self.keys.iter()
    }

    pub fn topics(&self) -> impl ExactSizeIterator<Item = &AnyTopic> {
        self.topics.values()
    }

    /// Whether `topic` changed in this batch.
    pub fn has(&self, topic: &impl AsTopic) -> bool {
        self.topics.contains_key(&topic.topic_id())
    }

    /// Whether `topic` changed in this batch and `key` is among the batch's
    /// changed keys.
    ///
    /// Keys are collected per batch, not per topic.
    pub fn has_key(&self, topic: &impl AsTopic, key: &str) -> bool {
        self.has(topic) && self.keys.contains(key)
    }

    /// The part of this batch's journal covered by `marker`.
    ///
    /// Empty when the marker belongs to another batch.
    pub fn record(&self, marker: &Marker) -> Recording {
        if marker.epoch() != self.epoch {
            return Recording::default();
        }
        let entries = marker
            .ranges()
            .into_iter()
            .filter_map(|range| self.journal.get(range))
            .flat_map(|entries| entries.iter().cloned())
            .collect();
        Recording::new(entries)
    }
}

impl std::fmt::Debug for NotifyEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyEvent")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("keys", &self.keys)
            .field("topics", &self.topics.keys().collect::<Vec<_>>())
            .field("journal", &self.journal.len())
            .finish()
    }
}
