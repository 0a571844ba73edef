use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use indexmap::IndexMap;

use crate::{
    ObserverId, TopicId,
    observer::{ObserverCell, ObserverHandle},
    topic::{AnyTopic, WeakTopic},
};

/// One side of the association. `Sealed` rows belong to frozen topics or
/// revoked observers and never accept new pairs.
enum Slot<T> {
    Open(T),
    Sealed,
}

impl<T: Default> Default for Slot<T> {
    fn default() -> Self {
        Slot::Open(T::default())
    }
}

impl<T> Slot<T> {
    fn get(&self) -> Option<&T> {
        match self {
            Slot::Open(value) => Some(value),
            Slot::Sealed => None,
        }
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Slot::Open(value) => Some(value),
            Slot::Sealed => None,
        }
    }
}

type Observers = IndexMap<ObserverId, Weak<ObserverCell>>;
type Topics = IndexMap<TopicId, WeakTopic>;

/// Weak many-to-many association between topics and observers.
///
/// Both directions hold only weak handles, in registration order. Rows of
/// dropped topics and observers are purged by their destructors; a row that
/// could not be purged is skipped by the liveness checks.
#[derive(Default)]
struct Registry {
    observers: HashMap<TopicId, Slot<Observers>>,
    topics: HashMap<ObserverId, Slot<Topics>>,
}

impl Registry {
    fn is_sealed_observer(&self, observer: ObserverId) -> bool {
        matches!(self.topics.get(&observer), Some(Slot::Sealed))
    }

    fn attach(&mut self, topic: &AnyTopic, observer: &ObserverHandle) -> bool {
        let (tid, oid) = (topic.id(), observer.id());
        if topic.is_frozen() || self.is_sealed_observer(oid) {
            return false;
        }
        let Some(observers) = self.observers.entry(tid).or_default().get_mut() else {
            return false;
        };
        if observers.get(&oid).is_some_and(|o| o.strong_count() > 0) {
            return false;
        }
        observers.insert(oid, observer.downgrade());
        if let Some(topics) = self.topics.entry(oid).or_default().get_mut() {
            topics.insert(tid, topic.downgrade());
        }
        true
    }

    fn detach(&mut self, topic: TopicId, observer: ObserverId) -> bool {
        let removed = self
            .observers
            .get_mut(&topic)
            .and_then(Slot::get_mut)
            .and_then(|o| o.shift_remove(&observer))
            .is_some();
        if let Some(topics) = self.topics.get_mut(&observer).and_then(Slot::get_mut) {
            topics.shift_remove(&topic);
        }
        removed
    }

    /// Detaches every observer of `topic` and returns how many were live.
    fn detach_topic(&mut self, topic: TopicId) -> usize {
        let Some(observers) = self.observers.get_mut(&topic).and_then(Slot::get_mut) else {
            return 0;
        };
        let observers = std::mem::take(observers);
        let mut live = 0;
        for (oid, cell) in observers {
            if cell.strong_count() > 0 {
                live += 1;
            }
            if let Some(topics) = self.topics.get_mut(&oid).and_then(Slot::get_mut) {
                topics.shift_remove(&topic);
            }
        }
        live
    }

    fn detach_observer(&mut self, observer: ObserverId) -> usize {
        let Some(topics) = self.topics.get_mut(&observer).and_then(Slot::get_mut) else {
            return 0;
        };
        let topics = std::mem::take(topics);
        let mut live = 0;
        for (tid, topic) in topics {
            if topic.is_alive() {
                live += 1;
            }
            if let Some(observers) = self.observers.get_mut(&tid).and_then(Slot::get_mut) {
                observers.shift_remove(&observer);
            }
        }
        live
    }

    fn has(&self, topic: TopicId, observer: ObserverId) -> bool {
        self.observers
            .get(&topic)
            .and_then(Slot::get)
            .and_then(|o| o.get(&observer))
            .is_some_and(|o| o.strong_count() > 0)
    }
}

thread_local! {
    static REGISTRY: RefCell<Registry> = RefCell::new(Registry::default());
}

fn with<R>(f: impl FnOnce(&mut Registry) -> R) -> R {
    REGISTRY.with(|r| f(&mut r.borrow_mut()))
}

pub(crate) fn attach(topic: &AnyTopic, observer: &ObserverHandle) -> bool {
    with(|r| r.attach(topic, observer))
}

pub(crate) fn detach(topic: TopicId, observer: ObserverId) -> bool {
    with(|r| r.detach(topic, observer))
}

pub(crate) fn has(topic: TopicId, observer: ObserverId) -> bool {
    with(|r| r.has(topic, observer))
}

pub(crate) fn clear(topic: TopicId) -> bool {
    with(|r| r.detach_topic(topic) > 0)
}

pub(crate) fn seal_topic(topic: TopicId) {
    with(|r| {
        r.detach_topic(topic);
        r.observers.insert(topic, Slot::Sealed);
    });
}

pub(crate) fn seal_observer(observer: ObserverId) {
    with(|r| {
        r.detach_observer(observer);
        r.topics.insert(observer, Slot::Sealed);
    });
}

/// Makes the observer's subscription set exactly `topics`.
pub(crate) fn focus(observer: &ObserverHandle, topics: &[AnyTopic]) -> bool {
    let oid = observer.id();
    with(|r| {
        if r.is_sealed_observer(oid) {
            return false;
        }
        let stale: Vec<TopicId> = r
            .topics
            .get(&oid)
            .and_then(Slot::get)
            .map(|current| {
                current
                    .keys()
                    .filter(|tid| !topics.iter().any(|t| t.id() == **tid))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        let mut changed = false;
        for tid in stale {
            changed |= r.detach(tid, oid);
        }
        for topic in topics {
            changed |= r.attach(topic, observer);
        }
        changed
    })
}

pub(crate) fn observe(observer: &ObserverHandle, topics: &[AnyTopic]) -> bool {
    with(|r| topics.iter().fold(false, |changed, topic| r.attach(topic, observer) | changed))
}

/// Live observers of `topic` in registration order.
pub(crate) fn observers_of(topic: TopicId) -> Vec<(ObserverId, Rc<ObserverCell>)> {
    with(|r| {
        r.observers
            .get(&topic)
            .and_then(Slot::get)
            .map(|observers| {
                observers
                    .iter()
                    .filter_map(|(oid, cell)| cell.upgrade().map(|cell| (*oid, cell)))
                    .collect()
            })
            .unwrap_or_default()
    })
}

/// Like [`observers_of`] without upgrading, so queued work doesn't keep
/// observers alive.
pub(crate) fn subscribers(topic: TopicId) -> Vec<(ObserverId, Weak<ObserverCell>)> {
    with(|r| {
        r.observers
            .get(&topic)
            .and_then(Slot::get)
            .map(|observers| {
                observers
                    .iter()
                    .filter(|(_, cell)| cell.strong_count() > 0)
                    .map(|(oid, cell)| (*oid, cell.clone()))
                    .collect()
            })
            .unwrap_or_default()
    })
}

pub(crate) fn topics_of(observer: ObserverId) -> Vec<AnyTopic> {
    with(|r| {
        r.topics
            .get(&observer)
            .and_then(Slot::get)
            .map(|topics| topics.values().filter_map(WeakTopic::upgrade).collect())
            .unwrap_or_default()
    })
}

pub(crate) fn is_topic_active(topic: TopicId) -> bool {
    with(|r| {
        r.observers
            .get(&topic)
            .and_then(Slot::get)
            .is_some_and(|o| o.values().any(|cell| cell.strong_count() > 0))
    })
}

pub(crate) fn is_observer_active(observer: ObserverId) -> bool {
    with(|r| {
        r.topics
            .get(&observer)
            .and_then(Slot::get)
            .is_some_and(|t| t.values().any(WeakTopic::is_alive))
    })
}

/// Purges a dropped topic. Called from its destructor, so it must not
/// panic when the registry is busy or already torn down.
pub(crate) fn forget_topic(topic: TopicId) {
    let _ = REGISTRY.try_with(|r| {
        if let Ok(mut r) = r.try_borrow_mut() {
            r.detach_topic(topic);
            r.observers.remove(&topic);
        }
    });
}

pub(crate) fn forget_observer(observer: ObserverId) {
    let _ = REGISTRY.try_with(|r| {
        if let Ok(mut r) = r.try_borrow_mut() {
            r.detach_observer(observer);
            r.topics.remove(&observer);
        }
    });
}
