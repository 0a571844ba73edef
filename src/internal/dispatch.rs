use std::{
    cell::RefCell,
    collections::{HashSet, VecDeque},
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Weak,
};

use futures_util::future::{FutureExt, Shared};
use indexmap::{IndexMap, IndexSet};
use tokio::{
    runtime::{Handle, RuntimeFlavor},
    sync::oneshot,
};

use crate::{
    Config, Error, Generation, Key, NotifyEvent, ObserverId, PanicPolicy, Schedule, TopicId,
    internal::registry,
    journal::{JournalEntry, Marker},
    observer::ObserverCell,
    topic::AnyTopic,
};

pub(crate) type Done = Shared<oneshot::Receiver<()>>;

struct Batch {
    sender: oneshot::Sender<()>,
    done: Done,
}

enum Task {
    Broadcast,
    Invoke {
        observer: ObserverId,
        cell: Weak<ObserverCell>,
        event: NotifyEvent,
    },
    Resolve(oneshot::Sender<()>),
}

/// Per-thread engine state: the journal with its open markers, the pending
/// batch and the delivery queue.
struct Dispatch {
    config: Config,
    markers: Vec<Marker>,
    journal: Vec<JournalEntry>,
    epoch: u64,
    replaying: usize,
    keys: IndexSet<Key>,
    topics: IndexMap<TopicId, AnyTopic>,
    batch: Option<Batch>,
    queue: VecDeque<Task>,
    scheduled: bool,
    draining: bool,
    warned: bool,
}

impl Default for Dispatch {
    fn default() -> Self {
        let config = Config::default();
        Self {
            journal: Vec::with_capacity(config.journal_capacity),
            config,
            markers: Vec::new(),
            epoch: 0,
            replaying: 0,
            keys: IndexSet::new(),
            topics: IndexMap::new(),
            batch: None,
            queue: VecDeque::new(),
            scheduled: false,
            draining: false,
            warned: false,
        }
    }
}

impl Dispatch {
    fn is_recording(&self) -> bool {
        !self.markers.is_empty() && self.replaying == 0
    }

    fn ensure_batch(&mut self) -> Done {
        let batch = self.batch.get_or_insert_with(|| {
            let (sender, receiver) = oneshot::channel();
            Batch {
                sender,
                done: receiver.shared(),
            }
        });
        batch.done.clone()
    }

    /// Queues a broadcast unless one is pending. Returns whether a delivery
    /// task has to be spawned for it.
    fn schedule(&mut self) -> bool {
        if self.scheduled {
            return false;
        }
        self.scheduled = true;
        self.queue.push_back(Task::Broadcast);
        tracing::trace!(draining = self.draining, "broadcast scheduled");
        !self.draining && self.config.schedule != Schedule::Manual
    }

    /// Starts a new journal epoch when nothing can still claim the entries
    /// and the journal has outgrown its configured capacity. Markers closed
    /// earlier record nothing afterwards, as after a batch.
    fn compact(&mut self) -> Vec<JournalEntry> {
        if !self.markers.is_empty()
            || self.batch.is_some()
            || self.journal.len() <= self.config.journal_capacity
        {
            return Vec::new();
        }
        tracing::trace!(entries = self.journal.len(), "journal compacted");
        self.epoch += 1;
        std::mem::replace(
            &mut self.journal,
            Vec::with_capacity(self.config.journal_capacity),
        )
    }

    /// Closes the pending batch: closes open markers, hands the journal over
    /// to the event and resets the buffers.
    fn marshal(&mut self) -> (NotifyEvent, Option<oneshot::Sender<()>>) {
        let len = self.journal.len();
        for marker in self.markers.drain(..) {
            marker.close_at(len);
        }
        let epoch = self.epoch;
        self.epoch += 1;
        let journal = std::mem::replace(
            &mut self.journal,
            Vec::with_capacity(self.config.journal_capacity),
        );
        let keys = std::mem::take(&mut self.keys);
        let topics = std::mem::take(&mut self.topics);
        let generation = if topics.is_empty() {
            Generation::current()
        } else {
            Generation::advance()
        };
        self.scheduled = false;
        let sender = self.batch.take().map(|batch| batch.sender);
        (NotifyEvent::new(generation, epoch, journal, keys, topics), sender)
    }
}

thread_local! {
    static DISPATCH: RefCell<Dispatch> = RefCell::new(Dispatch::default());
}

fn with<R>(f: impl FnOnce(&mut Dispatch) -> R) -> R {
    DISPATCH.with(|d| f(&mut d.borrow_mut()))
}

pub(crate) fn configure(config: Config) {
    with(|d| d.config = config);
}

pub(crate) fn config() -> Config {
    with(|d| d.config.clone())
}

/// Records changed keys of `topic` into the pending batch.
pub(crate) fn changed(keys: impl IntoIterator<Item = Key>, topic: AnyTopic) {
    let spawn = with(|d| {
        d.keys.extend(keys);
        d.topics.entry(topic.id()).or_insert(topic);
        d.ensure_batch();
        d.schedule()
    });
    if spawn {
        spawn_drain();
    }
}

pub(crate) fn pulse() -> Done {
    let (done, spawn) = with(|d| (d.ensure_batch(), d.schedule()));
    if spawn {
        spawn_drain();
    }
    done
}

fn spawn_drain() {
    if with(|d| d.config.schedule) == Schedule::Local {
        tokio::task::spawn_local(async { drain() });
        return;
    }
    match Handle::try_current() {
        Ok(handle) if matches!(handle.runtime_flavor(), RuntimeFlavor::CurrentThread) => {
            handle.spawn(async { drain() });
        }
        _ => {
            if !with(|d| std::mem::replace(&mut d.warned, true)) {
                tracing::warn!(
                    "no current-thread runtime, batches on this thread wait for pulse or flush"
                );
            }
        }
    }
}

struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let _ = DISPATCH.try_with(|d| {
            if let Ok(mut d) = d.try_borrow_mut() {
                d.draining = false;
            }
        });
    }
}

/// Runs queued tasks until the queue is empty.
///
/// A drain started while another one is running returns immediately; the
/// running one picks up whatever was queued meanwhile.
pub(crate) fn drain() {
    let entered = with(|d| !std::mem::replace(&mut d.draining, true));
    if !entered {
        tracing::trace!("flush already in progress");
        return;
    }
    let _draining = Draining;
    while let Some(task) = with(|d| d.queue.pop_front()) {
        run(task);
    }
}

fn run(task: Task) {
    match task {
        Task::Broadcast => broadcast(),
        Task::Invoke {
            observer,
            cell,
            event,
        } => invoke(observer, cell, &event),
        Task::Resolve(sender) => {
            let _ = sender.send(());
        }
    }
}

fn broadcast() {
    let (event, sender) = with(|d| d.marshal());
    for topic in event.topics() {
        topic.state().set_generation(event.generation());
    }

    let mut visited = HashSet::new();
    let mut tasks = Vec::new();
    for topic in event.topics() {
        for (observer, cell) in registry::subscribers(topic.id()) {
            if visited.insert(observer) {
                tasks.push(Task::Invoke {
                    observer,
                    cell,
                    event: event.clone(),
                });
            }
        }
    }

    tracing::debug!(
        generation = %event.generation(),
        topics = event.topics().len(),
        keys = event.keys().len(),
        observers = tasks.len(),
        "broadcasting batch"
    );

    with(|d| {
        d.queue.extend(tasks);
        if let Some(sender) = sender {
            d.queue.push_back(Task::Resolve(sender));
        }
    });
}

fn invoke(observer: ObserverId, cell: Weak<ObserverCell>, event: &NotifyEvent) {
    if !registry::is_observer_active(observer) {
        tracing::trace!(observer = %observer, "observer detached before delivery");
        return;
    }
    let Some(cell) = cell.upgrade() else {
        return;
    };
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| cell.notify(event))) {
        let err = Error::from_panic(observer, payload.as_ref());
        tracing::error!(observer = %observer, error = %err, "Observer panicked during delivery");
        if config().panic_policy == PanicPolicy::Revoke {
            registry::seal_observer(observer);
        }
    }
}

pub(crate) fn is_recording() -> bool {
    DISPATCH.with(|d| d.borrow().is_recording())
}

pub(crate) fn has_open_markers() -> bool {
    DISPATCH.with(|d| !d.borrow().markers.is_empty())
}

pub(crate) fn record(entry: JournalEntry) {
    let rejected = with(|d| {
        if d.is_recording() {
            d.journal.push(entry);
            None
        } else {
            Some(entry)
        }
    });
    drop(rejected);
}

pub(crate) fn extend(entries: &[JournalEntry]) {
    with(|d| {
        if d.is_recording() {
            d.journal.extend_from_slice(entries);
        }
    });
}

pub(crate) fn mark() -> Marker {
    // Entries are dropped outside the borrow.
    let (marker, _compacted) = with(|d| {
        let compacted = d.compact();
        let marker = Marker::open(d.journal.len(), d.epoch);
        d.markers.push(marker.clone());
        (marker, compacted)
    });
    marker
}

pub(crate) fn unmark(marker: &Marker) {
    with(|d| {
        if let Some(pos) = d.markers.iter().position(|m| m.ptr_eq(marker)) {
            d.markers.remove(pos);
            marker.close_at(d.journal.len());
        }
    });
}

pub(crate) fn reopen(marker: &Marker) {
    with(|d| {
        if !d.markers.iter().any(|m| m.ptr_eq(marker)) {
            marker.reopen_at(d.journal.len(), d.epoch);
            d.markers.push(marker.clone());
        }
    });
}

pub(crate) fn slice(marker: &Marker) -> Vec<JournalEntry> {
    with(|d| {
        if marker.epoch() != d.epoch {
            return Vec::new();
        }
        marker
            .ranges()
            .into_iter()
            .filter_map(|range| d.journal.get(range))
            .flat_map(|entries| entries.iter().cloned())
            .collect()
    })
}

/// Suspends journaling while replaying.
pub(crate) struct Replaying;

impl Replaying {
    pub(crate) fn enter() -> Self {
        with(|d| d.replaying += 1);
        Replaying
    }
}

impl Drop for Replaying {
    fn drop(&mut self) {
        let _ = DISPATCH.try_with(|d| {
            if let Ok(mut d) = d.try_borrow_mut() {
                d.replaying = d.replaying.saturating_sub(1);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObserverHandle, on, wrap};
    use std::{cell::Cell, rc::Rc};

    #[test]
    fn test_changes_wait_for_flush() {
        let topic = wrap(0u32);
        let calls = Rc::new(Cell::new(0));
        let obs = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
        };
        on(&topic, &obs);

        topic.write("value", |v| *v = 1);
        topic.write("value", |v| *v = 2);
        assert_eq!(calls.get(), 0);

        drain();
        assert_eq!(calls.get(), 1);

        drain();
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_marshal_resets_buffers() {
        let topic = wrap(0u32);
        topic.write("a", |v| *v = 1);
        let marker = mark();
        topic.read("a", |v| *v);

        let epoch = with(|d| d.epoch);
        drain();

        with(|d| {
            assert!(d.keys.is_empty());
            assert!(d.topics.is_empty());
            assert!(d.journal.is_empty());
            assert!(d.markers.is_empty());
            assert!(d.batch.is_none());
            assert_eq!(d.epoch, epoch + 1);
        });
        assert!(!marker.is_open());
        assert_eq!(marker.ranges(), vec![0..1]);
    }

    #[test]
    fn test_generation_stamped_before_delivery() {
        let topic = wrap(0u32);
        let seen = Rc::new(Cell::new(None));
        let obs = {
            let seen = seen.clone();
            let topic = topic.clone();
            ObserverHandle::from_fn(move |event| {
                if let Some(event) = event.as_notify() {
                    seen.set(Some(topic.generation() == event.generation()));
                }
            })
        };
        on(&topic, &obs);
        let before = topic.generation();
        topic.write("value", |v| *v += 1);
        drain();
        assert_eq!(seen.get(), Some(true));
        assert_ne!(topic.generation(), before);
    }

    #[test]
    fn test_mutation_during_delivery_joins_the_same_drain() {
        let source = wrap(0u32);
        let derived = wrap(0u32);
        let hits = Rc::new(Cell::new(0));

        let copier = {
            let source = source.clone();
            let derived = derived.clone();
            ObserverHandle::from_fn(move |_| {
                let value = source.untracked(|v| *v);
                derived.write("value", |v| *v = value * 10);
            })
        };
        let watcher = {
            let hits = hits.clone();
            ObserverHandle::from_fn(move |_| hits.set(hits.get() + 1))
        };
        on(&source, &copier);
        on(&derived, &watcher);

        source.write("value", |v| *v = 4);
        drain();
        assert_eq!(derived.untracked(|v| *v), 40);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn test_panicking_observer_does_not_stop_delivery() {
        let topic = wrap(0u32);
        let reached = Rc::new(Cell::new(false));
        let bad = ObserverHandle::from_fn(|_| panic!("observer failure"));
        let good = {
            let reached = reached.clone();
            ObserverHandle::from_fn(move |_| reached.set(true))
        };
        on(&topic, &bad);
        on(&topic, &good);

        topic.write("value", |v| *v = 1);
        drain();
        assert!(reached.get());
        assert!(registry::has(topic.id(), bad.id()));
    }

    #[test]
    fn test_revoke_policy_removes_panicking_observer() {
        configure(Config::default().with_panic_policy(PanicPolicy::Revoke));
        let topic = wrap(0u32);
        let bad = ObserverHandle::from_fn(|_| panic!("observer failure"));
        on(&topic, &bad);

        topic.write("value", |v| *v = 1);
        drain();
        assert!(!registry::has(topic.id(), bad.id()));
        assert!(!registry::is_observer_active(bad.id()));
    }

    #[test]
    fn test_without_runtime_batches_wait_and_warn_once() {
        let topic = wrap(0u32);
        let calls = Rc::new(Cell::new(0));
        let obs = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
        };
        on(&topic, &obs);
        assert!(!with(|d| d.warned));

        topic.write("value", |v| *v = 1);
        assert!(with(|d| d.warned));
        assert_eq!(calls.get(), 0);
        assert_eq!(with(|d| d.topics.len()), 1);

        drain();
        assert_eq!(calls.get(), 1);
        assert!(with(|d| d.topics.is_empty()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_multi_thread_runtime_waits_for_pulse() {
        let topic = wrap(0u32);
        let calls = Rc::new(Cell::new(0));
        let obs = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
        };
        on(&topic, &obs);

        topic.write("value", |v| *v = 1);
        assert!(with(|d| d.warned));
        assert_eq!(calls.get(), 0);
        crate::pulse().await;
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_local_schedule_delivers_inside_local_set() {
        configure(Config::default().with_schedule(Schedule::Local));
        let local = tokio::task::LocalSet::new();
        local
            .run_until(async {
                let topic = wrap(0u32);
                let calls = Rc::new(Cell::new(0));
                let obs = {
                    let calls = calls.clone();
                    ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
                };
                on(&topic, &obs);

                topic.write("value", |v| *v = 1);
                assert_eq!(calls.get(), 0);
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                assert_eq!(calls.get(), 1);
                assert!(!with(|d| d.warned));
            })
            .await;
    }

    #[test]
    fn test_journal_compacts_between_recordings() {
        configure(Config::default().with_journal_capacity(2));
        let topic = wrap(0u32);

        let first = mark();
        for _ in 0..3 {
            topic.read("value", |v| *v);
        }
        unmark(&first);
        assert_eq!(first.recording().len(), 3);

        let epoch = with(|d| d.epoch);
        let second = mark();
        topic.read("value", |v| *v);
        unmark(&second);

        assert_eq!(with(|d| d.epoch), epoch + 1);
        assert_eq!(with(|d| d.journal.len()), 1);
        assert_eq!(second.recording().len(), 1);
        assert!(first.recording().is_empty());
    }

    #[test]
    fn test_journal_kept_while_batch_pending() {
        configure(Config::default().with_journal_capacity(1));
        let topic = wrap(0u32);
        topic.write("value", |v| *v = 1);

        let first = mark();
        topic.read("value", |v| *v);
        topic.read("value", |v| *v);
        unmark(&first);

        let second = mark();
        unmark(&second);
        assert_eq!(first.recording().len(), 2);
        drain();
    }
}
