//! Recording of reads and calls, and replaying them to check whether a
//! result derived from them is still valid.
//!
//! While at least one [`Marker`] is open, every intercepted read or call on
//! this thread appends a [`JournalEntry`] to one shared journal. A marker
//! remembers the ranges of the journal written while it was open, so nested
//! and interleaved recordings each see their own reads.
//!
//! ```rust
//! use observa::{journal, wrap};
//!
//! let topic = wrap(vec![1, 2, 3]);
//! let (sum, marker) = journal::recording(|| topic.to_vec().iter().sum::<i32>());
//! let trace = marker.recording();
//! assert_eq!(sum, 6);
//! assert!(!trace.replay());
//!
//! topic.push(4).unwrap();
//! assert!(trace.replay());
//! ```

use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    ops::Range,
    rc::Rc,
};

use indexmap::IndexMap;

use crate::{
    Error, MethodId, Result, TopicId,
    internal::dispatch,
    topic::{AnyTopic, WeakTopic},
};

/// What a journal entry accessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    Read(crate::Key),
    Call { method: MethodId, key: crate::Key },
}

/// One recorded read or call.
///
/// Entries keep their topic weakly. An entry whose topic has been dropped
/// always replays as changed.
#[derive(Clone)]
pub struct JournalEntry {
    topic: WeakTopic,
    topic_id: TopicId,
    accessor: Accessor,
    result: Rc<dyn Any>,
    args: Option<Rc<dyn Any>>,
    verify: Rc<dyn Fn() -> bool>,
}

impl JournalEntry {
    pub(crate) fn new(
        topic: WeakTopic,
        topic_id: TopicId,
        accessor: Accessor,
        result: Rc<dyn Any>,
        args: Option<Rc<dyn Any>>,
        verify: Rc<dyn Fn() -> bool>,
    ) -> Self {
        Self {
            topic,
            topic_id,
            accessor,
            result,
            args,
            verify,
        }
    }

    #[inline]
    pub fn topic_id(&self) -> TopicId {
        self.topic_id
    }

    /// The topic, if it is still alive.
    pub fn topic(&self) -> Option<AnyTopic> {
        self.topic.upgrade()
    }

    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    pub fn key(&self) -> &crate::Key {
        match &self.accessor {
            Accessor::Read(key) => key,
            Accessor::Call { key, .. } => key,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.accessor, Accessor::Call { .. })
    }

    /// The recorded result, if it has type `V`.
    pub fn result<V: 'static>(&self) -> Option<&V> {
        self.result.downcast_ref()
    }

    /// The call arguments, if this is a call and they have type `A`.
    pub fn args<A: 'static>(&self) -> Option<&A> {
        self.args.as_ref().and_then(|args| args.downcast_ref())
    }

    /// Re-executes the access and compares the outcome with the recorded one.
    pub(crate) fn is_current(&self) -> bool {
        (self.verify)()
    }
}

impl fmt::Debug for JournalEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JournalEntry")
            .field("topic", &self.topic_id)
            .field("accessor", &self.accessor)
            .field("has_args", &self.args.is_some())
            .finish()
    }
}

struct MarkerState {
    bounds: RefCell<Vec<usize>>,
    epoch: Cell<u64>,
}

/// Handle to a recording session.
///
/// Holds the journal ranges written while the marker was open. Ranges refer
/// to the journal of one batch (its epoch); the journal is handed over to
/// the [`NotifyEvent`](crate::NotifyEvent) and cleared on delivery, which
/// also closes all markers still open.
#[derive(Clone)]
pub struct Marker(Rc<MarkerState>);

impl Marker {
    pub(crate) fn open(at: usize, epoch: u64) -> Self {
        Marker(Rc::new(MarkerState {
            bounds: RefCell::new(vec![at]),
            epoch: Cell::new(epoch),
        }))
    }

    pub(crate) fn close_at(&self, len: usize) {
        let mut bounds = self.0.bounds.borrow_mut();
        if bounds.len() % 2 == 1 {
            if let Some(start) = bounds.pop() {
                if start < len {
                    bounds.push(start);
                    bounds.push(len);
                }
            }
        }
    }

    pub(crate) fn reopen_at(&self, at: usize, epoch: u64) {
        let mut bounds = self.0.bounds.borrow_mut();
        if self.0.epoch.get() != epoch {
            bounds.clear();
            self.0.epoch.set(epoch);
        }
        if bounds.len() % 2 == 0 {
            bounds.push(at);
        }
    }

    pub fn is_open(&self) -> bool {
        self.0.bounds.borrow().len() % 2 == 1
    }

    /// Closed journal ranges covered by this marker.
    pub fn ranges(&self) -> Vec<Range<usize>> {
        self.0
            .bounds
            .borrow()
            .chunks_exact(2)
            .map(|pair| pair[0]..pair[1])
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.bounds.borrow().len() < 2
    }

    pub fn epoch(&self) -> u64 {
        self.0.epoch.get()
    }

    /// Open the marker again, adding another range when it is closed.
    /// A marker from an earlier epoch starts over.
    pub fn reopen(&self) {
        dispatch::reopen(self);
    }

    /// Entries of the live journal covered by this marker.
    ///
    /// Empty once the batch the marker belongs to has been delivered; use
    /// [`NotifyEvent::record`](crate::NotifyEvent::record) then.
    pub fn recording(&self) -> Recording {
        Recording::new(dispatch::slice(self))
    }

    pub(crate) fn ptr_eq(&self, other: &Marker) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marker")
            .field("epoch", &self.epoch())
            .field("ranges", &self.ranges())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Journal entries attributed to one marker, with the distinct topics they
/// touched.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    entries: Vec<JournalEntry>,
    topics: Vec<AnyTopic>,
}

impl Recording {
    pub(crate) fn new(entries: Vec<JournalEntry>) -> Self {
        let mut topics = IndexMap::new();
        for entry in &entries {
            if !topics.contains_key(&entry.topic_id) {
                if let Some(topic) = entry.topic() {
                    topics.insert(entry.topic_id, topic);
                }
            }
        }
        Self {
            entries,
            topics: topics.into_values().collect(),
        }
    }

    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Distinct live topics, in order of first access.
    pub fn topics(&self) -> &[AnyTopic] {
        &self.topics
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any recorded access now yields a different result.
    pub fn replay(&self) -> bool {
        replay(&self.entries)
    }

    pub fn into_entries(self) -> Vec<JournalEntry> {
        self.entries
    }
}

/// Open a recording marker at the current end of the journal.
pub fn mark() -> Marker {
    dispatch::mark()
}

/// Close a marker opened with [`mark`] or [`Marker::reopen`].
///
/// Closing a marker that is not open does nothing.
pub fn unmark(marker: &Marker) {
    dispatch::unmark(marker);
}

/// Re-executes every entry and reports whether any result changed.
///
/// Stops at the first mismatch. Reads made while replaying are not
/// journaled. Calls to [`Command`](crate::Command)s always count as
/// changed, they are never executed again.
pub fn replay(entries: &[JournalEntry]) -> bool {
    let _replaying = dispatch::Replaying::enter();
    entries.iter().any(|entry| !entry.is_current())
}

struct Unmark<'a>(&'a Marker);

impl Drop for Unmark<'_> {
    fn drop(&mut self) {
        unmark(self.0);
    }
}

/// Run `f` with a fresh marker open and return its result with the marker.
///
/// The marker is closed even if `f` panics.
pub fn recording<R>(f: impl FnOnce() -> R) -> (R, Marker) {
    let marker = mark();
    let value = {
        let _unmark = Unmark(&marker);
        f()
    };
    (value, marker)
}

/// Whether reads and calls are currently being journaled.
pub fn is_recording() -> bool {
    dispatch::is_recording()
}

/// Fails with [`Error::MutationLocked`] while any marker is open.
///
/// For hosts that forbid mutating topics in the middle of a recorded
/// computation (a render, for example).
pub fn ensure_unlocked() -> Result {
    if dispatch::has_open_markers() {
        return Err(Error::MutationLocked);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wrap;

    #[test]
    fn test_reads_are_journaled_only_while_marked() {
        let topic = wrap(5u32);
        topic.read("value", |v| *v);

        let (value, marker) = recording(|| topic.read("value", |v| *v));
        assert_eq!(value, 5);
        let trace = marker.recording();
        assert_eq!(trace.len(), 1);
        assert_eq!(trace.entries()[0].key(), &crate::Key::from("value"));
        assert_eq!(trace.entries()[0].result::<u32>(), Some(&5));
        assert_eq!(trace.topics(), &[topic.erase()]);
    }

    #[test]
    fn test_nested_markers_split_ranges() {
        let a = wrap(1u32);
        let b = wrap(2u32);

        let outer = mark();
        a.read("a", |v| *v);
        let inner = mark();
        b.read("b", |v| *v);
        unmark(&inner);
        a.read("a", |v| *v);
        unmark(&outer);

        assert_eq!(outer.ranges(), vec![0..3]);
        assert_eq!(inner.ranges(), vec![1..2]);
        assert_eq!(inner.recording().topics(), &[b.erase()]);
    }

    #[test]
    fn test_reopen_adds_disjoint_range() {
        let a = wrap(1u32);
        let marker = mark();
        a.read("a", |v| *v);
        unmark(&marker);

        let other = mark();
        a.read("a", |v| *v);
        unmark(&other);

        marker.reopen();
        a.read("a", |v| *v);
        unmark(&marker);

        assert_eq!(marker.ranges(), vec![0..1, 2..3]);
        assert_eq!(marker.recording().len(), 2);
    }

    #[test]
    fn test_empty_marker_records_nothing() {
        let marker = mark();
        unmark(&marker);
        assert!(marker.is_empty());
        assert!(marker.recording().is_empty());
    }

    #[test]
    fn test_replay_detects_changes() {
        let topic = wrap(String::from("a"));
        let (_, marker) = recording(|| topic.read("text", |s| s.clone()));
        let trace = marker.recording();
        assert!(!trace.replay());

        topic.target().borrow_mut().push('b');
        assert!(trace.replay());
    }

    #[test]
    fn test_replay_of_dropped_topic_is_changed() {
        let topic = wrap(1u32);
        let (_, marker) = recording(|| topic.read("value", |v| *v));
        let entries = marker.recording().into_entries();
        drop(topic);
        assert!(replay(&entries));
    }

    #[test]
    fn test_replay_is_not_journaled() {
        let topic = wrap(1u32);
        let (_, first) = recording(|| topic.read("value", |v| *v));
        let trace = first.recording();

        let (_, second) = recording(|| replay(trace.entries()));
        assert!(second.is_empty());
    }

    #[test]
    fn test_mutation_lock() {
        assert!(ensure_unlocked().is_ok());
        let (result, _) = recording(ensure_unlocked);
        assert_eq!(result, Err(Error::MutationLocked));
        assert!(ensure_unlocked().is_ok());
    }
}
