use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

use crate::{
    NotifyEvent, ObserverHandle, focus,
    internal::dispatch,
    journal::{self, JournalEntry},
};

struct MemoInner<R> {
    compute: Box<dyn Fn() -> R>,
    value: RefCell<Option<R>>,
    trace: RefCell<Vec<JournalEntry>>,
    stale: Cell<bool>,
    recomputes: Cell<usize>,
    listeners: RefCell<Vec<Rc<dyn Fn()>>>,
    observer: ObserverHandle,
}

impl<R: Clone + 'static> MemoInner<R> {
    fn on_batch(&self, event: &NotifyEvent) {
        if self.stale.get() {
            return;
        }
        if !journal::replay(&self.trace.borrow()) {
            tracing::trace!(batch = %event.generation(), "memo still valid");
            return;
        }
        self.stale.set(true);
        let listeners: Vec<_> = self.listeners.borrow().clone();
        for listener in listeners {
            listener();
        }
    }

    fn recompute(&self) -> R {
        let (value, marker) = journal::recording(|| (self.compute)());
        let recording = marker.recording();
        focus(&self.observer, recording.topics());
        *self.trace.borrow_mut() = recording.into_entries();
        *self.value.borrow_mut() = Some(value.clone());
        self.stale.set(false);
        self.recomputes.set(self.recomputes.get() + 1);
        value
    }
}

/// Cached result of a computation over topics.
///
/// The computation runs under a recording marker; the memo then observes
/// exactly the topics it read. When a batch touches one of them the trace is
/// replayed, and only if a recorded read now yields something different is
/// the memo marked stale and its [`on_change`](Memo::on_change) listeners
/// told. The next [`get`](Memo::get) recomputes.
///
/// A memo read inside another recording contributes its own trace to it, so
/// memos can be layered.
///
/// ```rust
/// use observa::{Memo, wrap};
///
/// let items = wrap(vec![1, 2, 3]);
/// let total = {
///     let items = items.clone();
///     Memo::new(move || items.to_vec().iter().sum::<i32>())
/// };
/// assert_eq!(total.get(), 6);
/// assert_eq!(total.get(), 6);
/// assert_eq!(total.recomputes(), 1);
///
/// items.push(4).unwrap();
/// assert_eq!(total.get(), 10);
/// assert_eq!(total.recomputes(), 2);
/// ```
pub struct Memo<R: 'static> {
    inner: Rc<MemoInner<R>>,
}

impl<R: Clone + 'static> Memo<R> {
    pub fn new(compute: impl Fn() -> R + 'static) -> Self {
        let inner = Rc::new_cyclic(|weak: &Weak<MemoInner<R>>| {
            let weak = weak.clone();
            let observer = ObserverHandle::from_fn(move |event| {
                let Some(batch) = event.as_notify() else {
                    return;
                };
                if let Some(inner) = weak.upgrade() {
                    inner.on_batch(batch);
                }
            });
            MemoInner {
                compute: Box::new(compute),
                value: RefCell::new(None),
                trace: RefCell::new(Vec::new()),
                stale: Cell::new(true),
                recomputes: Cell::new(0),
                listeners: RefCell::new(Vec::new()),
                observer,
            }
        });
        Self { inner }
    }

    /// The cached value, recomputed first if any recorded read changed.
    pub fn get(&self) -> R {
        let inner = &self.inner;
        if !inner.stale.get() && !journal::replay(&inner.trace.borrow()) {
            let cached = inner.value.borrow().clone();
            if let Some(value) = cached {
                dispatch::extend(&inner.trace.borrow());
                return value;
            }
        }
        inner.recompute()
    }

    /// The cached value without validating it.
    pub fn peek(&self) -> Option<R> {
        self.inner.value.borrow().clone()
    }

    /// Force the next [`get`](Memo::get) to recompute.
    pub fn invalidate(&self) {
        self.inner.stale.set(true);
    }

    pub fn is_stale(&self) -> bool {
        self.inner.stale.get()
    }

    /// Call `f` whenever a delivered batch invalidates the memo.
    pub fn on_change(&self, f: impl Fn() + 'static) {
        self.inner.listeners.borrow_mut().push(Rc::new(f));
    }

    pub fn recomputes(&self) -> usize {
        self.inner.recomputes.get()
    }

    /// The observer attached to the memo's dependencies.
    pub fn observer(&self) -> &ObserverHandle {
        &self.inner.observer
    }
}

impl<R: 'static> Clone for Memo<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: fmt::Debug + 'static> fmt::Debug for Memo<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("value", &self.inner.value.borrow())
            .field("stale", &self.inner.stale.get())
            .field("observer", &self.inner.observer.id())
            .finish()
    }
}

pub fn memo<R: Clone + 'static>(compute: impl Fn() -> R + 'static) -> Memo<R> {
    Memo::new(compute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{flush, journal, wrap};

    struct Pair {
        left: u32,
        right: u32,
    }

    #[test]
    fn test_memo_caches_until_dependency_changes() {
        let topic = wrap(2u32);
        let doubled = {
            let topic = topic.clone();
            memo(move || topic.read("value", |v| *v * 2))
        };
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.get(), 4);
        assert_eq!(doubled.recomputes(), 1);

        topic.write("value", |v| *v = 5);
        assert_eq!(doubled.get(), 10);
        assert_eq!(doubled.recomputes(), 2);
    }

    #[test]
    fn test_memo_observes_what_it_read() {
        let topic = wrap(1u32);
        let value = {
            let topic = topic.clone();
            memo(move || topic.read("value", |v| *v))
        };
        value.get();
        assert_eq!(value.observer().topics(), vec![topic.erase()]);
    }

    #[test]
    fn test_unrelated_change_keeps_memo_valid() {
        let pair = wrap(Pair { left: 1, right: 1 });
        let left = {
            let pair = pair.clone();
            memo(move || pair.read("left", |p| p.left))
        };
        let changes = Rc::new(Cell::new(0));
        {
            let changes = changes.clone();
            left.on_change(move || changes.set(changes.get() + 1));
        }
        left.get();

        pair.write("right", |p| p.right = 7);
        flush();
        assert_eq!(changes.get(), 0);
        assert!(!left.is_stale());

        pair.write("left", |p| p.left = 3);
        flush();
        assert_eq!(changes.get(), 1);
        assert!(left.is_stale());
        assert_eq!(left.get(), 3);
    }

    #[test]
    fn test_nested_memo_extends_outer_recording() {
        let topic = wrap(1u32);
        let inner = {
            let topic = topic.clone();
            memo(move || topic.read("value", |v| *v))
        };
        inner.get();

        let (_, marker) = journal::recording(|| inner.get());
        let trace = marker.recording();
        assert_eq!(trace.topics(), &[topic.erase()]);
    }

    #[test]
    fn test_invalidate_forces_recompute() {
        let topic = wrap(1u32);
        let value = {
            let topic = topic.clone();
            memo(move || topic.read("value", |v| *v))
        };
        value.get();
        value.invalidate();
        value.get();
        assert_eq!(value.recomputes(), 2);
        assert_eq!(value.peek(), Some(1));
    }
}
