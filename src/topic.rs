use std::{
    any::{Any, type_name},
    cell::{Cell, RefCell},
    fmt,
    hash::{Hash, Hasher},
    rc::{Rc, Weak},
};

use crate::{
    Error, Generation, Key, Result, Same, TopicId,
    internal::{dispatch, registry, topics},
    journal::{Accessor, JournalEntry},
};

/// Types whose members can be announced as changed.
///
/// `keys` lists every observable member of the current value. It is used
/// when a whole value is replaced ([`Topic::reset`]) and by
/// [`Command`](crate::Command)s that don't declare their changes.
///
/// Usually derived with `#[derive(Observable)]`.
pub trait Observable: 'static {
    fn keys(&self) -> Vec<Key>;
}

pub(crate) struct TopicState {
    id: TopicId,
    generation: Cell<Generation>,
    frozen: Cell<bool>,
    origin: Option<usize>,
}

impl TopicState {
    fn new(origin: Option<usize>) -> Self {
        Self {
            id: TopicId::next(),
            generation: Cell::new(Generation::current()),
            frozen: Cell::new(false),
            origin,
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> TopicId {
        self.id
    }

    #[inline]
    pub(crate) fn generation(&self) -> Generation {
        self.generation.get()
    }

    pub(crate) fn set_generation(&self, generation: Generation) {
        self.generation.set(generation);
    }

    #[inline]
    pub(crate) fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub(crate) fn freeze(&self) {
        self.frozen.set(true);
    }
}

impl Drop for TopicState {
    fn drop(&mut self) {
        registry::forget_topic(self.id);
        topics::remove(self.id, self.origin);
    }
}

pub(crate) struct TopicInner<T> {
    pub(crate) state: TopicState,
    pub(crate) target: Rc<RefCell<T>>,
}

/// Runs `f` against the target of a topic that may have been dropped.
///
/// Returns `None` when the topic is gone or its target is mutably borrowed.
pub(crate) fn peek<T, V>(topic: &Weak<TopicInner<T>>, f: impl FnOnce(&T) -> V) -> Option<V> {
    let inner = topic.upgrade()?;
    let target = inner.target.try_borrow().ok()?;
    let value = f(&target);
    Some(value)
}

pub(crate) trait ErasedTopic {
    fn state(&self) -> &TopicState;
    fn type_name(&self) -> &'static str;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

impl<T: 'static> ErasedTopic for TopicInner<T> {
    fn state(&self) -> &TopicState {
        &self.state
    }

    fn type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// An observable value.
///
/// A topic owns (or, when created with [`trace`], shares) its target value
/// and intercepts access to it:
///
/// - reads made through [`read`](Topic::read) are journaled while a
///   recording is open, so they can be replayed later,
/// - writes made through [`write`](Topic::write) or
///   [`update`](Topic::update) queue the changed keys for the next batch,
/// - instrumented methods ([`query`](Topic::query),
///   [`command`](Topic::command)) additionally raise trap events.
///
/// Handles are cheap to clone; all clones refer to the same topic. The topic
/// is dropped with its last handle, and its subscriptions go with it.
///
/// Topics are bound to the thread they were created on.
///
/// # Example
///
/// ```rust
/// use observa::{Topic, wrap};
///
/// struct Counter { count: u32 }
///
/// let counter: Topic<Counter> = wrap(Counter { count: 0 });
/// assert!(counter.write("count", |c| c.count += 1));
/// assert_eq!(counter.read("count", |c| c.count), 1);
/// ```
pub struct Topic<T: 'static> {
    pub(crate) inner: Rc<TopicInner<T>>,
}

impl<T: 'static> Topic<T> {
    /// Wrap a value, allocating a fresh identity.
    pub fn new(value: T) -> Self {
        Self::create(Rc::new(RefCell::new(value)), None)
    }

    /// Observe a shared cell without taking it over.
    ///
    /// Other owners of `shared` keep unobserved access to the value. Tracing
    /// the same cell twice returns the topic created the first time.
    pub fn trace(shared: &Rc<RefCell<T>>) -> Self {
        let origin = Rc::as_ptr(shared) as *const () as usize;
        if let Some(topic) = topics::traced(origin).and_then(|t| t.downcast::<T>().ok()) {
            return topic;
        }
        Self::create(Rc::clone(shared), Some(origin))
    }

    fn create(target: Rc<RefCell<T>>, origin: Option<usize>) -> Self {
        let inner = Rc::new(TopicInner {
            state: TopicState::new(origin),
            target,
        });
        let topic = Topic { inner };
        topics::insert(topic.id(), topic.downgrade(), origin);
        tracing::trace!(topic = %topic.id(), r#type = type_name::<T>(), "topic created");
        topic
    }

    #[inline]
    pub fn id(&self) -> TopicId {
        self.inner.state.id()
    }

    /// Generation of the last delivered batch that included this topic.
    #[inline]
    pub fn generation(&self) -> Generation {
        self.inner.state.generation()
    }

    /// Whether the topic has been [frozen](crate::freeze).
    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.inner.state.is_frozen()
    }

    /// Read a member of the target.
    ///
    /// While a recording is open the read is journaled under `key`, together
    /// with the returned value. Replaying the entry calls `f` again and
    /// compares the outcomes with [`Same`].
    ///
    /// # Panics
    ///
    /// Panics if the target is mutably borrowed, i.e. when called from
    /// inside [`update`](Topic::update) on the same topic.
    pub fn read<V, F>(&self, key: impl Into<Key>, f: F) -> V
    where
        V: Same + Clone + 'static,
        F: Fn(&T) -> V + 'static,
    {
        self.read_with(key, f, V::same)
    }

    /// Like [`read`](Topic::read), comparing replayed values with `eq`.
    pub fn read_with<V, F>(&self, key: impl Into<Key>, f: F, eq: fn(&V, &V) -> bool) -> V
    where
        V: Clone + 'static,
        F: Fn(&T) -> V + 'static,
    {
        let value = f(&self.inner.target.borrow());
        if dispatch::is_recording() {
            let recorded = Rc::new(value.clone());
            let expected = Rc::clone(&recorded);
            let weak = Rc::downgrade(&self.inner);
            let verify = move || peek(&weak, |target| eq(&f(target), &expected)).unwrap_or(false);
            dispatch::record(JournalEntry::new(
                self.downgrade(),
                self.id(),
                Accessor::Read(key.into()),
                recorded,
                None,
                Rc::new(verify),
            ));
        }
        value
    }

    /// Access the target without journaling.
    pub fn untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.target.borrow())
    }

    /// Mutate one member of the target.
    ///
    /// Returns `false`, without mutating or notifying, if the topic is frozen
    /// or its target is already borrowed.
    pub fn write(&self, key: impl Into<Key>, f: impl FnOnce(&mut T)) -> bool {
        match self.update([key], f) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(topic = %self.id(), error = %err, "write rejected");
                false
            }
        }
    }

    /// Mutate the target and announce `keys` as changed.
    pub fn update<K, R>(&self, keys: impl IntoIterator<Item = K>, f: impl FnOnce(&mut T) -> R) -> Result<R>
    where
        K: Into<Key>,
    {
        let result = self.mutate(f)?;
        self.notify(keys);
        Ok(result)
    }

    pub(crate) fn mutate<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let id = self.id();
        if self.is_frozen() {
            return Err(Error::FrozenTopic(id));
        }
        let mut target = self
            .inner
            .target
            .try_borrow_mut()
            .map_err(|_| Error::TopicBorrowed(id))?;
        Ok(f(&mut target))
    }

    /// Announce `keys` as changed without touching the target.
    ///
    /// Used for changes the topic can't see, e.g. made through
    /// [`target`](Topic::target).
    pub fn notify<K: Into<Key>>(&self, keys: impl IntoIterator<Item = K>) {
        dispatch::changed(keys.into_iter().map(Into::into), self.erase());
    }

    /// Replace the whole target in one batched change.
    ///
    /// The keys of both the old and the new value are announced.
    pub fn reset(&self, state: T) -> bool
    where
        T: Observable,
    {
        let changed = self.mutate(|target| {
            let mut keys = target.keys();
            keys.extend(state.keys());
            *target = state;
            keys
        });
        match changed {
            Ok(keys) => {
                self.notify(keys);
                true
            }
            Err(err) => {
                tracing::debug!(topic = %self.id(), error = %err, "reset rejected");
                false
            }
        }
    }

    /// The shared cell holding the target. Changes made through it are not
    /// observed.
    pub fn target(&self) -> Rc<RefCell<T>> {
        Rc::clone(&self.inner.target)
    }

    /// Forget the value type.
    pub fn erase(&self) -> AnyTopic {
        AnyTopic(self.inner.clone())
    }

    pub(crate) fn downgrade(&self) -> WeakTopic {
        let weak = Rc::downgrade(&self.inner);
        WeakTopic(weak)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: 'static> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for Topic<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: 'static> Eq for Topic<T> {}

impl<T: 'static> Hash for Topic<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl<T: 'static> Same for Topic<T> {
    fn same(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: 'static> fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Topic")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .field("type", &type_name::<T>())
            .finish()
    }
}

impl<T: 'static> From<&Rc<RefCell<T>>> for Topic<T> {
    fn from(shared: &Rc<RefCell<T>>) -> Self {
        Topic::trace(shared)
    }
}

/// A topic with its value type erased.
///
/// Events report the topics they carry as `AnyTopic`. Use
/// [`downcast`](AnyTopic::downcast) to get the typed handle back.
#[derive(Clone)]
pub struct AnyTopic(pub(crate) Rc<dyn ErasedTopic>);

impl AnyTopic {
    #[inline]
    pub fn id(&self) -> TopicId {
        self.0.state().id()
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.0.state().generation()
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.0.state().is_frozen()
    }

    /// Name of the wrapped value's type.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    pub fn downcast<T: 'static>(&self) -> Result<Topic<T>> {
        let id = self.id();
        Rc::clone(&self.0)
            .into_any()
            .downcast::<TopicInner<T>>()
            .map(|inner| Topic { inner })
            .map_err(|_| Error::TopicType {
                id,
                expected: type_name::<T>(),
            })
    }

    pub(crate) fn state(&self) -> &TopicState {
        self.0.state()
    }

    pub(crate) fn downgrade(&self) -> WeakTopic {
        WeakTopic(Rc::downgrade(&self.0))
    }
}

impl PartialEq for AnyTopic {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for AnyTopic {}

impl Hash for AnyTopic {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for AnyTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyTopic")
            .field("id", &self.id())
            .field("generation", &self.generation())
            .field("type", &self.type_name())
            .finish()
    }
}

#[derive(Clone)]
pub(crate) struct WeakTopic(Weak<dyn ErasedTopic>);

impl WeakTopic {
    pub(crate) fn upgrade(&self) -> Option<AnyTopic> {
        self.0.upgrade().map(AnyTopic)
    }

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

/// Anything that names a live topic.
pub trait AsTopic {
    fn topic_id(&self) -> TopicId;
    fn as_topic(&self) -> AnyTopic;
}

impl<T: 'static> AsTopic for Topic<T> {
    fn topic_id(&self) -> TopicId {
        self.id()
    }

    fn as_topic(&self) -> AnyTopic {
        self.erase()
    }
}

impl AsTopic for AnyTopic {
    fn topic_id(&self) -> TopicId {
        self.id()
    }

    fn as_topic(&self) -> AnyTopic {
        self.clone()
    }
}

impl<A: AsTopic + ?Sized> AsTopic for &A {
    fn topic_id(&self) -> TopicId {
        (**self).topic_id()
    }

    fn as_topic(&self) -> AnyTopic {
        (**self).as_topic()
    }
}

/// Wrap a value into a new topic.
pub fn wrap<T: 'static>(value: T) -> Topic<T> {
    Topic::new(value)
}

/// Observe a shared cell. See [`Topic::trace`].
pub fn trace<T: 'static>(shared: &Rc<RefCell<T>>) -> Topic<T> {
    Topic::trace(shared)
}

/// Resolve a live topic from its identity.
pub fn lookup(id: TopicId) -> Result<AnyTopic> {
    topics::get(id).ok_or(Error::InvalidTopic(id))
}

/// Replace the whole value of a topic. See [`Topic::reset`].
pub fn reset<T: Observable>(topic: &Topic<T>, state: T) -> bool {
    topic.reset(state)
}

/// Announce changes without mutating. See [`Topic::notify`].
pub fn notify<K: Into<Key>>(topic: &impl AsTopic, keys: impl IntoIterator<Item = K>) {
    dispatch::changed(keys.into_iter().map(Into::into), topic.as_topic());
}

pub fn id(topic: &impl AsTopic) -> TopicId {
    topic.topic_id()
}

pub fn generation(topic: &impl AsTopic) -> Generation {
    topic.as_topic().generation()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Point {
        x: i32,
        y: i32,
    }

    impl Observable for Point {
        fn keys(&self) -> Vec<Key> {
            vec!["x".into(), "y".into()]
        }
    }

    #[test]
    fn test_wrap_allocates_identity() {
        let a = wrap(Point { x: 0, y: 0 });
        let b = wrap(Point { x: 0, y: 0 });
        assert_ne!(a.id(), b.id());
        assert_eq!(a.id(), a.clone().id());
        assert_eq!(id(&a), a.id());
    }

    #[test]
    fn test_read_and_write() {
        let p = wrap(Point { x: 1, y: 2 });
        assert!(p.write("x", |p| p.x = 10));
        assert_eq!(p.read("x", |p| p.x), 10);
        assert_eq!(p.untracked(|p| p.y), 2);
    }

    #[test]
    fn test_trace_is_idempotent() {
        let shared = Rc::new(RefCell::new(Point { x: 0, y: 0 }));
        let a = trace(&shared);
        let b = trace(&shared);
        assert!(a.ptr_eq(&b));

        shared.borrow_mut().x = 5;
        assert_eq!(a.untracked(|p| p.x), 5);
    }

    #[test]
    fn test_lookup_and_downcast() {
        let p = wrap(Point { x: 3, y: 4 });
        let any = lookup(p.id()).unwrap();
        let typed = any.downcast::<Point>().unwrap();
        assert!(typed.ptr_eq(&p));

        let err = any.downcast::<String>().unwrap_err();
        assert!(matches!(err, Error::TopicType { .. }));
    }

    #[test]
    fn test_lookup_dead_topic() {
        let p = wrap(Point { x: 0, y: 0 });
        let id = p.id();
        drop(p);
        assert_eq!(lookup(id).unwrap_err(), Error::InvalidTopic(id));
    }

    #[test]
    fn test_update_rejects_reentrant_borrow() {
        let p = wrap(Point { x: 0, y: 0 });
        let inner = p.clone();
        let result = p.update(["x"], |_| inner.update(["y"], |p| p.y = 1));
        assert_eq!(result.unwrap(), Err(Error::TopicBorrowed(p.id())));
    }

    #[test]
    fn test_reset_replaces_value() {
        let p = wrap(Point { x: 1, y: 1 });
        assert!(reset(&p, Point { x: 7, y: 8 }));
        assert_eq!(p.untracked(|p| (p.x, p.y)), (7, 8));
    }

    #[test]
    fn test_downgrade_follows_topic_lifetime() {
        let p = wrap(Point { x: 0, y: 0 });
        let weak = p.downgrade();
        assert!(weak.is_alive());
        assert_eq!(weak.upgrade(), Some(p.erase()));

        drop(p);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
