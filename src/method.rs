//! Instrumented methods.
//!
//! A [`Query`] reads from the target, a [`Command`] mutates it. Calling
//! either through a topic raises a [`TrapEvent`] for the topic's observers
//! and, while recording, journals the call with its arguments.
//!
//! Instrumentation is cached per function and configuration: building a
//! `Query` or `Command` twice from the same non-capturing closure or `fn`
//! item, with the same key and the same comparer or change keys, yields the
//! same method with the same [`MethodId`]. Capturing closures get a fresh
//! method each time.

use std::{
    any::{Any, TypeId},
    cell::RefCell,
    collections::HashMap,
    fmt,
    rc::Rc,
};

use crate::{
    Error, Key, MethodId, Observable, Result, Same, Topic, TrapEvent,
    internal::{dispatch, registry},
    journal::{Accessor, JournalEntry},
};

/// Everything besides the function that shapes an instrumented method.
#[derive(PartialEq, Eq, Hash)]
enum Settings {
    Comparer(usize),
    Changes(Vec<Key>),
    Derived(usize),
}

#[derive(PartialEq, Eq, Hash)]
struct MethodKey {
    function: TypeId,
    key: Key,
    settings: Settings,
}

thread_local! {
    static METHODS: RefCell<HashMap<MethodKey, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

fn instrument<F: 'static, M: 'static>(
    key: &Key,
    settings: Settings,
    build: impl FnOnce() -> M,
) -> Rc<M> {
    if size_of::<F>() != 0 {
        return Rc::new(build());
    }
    let cache_key = MethodKey {
        function: TypeId::of::<F>(),
        key: key.clone(),
        settings,
    };
    let cached = METHODS.with(|m| m.borrow().get(&cache_key).cloned());
    if let Some(method) = cached.and_then(|m| m.downcast::<M>().ok()) {
        return method;
    }
    let method = Rc::new(build());
    let shared: Rc<dyn Any> = method.clone();
    METHODS.with(|m| m.borrow_mut().insert(cache_key, shared));
    method
}

struct QueryInner<T, A, R> {
    id: MethodId,
    key: Key,
    f: Box<dyn Fn(&T, A) -> R>,
    eq: fn(&R, &R) -> bool,
}

/// A read-only method of `T` taking arguments `A` (a tuple) and returning `R`.
pub struct Query<T, A, R> {
    inner: Rc<QueryInner<T, A, R>>,
}

impl<T: 'static, A: 'static, R: 'static> Query<T, A, R> {
    pub fn new<F>(key: impl Into<Key>, f: F) -> Self
    where
        F: Fn(&T, A) -> R + 'static,
        R: Same,
    {
        Self::with_comparer(key, f, R::same)
    }

    /// Like [`new`](Query::new), comparing replayed results with `eq`.
    pub fn with_comparer<F>(key: impl Into<Key>, f: F, eq: fn(&R, &R) -> bool) -> Self
    where
        F: Fn(&T, A) -> R + 'static,
    {
        let key = key.into();
        let settings = Settings::Comparer(eq as usize);
        let inner = instrument::<F, _>(&key, settings, || QueryInner {
            id: MethodId::next(),
            key: key.clone(),
            f: Box::new(f),
            eq,
        });
        Self { inner }
    }

    pub fn id(&self) -> MethodId {
        self.inner.id
    }

    pub fn key(&self) -> &Key {
        &self.inner.key
    }
}

impl<T, A, R> Clone for Query<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, A, R> PartialEq for Query<T, A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T, A, R> fmt::Debug for Query<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .finish()
    }
}

enum Changes<T> {
    Keys(Vec<Key>),
    Derived(fn(&T) -> Vec<Key>),
}

struct CommandInner<T, A, R> {
    id: MethodId,
    key: Key,
    f: Box<dyn Fn(&mut T, A) -> R>,
    changes: Changes<T>,
}

/// A mutating method of `T` taking arguments `A` (a tuple) and returning `R`.
///
/// After it runs, its changed keys are queued for the next batch: the keys
/// given to [`with_changes`](Command::with_changes), or every key of the
/// target for [`new`](Command::new).
pub struct Command<T, A, R> {
    inner: Rc<CommandInner<T, A, R>>,
}

impl<T: 'static, A: 'static, R: 'static> Command<T, A, R> {
    pub fn new<F>(key: impl Into<Key>, f: F) -> Self
    where
        F: Fn(&mut T, A) -> R + 'static,
        T: Observable,
    {
        Self::build::<F>(key.into(), f, Changes::Derived(T::keys))
    }

    pub fn with_changes<F>(key: impl Into<Key>, changes: Vec<Key>, f: F) -> Self
    where
        F: Fn(&mut T, A) -> R + 'static,
    {
        Self::build::<F>(key.into(), f, Changes::Keys(changes))
    }

    fn build<F>(key: Key, f: F, changes: Changes<T>) -> Self
    where
        F: Fn(&mut T, A) -> R + 'static,
    {
        let settings = match &changes {
            Changes::Keys(keys) => Settings::Changes(keys.clone()),
            Changes::Derived(keys) => Settings::Derived(*keys as usize),
        };
        let inner = instrument::<F, _>(&key, settings, || CommandInner {
            id: MethodId::next(),
            key: key.clone(),
            f: Box::new(f),
            changes,
        });
        Self { inner }
    }

    pub fn id(&self) -> MethodId {
        self.inner.id
    }

    pub fn key(&self) -> &Key {
        &self.inner.key
    }
}

impl<T, A, R> Clone for Command<T, A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, A, R> PartialEq for Command<T, A, R> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<T, A, R> fmt::Debug for Command<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.inner.id)
            .field("key", &self.inner.key)
            .finish()
    }
}

/// Hands `result` to the trap observers of `topic` and returns the result
/// they leave in the event.
fn trap<T: 'static, R: Clone + 'static>(
    topic: &Topic<T>,
    method: MethodId,
    key: &Key,
    args: Rc<dyn Any>,
    result: R,
) -> R {
    let id = topic.id();
    if !registry::is_topic_active(id) {
        return result;
    }
    let fallback = result.clone();
    let event = TrapEvent::new(topic.erase(), method, key.clone(), args, result);
    for (observer, cell) in registry::observers_of(id) {
        if event.is_frozen() {
            break;
        }
        if registry::has(id, observer) {
            cell.trap(&event);
        }
    }
    event.into_result().unwrap_or(fallback)
}

impl<T: 'static> Topic<T> {
    /// Call a read-only method.
    ///
    /// # Panics
    ///
    /// Panics if the target is mutably borrowed, or if a trap observer
    /// panics.
    pub fn query<A, R>(&self, method: &Query<T, A, R>, args: A) -> R
    where
        A: Clone + 'static,
        R: Clone + 'static,
    {
        let m = &method.inner;
        let raw = (m.f)(&self.inner.target.borrow(), args.clone());
        let args = Rc::new(args);
        let result = trap(self, m.id, &m.key, args.clone(), raw);

        if dispatch::is_recording() {
            let recorded = Rc::new(result.clone());
            let expected = Rc::clone(&recorded);
            let weak = Rc::downgrade(&self.inner);
            let (m, replay_args) = (Rc::clone(m), Rc::clone(&args));
            let verify = move || {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                let topic = Topic { inner };
                let raw = match topic.inner.target.try_borrow() {
                    Ok(target) => (m.f)(&target, (*replay_args).clone()),
                    Err(_) => return false,
                };
                let result = trap(&topic, m.id, &m.key, replay_args.clone(), raw);
                (m.eq)(&result, &expected)
            };
            dispatch::record(JournalEntry::new(
                self.downgrade(),
                self.id(),
                Accessor::Call {
                    method: method.id(),
                    key: method.key().clone(),
                },
                recorded,
                Some(args),
                Rc::new(verify),
            ));
        }
        result
    }

    /// Call a mutating method.
    ///
    /// Fails with [`Error::FrozenTopic`] on a frozen topic and with
    /// [`Error::TopicBorrowed`] when the target is already borrowed; the
    /// method doesn't run in either case.
    ///
    /// While recording, the call is journaled like a query, but a recorded
    /// command is never run again: [`journal::replay`](crate::journal::replay)
    /// always counts it as changed.
    pub fn command<A, R>(&self, method: &Command<T, A, R>, args: A) -> Result<R>
    where
        A: Clone + 'static,
        R: Clone + 'static,
    {
        let m = &method.inner;
        let id = self.id();
        if self.is_frozen() {
            return Err(Error::FrozenTopic(id));
        }
        let (raw, keys) = {
            let mut target = self
                .inner
                .target
                .try_borrow_mut()
                .map_err(|_| Error::TopicBorrowed(id))?;
            let raw = (m.f)(&mut target, args.clone());
            let keys = match &m.changes {
                Changes::Keys(keys) => keys.clone(),
                Changes::Derived(keys) => keys(&target),
            };
            (raw, keys)
        };
        self.notify(keys);

        let args = Rc::new(args);
        let result = trap(self, m.id, &m.key, args.clone(), raw);

        if dispatch::is_recording() {
            dispatch::record(JournalEntry::new(
                self.downgrade(),
                id,
                Accessor::Call {
                    method: m.id,
                    key: m.key.clone(),
                },
                Rc::new(result.clone()),
                Some(args),
                Rc::new(|| false),
            ));
        }
        Ok(result)
    }
}

/// A function made observable.
///
/// Calls go through [`Topic::query`], so observers attached to
/// [`topic`](Thunk::topic) can trap and override them, and recorded calls
/// replay.
pub struct Thunk<A: 'static, R: 'static> {
    topic: Topic<Box<dyn Fn(A) -> R>>,
    method: Query<Box<dyn Fn(A) -> R>, A, R>,
}

impl<A, R> Thunk<A, R>
where
    A: Clone + 'static,
    R: Same + Clone + 'static,
{
    pub fn new(f: impl Fn(A) -> R + 'static) -> Self {
        let f: Box<dyn Fn(A) -> R> = Box::new(f);
        Self {
            topic: Topic::new(f),
            method: Query::new("call", |f: &Box<dyn Fn(A) -> R>, args: A| f(args)),
        }
    }

    pub fn call(&self, args: A) -> R {
        self.topic.query(&self.method, args)
    }

    pub fn topic(&self) -> &Topic<Box<dyn Fn(A) -> R>> {
        &self.topic
    }
}

impl<A: 'static, R: 'static> Clone for Thunk<A, R> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            method: self.method.clone(),
        }
    }
}

/// Make a function observable. See [`Thunk`].
pub fn thunk<A, R>(f: impl Fn(A) -> R + 'static) -> Thunk<A, R>
where
    A: Clone + 'static,
    R: Same + Clone + 'static,
{
    Thunk::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObserverHandle, ReflectionEvent, journal, on, wrap};

    struct Counter {
        count: u32,
    }

    impl Observable for Counter {
        fn keys(&self) -> Vec<Key> {
            vec!["count".into()]
        }
    }

    fn increment() -> Command<Counter, (), u32> {
        Command::new("increment", |c: &mut Counter, (): ()| {
            c.count += 1;
            c.count
        })
    }

    fn plus() -> Query<Counter, (u32,), u32> {
        Query::new("plus", |c: &Counter, (n,): (u32,)| c.count + n)
    }

    fn offset(by: u32) -> Query<Counter, (), u32> {
        Query::new("offset", move |c: &Counter, (): ()| c.count + by)
    }

    #[test]
    fn test_instrumentation_is_cached_per_function() {
        assert_eq!(increment(), increment());
        assert_eq!(plus().id(), plus().id());

        let a = offset(3);
        let b = offset(3);
        assert_ne!(a.id(), b.id());
    }

    fn parity(c: &Counter, (): ()) -> u32 {
        c.count % 2
    }

    fn always_same(_: &u32, _: &u32) -> bool {
        true
    }

    fn exact(a: &u32, b: &u32) -> bool {
        a == b
    }

    fn bump(c: &mut Counter, (): ()) {
        c.count += 1;
    }

    #[test]
    fn test_queries_from_one_function_keep_their_comparer() {
        let lenient = Query::with_comparer("parity", parity, always_same);
        let strict = Query::with_comparer("parity", parity, exact);
        assert_ne!(lenient.id(), strict.id());
        assert_eq!(strict.id(), Query::with_comparer("parity", parity, exact).id());
        assert_ne!(strict.id(), Query::with_comparer("odd", parity, exact).id());

        let counter = wrap(Counter { count: 1 });
        let (_, marker) = journal::recording(|| {
            counter.query(&lenient, ());
            counter.query(&strict, ())
        });
        let trace = marker.recording();
        assert!(!trace.replay());

        counter.target().borrow_mut().count = 2;
        assert!(!journal::replay(&trace.entries()[..1]));
        assert!(trace.replay());
    }

    #[test]
    fn test_commands_from_one_function_keep_their_changes() {
        let a = Command::with_changes("bump", vec!["a".into()], bump);
        let b = Command::with_changes("bump", vec!["b".into()], bump);
        assert_ne!(a.id(), b.id());

        let counter = wrap(Counter { count: 0 });
        let keys = Rc::new(RefCell::new(Vec::new()));
        let obs = {
            let keys = keys.clone();
            ObserverHandle::from_fn(move |event| {
                if let Some(batch) = event.as_notify() {
                    keys.borrow_mut().extend(batch.keys().cloned());
                }
            })
        };
        on(&counter, &obs);

        counter.command(&b, ()).unwrap();
        crate::flush();
        assert_eq!(*keys.borrow(), vec![Key::from("b")]);
        assert_eq!(counter.untracked(|c| c.count), 1);
    }

    #[test]
    fn test_command_mutates_and_returns() {
        let counter = wrap(Counter { count: 0 });
        assert_eq!(counter.command(&increment(), ()), Ok(1));
        assert_eq!(counter.query(&plus(), (10,)), 11);
    }

    #[test]
    fn test_command_on_frozen_topic() {
        let counter = wrap(Counter { count: 0 });
        crate::freeze(&counter);
        assert_eq!(
            counter.command(&increment(), ()),
            Err(Error::FrozenTopic(counter.id()))
        );
        assert_eq!(counter.untracked(|c| c.count), 0);
    }

    #[test]
    fn test_trap_overrides_result() {
        let counter = wrap(Counter { count: 0 });
        let obs = ObserverHandle::from_fn(|event| {
            if let ReflectionEvent::Trap(trap) = event {
                trap.set_result(999u32).unwrap();
            }
        });
        on(&counter, &obs);
        assert_eq!(counter.command(&increment(), ()), Ok(999));
        assert_eq!(counter.untracked(|c| c.count), 1);
    }

    #[test]
    fn test_frozen_trap_stops_the_chain() {
        let counter = wrap(Counter { count: 5 });
        let first = ObserverHandle::from_fn(|event| {
            if let Some(trap) = event.as_trap() {
                trap.set_result(1u32).unwrap();
                trap.freeze();
            }
        });
        let second = ObserverHandle::from_fn(|event| {
            if let Some(trap) = event.as_trap() {
                trap.set_result(2u32).unwrap();
            }
        });
        on(&counter, &first);
        on(&counter, &second);
        assert_eq!(counter.query(&plus(), (0,)), 1);
    }

    #[test]
    fn test_trap_sees_arguments() {
        let counter = wrap(Counter { count: 1 });
        let obs = ObserverHandle::from_fn(|event| {
            if let Some(trap) = event.as_trap() {
                let (n,) = trap.args::<(u32,)>().copied().unwrap_or_default();
                trap.set_result(n * 100).unwrap();
            }
        });
        on(&counter, &obs);
        assert_eq!(counter.query(&plus(), (7,)), 700);
    }

    #[test]
    fn test_query_replays_with_arguments() {
        let counter = wrap(Counter { count: 1 });
        let (value, marker) = journal::recording(|| counter.query(&plus(), (1,)));
        assert_eq!(value, 2);

        let trace = marker.recording();
        assert_eq!(trace.entries()[0].args::<(u32,)>(), Some(&(1,)));
        assert!(!trace.replay());

        counter.target().borrow_mut().count = 5;
        assert!(trace.replay());
    }

    #[test]
    fn test_recorded_command_replays_as_changed() {
        let counter = wrap(Counter { count: 0 });
        let (_, marker) = journal::recording(|| counter.command(&increment(), ()));
        assert!(marker.recording().replay());
        assert_eq!(counter.untracked(|c| c.count), 1);
    }

    #[test]
    fn test_thunk() {
        let double = thunk(|x: u32| x * 2);
        assert_eq!(double.call(4), 8);

        let obs = ObserverHandle::from_fn(|event| {
            if let Some(trap) = event.as_trap() {
                trap.set_result(0u32).unwrap();
            }
        });
        on(double.topic(), &obs);
        assert_eq!(double.call(4), 0);
    }
}
