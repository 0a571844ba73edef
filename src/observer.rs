use std::{fmt, rc::Rc, rc::Weak};

use crate::{
    NotifyEvent, ObserverId, ReflectionEvent, TrapEvent,
    internal::registry,
    topic::AnyTopic,
};

/// Receives events of the topics it is attached to.
///
/// Both methods default to doing nothing, so an observer only implements
/// what it is interested in.
///
/// - `on_notify` runs once per delivered batch that changed at least one of
///   the observer's topics, regardless of how many of them changed.
/// - `on_trap` runs synchronously for each instrumented call on any of the
///   observer's topics, and may override the call's result.
///
/// A panic in `on_notify` is caught and logged, see
/// [`PanicPolicy`](crate::PanicPolicy). A panic in `on_trap` propagates to
/// the caller of the instrumented method.
pub trait Observer: 'static {
    fn on_notify(&self, event: &NotifyEvent) {
        let _e = event;
    }

    fn on_trap(&self, event: &TrapEvent) {
        let _e = event;
    }
}

/// Observer built from a closure receiving both event kinds.
pub struct FnObserver<F>(F);

impl<F> Observer for FnObserver<F>
where
    F: Fn(&ReflectionEvent<'_>) + 'static,
{
    fn on_notify(&self, event: &NotifyEvent) {
        (self.0)(&ReflectionEvent::Notify(event));
    }

    fn on_trap(&self, event: &TrapEvent) {
        (self.0)(&ReflectionEvent::Trap(event));
    }
}

pub(crate) struct ObserverCell {
    id: ObserverId,
    observer: Box<dyn Observer>,
}

impl ObserverCell {
    pub(crate) fn notify(&self, event: &NotifyEvent) {
        self.observer.on_notify(event);
    }

    pub(crate) fn trap(&self, event: &TrapEvent) {
        self.observer.on_trap(event);
    }
}

impl Drop for ObserverCell {
    fn drop(&mut self) {
        registry::forget_observer(self.id);
    }
}

/// Owning handle to a registered observer.
///
/// The registry only keeps weak references: once the last handle is dropped
/// the observer is detached from all its topics. Clones share the same
/// observer and identity.
///
/// # Example
///
/// ```rust
/// use observa::{ObserverHandle, on, wrap};
///
/// let topic = wrap(0u32);
/// let observer = ObserverHandle::from_fn(|event| {
///     if let Some(batch) = event.as_notify() {
///         println!("batch {} changed {} keys", batch.generation(), batch.keys().len());
///     }
/// });
/// assert!(on(&topic, &observer));
/// ```
#[derive(Clone)]
pub struct ObserverHandle(Rc<ObserverCell>);

impl ObserverHandle {
    pub fn new(observer: impl Observer) -> Self {
        Self(Rc::new(ObserverCell {
            id: ObserverId::next(),
            observer: Box::new(observer),
        }))
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&ReflectionEvent<'_>) + 'static,
    {
        Self::new(FnObserver(f))
    }

    #[inline]
    pub fn id(&self) -> ObserverId {
        self.0.id
    }

    /// Topics the observer is currently attached to, in attach order.
    pub fn topics(&self) -> Vec<AnyTopic> {
        registry::topics_of(self.id())
    }

    /// Whether the observer is attached to at least one live topic.
    pub fn is_active(&self) -> bool {
        registry::is_observer_active(self.id())
    }

    pub(crate) fn downgrade(&self) -> Weak<ObserverCell> {
        Rc::downgrade(&self.0)
    }
}

impl PartialEq for ObserverHandle {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ObserverHandle {}

impl fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ObserverHandle").field(&self.id()).finish()
    }
}

impl From<&ObserverHandle> for ObserverId {
    fn from(observer: &ObserverHandle) -> Self {
        observer.id()
    }
}
