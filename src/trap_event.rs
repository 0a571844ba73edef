use std::{
    any::{Any, TypeId, type_name},
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

use crate::{Error, Key, MethodId, Result, topic::AnyTopic};

/// Report of one instrumented method call.
///
/// Trap observers of the topic receive it synchronously, in registration
/// order, after the method ran and before the call returns. Any of them may
/// replace the result with [`set_result`](TrapEvent::set_result); the value
/// held by the event when the last observer returns is what the caller
/// gets. [`freeze`](TrapEvent::freeze) stops the chain.
pub struct TrapEvent {
    topic: AnyTopic,
    method: MethodId,
    key: Key,
    args: Rc<dyn Any>,
    result: RefCell<Box<dyn Any>>,
    result_type: TypeId,
    result_type_name: &'static str,
    frozen: Cell<bool>,
}

impl TrapEvent {
    pub(crate) fn new<R: 'static>(topic: AnyTopic, method: MethodId, key: Key, args: Rc<dyn Any>, result: R) -> Self {
        Self {
            topic,
            method,
            key,
            args,
            result: RefCell::new(Box::new(result)),
            result_type: TypeId::of::<R>(),
            result_type_name: type_name::<R>(),
            frozen: Cell::new(false),
        }
    }

    pub fn topic(&self) -> &AnyTopic {
        &self.topic
    }

    pub fn method(&self) -> MethodId {
        self.method
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Call arguments as a tuple, e.g. `(u32,)` for a one-argument method.
    pub fn args<A: 'static>(&self) -> Option<&A> {
        self.args.downcast_ref()
    }

    /// Current result, if it has type `R`.
    pub fn result<R: Clone + 'static>(&self) -> Option<R> {
        self.result.borrow().downcast_ref::<R>().cloned()
    }

    /// Replace the result the caller will get.
    pub fn set_result<R: 'static>(&self, result: R) -> Result {
        if self.is_frozen() {
            return Err(Error::FrozenEvent);
        }
        if TypeId::of::<R>() != self.result_type {
            return Err(Error::ResultType {
                expected: self.result_type_name,
            });
        }
        *self.result.borrow_mut() = Box::new(result);
        Ok(())
    }

    /// Make the event immutable and skip the remaining observers.
    pub fn freeze(&self) {
        self.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get()
    }

    pub(crate) fn into_result<R: 'static>(self) -> Option<R> {
        self.result.into_inner().downcast::<R>().ok().map(|r| *r)
    }
}

impl fmt::Debug for TrapEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrapEvent")
            .field("topic", &self.topic.id())
            .field("method", &self.method)
            .field("key", &self.key)
            .field("result_type", &self.result_type_name)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
