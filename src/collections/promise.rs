use std::{fmt, future::Future};

use crate::{Key, Observable, Same, Topic};

/// Lifecycle of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PromiseState {
    #[default]
    Unknown,
    Pending,
    Success,
    Failure,
}

impl PromiseState {
    pub fn is_settled(&self) -> bool {
        matches!(self, PromiseState::Success | PromiseState::Failure)
    }
}

impl Same for PromiseState {
    fn same(&self, other: &Self) -> bool {
        self == other
    }
}

/// Observable part of a [`Promise`].
#[derive(Debug, Clone)]
pub struct Settlement<T, E> {
    state: PromiseState,
    result: Option<T>,
    error: Option<E>,
}

impl<T, E> Default for Settlement<T, E> {
    fn default() -> Self {
        Self {
            state: PromiseState::Unknown,
            result: None,
            error: None,
        }
    }
}

impl<T: 'static, E: 'static> Observable for Settlement<T, E> {
    fn keys(&self) -> Vec<Key> {
        vec![Key::from("state"), Key::from("result"), Key::from("error")]
    }
}

/// A future's outcome, observable.
///
/// Starts [`Unknown`](PromiseState::Unknown). The first
/// [`resolve`](Promise::resolve) moves it to `Pending` right away and to
/// `Success` or `Failure` once the future completes; later calls are
/// ignored. Observers of [`topic`](Promise::topic) are notified on every
/// transition, and memos that read the state are invalidated by them.
///
/// ```rust
/// use observa::{Promise, PromiseState};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let promise: Promise<u32> = Promise::new();
/// let settled = promise.resolve(async { Ok(42) });
/// assert_eq!(promise.state(), PromiseState::Pending);
///
/// settled.await;
/// assert_eq!(promise.result(), Some(42));
/// # }
/// ```
pub struct Promise<T: 'static, E: 'static = String> {
    topic: Topic<Settlement<T, E>>,
}

impl<T, E> Promise<T, E>
where
    T: Same + Clone + 'static,
    E: Same + Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            topic: Topic::new(Settlement::default()),
        }
    }

    pub fn topic(&self) -> &Topic<Settlement<T, E>> {
        &self.topic
    }

    pub fn state(&self) -> PromiseState {
        self.topic.read("state", |s: &Settlement<T, E>| s.state)
    }

    pub fn result(&self) -> Option<T> {
        self.topic.read("result", |s: &Settlement<T, E>| s.result.clone())
    }

    pub fn error(&self) -> Option<E> {
        self.topic.read("error", |s: &Settlement<T, E>| s.error.clone())
    }

    pub fn has_result(&self) -> bool {
        self.state() == PromiseState::Success
    }

    pub fn has_error(&self) -> bool {
        self.state() == PromiseState::Failure
    }

    pub fn is_settled(&self) -> bool {
        self.state().is_settled()
    }

    /// Start settling the promise with `future`.
    ///
    /// Only the first call has any effect. The state turns `Pending`
    /// immediately; the returned future drives `future` and settles the
    /// promise with its output, and must be awaited or spawned.
    pub fn resolve<F>(&self, future: F) -> impl Future<Output = ()> + use<T, E, F>
    where
        F: Future<Output = std::result::Result<T, E>> + 'static,
    {
        let started = self
            .topic
            .mutate(|s| {
                let start = s.state == PromiseState::Unknown;
                if start {
                    s.state = PromiseState::Pending;
                }
                start
            })
            .unwrap_or_else(|err| {
                tracing::debug!(topic = %self.topic.id(), error = %err, "promise not resolved");
                false
            });
        if started {
            self.topic.notify(["state"]);
        }
        let topic = self.topic.clone();
        async move {
            if started {
                settle(&topic, future.await);
            }
        }
    }
}

fn settle<T: 'static, E: 'static>(topic: &Topic<Settlement<T, E>>, outcome: std::result::Result<T, E>) {
    let key = if outcome.is_ok() { "result" } else { "error" };
    let settled = topic.update(["state", key], |s| match outcome {
        Ok(value) => {
            s.state = PromiseState::Success;
            s.result = Some(value);
        }
        Err(err) => {
            s.state = PromiseState::Failure;
            s.error = Some(err);
        }
    });
    if let Err(err) = settled {
        tracing::debug!(topic = %topic.id(), error = %err, "promise settlement dropped");
    }
}

impl<T, E> Default for Promise<T, E>
where
    T: Same + Clone + 'static,
    E: Same + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> Clone for Promise<T, E> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for Promise<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.topic.untracked(|s| s.state);
        f.debug_struct("Promise")
            .field("topic", &self.topic.id())
            .field("state", &state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObserverHandle, flush, on};
    use std::{cell::Cell, rc::Rc};

    #[tokio::test]
    async fn test_promise_success() {
        let promise: Promise<u32> = Promise::new();
        assert_eq!(promise.state(), PromiseState::Unknown);

        let settled = promise.resolve(async { Ok(7) });
        assert_eq!(promise.state(), PromiseState::Pending);
        settled.await;

        assert!(promise.has_result());
        assert_eq!(promise.result(), Some(7));
        assert_eq!(promise.error(), None);
    }

    #[tokio::test]
    async fn test_promise_failure() {
        let promise: Promise<u32> = Promise::new();
        promise.resolve(async { Err("boom".to_string()) }).await;
        assert!(promise.has_error());
        assert_eq!(promise.error().as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_promise_settles_once() {
        let promise: Promise<u32> = Promise::new();
        let first = promise.resolve(async { Ok(1) });
        let second = promise.resolve(async { Ok(2) });
        second.await;
        assert_eq!(promise.state(), PromiseState::Pending);
        first.await;
        assert_eq!(promise.result(), Some(1));
    }

    #[test]
    fn test_transitions_are_observed() {
        let promise: Promise<u32> = Promise::new();
        let calls = Rc::new(Cell::new(0));
        let observer = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |event| {
                if event.is_notify() {
                    calls.set(calls.get() + 1);
                }
            })
        };
        on(promise.topic(), &observer);

        let settled = promise.resolve(std::future::ready(Ok(3)));
        flush();
        assert_eq!(calls.get(), 1);

        let _ = futures_util::FutureExt::now_or_never(settled);
        flush();
        assert_eq!(calls.get(), 2);
        assert!(promise.is_settled());
    }
}
