use std::{
    future::Future,
    marker::PhantomData,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use futures_util::FutureExt;

use crate::internal::dispatch::{self, Done};

/// Future resolving once the pending batch has been delivered.
///
/// All callers of [`pulse`] before the batch is delivered share the same
/// batch. Polling a `Pulse` also drives delivery, so awaiting it works
/// without a spawned delivery task (see [`Schedule`](crate::Schedule)).
///
/// Batches belong to the thread that made the changes, so a `Pulse` is not
/// `Send`. It can't be awaited from a task spawned onto another worker:
///
/// ```compile_fail
/// fn assert_send<T: Send>(_: T) {}
/// assert_send(observa::pulse());
/// ```
#[must_use = "futures do nothing unless awaited"]
pub struct Pulse {
    done: Done,
    _local: PhantomData<Rc<()>>,
}

impl Future for Pulse {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.done.poll_unpin(cx).is_ready() {
            return Poll::Ready(());
        }
        dispatch::drain();
        self.done.poll_unpin(cx).map(|_| ())
    }
}

/// Wait for the next batch to be delivered.
///
/// If nothing changed yet, an empty batch is scheduled so the future still
/// resolves. Every observer invocation of the batch has run by the time it
/// resolves.
///
/// # Example
///
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let topic = observa::wrap(0u32);
/// topic.write("value", |v| *v = 1);
/// observa::pulse().await;
/// assert_ne!(topic.generation(), observa::Generation::default());
/// # }
/// ```
pub fn pulse() -> Pulse {
    Pulse {
        done: dispatch::pulse(),
        _local: PhantomData,
    }
}

/// Deliver everything pending, synchronously.
///
/// Does nothing when called from inside a delivery.
pub fn flush() {
    dispatch::drain();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObserverHandle, on, wrap};
    use std::{cell::Cell, rc::Rc};

    #[tokio::test]
    async fn test_pulse_resolves_after_delivery() {
        let topic = wrap(0u32);
        let calls = Rc::new(Cell::new(0));
        let obs = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
        };
        on(&topic, &obs);

        topic.write("value", |v| *v = 1);
        pulse().await;
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_pulse_without_changes_resolves() {
        pulse().await;
        pulse().await;
    }

    #[tokio::test]
    async fn test_concurrent_pulses_share_a_batch() {
        let topic = wrap(0u32);
        let first = pulse();
        topic.write("value", |v| *v = 1);
        let second = pulse();
        futures_util::future::join(first, second).await;
        assert_eq!(topic.untracked(|v| *v), 1);
    }

    #[tokio::test]
    async fn test_spawned_delivery_runs_on_yield() {
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
    }

    #[test]
    fn test_flush_delivers_synchronously() {
        let topic = wrap(0u32);
        let calls = Rc::new(Cell::new(0));
        let obs = {
            let calls = calls.clone();
            ObserverHandle::from_fn(move |_| calls.set(calls.get() + 1))
        };
        on(&topic, &obs);

        topic.write("value", |v| *v = 1);
        flush();
        assert_eq!(calls.get(), 1);
    }
}
