use std::{cell::RefCell, fmt, future::Future, pin::pin, rc::Rc};

use futures_util::future::{Either, FutureExt, Shared, select};
use indexmap::IndexSet;
use tokio::sync::oneshot;

use crate::{Key, Observable, Same, Topic};

/// Handle of one operation added to an [`AsyncMonitor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Observable part of an [`AsyncMonitor`].
#[derive(Debug, Clone)]
pub struct Activity<T, E> {
    pending: bool,
    success: bool,
    failure: bool,
    results: Vec<T>,
    errors: Vec<E>,
    running: IndexSet<OperationId>,
}

impl<T, E> Default for Activity<T, E> {
    fn default() -> Self {
        Self {
            pending: false,
            success: false,
            failure: false,
            results: Vec::new(),
            errors: Vec::new(),
            running: IndexSet::new(),
        }
    }
}

impl<T: 'static, E: 'static> Observable for Activity<T, E> {
    fn keys(&self) -> Vec<Key> {
        ["pending", "success", "failure", "results", "errors"]
            .into_iter()
            .map(Key::from)
            .collect()
    }
}

/// Resolves when the operations of the current round are abandoned.
type Abort = Shared<oneshot::Receiver<()>>;

struct Round {
    _sender: oneshot::Sender<()>,
    abort: Abort,
}

impl Round {
    fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            _sender: sender,
            abort: receiver.shared(),
        }
    }
}

struct Control {
    next: u64,
    round: Round,
}

/// Tracks any number of futures in flight, observably.
///
/// [`add`](AsyncMonitor::add) registers an operation and turns the monitor
/// `pending`. When the last running operation completes, `pending` clears and
/// `success` tells whether none of them failed. `failure` turns on as soon as
/// one fails. Outputs are collected in completion order.
///
/// [`reset`](AsyncMonitor::reset) abandons everything in flight and clears
/// the collected outcomes. [`freeze`](AsyncMonitor::freeze) does the same and
/// then freezes the topic, so later operations are ignored.
///
/// ```rust
/// use observa::collections::AsyncMonitor;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let monitor: AsyncMonitor<u32> = AsyncMonitor::new();
/// let (_, first) = monitor.add(async { Ok(1) });
/// let (_, second) = monitor.add(async { Ok(2) });
/// assert!(monitor.pending());
///
/// futures_util::future::join(first, second).await;
/// assert!(monitor.success());
/// assert_eq!(monitor.results(), vec![1, 2]);
/// # }
/// ```
pub struct AsyncMonitor<T: 'static, E: 'static = String> {
    topic: Topic<Activity<T, E>>,
    control: Rc<RefCell<Control>>,
}

impl<T, E> AsyncMonitor<T, E>
where
    T: Same + Clone + 'static,
    E: Same + Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            topic: Topic::new(Activity::default()),
            control: Rc::new(RefCell::new(Control {
                next: 0,
                round: Round::new(),
            })),
        }
    }

    pub fn topic(&self) -> &Topic<Activity<T, E>> {
        &self.topic
    }

    pub fn pending(&self) -> bool {
        self.topic.read("pending", |a: &Activity<T, E>| a.pending)
    }

    pub fn success(&self) -> bool {
        self.topic.read("success", |a: &Activity<T, E>| a.success)
    }

    pub fn failure(&self) -> bool {
        self.topic.read("failure", |a: &Activity<T, E>| a.failure)
    }

    pub fn results(&self) -> Vec<T> {
        self.topic.read("results", |a: &Activity<T, E>| a.results.clone())
    }

    pub fn errors(&self) -> Vec<E> {
        self.topic.read("errors", |a: &Activity<T, E>| a.errors.clone())
    }

    /// Whether `op` is still running.
    pub fn is_pending(&self, op: OperationId) -> bool {
        self.topic
            .read("pending", move |a: &Activity<T, E>| a.running.contains(&op))
    }

    /// Whether `op` completed or was abandoned.
    pub fn is_cancelled(&self, op: OperationId) -> bool {
        !self.is_pending(op)
    }

    /// Register `future` as a running operation.
    ///
    /// The returned future drives `future` and records its outcome, and must
    /// be awaited or spawned. It finishes early, recording nothing, when the
    /// monitor is reset or frozen first. On a frozen monitor nothing is
    /// registered.
    pub fn add<F>(&self, future: F) -> (OperationId, impl Future<Output = ()> + use<T, E, F>)
    where
        F: Future<Output = std::result::Result<T, E>> + 'static,
    {
        let (op, abort) = {
            let mut control = self.control.borrow_mut();
            control.next += 1;
            (OperationId(control.next), control.round.abort.clone())
        };
        let started = self
            .topic
            .update(["pending", "success", "failure"], |a| {
                a.running.insert(op);
                a.pending = true;
                a.success = false;
                a.failure = false;
            })
            .inspect_err(|err| {
                tracing::debug!(topic = %self.topic.id(), %op, error = %err, "operation ignored");
            })
            .is_ok();
        let topic = self.topic.clone();
        let run = async move {
            if !started {
                return;
            }
            let future = pin!(future);
            match select(future, abort).await {
                Either::Left((outcome, _)) => finish(&topic, op, outcome),
                Either::Right(_) => tracing::trace!(%op, "operation abandoned"),
            }
        };
        (op, run)
    }

    /// Abandon every running operation and clear the collected outcomes.
    pub fn reset(&self) {
        self.control.borrow_mut().round = Round::new();
        let cleared = self.topic.update(Activity::<T, E>::default().keys(), |a| {
            *a = Activity::default();
        });
        if let Err(err) = cleared {
            tracing::debug!(topic = %self.topic.id(), error = %err, "monitor not reset");
        }
    }

    /// Reset, then freeze the monitor for good.
    pub fn freeze(&self) {
        if self.topic.is_frozen() {
            return;
        }
        self.reset();
        crate::freeze(&self.topic);
    }
}

fn finish<T: 'static, E: 'static>(
    topic: &Topic<Activity<T, E>>,
    op: OperationId,
    outcome: std::result::Result<T, E>,
) {
    let changed = topic.mutate(|a| {
        if !a.running.shift_remove(&op) {
            return Vec::new();
        }
        let mut keys = Vec::new();
        match outcome {
            Ok(value) => {
                a.results.push(value);
                keys.push("results");
            }
            Err(err) => {
                a.errors.push(err);
                a.failure = true;
                keys.extend(["errors", "failure"]);
            }
        }
        if a.running.is_empty() {
            a.pending = false;
            a.success = a.errors.is_empty();
            keys.extend(["pending", "success"]);
        }
        keys
    });
    match changed {
        Ok(keys) if !keys.is_empty() => topic.notify(keys),
        Ok(_) => tracing::trace!(%op, "operation no longer tracked"),
        Err(err) => tracing::debug!(topic = %topic.id(), %op, error = %err, "outcome dropped"),
    }
}

impl<T, E> Default for AsyncMonitor<T, E>
where
    T: Same + Clone + 'static,
    E: Same + Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T: 'static, E: 'static> Clone for AsyncMonitor<T, E> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            control: Rc::clone(&self.control),
        }
    }
}

impl<T: 'static, E: 'static> fmt::Debug for AsyncMonitor<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let running = self.topic.untracked(|a| a.running.len());
        f.debug_struct("AsyncMonitor")
            .field("topic", &self.topic.id())
            .field("running", &running)
            .finish()
    }
}
