//! Attaching observers to topics.
//!
//! The association is many-to-many and weak both ways: attaching never keeps
//! a topic or an observer alive, and dropping either side detaches it from
//! everything.

use crate::{AsTopic, ObserverHandle, ObserverId, internal::registry, topic::AnyTopic};

/// Attach `observer` to `topic`.
///
/// Returns `false` if it was already attached, the topic is frozen or the
/// observer revoked.
pub fn on(topic: &impl AsTopic, observer: &ObserverHandle) -> bool {
    registry::attach(&topic.as_topic(), observer)
}

/// Detach `observer` from `topic`. Returns whether it was attached.
pub fn off(topic: &impl AsTopic, observer: impl Into<ObserverId>) -> bool {
    registry::detach(topic.topic_id(), observer.into())
}

pub fn has(topic: &impl AsTopic, observer: impl Into<ObserverId>) -> bool {
    registry::has(topic.topic_id(), observer.into())
}

/// Make `topics` the exact subscription set of `observer`.
///
/// Topics not listed are detached, new ones attached. Returns whether
/// anything changed, so calling it again with the same topics returns
/// `false`.
pub fn focus<I>(observer: &ObserverHandle, topics: I) -> bool
where
    I: IntoIterator,
    I::Item: AsTopic,
{
    let topics: Vec<AnyTopic> = topics.into_iter().map(|t| t.as_topic()).collect();
    registry::focus(observer, &topics)
}

/// Attach `observer` to every topic in `topics`, keeping its other
/// subscriptions. Returns whether any pair was added.
pub fn observe<I>(observer: &ObserverHandle, topics: I) -> bool
where
    I: IntoIterator,
    I::Item: AsTopic,
{
    let topics: Vec<AnyTopic> = topics.into_iter().map(|t| t.as_topic()).collect();
    registry::observe(observer, &topics)
}

/// Detach all observers from `topic`. Returns whether any was attached.
pub fn clear(topic: &impl AsTopic) -> bool {
    registry::clear(topic.topic_id())
}

/// Detach all observers and make the topic permanently unobservable and
/// immutable.
///
/// Writes, resets and commands on a frozen topic fail without mutating.
pub fn freeze(topic: &impl AsTopic) {
    let topic = topic.as_topic();
    topic.state().freeze();
    registry::seal_topic(topic.id());
    tracing::debug!(topic = %topic.id(), "topic frozen");
}

/// Detach `observer` from all topics and make it permanently inert.
pub fn revoke(observer: impl Into<ObserverId>) {
    let observer = observer.into();
    registry::seal_observer(observer);
    tracing::debug!(observer = %observer, "observer revoked");
}

/// Whether any live observer is attached to `topic`.
pub fn is_topic_active(topic: &impl AsTopic) -> bool {
    registry::is_topic_active(topic.topic_id())
}

/// Whether the observer is attached to at least one live topic.
///
/// Takes an id so it can be asked about an observer that has been dropped.
pub fn is_observer_active(observer: impl Into<ObserverId>) -> bool {
    registry::is_observer_active(observer.into())
}
