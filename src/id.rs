use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_TOPIC: AtomicU64 = AtomicU64::new(1);
static NEXT_OBSERVER: AtomicU64 = AtomicU64::new(1);
static NEXT_METHOD: AtomicU64 = AtomicU64::new(1);
static GENERATION: AtomicU64 = AtomicU64::new(0);

/// Opaque identity of a topic.
///
/// Assigned once when the topic is created and never reused while the
/// process runs. Use it (together with [`Generation`]) to key caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopicId(u64);

impl TopicId {
    pub(crate) fn next() -> Self {
        Self(NEXT_TOPIC.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "topic#{}", self.0)
    }
}

/// Opaque identity of an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObserverId(u64);

impl ObserverId {
    pub(crate) fn next() -> Self {
        Self(NEXT_OBSERVER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observer#{}", self.0)
    }
}

/// Identity of an instrumented method ([`Query`](crate::Query) or
/// [`Command`](crate::Command)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MethodId(u64);

impl MethodId {
    pub(crate) fn next() -> Self {
        Self(NEXT_METHOD.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "method#{}", self.0)
    }
}

/// Token naming the batch in which a topic was last changed.
///
/// Every delivered batch allocates a fresh generation and stamps it on all
/// topics it carries. Newly wrapped topics inherit the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Generation(u64);

impl Generation {
    /// The most recently allocated generation.
    pub fn current() -> Self {
        Self(GENERATION.load(Ordering::Acquire))
    }

    pub(crate) fn advance() -> Self {
        Self(GENERATION.fetch_add(1, Ordering::AcqRel) + 1)
    }

    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen#{}", self.0)
    }
}
