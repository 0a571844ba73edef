use crate::{AsTopic, NotifyEvent, TrapEvent};

/// Event handed to observers created from a closure.
#[derive(Debug, Clone, Copy)]
pub enum ReflectionEvent<'a> {
    Notify(&'a NotifyEvent),
    Trap(&'a TrapEvent),
}

impl<'a> ReflectionEvent<'a> {
    pub fn is_notify(&self) -> bool {
        matches!(self, ReflectionEvent::Notify(_))
    }

    pub fn is_trap(&self) -> bool {
        matches!(self, ReflectionEvent::Trap(_))
    }

    pub fn as_notify(&self) -> Option<&'a NotifyEvent> {
        match self {
            ReflectionEvent::Notify(event) => Some(event),
            ReflectionEvent::Trap(_) => None,
        }
    }

    pub fn as_trap(&self) -> Option<&'a TrapEvent> {
        match self {
            ReflectionEvent::Trap(event) => Some(event),
            ReflectionEvent::Notify(_) => None,
        }
    }

    /// Whether this is a trap raised by a call on `topic`.
    pub fn is_trap_for(&self, topic: &impl AsTopic) -> bool {
        self.as_trap()
            .is_some_and(|event| event.topic().id() == topic.topic_id())
    }
}
