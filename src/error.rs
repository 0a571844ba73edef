use std::sync::Arc;

use crate::{ObserverId, TopicId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Topic {0} is not registered or has been dropped")]
    InvalidTopic(TopicId),

    #[error("Topic {id} does not hold a value of type {expected}")]
    TopicType { id: TopicId, expected: &'static str },

    #[error("Topic {0} is frozen")]
    FrozenTopic(TopicId),

    #[error("Topic {0} is already borrowed")]
    TopicBorrowed(TopicId),

    #[error("Trap event is frozen, its result can't be changed")]
    FrozenEvent,

    #[error("Trap result must be of type {expected}")]
    ResultType { expected: &'static str },

    #[error("Mutations are locked while a recording is open")]
    MutationLocked,

    #[error("Index {index} is out of bounds for length {len}")]
    OutOfBounds { index: usize, len: usize },

    #[error("Observer {observer} panicked: {message}")]
    ObserverPanicked {
        observer: ObserverId,
        message: Arc<str>,
    },
}

impl Error {
    pub(crate) fn from_panic(observer: ObserverId, payload: &(dyn std::any::Any + Send)) -> Self {
        let message: Arc<str> = if let Some(s) = payload.downcast_ref::<&str>() {
            Arc::from(*s)
        } else if let Some(s) = payload.downcast_ref::<String>() {
            Arc::from(s.as_str())
        } else {
            Arc::from("non-string panic payload")
        };
        Error::ObserverPanicked { observer, message }
    }
}
