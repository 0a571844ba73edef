use std::{cell::RefCell, collections::HashMap};

use crate::{
    TopicId,
    topic::{AnyTopic, WeakTopic},
};

/// Side table of live topics, keyed by identity and, for traced cells, by
/// the address of the cell.
#[derive(Default)]
struct TopicTable {
    live: HashMap<TopicId, WeakTopic>,
    traced: HashMap<usize, TopicId>,
}

thread_local! {
    static TOPICS: RefCell<TopicTable> = RefCell::new(TopicTable::default());
}

pub(crate) fn insert(id: TopicId, topic: WeakTopic, origin: Option<usize>) {
    TOPICS.with(|t| {
        let mut table = t.borrow_mut();
        table.live.insert(id, topic);
        if let Some(origin) = origin {
            table.traced.insert(origin, id);
        }
    });
}

pub(crate) fn get(id: TopicId) -> Option<AnyTopic> {
    TOPICS.with(|t| t.borrow().live.get(&id).and_then(WeakTopic::upgrade))
}

pub(crate) fn traced(origin: usize) -> Option<AnyTopic> {
    TOPICS.with(|t| {
        let table = t.borrow();
        let id = table.traced.get(&origin)?;
        table.live.get(id).and_then(WeakTopic::upgrade)
    })
}

/// Called from the topic's destructor, possibly during thread teardown.
pub(crate) fn remove(id: TopicId, origin: Option<usize>) {
    let _ = TOPICS.try_with(|t| {
        if let Ok(mut table) = t.try_borrow_mut() {
            table.live.remove(&id);
            if let Some(origin) = origin {
                if table.traced.get(&origin) == Some(&id) {
                    table.traced.remove(&origin);
                }
            }
        }
    });
}

#[cfg(test)]
pub(crate) fn len() -> usize {
    TOPICS.with(|t| t.borrow().live.values().filter(|t| t.is_alive()).count())
}
