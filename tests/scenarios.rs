//! End-to-end scenarios driven through the derive macros.

use std::{cell::RefCell, rc::Rc};

use observa::{
    Generation, NotifyEvent, Observable, ObserverHandle, ReflectionEvent, flush, focus, journal, off, on, pulse,
    traps, wrap,
};

#[derive(Debug, Clone, Observable)]
struct Counter {
    count: u32,
}

#[traps]
impl Counter {
    #[trap(changes(count))]
    fn increment(&mut self) -> u32 {
        self.count += 1;
        self.count
    }

    fn doubled(&self) -> u32 {
        self.count * 2
    }

    #[trap(skip)]
    fn label(&self) -> &'static str {
        "counter"
    }
}

fn collect_batches() -> (ObserverHandle, Rc<RefCell<Vec<NotifyEvent>>>) {
    let batches = Rc::new(RefCell::new(Vec::new()));
    let observer = {
        let batches = batches.clone();
        ObserverHandle::from_fn(move |event| {
            if let Some(batch) = event.as_notify() {
                batches.borrow_mut().push(batch.clone());
            }
        })
    };
    (observer, batches)
}

#[tokio::test]
async fn test_batched_counter() {
    let counter = wrap(Counter { count: 0 });
    let before = counter.generation();
    let (observer, batches) = collect_batches();
    on(&counter, &observer);

    counter.set_count(1);
    counter.set_count(2);
    pulse().await;

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].keys().any(|key| key == "count"));
    assert!(batches[0].has(&counter));
    assert!(batches[0].has_key(&counter, "count"));
    assert_ne!(counter.generation(), before);
    assert_eq!(counter.generation(), batches[0].generation());
    assert_eq!(counter.count(), 2);
}

#[tokio::test]
async fn test_trap_override() -> observa::Result {
    let counter = wrap(Counter { count: 0 });
    let observer = ObserverHandle::from_fn(|event| {
        if let ReflectionEvent::Trap(trap) = event {
            if trap.key() == "increment" {
                let _ = trap.set_result(999u32);
            }
        }
    });
    on(&counter, &observer);

    assert_eq!(counter.increment()?, 999);
    assert_eq!(counter.count(), 1);
    assert_eq!(counter.doubled(), 2);
    assert_eq!(Counter { count: 0 }.label(), "counter");
    Ok(())
}

#[tokio::test]
async fn test_observer_on_many_topics_runs_once_per_batch() {
    let first = wrap(Counter { count: 0 });
    let second = wrap(Counter { count: 0 });
    let (observer, batches) = collect_batches();
    focus(&observer, [&first, &second]);

    first.set_count(1);
    second.set_count(1);
    first.increment().unwrap();
    pulse().await;

    let batches = batches.borrow();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].topics().len(), 2);
    assert_eq!(first.generation(), second.generation());
}

#[tokio::test]
async fn test_generations_increase() {
    let counter = wrap(Counter { count: 0 });
    let mut seen = Vec::new();
    for value in 1..=3 {
        counter.set_count(value);
        pulse().await;
        seen.push(counter.generation());
    }
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(Generation::current() >= seen[2]);
}

#[test]
fn test_dropped_observer_is_skipped() {
    let counter = wrap(Counter { count: 0 });
    let (observer, batches) = collect_batches();
    on(&counter, &observer);

    counter.set_count(4);
    let kept = batches.clone();
    drop(observer);
    flush();
    assert!(kept.borrow().is_empty());
}

#[test]
fn test_detached_before_delivery_is_not_invoked() {
    let counter = wrap(Counter { count: 0 });
    let (observer, batches) = collect_batches();
    on(&counter, &observer);

    counter.set_count(5);
    assert!(off(&counter, &observer));
    flush();
    assert!(batches.borrow().is_empty());
    assert_eq!(counter.count(), 5);
}

#[test]
fn test_replacing_a_shared_value_replays_as_changed() {
    let title = wrap(Rc::new(String::from("draft")));
    let (read, marker) = journal::recording(|| title.read("value", |t| Rc::clone(t)));
    assert_eq!(*read, "draft");
    let trace = marker.recording();
    assert!(!trace.replay());

    title.write("value", |t| *t = Rc::new(String::from("draft")));
    assert!(trace.replay());
}
