use std::{
    cell::RefCell,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use serde::Serialize;

use crate::{Generation, Key, NotifyEvent, Observer, TopicId};

#[derive(Serialize)]
struct BatchRecord<'a> {
    id: String,
    timestamp: u64,
    generation: Generation,
    topics: Vec<TopicId>,
    keys: Vec<&'a Key>,
    journal: usize,
}

impl<'a> From<&'a NotifyEvent> for BatchRecord<'a> {
    fn from(event: &'a NotifyEvent) -> Self {
        Self {
            id: uuid::Uuid::from_u128(event.id()).to_string(),
            timestamp: event.timestamp(),
            generation: event.generation(),
            topics: event.topics().map(|topic| topic.id()).collect(),
            keys: event.keys().collect(),
            journal: event.journal().len(),
        }
    }
}

/// An observer that records delivered batches to a file.
///
/// Each batch is written as one JSON object per line. Traps are not
/// recorded.
pub struct Recorder {
    writer: RefCell<BufWriter<File>>,
}

impl Recorder {
    /// Create a recorder writing to `path`, truncating it.
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: RefCell::new(BufWriter::new(file)),
        })
    }

    fn write(&self, record: &BatchRecord<'_>) -> std::io::Result<()> {
        let mut writer = self
            .writer
            .try_borrow_mut()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }
}

impl Observer for Recorder {
    fn on_notify(&self, event: &NotifyEvent) {
        if let Err(e) = self.write(&BatchRecord::from(event)) {
            tracing::warn!(batch = %event.id(), error = %e, "recorder failed to write batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ObserverHandle, flush, on, wrap};

    #[test]
    fn test_recorder_writes_json_lines() {
        let path = std::env::temp_dir().join(format!("observa-recorder-{}.jsonl", std::process::id()));
        let recorder = ObserverHandle::new(Recorder::new(&path).expect("failed to create recorder"));

        let topic = wrap(0u32);
        on(&topic, &recorder);
        topic.write("count", |v| *v = 1);
        flush();
        topic.write("count", |v| *v = 2);
        flush();

        let content = std::fs::read_to_string(&path).expect("failed to read log file");
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|line| serde_json::from_str(line).expect("invalid json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["keys"], serde_json::json!(["count"]));
        assert_eq!(lines[0]["topics"], serde_json::json!([topic.id().as_u64()]));

        let _ = std::fs::remove_file(path);
    }
}
