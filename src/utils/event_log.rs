//! Per-frame event log: named scalar values keyed by the analyzed-frame index.
//!
//! Two paths, same as the rest of the pipeline's diagnostics:
//! - **Hot path:** `record()` pushes onto a bounded lock-free queue and returns immediately.
//!   When the queue is full the backlog is folded into the table under a lock, so
//!   no entry is lost.
//! - **Cold path:** `write_csv()` folds whatever is queued and renders one row per frame,
//!   carrying the last known value forward into frames that did not log it.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use parking_lot::Mutex;

const EVENT_QUEUE_CAPACITY: usize = 16_384;

pub const INTERMITTENT_OUTPUT: &str = "analyzer_intermittent_output";
pub const BATCHED_OUTPUT: &str = "analyzer_batched_output";
pub const CONTROLLER_OUTPUT: &str = "controller_output";
pub const SETPOINT: &str = "setpoint";
pub const FRAME_TIMESTAMP_MS: &str = "frame_timestamp_ms";

#[derive(Debug, Clone, PartialEq)]
pub enum LogValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for LogValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogValue::Number(v) => write!(f, "{}", v),
            LogValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for LogValue {
    fn from(v: f64) -> Self {
        LogValue::Number(v)
    }
}

impl From<&str> for LogValue {
    fn from(s: &str) -> Self {
        LogValue::Text(s.to_string())
    }
}

#[derive(Debug, Clone)]
struct LogEntry {
    frame: u64,
    name: &'static str,
    value: LogValue,
}

#[derive(Default)]
struct LogTable {
    /// Column names in first-seen order.
    columns: Vec<&'static str>,
    rows: BTreeMap<u64, HashMap<&'static str, LogValue>>,
}

impl LogTable {
    fn insert(&mut self, entry: LogEntry) {
        if !self.columns.contains(&entry.name) {
            self.columns.push(entry.name);
        }
        // first value for a (frame, name) pair sticks
        self.rows
            .entry(entry.frame)
            .or_default()
            .entry(entry.name)
            .or_insert(entry.value);
    }
}

pub struct EventLog {
    queue: ArrayQueue<LogEntry>,
    table: Mutex<LogTable>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            queue: ArrayQueue::new(EVENT_QUEUE_CAPACITY),
            table: Mutex::new(LogTable::default()),
        }
    }

    /// Records `value` under `name` for `frame`.
    pub fn record(&self, frame: u64, name: &'static str, value: impl Into<LogValue>) {
        let entry = LogEntry {
            frame,
            name,
            value: value.into(),
        };
        if let Err(entry) = self.queue.push(entry) {
            let mut table = self.table.lock();
            self.fold_into(&mut table);
            table.insert(entry);
        }
    }

    fn fold_into(&self, table: &mut LogTable) {
        while let Some(entry) = self.queue.pop() {
            table.insert(entry);
        }
    }

    /// Value stored for `(frame, name)`, if any.
    pub fn get(&self, frame: u64, name: &str) -> Option<LogValue> {
        let mut table = self.table.lock();
        self.fold_into(&mut table);
        table.rows.get(&frame).and_then(|row| row.get(name)).cloned()
    }

    /// Column names in first-seen order.
    pub fn columns(&self) -> Vec<&'static str> {
        let mut table = self.table.lock();
        self.fold_into(&mut table);
        table.columns.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty() && self.table.lock().rows.is_empty()
    }

    pub fn clear(&self) {
        let mut table = self.table.lock();
        while self.queue.pop().is_some() {}
        *table = LogTable::default();
    }

    /// Renders the log as CSV: `#frame_no,<columns...>`, one row per frame from 1 to
    /// the highest logged frame. Missing cells repeat the previous row's value; cells
    /// never logged before start from frame 1's value or 0.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut table = self.table.lock();
        self.fold_into(&mut table);

        let mut wtr = Writer::from_writer(writer);
        let mut header = Vec::with_capacity(table.columns.len() + 1);
        header.push("#frame_no");
        header.extend(table.columns.iter().copied());
        wtr.write_record(&header)?;

        let max_frame = table.rows.keys().next_back().copied().unwrap_or(0);
        let first = table.rows.get(&1);
        let mut carried: Vec<LogValue> = table
            .columns
            .iter()
            .map(|c| {
                first
                    .and_then(|row| row.get(c))
                    .cloned()
                    .unwrap_or(LogValue::Number(0.0))
            })
            .collect();

        for frame in 1..=max_frame {
            let row = table.rows.get(&frame);
            let mut record = Vec::with_capacity(carried.len() + 1);
            record.push(frame.to_string());
            for (idx, column) in table.columns.iter().enumerate() {
                if let Some(value) = row.and_then(|r| r.get(column)) {
                    carried[idx] = value.clone();
                }
                record.push(carried[idx].to_string());
            }
            wtr.write_record(&record)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn save_csv(&self, path: impl AsRef<Path>) -> Result<(), csv::Error> {
        let file = File::create(path)?;
        self.write_csv(BufWriter::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_for_a_frame_is_kept() {
        let log = EventLog::new();
        log.record(0, BATCHED_OUTPUT, 42.0);
        log.record(0, BATCHED_OUTPUT, f64::NAN);
        assert_eq!(log.get(0, BATCHED_OUTPUT), Some(LogValue::Number(42.0)));
    }

    #[test]
    fn text_values_are_stored() {
        let log = EventLog::new();
        log.record(3, "marker", "hello");
        assert_eq!(log.get(3, "marker"), Some(LogValue::Text("hello".into())));
    }

    #[test]
    fn csv_forward_fills_missing_cells() {
        let log = EventLog::new();
        log.record(1, INTERMITTENT_OUTPUT, 1.5);
        log.record(2, INTERMITTENT_OUTPUT, 2.5);
        log.record(2, CONTROLLER_OUTPUT, 4.0);
        log.record(4, INTERMITTENT_OUTPUT, 3.5);

        let mut out = Vec::new();
        log.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "#frame_no,analyzer_intermittent_output,controller_output",
                "1,1.5,0",
                "2,2.5,4",
                "3,2.5,4",
                "4,3.5,4",
            ]
        );
    }

    #[test]
    fn overflowing_the_queue_loses_nothing() {
        let log = EventLog::new();
        let n = EVENT_QUEUE_CAPACITY as u64 + 100;
        for frame in 1..=n {
            log.record(frame, INTERMITTENT_OUTPUT, frame as f64);
        }
        assert_eq!(log.get(1, INTERMITTENT_OUTPUT), Some(LogValue::Number(1.0)));
        assert_eq!(
            log.get(n, INTERMITTENT_OUTPUT),
            Some(LogValue::Number(n as f64))
        );
    }

    #[test]
    fn clear_empties_the_log() {
        let log = EventLog::new();
        log.record(1, SETPOINT, 2.0);
        assert!(!log.is_empty());
        log.clear();
        assert!(log.is_empty());
        assert!(log.columns().is_empty());
    }
}
