use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use itertools::Itertools;
use log::Level;

use super::status::StatusSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

/// Bounded scrolling log of engine events.
///
/// Every entry also goes through the `log` facade; the buffer only exists so a
/// debug view can render recent history.
pub struct DebugLog {
    entries: RefCell<VecDeque<LogEntry>>,
    capacity: usize,
    listener: Option<Rc<dyn StatusSink>>,
}

impl DebugLog {
    pub fn new(capacity: usize) -> Self {
        DebugLog {
            entries: RefCell::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            listener: None,
        }
    }

    pub fn with_listener(capacity: usize, listener: Rc<dyn StatusSink>) -> Self {
        DebugLog {
            listener: Some(listener),
            ..DebugLog::new(capacity)
        }
    }

    pub fn write(&self, level: Level, message: String) {
        log::log!(level, "{}", message);
        let entry = LogEntry { level, message };
        if let Some(listener) = &self.listener {
            listener.log_entry(&entry);
        }
        let mut buf = self.entries.borrow_mut();
        if buf.len() == self.capacity {
            buf.pop_front();
        }
        buf.push_back(entry);
    }

    pub fn debug(&self, message: String) {
        self.write(Level::Debug, message);
    }

    pub fn info(&self, message: String) {
        self.write(Level::Info, message);
    }

    pub fn warn(&self, message: String) {
        self.write(Level::Warn, message);
    }

    pub fn error(&self, message: String) {
        self.write(Level::Error, message);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.borrow().iter().cloned().collect_vec()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|entry| entry.message.contains(needle))
    }

    pub fn read_tail(&self, n: usize) -> String {
        let buf = self.entries.borrow();
        let start = buf.len().saturating_sub(n);
        buf.iter()
            .skip(start)
            .map(|entry| format!("[{}] {}", entry.level, entry.message))
            .join("\n")
    }
}
