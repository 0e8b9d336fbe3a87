use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Entries kept while nobody drains the log; the oldest are dropped first
pub const MAX_ENTRIES: usize = 1_000;

/// Operator-facing log line
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub message: String,
    pub displayed: bool,
}

/// Log sink handed to each runner and its components
///
/// Every entry is mirrored to `tracing`; an outer surface (dashboard,
/// CLI summary) drains the entries it has not shown yet. Clones share
/// the same buffer. Drained entries leave the buffer.
#[derive(Clone, Debug)]
pub struct StrategyLog {
    source: String,
    entries: Arc<Mutex<VecDeque<LogEntry>>>,
}

impl StrategyLog {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            entries: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Same buffer, different source label
    pub fn with_source(&self, source: &str) -> Self {
        Self {
            source: source.to_string(),
            entries: self.entries.clone(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(source = %self.source, "{}", message);
        self.push(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source = %self.source, "{}", message);
        self.push(message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source = %self.source, "{}", message);
        self.push(message);
    }

    fn push(&self, message: String) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() >= MAX_ENTRIES {
                entries.pop_front();
            }
            entries.push_back(LogEntry {
                timestamp: Utc::now(),
                source: self.source.clone(),
                message,
                displayed: false,
            });
        }
    }

    /// Remove the entries not yet shown and return them marked as displayed
    pub fn take_undisplayed(&self) -> Vec<LogEntry> {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        entries
            .drain(..)
            .map(|mut entry| {
                entry.displayed = true;
                entry
            })
            .collect()
    }

    /// Snapshot of the entries still buffered
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries().iter().any(|e| e.message.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_undisplayed_marks_entries() {
        let log = StrategyLog::new("BTCUSDT 1m");
        log.info("first");
        log.warn("second");

        let fresh = log.take_undisplayed();
        assert_eq!(fresh.len(), 2);
        assert_eq!(fresh[0].message, "first");
        assert!(log.take_undisplayed().is_empty());

        log.error("third");
        let fresh = log.take_undisplayed();
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].displayed);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_undrained_log_is_bounded() {
        let log = StrategyLog::new("BTCUSDT 1m");
        for i in 0..MAX_ENTRIES + 5 {
            log.info(format!("tick {}", i));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), MAX_ENTRIES);
        assert_eq!(entries[0].message, "tick 5");
        assert_eq!(log.take_undisplayed().len(), MAX_ENTRIES);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_with_source_shares_buffer() {
        let log = StrategyLog::new("engine");
        let child = log.with_source("ETHUSDT 5m");
        child.info("Long signal on ETHUSDT 5m");

        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "ETHUSDT 5m");
        assert!(log.contains("Long signal"));
    }
}
