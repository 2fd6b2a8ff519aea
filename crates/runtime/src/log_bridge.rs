// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Bridge from native engine log lines to a host-side sink.
//!
//! The engine prefixes every line with a one-character severity tag
//! (`D`, `I`, `W`, `E`) followed by a space. The bridge strips the tag,
//! forwards the message to the current [`LogSink`], and keeps warnings and
//! errors in a bounded buffer. Native callbacks arrive independently of the
//! call that triggered them, so callers drain the buffer after an operation
//! to see what the engine complained about.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Native log severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// The one-character tag the engine prefixes lines with.
    pub fn tag(self) -> char {
        match self {
            Self::Debug => 'D',
            Self::Info => 'I',
            Self::Warn => 'W',
            Self::Error => 'E',
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "D" => Some(Self::Debug),
            "I" => Some(Self::Info),
            "W" => Some(Self::Warn),
            "E" => Some(Self::Error),
            _ => None,
        }
    }

    /// Parses a level name (`"debug"`, `"info"`, `"warn"`/`"warning"`, `"error"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination for forwarded native log messages.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards native messages to `tracing` under the `tflm` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "tflm", "{message}"),
            LogLevel::Info => tracing::info!(target: "tflm", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "tflm", "{message}"),
            LogLevel::Error => tracing::error!(target: "tflm", "{message}"),
        }
    }
}

/// Routes native log lines to a replaceable sink and buffers diagnostics.
pub struct LogBridge {
    sink: RwLock<Arc<dyn LogSink>>,
    errors: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl LogBridge {
    /// Creates a bridge that forwards to [`TracingSink`] and keeps at most
    /// `capacity` warning/error lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            sink: RwLock::new(Arc::new(TracingSink)),
            errors: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Replaces the sink. Returns the previous one.
    pub fn set_sink(&self, sink: Arc<dyn LogSink>) -> Arc<dyn LogSink> {
        let mut current = self.sink.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, sink)
    }

    /// Handles one raw native line.
    pub fn forward(&self, line: &str) {
        // The tag lives in the first two characters; a bare tag is an empty message.
        let head = line.char_indices().nth(2).map_or(line.len(), |(i, _)| i);
        let (tag, rest) = line.split_at(head);
        let parsed = LogLevel::from_tag(tag.trim()).map(|lvl| (lvl, rest.trim()));
        let (level, message) = parsed.unwrap_or((LogLevel::Info, line.trim_end()));

        let sink = Arc::clone(&self.sink.read().unwrap_or_else(PoisonError::into_inner));
        sink.log(level, message);

        if level >= LogLevel::Warn && self.capacity > 0 {
            let mut errors = self.errors.lock().unwrap_or_else(PoisonError::into_inner);
            if errors.len() == self.capacity {
                errors.pop_front();
            }
            errors.push_back(message.to_string());
        }
    }

    /// Returns a copy of the buffered warning/error lines, oldest first.
    pub fn logged_errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Removes and returns the buffered lines.
    pub fn drain_errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn clear_errors(&self) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogBridge")
            .field("capacity", &self.capacity)
            .field("buffered", &self.logged_errors().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CollectingSink {
        lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl LogSink for CollectingSink {
        fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }

    fn bridge_with_sink(capacity: usize) -> (LogBridge, Arc<CollectingSink>) {
        let bridge = LogBridge::new(capacity);
        let sink = Arc::new(CollectingSink::default());
        bridge.set_sink(sink.clone());
        (bridge, sink)
    }

    #[test]
    fn test_tags_stripped_and_mapped() {
        let (bridge, sink) = bridge_with_sink(8);
        bridge.forward("D arena planned");
        bridge.forward("I Model loaded");
        bridge.forward("W  slow kernel ");
        bridge.forward("E Failed to allocate");

        let lines = sink.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (LogLevel::Debug, "arena planned".to_string()),
                (LogLevel::Info, "Model loaded".to_string()),
                (LogLevel::Warn, "slow kernel".to_string()),
                (LogLevel::Error, "Failed to allocate".to_string()),
            ]
        );
    }

    #[test]
    fn test_only_warnings_and_errors_buffered() {
        let (bridge, _sink) = bridge_with_sink(8);
        bridge.forward("I hello");
        bridge.forward("W careful");
        bridge.forward("E broken");
        assert_eq!(bridge.logged_errors(), vec!["careful", "broken"]);
        assert_eq!(bridge.drain_errors().len(), 2);
        assert!(bridge.logged_errors().is_empty());
    }

    #[test]
    fn test_buffer_rolls_over() {
        let (bridge, _sink) = bridge_with_sink(2);
        bridge.forward("E one");
        bridge.forward("E two");
        bridge.forward("E three");
        assert_eq!(bridge.logged_errors(), vec!["two", "three"]);
        bridge.clear_errors();
        assert!(bridge.logged_errors().is_empty());
    }

    #[test]
    fn test_untagged_line_forwarded_whole() {
        let (bridge, sink) = bridge_with_sink(4);
        bridge.forward("Xylophone output");
        bridge.forward("é");
        let lines = sink.lines.lock().unwrap();
        assert_eq!(lines[0], (LogLevel::Info, "Xylophone output".to_string()));
        assert_eq!(lines[1], (LogLevel::Info, "é".to_string()));
        assert!(bridge.logged_errors().is_empty());
    }

    #[test]
    fn test_bare_tag_is_empty_message() {
        let (bridge, sink) = bridge_with_sink(4);
        bridge.forward("E");
        bridge.forward("W");
        bridge.forward("I");
        let lines = sink.lines.lock().unwrap();
        assert_eq!(
            *lines,
            vec![
                (LogLevel::Error, String::new()),
                (LogLevel::Warn, String::new()),
                (LogLevel::Info, String::new()),
            ]
        );
        assert_eq!(bridge.logged_errors(), vec![String::new(), String::new()]);
    }

    #[test]
    fn test_set_sink_returns_previous() {
        let bridge = LogBridge::new(4);
        let first = Arc::new(CollectingSink::default());
        bridge.set_sink(first.clone());
        let previous = bridge.set_sink(Arc::new(TracingSink));
        previous.log(LogLevel::Info, "direct");
        assert_eq!(first.lines.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_level_parse() {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error > LogLevel::Info);
        assert_eq!(LogLevel::Warn.tag(), 'W');
    }
}
