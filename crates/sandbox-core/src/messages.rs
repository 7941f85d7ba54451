//! Diagnostics collected while loading and rewriting classes.
//!
//! Every sandbox owns one [`MessageCollection`]. Messages are filtered when
//! they are added (minimum severity and class-name prefixes), de-duplicated
//! on `(class, member, line, text)`, and exported sorted with the most severe
//! first.
//!
//! # Example
//!
//! ```
//! use sandbox_core::messages::{Message, MessageCollection, Severity, SourceLocation};
//!
//! let mut messages = MessageCollection::new(Severity::Warning, vec![]);
//! let location = SourceLocation::class("com/acme/Sum");
//! messages.add(Message::new(Severity::Error, "Disallowed reference to API", location.clone()));
//! messages.add(Message::new(Severity::Error, "Disallowed reference to API", location));
//! assert_eq!(messages.count(), 1);
//! assert_eq!(messages.error_count(), 1);
//! ```

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Message severity, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Trace,
    Informational,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Trace => "TRACE",
            Severity::Informational => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Where something was found: a class, optionally narrowed to a member and
/// a source line.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    pub class_name: String,
    pub member_name: Option<String>,
    pub descriptor: Option<String>,
    pub line: Option<u32>,
    pub source_file: Option<String>,
}

impl SourceLocation {
    pub fn class(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            member_name: None,
            descriptor: None,
            line: None,
            source_file: None,
        }
    }

    pub fn member(mut self, name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        self.member_name = Some(name.into());
        self.descriptor = Some(descriptor.into());
        self
    }

    pub fn at_line(mut self, line: Option<u32>) -> Self {
        self.line = line;
        self
    }

    pub fn in_file(mut self, source_file: Option<String>) -> Self {
        self.source_file = source_file;
        self
    }

    /// `Class.member(desc)` or just `Class`.
    pub fn format_member(&self) -> String {
        match (&self.member_name, &self.descriptor) {
            (Some(name), Some(desc)) => format!("{}.{}{}", self.class_name, name, desc),
            (Some(name), None) => format!("{}.{}", self.class_name, name),
            _ => self.class_name.clone(),
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format_member())?;
        match (&self.source_file, self.line) {
            (Some(file), Some(line)) => write!(f, " ({}:{})", file, line),
            (Some(file), None) => write!(f, " ({})", file),
            (None, Some(line)) => write!(f, " (line {})", line),
            (None, None) => Ok(()),
        }
    }
}

/// A single diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub severity: Severity,
    pub text: String,
    pub location: SourceLocation,
}

impl Message {
    pub fn new(severity: Severity, text: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            severity,
            text: text.into(),
            location,
        }
    }

    /// An error-severity message built from any displayable error.
    pub fn from_error(error: &dyn fmt::Display, location: SourceLocation) -> Self {
        Self::new(Severity::Error, error.to_string(), location)
    }

    fn dedup_key(&self) -> (String, Option<String>, Option<u32>, String) {
        (
            self.location.class_name.clone(),
            self.location.member_name.clone(),
            self.location.line,
            self.text.clone(),
        )
    }

    fn export_order(&self, other: &Message) -> Ordering {
        other
            .severity
            .cmp(&self.severity)
            .then_with(|| self.location.source_file.cmp(&other.location.source_file))
            .then_with(|| self.location.line.cmp(&other.location.line))
            .then_with(|| self.location.format_member().cmp(&other.location.format_member()))
            .then_with(|| self.text.cmp(&other.text))
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.location, self.text)
    }
}

/// Filtered, de-duplicated diagnostics for one sandbox.
#[derive(Debug, Default)]
pub struct MessageCollection {
    minimum_severity: Option<Severity>,
    prefix_filters: Vec<String>,
    messages: Vec<Message>,
    seen: HashSet<(String, Option<String>, Option<u32>, String)>,
    sorted: OnceCell<Vec<Message>>,
}

impl MessageCollection {
    /// `prefix_filters` restricts messages to classes starting with one of
    /// the prefixes; an empty list accepts every class.
    pub fn new(minimum_severity: Severity, prefix_filters: Vec<String>) -> Self {
        Self {
            minimum_severity: Some(minimum_severity),
            prefix_filters,
            ..Self::default()
        }
    }

    fn accepts(&self, message: &Message) -> bool {
        if self
            .minimum_severity
            .is_some_and(|minimum| message.severity < minimum)
        {
            return false;
        }
        self.prefix_filters.is_empty()
            || self
                .prefix_filters
                .iter()
                .any(|prefix| message.location.class_name.starts_with(prefix.as_str()))
    }

    /// Add a message. Returns false when it was filtered out or already
    /// present.
    pub fn add(&mut self, message: Message) -> bool {
        if !self.accepts(&message) || !self.seen.insert(message.dedup_key()) {
            return false;
        }
        self.messages.push(message);
        self.sorted.take();
        true
    }

    pub fn add_all(&mut self, messages: impl IntoIterator<Item = Message>) {
        for message in messages {
            self.add(message);
        }
    }

    /// Messages attached to a class, optionally narrowed to one member.
    pub fn messages_for(&self, class_name: &str, member: Option<&str>, descriptor: Option<&str>) -> Vec<&Message> {
        self.messages
            .iter()
            .filter(|m| m.location.class_name == class_name)
            .filter(|m| member.map_or(true, |name| m.location.member_name.as_deref() == Some(name)))
            .filter(|m| descriptor.map_or(true, |desc| m.location.descriptor.as_deref() == Some(desc)))
            .collect()
    }

    /// All messages, most severe first. Cached until the next `add`.
    pub fn sorted(&self) -> &[Message] {
        self.sorted.get_or_init(|| {
            let mut sorted = self.messages.clone();
            sorted.sort_by(Message::export_order);
            sorted
        })
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn count_of(&self, severity: Severity) -> usize {
        self.messages.iter().filter(|m| m.severity == severity).count()
    }

    pub fn error_count(&self) -> usize {
        self.count_of(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count_of(Severity::Warning)
    }

    pub fn report(&self) -> DiagnosticsReport {
        let mut counts = SeverityCounts::default();
        for message in &self.messages {
            counts.increment(message.severity);
        }
        DiagnosticsReport {
            messages: self.sorted().to_vec(),
            counts,
        }
    }
}

/// Number of messages per severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub trace: usize,
    pub informational: usize,
    pub warning: usize,
    pub error: usize,
}

impl SeverityCounts {
    fn slot(&mut self, severity: Severity) -> &mut usize {
        match severity {
            Severity::Trace => &mut self.trace,
            Severity::Informational => &mut self.informational,
            Severity::Warning => &mut self.warning,
            Severity::Error => &mut self.error,
        }
    }

    fn increment(&mut self, severity: Severity) {
        *self.slot(severity) += 1;
    }

    pub fn get(&self, severity: Severity) -> usize {
        match severity {
            Severity::Trace => self.trace,
            Severity::Informational => self.informational,
            Severity::Warning => self.warning,
            Severity::Error => self.error,
        }
    }
}

/// Exported diagnostics: sorted messages plus per-severity counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub messages: Vec<Message>,
    pub counts: SeverityCounts,
}

impl DiagnosticsReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.counts.get(severity)
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Text of every message, in export order.
    pub fn texts(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.text.as_str()).collect()
    }
}

impl fmt::Display for DiagnosticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for message in &self.messages {
            writeln!(f, "{}", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(class: &str, line: u32) -> SourceLocation {
        SourceLocation::class(class)
            .member("apply", "(I)I")
            .at_line(Some(line))
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let mut messages = MessageCollection::new(Severity::Trace, vec![]);
        assert!(messages.add(Message::new(Severity::Error, "boom", at("com/A", 3))));
        assert!(!messages.add(Message::new(Severity::Error, "boom", at("com/A", 3))));
        // Same text on another line is a different message.
        assert!(messages.add(Message::new(Severity::Error, "boom", at("com/A", 4))));
        assert_eq!(messages.count(), 2);
    }

    #[test]
    fn test_severity_filter_applies_at_add() {
        let mut messages = MessageCollection::new(Severity::Warning, vec![]);
        assert!(!messages.add(Message::new(Severity::Informational, "loaded", at("com/A", 1))));
        assert!(messages.add(Message::new(Severity::Warning, "careful", at("com/A", 1))));
        assert_eq!(messages.count(), 1);
        assert_eq!(messages.warning_count(), 1);
    }

    #[test]
    fn test_prefix_filter() {
        let mut messages = MessageCollection::new(Severity::Trace, vec!["com/acme/".to_string()]);
        assert!(messages.add(Message::new(Severity::Error, "x", at("com/acme/A", 1))));
        assert!(!messages.add(Message::new(Severity::Error, "x", at("org/other/B", 1))));
        assert_eq!(messages.count(), 1);
    }

    #[test]
    fn test_sorted_order_and_cache_invalidation() {
        let mut messages = MessageCollection::new(Severity::Trace, vec![]);
        messages.add(Message::new(Severity::Warning, "w", at("com/A", 9)));
        messages.add(Message::new(Severity::Error, "e2", at("com/A", 5)));
        messages.add(Message::new(Severity::Error, "e1", at("com/A", 2)));

        let texts: Vec<_> = messages.sorted().iter().map(|m| m.text.clone()).collect();
        assert_eq!(texts, vec!["e1", "e2", "w"]);

        messages.add(Message::new(Severity::Trace, "t", at("com/A", 1)));
        assert_eq!(messages.sorted().len(), 4);
        assert_eq!(messages.sorted()[3].text, "t");
    }

    #[test]
    fn test_messages_for_member() {
        let mut messages = MessageCollection::new(Severity::Trace, vec![]);
        messages.add(Message::new(Severity::Error, "a", at("com/A", 1)));
        messages.add(Message::new(
            Severity::Error,
            "b",
            SourceLocation::class("com/A").member("other", "()V"),
        ));
        assert_eq!(messages.messages_for("com/A", None, None).len(), 2);
        assert_eq!(messages.messages_for("com/A", Some("apply"), None).len(), 1);
        assert_eq!(messages.messages_for("com/A", Some("apply"), Some("()V")).len(), 0);
        assert!(messages.messages_for("com/B", None, None).is_empty());
    }

    #[test]
    fn test_report_counts() {
        let mut messages = MessageCollection::new(Severity::Trace, vec![]);
        messages.add(Message::new(Severity::Error, "a", at("com/A", 1)));
        messages.add(Message::new(Severity::Warning, "b", at("com/A", 1)));
        messages.add(Message::new(Severity::Warning, "c", at("com/A", 1)));

        let report = messages.report();
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.count(Severity::Warning), 2);
        assert_eq!(report.count(Severity::Trace), 0);

        let json = serde_json::to_string(&report).unwrap();
        let back: DiagnosticsReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_display() {
        let message = Message::new(
            Severity::Error,
            "Disallowed reference to API",
            SourceLocation::class("com/A")
                .member("run", "()V")
                .at_line(Some(12))
                .in_file(Some("A.src".to_string())),
        );
        assert_eq!(
            message.to_string(),
            "[ERROR] com/A.run()V (A.src:12): Disallowed reference to API"
        );
    }
}
