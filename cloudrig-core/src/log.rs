//! Per-work-item log records.
//!
//! Every dispatched work item produces exactly one [`LogRecord`]. The record
//! is assembled with a [`LogBuilder`] while the item runs and handed to the
//! coordinator together with the item's result.

use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Operator-facing output of one work item.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub title: String,
    pub started_at: DateTime<Utc>,
    pub lines: Vec<String>,
    pub elapsed: Duration,
    pub ok: bool,
}

impl LogRecord {
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|l| l.contains(needle))
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "==== {} ({}) ====",
            self.title,
            self.started_at.format("%Y-%m-%dT%H:%M:%SZ")
        )?;
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        write!(
            f,
            "==== {} {}, elapsed {:.3}s ====",
            self.title,
            if self.ok { "OK" } else { "FAILED" },
            self.elapsed.as_secs_f64()
        )
    }
}

/// Accumulates log lines for one work item.
#[derive(Debug)]
pub struct LogBuilder {
    title: String,
    verbose: bool,
    started_at: DateTime<Utc>,
    started: Instant,
    lines: Vec<String>,
}

impl LogBuilder {
    pub fn new(title: impl Into<String>, verbose: bool) -> Self {
        Self {
            title: title.into(),
            verbose,
            started_at: Utc::now(),
            started: Instant::now(),
            lines: Vec::new(),
        }
    }

    pub fn add(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Dumps a provider response; only kept in verbose mode.
    pub fn add_object<T: Serialize + ?Sized>(&mut self, label: &str, obj: &T) {
        if !self.verbose {
            return;
        }
        match serde_json::to_string_pretty(obj) {
            Ok(json) => self.lines.push(format!("{}: {}", label, json)),
            Err(e) => self.lines.push(format!("{}: <unserializable: {}>", label, e)),
        }
    }

    /// Seals the record, appending the error text on failure.
    pub fn complete<T, E: fmt::Display>(mut self, result: Result<T, E>) -> (LogRecord, Result<T, E>) {
        if let Err(e) = &result {
            self.lines.push(format!("error: {}", e));
        }
        let record = LogRecord {
            title: self.title,
            started_at: self.started_at,
            lines: self.lines,
            elapsed: self.started.elapsed(),
            ok: result.is_ok(),
        };
        (record, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_marks_failure() {
        let mut lb = LogBuilder::new("create_networking", false);
        lb.add("found vpc vpc-1");
        let (record, result) = lb.complete::<(), _>(Err("boom"));
        assert!(result.is_err());
        assert!(!record.ok);
        assert!(record.contains("error: boom"));
        let text = record.to_string();
        assert!(text.starts_with("==== create_networking"));
        assert!(text.contains("FAILED"));
    }

    #[test]
    fn test_add_object_only_when_verbose() {
        let mut quiet = LogBuilder::new("q", false);
        quiet.add_object("DescribeVpcs", &vec!["vpc-1"]);
        let (record, _) = quiet.complete::<(), &str>(Ok(()));
        assert!(record.lines.is_empty());

        let mut loud = LogBuilder::new("l", true);
        loud.add_object("DescribeVpcs", &vec!["vpc-1"]);
        let (record, _) = loud.complete::<(), &str>(Ok(()));
        assert!(record.contains("vpc-1"));
        assert!(record.to_string().contains("OK"));
    }
}
