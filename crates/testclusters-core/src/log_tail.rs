//! Single-pass summary of a node log on teardown.
//!
//! A line starting with `[` opens a new log message; any other line is a
//! continuation (stack frames, wrapped output) and is folded into the message
//! before it. Completed messages mentioning `ERROR` or `WARN` are counted
//! under a normalized key, and the last N messages are kept in a ring so the
//! tail of the log can be shown without holding the whole file in memory.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{IoContext, Result};
use crate::ring_buffer::RingBuffer;

/// Number of trailing messages kept when no override is configured.
pub const DEFAULT_TAIL_LINES: usize = 40;

/// Messages the server prints on healthy test machines.
pub const KNOWN_BENIGN_MESSAGES: [&str; 3] = [
    "Option UseConcMarkSweepGC was deprecated",
    "is a pre-release version of Elasticsearch",
    "max virtual memory areas vm.max_map_count",
];

/// Aggregated errors and warnings plus the trailing messages of one log.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LogSummary {
    pub source: PathBuf,
    /// Configured number of trailing messages.
    pub tail_size: usize,
    /// Normalized message and occurrence count, in first-seen order.
    pub errors_and_warnings: Vec<(String, usize)>,
    /// Last messages of the log, oldest first, with ignored messages removed.
    pub tail: Vec<String>,
}

impl LogSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors_and_warnings.is_empty() && self.tail.is_empty()
    }

    #[must_use]
    pub fn count_of(&self, message: &str) -> Option<usize> {
        self.errors_and_warnings
            .iter()
            .find(|(m, _)| m == message)
            .map(|(_, n)| *n)
    }

    /// Human-readable report: the aggregate first, then tail messages that
    /// are not already part of it.
    #[must_use]
    pub fn render(&self, description: &str, node: &str) -> String {
        let mut out = String::new();
        if self.is_empty() {
            return out;
        }
        let _ = writeln!(out, "=== {description} `{node}` ===");
        if !self.errors_and_warnings.is_empty() {
            let _ = writeln!(
                out,
                "»    ↓ errors and warnings from {} ↓",
                self.source.display()
            );
            for (message, count) in &self.errors_and_warnings {
                let _ = writeln!(out, "» {}", message.replace('\n', "\n»  "));
                if *count > 1 {
                    let _ = writeln!(out, "»   ↑ repeated {count} times ↑");
                }
            }
        }

        let remaining: Vec<&String> = self
            .tail
            .iter()
            .filter(|line| self.count_of(normalize(line)).is_none())
            .collect();
        if !remaining.is_empty() {
            let _ = writeln!(
                out,
                "»   ↓ last {} non error or warning messages from {} ↓",
                self.tail_size,
                self.source.display()
            );
            for line in remaining {
                let _ = writeln!(out, "» {}", line.replace('\n', "\n»  "));
            }
        }
        out
    }
}

/// Trim everything before the first `ERROR`, or failing that the first `WARN`.
#[must_use]
pub fn normalize(message: &str) -> &str {
    message
        .find("ERROR")
        .or_else(|| message.find("WARN"))
        .map_or(message, |idx| &message[idx..])
}

fn is_ignored(message: &str, ignore: &[String]) -> bool {
    ignore.iter().any(|needle| message.contains(needle.as_str()))
}

fn classify(message: &str, ignore: &[String], aggregate: &mut Vec<(String, usize)>) {
    let key = normalize(message);
    if !(key.contains("ERROR") || key.contains("WARN")) || is_ignored(key, ignore) {
        return;
    }
    if let Some(entry) = aggregate.iter_mut().find(|(m, _)| m == key) {
        entry.1 += 1;
    } else {
        aggregate.push((key.to_string(), 1));
    }
}

/// Incremental summarizer: feed lines in order, then [`finish`](Self::finish).
///
/// Memory is bounded by the tail size plus the distinct errors and warnings.
#[derive(Debug)]
pub struct LogSummarizer<'a> {
    ring: RingBuffer<String>,
    aggregate: Vec<(String, usize)>,
    tail_size: usize,
    ignore: &'a [String],
}

impl<'a> LogSummarizer<'a> {
    #[must_use]
    pub fn new(tail_size: usize, ignore: &'a [String]) -> Self {
        Self {
            ring: RingBuffer::new(tail_size),
            aggregate: Vec::new(),
            tail_size,
            ignore,
        }
    }

    pub fn push_line(&mut self, line: String) {
        match self.ring.back_mut() {
            Some(previous) if !line.starts_with('[') => {
                previous.push('\n');
                previous.push_str(&line);
            }
            previous => {
                if let Some(previous) = previous {
                    classify(previous, self.ignore, &mut self.aggregate);
                }
                self.ring.push(line);
            }
        }
    }

    /// Messages currently held for the tail.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    #[must_use]
    pub fn finish(mut self) -> LogSummary {
        if let Some(last) = self.ring.back() {
            classify(last, self.ignore, &mut self.aggregate);
        }
        let ignore = self.ignore;
        let tail = self
            .ring
            .into_vec()
            .into_iter()
            .filter(|message| !is_ignored(message, ignore))
            .collect();

        LogSummary {
            source: PathBuf::new(),
            tail_size: self.tail_size,
            errors_and_warnings: self.aggregate,
            tail,
        }
    }
}

/// Summarize an in-memory sequence of log lines.
pub fn summarize_lines<I, S>(lines: I, tail_size: usize, ignore: &[String]) -> LogSummary
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut summarizer = LogSummarizer::new(tail_size, ignore);
    for line in lines {
        summarizer.push_line(line.into());
    }
    summarizer.finish()
}

/// Stream `path` once and summarize it.
pub fn summarize(path: &Path, tail_size: usize, ignore: &[String]) -> Result<LogSummary> {
    let file = File::open(path).io_context("open log", path)?;
    let mut summarizer = LogSummarizer::new(tail_size, ignore);
    for line in BufReader::new(file).lines() {
        summarizer.push_line(line.io_context("read log", path)?);
    }
    let mut summary = summarizer.finish();
    summary.source = path.to_path_buf();
    tracing::debug!(
        path = %path.display(),
        errors_and_warnings = summary.errors_and_warnings.len(),
        tail = summary.tail.len(),
        "Summarized node log"
    );
    Ok(summary)
}

/// Emit a rendered summary through tracing at error level so it shows up in
/// test output next to the failure that triggered teardown.
pub fn log_summary(summary: &LogSummary, description: &str, node: &str) {
    if summary.is_empty() {
        return;
    }
    tracing::error!(node, "\n{}", summary.render(description, node));
}
