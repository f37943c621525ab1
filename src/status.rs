//! Status extraction from backup notification bodies.
//!
//! The notification format is an uncontrolled vendor text format, so
//! classification is a literal substring match on the summary line
//! rather than a grammar. Error details are recovered from
//! `Error code:` / `Message:` line pairs anywhere in the body.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

/// Classified outcome of one backup notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    Unknown,
}

impl Outcome {
    fn from_summary(line: &str) -> Self {
        if line.contains("has succeeded") {
            Self::Success
        } else if line.contains("has failed") {
            Self::Failure
        } else {
            Self::Unknown
        }
    }
}

/// One extracted error detail from a failure notification.
///
/// `code` is the full `Error code:` line; `message` is the `Message:`
/// line with its literal `Message:` prefix dropped (any leading space
/// after the prefix is kept, as the vendor emails render it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEntry {
    pub code: String,
    pub message: String,
}

impl ErrorEntry {
    /// Rendered `code:message` form. This string is also the dedup
    /// identity: two entries that render identically collapse to one,
    /// even if they came from distinct codes.
    pub fn rendered(&self) -> String {
        format!("{}:{}", self.code, self.message)
    }
}

/// One classified backup notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub outcome: Outcome,
    /// Last non-blank line of the body, single trailing `.` stripped.
    pub summary_line: String,
    pub occurred_at: DateTime<Utc>,
    /// Deduplicated error details, first-seen order. Empty unless
    /// `outcome` is `Failure`.
    pub errors: Vec<ErrorEntry>,
}

/// Classify one notification body.
///
/// Returns `None` when the body has no non-blank line to classify;
/// such messages are skipped rather than rendered.
pub fn classify(body: &str, occurred_at: DateTime<Utc>) -> Option<StatusRecord> {
    let summary_line = summary_line(body)?.to_string();
    let outcome = Outcome::from_summary(&summary_line);
    let errors = match outcome {
        Outcome::Failure => extract_errors(body),
        _ => Vec::new(),
    };

    Some(StatusRecord {
        outcome,
        summary_line,
        occurred_at,
        errors,
    })
}

/// Last non-blank line of the body, with a single trailing `.` removed.
fn summary_line(body: &str) -> Option<&str> {
    let last = body.lines().filter(|line| !line.is_empty()).next_back()?;
    Some(last.strip_suffix('.').unwrap_or(last))
}

/// Scan all lines for `Error code:` / `Message:` pairs.
///
/// Each `Message:` line closes out the most recently seen `Error code:`
/// line; a pending code with no following `Message:` line, or a
/// `Message:` line with no pending code, produces nothing.
fn extract_errors(body: &str) -> Vec<ErrorEntry> {
    let mut entries = Vec::new();
    let mut seen = HashSet::new();
    let mut pending_code: Option<String> = None;

    for line in body.lines() {
        if line.starts_with("Error code:") {
            pending_code = Some(line.to_string());
        } else if line.starts_with("Message:")
            && let Some(code) = pending_code.take()
        {
            let entry = ErrorEntry {
                code,
                message: line["Message:".len()..].to_string(),
            };
            if seen.insert(entry.rendered()) {
                entries.push(entry);
            }
        }
    }

    entries
}

// ── Tests ───────────────────────────────────────────────────────────
