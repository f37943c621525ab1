//! Summary report rendering — HTML plus a derived plain-text body.

use std::fmt::Write;

use chrono::{DateTime, Local};
use tracing::warn;

use crate::status::{Outcome, StatusRecord};

/// Display format shared by list items and subject lines:
/// weekday, unpadded month/day, 12-hour clock with AM/PM.
const DISPLAY_FORMAT: &str = "%a, %-m/%-d/%Y at %I:%M %p";

/// Fixed body of the notice sent when the mailbox has no messages.
pub const EMPTY_NOTICE_BODY: &str = "The backup log inbox is empty.";

/// One run's rendered summary report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub html_body: String,
    pub text_body: String,
}

impl Outcome {
    /// List item color for this outcome.
    fn html_color(self) -> &'static str {
        match self {
            Self::Success => "#006400",
            Self::Failure => "#FF0000",
            Self::Unknown => "#000000",
        }
    }
}

/// Render the records into an ordered-list HTML report and derive the
/// plain-text body from it.
///
/// Rendering is deterministic over the record sequence. A record with
/// an empty summary line contributes no list item; it has been observed
/// in production and must not corrupt its neighbors.
pub fn render(records: &[StatusRecord]) -> Report {
    let mut items = String::from("<ol>");
    for record in records {
        if record.summary_line.is_empty() {
            warn!("Skipping record with empty summary line");
            continue;
        }
        let when = format_timestamp(record.occurred_at.with_timezone(&Local));
        let _ = write!(
            items,
            r#"<li style="color:{}">{} on {}{}</li>"#,
            record.outcome.html_color(),
            record.summary_line,
            when,
            error_list_html(record),
        );
    }
    items.push_str("</ol>");

    let html_body = format!("<html><head></head><body>{items}</body></html>");
    let text_body = match htmd::convert(&html_body) {
        Ok(text) => text,
        Err(err) => {
            warn!(error = %err, "HTML to text conversion failed; sending HTML as text");
            html_body.clone()
        }
    };

    Report { html_body, text_body }
}

/// Inline unordered list of `code:message` entries for failure records.
fn error_list_html(record: &StatusRecord) -> String {
    if record.outcome != Outcome::Failure || record.errors.is_empty() {
        return String::new();
    }
    let entries: Vec<String> = record.errors.iter().map(|e| e.rendered()).collect();
    format!("<ul><li>{}</li></ul>", entries.join("</li><li>"))
}

/// Subject for the summary report, from the run's current time.
pub fn summary_subject(now: DateTime<Local>) -> String {
    format!("Backup Log Summary as of {}", format_timestamp(now))
}

/// Subject for the empty-inbox notice, from the run's current time.
pub fn empty_subject(now: DateTime<Local>) -> String {
    format!("Backup Log is empty as of {}", format_timestamp(now))
}

/// Format a local timestamp for display, e.g. `Thu, 3/14/2024 at 09:05 AM`.
pub fn format_timestamp(at: DateTime<Local>) -> String {
    at.format(DISPLAY_FORMAT).to_string()
}

// ── Tests ───────────────────────────────────────────────────────────
