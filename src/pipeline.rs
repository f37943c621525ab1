//! One summary run: fetch → classify → render → send → commit/abort.
//!
//! The whole job hangs on one guarantee: no message is deleted from the
//! mailbox unless the summary (or the empty-inbox notice) was confirmed
//! delivered. Deletes stay staged until the send succeeds; a failed
//! send aborts them so the next scheduled run starts from the same
//! mailbox state.

use chrono::Local;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::mailbox::{MailboxReader, MailboxSession};
use crate::report::{self, EMPTY_NOTICE_BODY};
use crate::sender::{MailTransport, NotificationSender, OutgoingEmail};
use crate::status::{StatusRecord, classify};

/// Terminal state of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Mailbox was empty; the empty-inbox notice was delivered.
    EmptyInbox,
    /// Summary delivered and mailbox deletes committed.
    Summarized { records: usize },
}

/// Wires the mailbox reader, parser, renderer and sender together for
/// a single run-to-completion invocation.
pub struct SummaryPipeline<S: MailboxSession, T: MailTransport> {
    reader: MailboxReader<S>,
    sender: NotificationSender<T>,
}

impl<S: MailboxSession, T: MailTransport> SummaryPipeline<S, T> {
    pub fn new(session: S, sender: NotificationSender<T>) -> Self {
        Self {
            reader: MailboxReader::new(session),
            sender,
        }
    }

    /// Run the pipeline once.
    ///
    /// Mailbox errors propagate immediately; the dropped session leaves
    /// staged deletes uncommitted on the server. Delivery failure after
    /// retries is terminal for the run and rolls the staged deletes
    /// back explicitly.
    pub fn run(mut self) -> Result<RunOutcome> {
        info!("Summary run started");

        let raw = self.reader.fetch_and_stage_deletes()?;
        if raw.is_empty() {
            return self.send_empty_notice();
        }

        let records: Vec<StatusRecord> = raw
            .iter()
            .filter_map(|message| {
                let record = classify(&message.body, message.received_at);
                if record.is_none() {
                    debug!("Skipping message with no classifiable line");
                }
                record
            })
            .collect();

        let rendered = report::render(&records);
        let email = OutgoingEmail {
            subject: report::summary_subject(Local::now()),
            text_body: rendered.text_body,
            html_body: Some(rendered.html_body),
        };

        match self.sender.send(&email) {
            Ok(()) => {
                self.reader.commit_deletes()?;
                info!(records = records.len(), "Backup log summary email sent");
                Ok(RunOutcome::Summarized {
                    records: records.len(),
                })
            }
            Err(err) => {
                error!(
                    error = %err,
                    "Could not send backup log summary email; leaving mailbox unchanged"
                );
                if let Err(abort_err) = self.reader.abort_deletes() {
                    // The delivery error is the one worth surfacing;
                    // the server will also drop staged deletes when the
                    // connection goes away.
                    error!(error = %abort_err, "Rolling back staged deletes failed");
                }
                Err(Error::Delivery(err))
            }
        }
    }

    /// Mailbox had nothing to summarize; say so. Nothing was staged,
    /// so there is no commit or abort to make.
    fn send_empty_notice(self) -> Result<RunOutcome> {
        let email = OutgoingEmail {
            subject: report::empty_subject(Local::now()),
            text_body: EMPTY_NOTICE_BODY.to_string(),
            html_body: None,
        };
        match self.sender.send(&email) {
            Ok(()) => {
                info!("Backup log empty email sent");
                Ok(RunOutcome::EmptyInbox)
            }
            Err(err) => {
                error!(error = %err, "Could not send backup log empty email");
                Err(Error::Delivery(err))
            }
        }
    }
}
