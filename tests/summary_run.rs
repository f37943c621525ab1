//! End-to-end pipeline tests against fake mailbox and transport
//! implementations. No network, no real sleeps.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use backsum::error::{Error, MailboxError, TransportError};
use backsum::mailbox::MailboxSession;
use backsum::pipeline::{RunOutcome, SummaryPipeline};
use backsum::report::EMPTY_NOTICE_BODY;
use backsum::sender::{MailTransport, NotificationSender, OutgoingEmail, RetryPolicy};

// ── Fakes ───────────────────────────────────────────────────────────

#[derive(Default)]
struct SessionLog {
    deleted: Vec<u32>,
    reset_calls: u32,
    quit_calls: u32,
}

struct FakeSession {
    messages: Vec<Vec<u8>>,
    log: Arc<Mutex<SessionLog>>,
}

impl FakeSession {
    fn new(messages: Vec<Vec<u8>>) -> (Self, Arc<Mutex<SessionLog>>) {
        let log = Arc::new(Mutex::new(SessionLog::default()));
        (
            Self {
                messages,
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl MailboxSession for FakeSession {
    fn list(&mut self) -> Result<Vec<u32>, MailboxError> {
        Ok((1..=self.messages.len() as u32).collect())
    }
    fn retrieve(&mut self, id: u32) -> Result<Vec<u8>, MailboxError> {
        Ok(self.messages[(id - 1) as usize].clone())
    }
    fn delete(&mut self, id: u32) -> Result<(), MailboxError> {
        self.log.lock().unwrap().deleted.push(id);
        Ok(())
    }
    fn reset(&mut self) -> Result<(), MailboxError> {
        self.log.lock().unwrap().reset_calls += 1;
        Ok(())
    }
    fn quit(&mut self) -> Result<(), MailboxError> {
        self.log.lock().unwrap().quit_calls += 1;
        Ok(())
    }
}

struct FakeTransport {
    sent: Arc<Mutex<Vec<OutgoingEmail>>>,
    fail: bool,
}

impl FakeTransport {
    fn new(fail: bool) -> (Self, Arc<Mutex<Vec<OutgoingEmail>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sent: Arc::clone(&sent),
                fail,
            },
            sent,
        )
    }
}

impl MailTransport for FakeTransport {
    fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        if self.fail {
            return Err(TransportError::Smtp("connection refused".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn notification(transport: FakeTransport) -> NotificationSender<FakeTransport> {
    NotificationSender::new(transport, RetryPolicy::default()).with_sleep(|_| {})
}

fn raw_message(body: &str) -> Vec<u8> {
    format!(
        "From: acronis@example.com\r\n\
         To: backups@example.com\r\n\
         Subject: Backup report\r\n\
         Date: Thu, 14 Mar 2024 09:05:00 +0000\r\n\
         Content-Type: text/plain\r\n\
         \r\n\
         {body}"
    )
    .into_bytes()
}

// ── Scenarios ───────────────────────────────────────────────────────

#[test]
fn empty_mailbox_sends_empty_notice() {
    let (session, log) = FakeSession::new(Vec::new());
    let (transport, sent) = FakeTransport::new(false);

    let outcome = SummaryPipeline::new(session, notification(transport))
        .run()
        .unwrap();
    assert_eq!(outcome, RunOutcome::EmptyInbox);

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.starts_with("Backup Log is empty as of "));
    assert_eq!(sent[0].text_body, EMPTY_NOTICE_BODY);
    assert!(sent[0].html_body.is_none());

    // Nothing was staged: no deletes, no rollback.
    let log = log.lock().unwrap();
    assert!(log.deleted.is_empty());
    assert_eq!(log.reset_calls, 0);
}

#[test]
fn single_success_message_renders_green_item() {
    let (session, log) = FakeSession::new(vec![raw_message("Backup task 'X' has succeeded.")]);
    let (transport, sent) = FakeTransport::new(false);

    let outcome = SummaryPipeline::new(session, notification(transport))
        .run()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Summarized { records: 1 });

    let sent = sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].subject.starts_with("Backup Log Summary as of "));
    let html = sent[0].html_body.as_deref().unwrap();
    assert!(html.contains(r#"<li style="color:#006400">Backup task 'X' has succeeded on "#));
    assert!(!html.contains("<ul>"));

    let log = log.lock().unwrap();
    assert_eq!(log.deleted, vec![1]);
    assert_eq!(log.quit_calls, 1);
    assert_eq!(log.reset_calls, 0);
}

#[test]
fn single_failure_message_renders_red_item_with_errors() {
    let body = "Backup started.\nError code: 5\nMessage: Disk full\nBackup task 'X' has failed.";
    let (session, log) = FakeSession::new(vec![raw_message(body)]);
    let (transport, sent) = FakeTransport::new(false);

    SummaryPipeline::new(session, notification(transport))
        .run()
        .unwrap();

    let sent = sent.lock().unwrap();
    let html = sent[0].html_body.as_deref().unwrap();
    assert!(html.contains(r#"<li style="color:#FF0000">"#));
    assert!(html.contains("<ul><li>Error code: 5: Disk full</li></ul>"));
    assert!(sent[0].text_body.contains("has failed"));

    assert_eq!(log.lock().unwrap().deleted, vec![1]);
}

#[test]
fn empty_body_message_is_skipped_but_still_consumed() {
    let (session, log) = FakeSession::new(vec![
        raw_message(""),
        raw_message("Backup task 'X' has succeeded."),
    ]);
    let (transport, sent) = FakeTransport::new(false);

    let outcome = SummaryPipeline::new(session, notification(transport))
        .run()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Summarized { records: 1 });

    let sent = sent.lock().unwrap();
    let html = sent[0].html_body.as_deref().unwrap();
    assert_eq!(html.matches("<li style=").count(), 1);
    assert!(html.contains("Backup task 'X' has succeeded"));

    // Both messages were consumed and the deletes committed.
    let log = log.lock().unwrap();
    assert_eq!(log.deleted, vec![1, 2]);
    assert_eq!(log.quit_calls, 1);
    assert_eq!(log.reset_calls, 0);
}

#[test]
fn delivery_failure_rolls_back_staged_deletes() {
    let (session, log) = FakeSession::new(vec![raw_message("Backup task 'X' has succeeded.")]);
    let (transport, sent) = FakeTransport::new(true);

    let slept = Arc::new(Mutex::new(Vec::new()));
    let slept_obs = Arc::clone(&slept);
    let sender = NotificationSender::new(transport, RetryPolicy::default())
        .with_sleep(move |delay| slept_obs.lock().unwrap().push(delay));

    let err = SummaryPipeline::new(session, sender).run().unwrap_err();
    let delivery = match err {
        Error::Delivery(delivery) => delivery,
        other => panic!("expected a delivery error, got {other}"),
    };
    assert_eq!(delivery.attempts, 15);
    assert_eq!(*slept.lock().unwrap(), vec![Duration::from_secs(60); 14]);

    // Deletes were staged, then rolled back; nothing was delivered.
    let log = log.lock().unwrap();
    assert_eq!(log.deleted, vec![1]);
    assert_eq!(log.reset_calls, 1);
    assert_eq!(log.quit_calls, 1);
    assert!(sent.lock().unwrap().is_empty());
}

#[test]
fn empty_notice_delivery_failure_is_terminal_without_rollback() {
    let (session, log) = FakeSession::new(Vec::new());
    let (transport, _sent) = FakeTransport::new(true);

    let err = SummaryPipeline::new(session, notification(transport))
        .run()
        .unwrap_err();
    assert!(matches!(err, Error::Delivery(_)));

    let log = log.lock().unwrap();
    assert!(log.deleted.is_empty());
    assert_eq!(log.reset_calls, 0);
}

#[test]
fn mixed_mailbox_preserves_retrieval_order() {
    let (session, _log) = FakeSession::new(vec![
        raw_message("Backup task 'A' has succeeded."),
        raw_message("Strange notice from the vendor"),
        raw_message("Error code: 9\nMessage: Tape jam\nBackup task 'B' has failed."),
    ]);
    let (transport, sent) = FakeTransport::new(false);

    let outcome = SummaryPipeline::new(session, notification(transport))
        .run()
        .unwrap();
    assert_eq!(outcome, RunOutcome::Summarized { records: 3 });

    let sent = sent.lock().unwrap();
    let html = sent[0].html_body.as_deref().unwrap();
    let a = html.find("'A'").unwrap();
    let strange = html.find("Strange notice").unwrap();
    let b = html.find("'B'").unwrap();
    assert!(a < strange && strange < b);
    assert!(html.contains(r#"color:#000000"#));
}
