//! Outbound delivery — SMTP via lettre, bounded fixed-delay retry.

use std::time::Duration;

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{DeliveryError, TransportError};

/// One outgoing email. `html_body` present means a
/// multipart/alternative message with the text body as fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// A single delivery attempt over some outbound transport.
pub trait MailTransport {
    fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError>;
}

// ── SMTP transport ──────────────────────────────────────────────────

/// Outbound SMTP transport for the fixed from/to pair.
pub struct SmtpSender {
    transport: SmtpTransport,
    from: Mailbox,
    to: Mailbox,
}

impl SmtpSender {
    pub fn new(config: &Config) -> Result<Self, TransportError> {
        let credentials = Credentials::new(
            config.mailbox_user.clone(),
            config.mailbox_password.expose_secret().to_string(),
        );
        let transport = SmtpTransport::relay(&config.mail_server)
            .map_err(|e| TransportError::Smtp(format!("SMTP relay setup failed: {e}")))?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self {
            transport,
            from: config.from_email.clone(),
            to: config.to_email.clone(),
        })
    }
}

impl MailTransport for SmtpSender {
    fn send(&self, email: &OutgoingEmail) -> Result<(), TransportError> {
        let builder = Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(email.subject.clone());

        let message = match &email.html_body {
            Some(html) => builder.multipart(MultiPart::alternative_plain_html(
                email.text_body.clone(),
                html.clone(),
            )),
            None => builder.body(email.text_body.clone()),
        }
        .map_err(|e| TransportError::Message(e.to_string()))?;

        self.transport
            .send(&message)
            .map_err(|e| TransportError::Smtp(e.to_string()))?;
        Ok(())
    }
}

// ── Retry policy ────────────────────────────────────────────────────

/// Bounded fixed-delay retry. No jitter, no backoff: the job runs once
/// a night and mail server outages are typically short.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 15,
            delay: Duration::from_secs(60),
        }
    }
}

/// Wraps a transport with the retry policy.
pub struct NotificationSender<T: MailTransport> {
    transport: T,
    policy: RetryPolicy,
    sleep: Box<dyn Fn(Duration)>,
}

impl<T: MailTransport> NotificationSender<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            sleep: Box::new(|delay| std::thread::sleep(delay)),
        }
    }

    /// Replace the inter-attempt wait. Tests use this to observe the
    /// retry schedule instead of sleeping through it.
    pub fn with_sleep(mut self, sleep: impl Fn(Duration) + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    /// Deliver the email, retrying per the policy. Returns the last
    /// transport error once attempts are exhausted.
    pub fn send(&self, email: &OutgoingEmail) -> Result<(), DeliveryError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            debug!(attempt, subject = %email.subject, "Attempting to send email");
            match self.transport.send(email) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(attempt, error = %err, "Send attempt failed");
                    if attempt >= self.policy.max_attempts {
                        return Err(DeliveryError {
                            attempts: attempt,
                            source: err,
                        });
                    }
                    (self.sleep)(self.policy.delay);
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct FlakyTransport {
        calls: Rc<RefCell<u32>>,
        succeed_after: Option<u32>,
    }

    impl MailTransport for FlakyTransport {
        fn send(&self, _email: &OutgoingEmail) -> Result<(), TransportError> {
            let mut calls = self.calls.borrow_mut();
            *calls += 1;
            match self.succeed_after {
                Some(n) if *calls > n => Ok(()),
                _ => Err(TransportError::Smtp("connection refused".into())),
            }
        }
    }

    fn email() -> OutgoingEmail {
        OutgoingEmail {
            subject: "Backup Log Summary".into(),
            text_body: "body".into(),
            html_body: None,
        }
    }

    #[test]
    fn first_attempt_success_never_sleeps() {
        let calls = Rc::new(RefCell::new(0));
        let sender = NotificationSender::new(
            FlakyTransport {
                calls: Rc::clone(&calls),
                succeed_after: Some(0),
            },
            RetryPolicy::default(),
        )
        .with_sleep(|_| panic!("should not sleep on immediate success"));

        sender.send(&email()).unwrap();
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn transient_failure_recovers() {
        let calls = Rc::new(RefCell::new(0));
        let slept = Rc::new(RefCell::new(Vec::new()));
        let slept_obs = Rc::clone(&slept);
        let sender = NotificationSender::new(
            FlakyTransport {
                calls: Rc::clone(&calls),
                succeed_after: Some(2),
            },
            RetryPolicy::default(),
        )
        .with_sleep(move |delay| slept_obs.borrow_mut().push(delay));

        sender.send(&email()).unwrap();
        assert_eq!(*calls.borrow(), 3);
        assert_eq!(*slept.borrow(), vec![Duration::from_secs(60); 2]);
    }

    #[test]
    fn exhausted_retries_invoke_transport_exactly_fifteen_times() {
        let calls = Rc::new(RefCell::new(0));
        let slept = Rc::new(RefCell::new(Vec::new()));
        let slept_obs = Rc::clone(&slept);
        let sender = NotificationSender::new(
            FlakyTransport {
                calls: Rc::clone(&calls),
                succeed_after: None,
            },
            RetryPolicy::default(),
        )
        .with_sleep(move |delay| slept_obs.borrow_mut().push(delay));

        let err = sender.send(&email()).unwrap_err();
        assert_eq!(*calls.borrow(), 15);
        assert_eq!(err.attempts, 15);
        assert!(matches!(err.source, TransportError::Smtp(_)));
        // 14 retries, each after the fixed 60s delay.
        assert_eq!(*slept.borrow(), vec![Duration::from_secs(60); 14]);
    }

    #[test]
    fn single_attempt_policy_does_not_sleep() {
        let calls = Rc::new(RefCell::new(0));
        let sender = NotificationSender::new(
            FlakyTransport {
                calls: Rc::clone(&calls),
                succeed_after: None,
            },
            RetryPolicy {
                max_attempts: 1,
                delay: Duration::from_secs(60),
            },
        )
        .with_sleep(|_| panic!("should not sleep with a single attempt"));

        let err = sender.send(&email()).unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(*calls.borrow(), 1);
    }
}
