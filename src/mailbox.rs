//! Mailbox access — POP3 over TLS, staged deletes, message decode.
//!
//! Deletes are staged as messages are read and only become durable when
//! the session is closed normally (`commit_deletes`). `abort_deletes`
//! resets the session first so a failed run leaves the mailbox
//! unchanged. POP3 servers also discard pending deletes when the
//! connection drops without QUIT, which is what happens if a run dies
//! mid-fetch.

use std::io::{Read as IoRead, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MessagePart, MimeHeaders};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::error::MailboxError;

/// Read timeout for the mailbox connection.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// One mailbox message reduced to what the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Decoded plain-text body. Never empty.
    pub body: String,
    /// From the message's Date header, normalized to UTC.
    pub received_at: DateTime<Utc>,
}

/// An authenticated mailbox session with staged-delete semantics.
///
/// `delete` requests are pending until `quit` commits them; `reset`
/// rolls all of them back.
pub trait MailboxSession {
    /// Enumerate message identifiers, in server-provided order.
    fn list(&mut self) -> Result<Vec<u32>, MailboxError>;
    /// Retrieve one raw message.
    fn retrieve(&mut self, id: u32) -> Result<Vec<u8>, MailboxError>;
    /// Stage one message for deletion.
    fn delete(&mut self, id: u32) -> Result<(), MailboxError>;
    /// Roll back all staged deletions.
    fn reset(&mut self) -> Result<(), MailboxError>;
    /// Commit staged deletions and close the session.
    fn quit(&mut self) -> Result<(), MailboxError>;
}

// ── POP3 over TLS ───────────────────────────────────────────────────

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Blocking POP3S session.
pub struct Pop3Session {
    stream: TlsStream,
}

impl Pop3Session {
    /// Connect and authenticate.
    pub fn connect(
        host: &str,
        port: u16,
        user: &str,
        password: &SecretString,
    ) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((host, port))?;
        tcp.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(host.to_string()).map_err(|e| {
                MailboxError::ServerName {
                    host: host.to_string(),
                    reason: e.to_string(),
                }
            })?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;
        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("+OK") {
            return Err(MailboxError::Protocol {
                command: "greeting".into(),
                response: greeting,
            });
        }

        session.command(&format!("USER {user}"), "USER")?;

        // PASS gets its own handling so the secret never reaches an
        // error message and a bad login is distinguishable.
        let response = session.exchange(&format!("PASS {}", password.expose_secret()))?;
        if !response.starts_with("+OK") {
            return Err(MailboxError::Auth {
                user: user.to_string(),
                response,
            });
        }

        debug!(host, port, "Mailbox session established");
        Ok(session)
    }

    /// Read one CRLF-terminated line, without the terminator.
    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailboxError::Disconnected),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        buf.truncate(buf.len() - 2);
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send one command line and read the single-line response.
    fn exchange(&mut self, cmd: &str) -> Result<String, MailboxError> {
        self.stream.write_all(format!("{cmd}\r\n").as_bytes())?;
        self.stream.flush()?;
        self.read_line()
    }

    /// `exchange` plus `+OK` status check. `name` is what shows up in
    /// errors, so callers pass the bare verb rather than a full command
    /// line that may carry arguments.
    fn command(&mut self, cmd: &str, name: &str) -> Result<String, MailboxError> {
        let response = self.exchange(cmd)?;
        if response.starts_with("+OK") {
            Ok(response)
        } else {
            Err(MailboxError::Protocol {
                command: name.to_string(),
                response,
            })
        }
    }

    /// Read a multi-line payload up to the lone `.` terminator,
    /// undoing dot-stuffing.
    fn read_multiline(&mut self) -> Result<Vec<String>, MailboxError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            if line == "." {
                return Ok(lines);
            }
            if let Some(stuffed) = line.strip_prefix('.') {
                lines.push(stuffed.to_string());
            } else {
                lines.push(line);
            }
        }
    }
}

impl MailboxSession for Pop3Session {
    fn list(&mut self) -> Result<Vec<u32>, MailboxError> {
        self.command("LIST", "LIST")?;
        let mut ids = Vec::new();
        for line in self.read_multiline()? {
            match line.split_whitespace().next().map(str::parse::<u32>) {
                Some(Ok(id)) => ids.push(id),
                _ => warn!(line = %line, "Ignoring unparseable LIST entry"),
            }
        }
        Ok(ids)
    }

    fn retrieve(&mut self, id: u32) -> Result<Vec<u8>, MailboxError> {
        self.command(&format!("RETR {id}"), "RETR")?;
        Ok(self.read_multiline()?.join("\r\n").into_bytes())
    }

    fn delete(&mut self, id: u32) -> Result<(), MailboxError> {
        self.command(&format!("DELE {id}"), "DELE")?;
        Ok(())
    }

    fn reset(&mut self) -> Result<(), MailboxError> {
        self.command("RSET", "RSET")?;
        Ok(())
    }

    fn quit(&mut self) -> Result<(), MailboxError> {
        self.command("QUIT", "QUIT")?;
        Ok(())
    }
}

// ── Reader ──────────────────────────────────────────────────────────

/// Fetches pending messages and owns the staged-delete lifecycle.
pub struct MailboxReader<S: MailboxSession> {
    session: Option<S>,
}

impl<S: MailboxSession> MailboxReader<S> {
    pub fn new(session: S) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Retrieve every pending message, staging a delete for each one
    /// enumerated (including messages skipped for having no usable
    /// plain-text body — those are consumed too, as they always were).
    ///
    /// An empty mailbox closes the session immediately; there is
    /// nothing staged, so neither `commit_deletes` nor `abort_deletes`
    /// applies in that case.
    pub fn fetch_and_stage_deletes(&mut self) -> Result<Vec<RawMessage>, MailboxError> {
        let ids = {
            let Some(session) = self.session.as_mut() else {
                return Ok(Vec::new());
            };
            session.list()?
        };

        if ids.is_empty() {
            info!("Mailbox has no pending messages");
            if let Some(mut session) = self.session.take() {
                session.quit()?;
            }
            return Ok(Vec::new());
        }

        debug!(count = ids.len(), "Retrieving mailbox messages");
        let Some(session) = self.session.as_mut() else {
            return Ok(Vec::new());
        };

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let raw = session.retrieve(id)?;
            if let Some(message) = decode_raw(&raw) {
                messages.push(message);
            }
            session.delete(id)?;
        }
        Ok(messages)
    }

    /// Finalize staged deletions by closing the session normally.
    pub fn commit_deletes(mut self) -> Result<(), MailboxError> {
        if let Some(mut session) = self.session.take() {
            session.quit()?;
        }
        Ok(())
    }

    /// Roll back staged deletions, then close the session.
    pub fn abort_deletes(mut self) -> Result<(), MailboxError> {
        if let Some(mut session) = self.session.take() {
            session.reset()?;
            session.quit()?;
        }
        Ok(())
    }
}

/// Decode one raw message into a `RawMessage`, or `None` if it carries
/// no usable plain-text body. Malformed content never fails the run.
fn decode_raw(raw: &[u8]) -> Option<RawMessage> {
    let Some(parsed) = MessageParser::default().parse(raw) else {
        warn!("Could not decode mailbox message; skipping it");
        return None;
    };

    // The backup product sends plain text; anything else in the inbox
    // is noted and left out of the summary.
    for part in parsed.attachments() {
        info!(
            content_type = %part_content_type(part),
            "Ignoring non-text message part"
        );
    }

    let body = match parsed.body_text(0) {
        Some(text) if !text.is_empty() => text.into_owned(),
        _ => {
            info!("Message has no plain-text body; skipping it");
            return None;
        }
    };

    let received_at = match parsed.date() {
        Some(date) => {
            DateTime::from_timestamp(date.to_timestamp(), 0).unwrap_or_else(Utc::now)
        }
        None => {
            warn!("Message has no Date header; falling back to current time");
            Utc::now()
        }
    };

    Some(RawMessage { body, received_at })
}

fn part_content_type(part: &MessagePart<'_>) -> String {
    match part.content_type() {
        Some(ct) => match ct.subtype() {
            Some(subtype) => format!("{}/{}", ct.ctype(), subtype),
            None => ct.ctype().to_string(),
        },
        None => "unknown".to_string(),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
