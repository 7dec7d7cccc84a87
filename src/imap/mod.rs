//! IMAP client for the mailbox retrieval leg.
//!
//! A minimal IMAP4rev1 client covering what a scan needs: STARTTLS, LOGIN,
//! SELECT INBOX, SEARCH ALL, FETCH BODY.PEEK[] with literal parsing, STORE
//! +FLAGS.SILENT (\Deleted), EXPUNGE, and LOGOUT. The [`MailRetrieval`]
//! trait is the seam the reconciler is written against.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use std::time::Duration;

use crate::config::{Endpoint, TlsMode};
use crate::errors::{RetrievalError, RetrievalResult};
use crate::net::Connection;

/// Trait for the mailbox retrieval seam.
///
/// Message ids are mailbox-assigned sequence numbers, opaque to callers.
/// `mark_deleted` only flags; nothing is removed until `commit`.
#[async_trait]
pub trait MailRetrieval: Send {
    /// Lists the ids of every message in the mailbox.
    async fn list(&mut self) -> RetrievalResult<Vec<u32>>;

    /// Fetches the raw RFC 5322 bytes of one message.
    async fn fetch(&mut self, id: u32) -> RetrievalResult<Vec<u8>>;

    /// Flags one message for deletion.
    async fn mark_deleted(&mut self, id: u32) -> RetrievalResult<()>;

    /// Permanently removes every flagged message.
    async fn commit(&mut self) -> RetrievalResult<()>;

    /// Logs out and closes the session.
    async fn close(&mut self) -> RetrievalResult<()>;
}

/// An authenticated IMAP session with INBOX selected, scoped to a single
/// scan.
pub struct ImapSession {
    conn: Connection,
    tag: u32,
}

impl ImapSession {
    /// Connects, upgrades to TLS per the endpoint's mode, logs in, and
    /// selects INBOX.
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> RetrievalResult<Self> {
        let mut conn = Connection::open(
            &endpoint.imap_host,
            endpoint.imap_port,
            connect_timeout,
            command_timeout,
        )
        .await?;

        let greeting = conn.read_line().await?;
        if !greeting.starts_with("* OK") {
            return Err(RetrievalError::connect(format!(
                "unexpected greeting: {}",
                greeting
            )));
        }

        let mut session = Self { conn, tag: 0 };

        if endpoint.tls == TlsMode::StartTls {
            session.start_tls(&endpoint.imap_host).await?;
        }

        session
            .login(&endpoint.username, endpoint.password.expose_secret())
            .await?;
        session.run("SELECT", "SELECT INBOX").await?;

        Ok(session)
    }

    fn next_tag(&mut self) -> String {
        self.tag += 1;
        format!("a{}", self.tag)
    }

    /// Sends one tagged command and collects untagged lines until its
    /// completion. `op` is the loggable verb; `command` may carry
    /// credentials and is never logged.
    async fn run(&mut self, op: &'static str, command: &str) -> RetrievalResult<Vec<String>> {
        let tag = self.next_tag();
        tracing::debug!(command = op, "sending IMAP command");
        self.conn.write_line(&format!("{} {}", tag, command)).await?;

        let mut untagged = Vec::new();
        loop {
            let line = self.conn.read_line().await?;
            if let Some(status) = tagged_status(&line, &tag) {
                tracing::debug!(command = op, status, "IMAP completion");
                return match status.split_once(' ').map(|(s, _)| s).unwrap_or(status) {
                    "OK" => Ok(untagged),
                    "NO" | "BAD" => Err(RetrievalError::rejected(op, status.to_string())),
                    _ => Err(RetrievalError::protocol(format!(
                        "unrecognized completion: {}",
                        line
                    ))),
                };
            }
            untagged.push(line);
        }
    }

    async fn start_tls(&mut self, host: &str) -> RetrievalResult<()> {
        self.run("STARTTLS", "STARTTLS").await.map_err(|err| match err {
            RetrievalError::Rejected { reply, .. } => RetrievalError::tls(reply),
            other => other,
        })?;
        self.conn.upgrade_tls(host).await?;
        Ok(())
    }

    async fn login(&mut self, username: &str, password: &str) -> RetrievalResult<()> {
        let command = format!("LOGIN {} {}", quote(username), quote(password));
        match self.run("LOGIN", &command).await {
            Ok(_) => Ok(()),
            Err(RetrievalError::Rejected { reply, .. }) => Err(RetrievalError::login(reply)),
            Err(other) => Err(other),
        }
    }
}

#[async_trait]
impl MailRetrieval for ImapSession {
    async fn list(&mut self) -> RetrievalResult<Vec<u32>> {
        let lines = self.run("SEARCH", "SEARCH ALL").await?;
        Ok(parse_search(&lines))
    }

    async fn fetch(&mut self, id: u32) -> RetrievalResult<Vec<u8>> {
        let tag = self.next_tag();
        tracing::debug!(command = "FETCH", id, "sending IMAP command");
        self.conn
            .write_line(&format!("{} FETCH {} BODY.PEEK[]", tag, id))
            .await?;

        let mut body: Option<Vec<u8>> = None;
        loop {
            let line = self.conn.read_line().await?;
            if let Some(status) = tagged_status(&line, &tag) {
                if status.starts_with("OK") {
                    break;
                }
                return Err(RetrievalError::rejected("FETCH", status.to_string()));
            }
            if line.starts_with('*') {
                if let Some(len) = literal_len(&line) {
                    let bytes = self.conn.read_exact(len).await?;
                    if body.is_none() {
                        body = Some(bytes);
                    }
                }
            }
        }

        body.ok_or_else(|| {
            RetrievalError::protocol(format!("FETCH {} returned no message body", id))
        })
    }

    async fn mark_deleted(&mut self, id: u32) -> RetrievalResult<()> {
        self.run(
            "STORE",
            &format!("STORE {} +FLAGS.SILENT (\\Deleted)", id),
        )
        .await?;
        Ok(())
    }

    async fn commit(&mut self) -> RetrievalResult<()> {
        self.run("EXPUNGE", "EXPUNGE").await?;
        Ok(())
    }

    async fn close(&mut self) -> RetrievalResult<()> {
        let _ = self.run("LOGOUT", "LOGOUT").await;
        Ok(())
    }
}

/// Returns the status portion of a tagged completion line, or `None` for
/// untagged lines.
fn tagged_status<'a>(line: &'a str, tag: &str) -> Option<&'a str> {
    line.strip_prefix(tag)?.strip_prefix(' ')
}

/// Extracts the ids from `* SEARCH ...` untagged responses.
fn parse_search(lines: &[String]) -> Vec<u32> {
    let mut ids = Vec::new();
    for line in lines {
        if let Some(rest) = line.strip_prefix("* SEARCH") {
            ids.extend(rest.split_whitespace().filter_map(|tok| tok.parse::<u32>().ok()));
        }
    }
    ids
}

/// Parses the byte count of a trailing `{n}` literal marker.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.strip_suffix('}')?;
    let idx = line.rfind('{')?;
    line[idx + 1..].parse().ok()
}

/// Quotes a string per the IMAP grammar.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if ch == '\\' || ch == '"' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}
