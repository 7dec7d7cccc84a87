//! Mock implementations for testing.
//!
//! Recording doubles for both session seams, plus fixture constructors
//! for probes and endpoint pairs.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use crate::config::{CheckConfig, Endpoint};
use crate::errors::{RetrievalError, RetrievalResult, TransportError, TransportResult};
use crate::imap::MailRetrieval;
use crate::probe::Probe;
use crate::smtp::MailTransport;

/// The operations of a retrieval session, for targeting programmed
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxOp {
    /// `list()`.
    List,
    /// `fetch()`.
    Fetch,
    /// `mark_deleted()`.
    MarkDeleted,
    /// `commit()`.
    Commit,
    /// `close()`.
    Close,
}

/// Mock retrieval session over a seeded in-memory mailbox.
#[derive(Debug, Default)]
pub struct MockRetrieval {
    messages: Vec<(u32, Vec<u8>)>,
    marked: Arc<Mutex<Vec<u32>>>,
    commits: Arc<Mutex<u32>>,
    closed: Arc<Mutex<bool>>,
    fail: Arc<Mutex<Option<(MailboxOp, RetrievalError)>>>,
}

impl MockRetrieval {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one message.
    pub fn seed(&mut self, id: u32, raw: Vec<u8>) {
        self.messages.push((id, raw));
    }

    /// Programs the next call of `op` to fail with `error`.
    pub fn fail_on(&self, op: MailboxOp, error: RetrievalError) {
        *self.fail.lock().unwrap() = Some((op, error));
    }

    /// Returns the ids flagged for deletion, in flagging order.
    pub fn marked(&self) -> Vec<u32> {
        self.marked.lock().unwrap().clone()
    }

    /// Returns how many times `commit` ran.
    pub fn commit_count(&self) -> u32 {
        *self.commits.lock().unwrap()
    }

    /// Returns true if the session was closed.
    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }

    /// Returns the messages still present (flagged ones remain until
    /// commit).
    pub fn remaining(&self) -> Vec<u32> {
        self.messages.iter().map(|(id, _)| *id).collect()
    }

    fn take_failure(&self, op: MailboxOp) -> Option<RetrievalError> {
        let mut slot = self.fail.lock().unwrap();
        if matches!(&*slot, Some((target, _)) if *target == op) {
            return slot.take().map(|(_, err)| err);
        }
        None
    }
}

#[async_trait]
impl MailRetrieval for MockRetrieval {
    async fn list(&mut self) -> RetrievalResult<Vec<u32>> {
        if let Some(err) = self.take_failure(MailboxOp::List) {
            return Err(err);
        }
        Ok(self.messages.iter().map(|(id, _)| *id).collect())
    }

    async fn fetch(&mut self, id: u32) -> RetrievalResult<Vec<u8>> {
        if let Some(err) = self.take_failure(MailboxOp::Fetch) {
            return Err(err);
        }
        self.messages
            .iter()
            .find(|(mid, _)| *mid == id)
            .map(|(_, raw)| raw.clone())
            .ok_or_else(|| RetrievalError::rejected("FETCH", format!("NO no message {}", id)))
    }

    async fn mark_deleted(&mut self, id: u32) -> RetrievalResult<()> {
        if let Some(err) = self.take_failure(MailboxOp::MarkDeleted) {
            return Err(err);
        }
        self.marked.lock().unwrap().push(id);
        Ok(())
    }

    async fn commit(&mut self) -> RetrievalResult<()> {
        if let Some(err) = self.take_failure(MailboxOp::Commit) {
            return Err(err);
        }
        *self.commits.lock().unwrap() += 1;
        let marked = self.marked.lock().unwrap().clone();
        self.messages.retain(|(id, _)| !marked.contains(id));
        Ok(())
    }

    async fn close(&mut self) -> RetrievalResult<()> {
        if let Some(err) = self.take_failure(MailboxOp::Close) {
            return Err(err);
        }
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// One message captured by [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Envelope sender.
    pub from: String,
    /// Envelope recipient.
    pub to: String,
    /// Raw message bytes.
    pub raw: Vec<u8>,
}

/// Mock transport session that records sent messages.
#[derive(Debug, Default)]
pub struct MockTransport {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    closed: Arc<Mutex<bool>>,
    fail: Arc<Mutex<Option<TransportError>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Programs the next send to fail with `error`.
    pub fn fail_next_with(&self, error: TransportError) {
        *self.fail.lock().unwrap() = Some(error);
    }

    /// Returns the recorded messages.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Returns true if the session was closed.
    pub fn was_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl MailTransport for MockTransport {
    async fn send_message(&mut self, from: &str, to: &str, raw: &[u8]) -> TransportResult<()> {
        if let Some(err) = self.fail.lock().unwrap().take() {
            return Err(err);
        }
        self.sent.lock().unwrap().push(SentMessage {
            from: from.to_string(),
            to: to.to_string(),
            raw: raw.to_vec(),
        });
        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

/// Builds raw probe bytes from `sender_host` sent at `unixtime`.
pub fn probe_fixture(sender_host: &str, unixtime: f64) -> Vec<u8> {
    Probe {
        sender_host: sender_host.to_string(),
        unixtime,
        from: format!("probe@{}", sender_host),
        to: "probe@peer.example.org".to_string(),
        monitor_host: "monitor.example.org".to_string(),
    }
    .encode()
}

/// Builds an endpoint named by a one-letter tag ("a" gives
/// `mail-a.example.org` / `probe@a.example.org`).
pub fn endpoint_fixture(tag: &str) -> Endpoint {
    Endpoint::builder()
        .smtp(&format!("mail-{}.example.org", tag))
        .unwrap()
        .imap(&format!("mail-{}.example.org", tag))
        .unwrap()
        .credentials("probe", format!("secret-{}", tag))
        .address(format!("probe@{}.example.org", tag))
        .build()
        .unwrap()
}

/// Builds the standard two-endpoint test configuration.
pub fn config_fixture() -> CheckConfig {
    CheckConfig::new(endpoint_fixture("a"), endpoint_fixture("b"))
}
