//! Cycle orchestrator.
//!
//! One invocation is two explicit phases: [`reconcile_all`] scans both
//! mailboxes for the probes sent by the previous run, then
//! [`dispatch_all`] sends the next run's probes. The ordering is
//! load-bearing: a probe checked in the run that sent it would always
//! look undelivered. Every session lives inside a single phase step,
//! logged out before the next step starts.

use std::time::Duration;

use crate::config::{CheckConfig, Endpoint};
use crate::dispatch::dispatch;
use crate::errors::{CheckError, RetrievalResult, TransportResult};
use crate::imap::{ImapSession, MailRetrieval};
use crate::reconcile::reconcile;
use crate::smtp::{MailTransport, SmtpSession};

/// The externally visible result of one run: a delivery-confirmed signal
/// per direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// The second host's probe arrived in the first host's mailbox.
    pub first_received: bool,
    /// The first host's probe arrived in the second host's mailbox.
    pub second_received: bool,
}

impl RunReport {
    /// Returns true when both directions confirmed delivery.
    pub fn all_confirmed(&self) -> bool {
        self.first_received && self.second_received
    }
}

/// Ambient inputs of a run, injected so the engine stays deterministic
/// under test.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Current time, seconds since epoch.
    pub now: f64,
    /// Hostname of the monitoring process. Diagnostic only.
    pub monitor_host: String,
}

impl RunContext {
    /// Creates a run context.
    pub fn new(now: f64, monitor_host: impl Into<String>) -> Self {
        Self {
            now,
            monitor_host: monitor_host.into(),
        }
    }
}

/// Runs one full check cycle: reconcile both directions, then dispatch
/// both probes.
pub async fn run(config: &CheckConfig, ctx: &RunContext) -> Result<RunReport, CheckError> {
    let (first_received, second_received) = reconcile_all(config, ctx).await?;
    dispatch_all(config, ctx).await?;

    Ok(RunReport {
        first_received,
        second_received,
    })
}

/// Reconciliation phase: scans each endpoint's mailbox for a fresh probe
/// from its counterpart. All deletions are committed before this returns.
pub async fn reconcile_all(
    config: &CheckConfig,
    ctx: &RunContext,
) -> Result<(bool, bool), CheckError> {
    let first = reconcile_endpoint(&config.first, &config.second.smtp_host, config, ctx).await?;
    let second = reconcile_endpoint(&config.second, &config.first.smtp_host, config, ctx).await?;
    Ok((first, second))
}

/// Dispatch phase: sends one probe in each direction.
pub async fn dispatch_all(config: &CheckConfig, ctx: &RunContext) -> Result<(), CheckError> {
    dispatch_endpoint(&config.first, &config.second.address, config, ctx).await?;
    dispatch_endpoint(&config.second, &config.first.address, config, ctx).await?;
    Ok(())
}

async fn reconcile_endpoint(
    endpoint: &Endpoint,
    expected_sender: &str,
    config: &CheckConfig,
    ctx: &RunContext,
) -> Result<bool, CheckError> {
    let mut mailbox =
        ImapSession::connect(endpoint, config.connect_timeout, config.command_timeout)
            .await
            .map_err(|source| CheckError::retrieval(&endpoint.imap_host, source))?;

    let confirmed = scan_mailbox(
        &mut mailbox,
        expected_sender,
        ctx.now,
        config.freshness_window,
    )
    .await
    .map_err(|source| CheckError::retrieval(&endpoint.imap_host, source))?;

    tracing::info!(
        mailbox = %endpoint.imap_host,
        expected_sender,
        confirmed,
        "reconciliation finished"
    );
    Ok(confirmed)
}

async fn dispatch_endpoint(
    endpoint: &Endpoint,
    to_address: &str,
    config: &CheckConfig,
    ctx: &RunContext,
) -> Result<(), CheckError> {
    let mut transport = SmtpSession::connect(
        endpoint,
        config.connect_timeout,
        config.command_timeout,
        &ctx.monitor_host,
    )
    .await
    .map_err(|source| CheckError::transport(&endpoint.smtp_host, source))?;

    send_probe(&mut transport, endpoint, to_address, ctx)
        .await
        .map_err(|source| CheckError::transport(&endpoint.smtp_host, source))?;

    tracing::info!(via = %endpoint.smtp_host, to = to_address, "probe dispatched");
    Ok(())
}

/// Scans one mailbox and logs out in every exit path.
pub async fn scan_mailbox<R: MailRetrieval>(
    mailbox: &mut R,
    expected_sender: &str,
    now: f64,
    window: Duration,
) -> RetrievalResult<bool> {
    let outcome = reconcile(mailbox, expected_sender, now, window).await;
    if let Err(err) = mailbox.close().await {
        tracing::debug!(%err, "logout after scan failed");
    }
    outcome
}

/// Sends one probe and quits the session in every exit path.
pub async fn send_probe<T: MailTransport>(
    transport: &mut T,
    from: &Endpoint,
    to_address: &str,
    ctx: &RunContext,
) -> TransportResult<()> {
    let outcome = dispatch(transport, from, to_address, &ctx.monitor_host, ctx.now).await;
    if let Err(err) = transport.close().await {
        tracing::debug!(%err, "quit after dispatch failed");
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RetrievalError;
    use crate::mocks::{config_fixture, probe_fixture, MailboxOp, MockRetrieval, MockTransport};

    const NOW: f64 = 1700000000.0;
    const WINDOW: Duration = Duration::from_secs(1800);

    fn ctx() -> RunContext {
        RunContext::new(NOW, "monitor.example.org")
    }

    #[tokio::test]
    async fn test_scan_mailbox_logs_out_after_success() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("mail-b.example.org", NOW - 10.0));

        let confirmed = scan_mailbox(&mut mailbox, "mail-b.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(confirmed);
        assert!(mailbox.was_closed());
    }

    #[tokio::test]
    async fn test_scan_mailbox_logs_out_after_failure() {
        let mut mailbox = MockRetrieval::new();
        mailbox.fail_on(MailboxOp::List, RetrievalError::protocol("dropped"));

        let result = scan_mailbox(&mut mailbox, "mail-b.example.org", NOW, WINDOW).await;

        assert!(result.is_err());
        assert!(mailbox.was_closed());
    }

    #[tokio::test]
    async fn test_dispatch_phase_sends_exactly_one_probe_per_direction() {
        let config = config_fixture();
        let mut first = MockTransport::new();
        let mut second = MockTransport::new();

        // The dispatch phase as run() drives it: one send per direction,
        // each session quit afterwards.
        send_probe(&mut first, &config.first, &config.second.address, &ctx())
            .await
            .unwrap();
        send_probe(&mut second, &config.second, &config.first.address, &ctx())
            .await
            .unwrap();

        let from_first = first.sent();
        let from_second = second.sent();
        assert_eq!(from_first.len(), 1);
        assert_eq!(from_second.len(), 1);
        assert_eq!(from_first[0].to, "probe@b.example.org");
        assert_eq!(from_second[0].to, "probe@a.example.org");
        assert!(first.was_closed());
        assert!(second.was_closed());
    }

    #[tokio::test]
    async fn test_each_direction_expects_its_counterpart() {
        let config = config_fixture();

        // First host's mailbox holds probes from both hosts; only the
        // counterpart's is owned by this direction.
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("mail-a.example.org", NOW - 10.0));
        mailbox.seed(2, probe_fixture("mail-b.example.org", NOW - 10.0));

        let confirmed = scan_mailbox(&mut mailbox, &config.second.smtp_host, NOW, WINDOW)
            .await
            .unwrap();

        assert!(confirmed);
        assert_eq!(mailbox.marked(), vec![2]);
    }

    #[test]
    fn test_report_aggregation() {
        assert!(RunReport {
            first_received: true,
            second_received: true
        }
        .all_confirmed());
        assert!(!RunReport {
            first_received: true,
            second_received: false
        }
        .all_confirmed());
    }
}
