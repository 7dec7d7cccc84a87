//! Probe dispatcher.
//!
//! Builds one probe message and transmits it through an authenticated
//! transport session. A transmit failure is reported, not retried; retry
//! policy belongs to the invoking scheduler.

use crate::config::Endpoint;
use crate::errors::TransportResult;
use crate::probe::Probe;
use crate::smtp::MailTransport;

/// Sends one probe from `from` to `to_address`.
///
/// The probe's matching key is the endpoint's SMTP host; its timestamp is
/// `now` on the caller's clock. The peer's reconciler checks for it on
/// the next run.
pub async fn dispatch<T: MailTransport>(
    transport: &mut T,
    from: &Endpoint,
    to_address: &str,
    monitor_host: &str,
    now: f64,
) -> TransportResult<()> {
    let probe = Probe {
        sender_host: from.smtp_host.clone(),
        unixtime: now,
        from: from.address.clone(),
        to: to_address.to_string(),
        monitor_host: monitor_host.to_string(),
    };

    tracing::debug!(from = %from.address, to = to_address, "sending probe");
    transport
        .send_message(&from.address, to_address, &probe.encode())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TransportError;
    use crate::mocks::{endpoint_fixture, MockTransport};
    use crate::probe;

    const NOW: f64 = 1700000000.0;

    #[tokio::test]
    async fn test_dispatch_sends_one_probe() {
        let endpoint = endpoint_fixture("a");
        let mut transport = MockTransport::new();

        dispatch(
            &mut transport,
            &endpoint,
            "probe@b.example.org",
            "monitor.example.org",
            NOW,
        )
        .await
        .unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].from, "probe@a.example.org");
        assert_eq!(sent[0].to, "probe@b.example.org");

        let headers = probe::decode(&sent[0].raw).unwrap();
        assert_eq!(headers.sender_host, "mail-a.example.org");
        assert_eq!(headers.unixtime, Some(NOW));
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported_not_swallowed() {
        let endpoint = endpoint_fixture("a");
        let mut transport = MockTransport::new();
        transport.fail_next_with(TransportError::auth("535 bad credentials"));

        let result = dispatch(
            &mut transport,
            &endpoint,
            "probe@b.example.org",
            "monitor.example.org",
            NOW,
        )
        .await;

        assert!(result.as_ref().unwrap_err().is_auth());
        assert!(transport.sent().is_empty());
    }
}
