//! The probe-reconciliation engine.
//!
//! [`classify`] is the pure decision: given the decoded correlation
//! headers of one mailbox message, the expected counterpart host, and the
//! freshness window, decide whether the message is an unrelated artifact,
//! someone else's probe, a stale match, or a fresh match. [`reconcile`]
//! applies that decision across a full mailbox listing and disposes of
//! every recognizable artifact it owns, so probes never accumulate.

use std::time::Duration;

use crate::errors::RetrievalResult;
use crate::imap::MailRetrieval;
use crate::probe::{self, ProbeHeaders};

/// The per-message decision of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No correlation headers. Not a probe artifact; left untouched.
    NotAProbe,
    /// A probe artifact attributed to a different sender host. Left in
    /// place: each direction only owns messages from its counterpart.
    /// With more than two participating hosts, probes from other pairings
    /// therefore sit in the mailbox until their own pairing scans it.
    ForeignSender,
    /// Matching sender, but outside the freshness window or without a
    /// usable timestamp. Deleted; never counts as a delivery.
    Stale,
    /// Matching sender inside the freshness window. Deleted and counted.
    Fresh,
}

/// Classifies one message's decoded headers.
///
/// `now` is the scanning clock in seconds since epoch; a probe whose
/// timestamp is ahead of `now` is fresh, not stale (sender clock skew is
/// not delivery failure).
pub fn classify(
    headers: Option<&ProbeHeaders>,
    expected_sender: &str,
    now: f64,
    window: Duration,
) -> Classification {
    let Some(headers) = headers else {
        return Classification::NotAProbe;
    };

    if headers.sender_host != expected_sender {
        return Classification::ForeignSender;
    }

    match headers.unixtime {
        Some(sent) if now - sent <= window.as_secs_f64() => Classification::Fresh,
        _ => Classification::Stale,
    }
}

/// Scans a mailbox for a fresh probe from `expected_sender`.
///
/// Every message in the listing is fetched and classified. Matches, fresh
/// or stale, are flagged for deletion; the scan never stops early, so
/// stray duplicates from overlapping runs are all purged. Deletions are
/// applied in a single commit after the listing is exhausted. The
/// returned boolean is sticky: it reports whether at least one fresh
/// match existed, no matter how many were found.
///
/// Session errors propagate; they are never folded into `false`.
pub async fn reconcile<R: MailRetrieval>(
    mailbox: &mut R,
    expected_sender: &str,
    now: f64,
    window: Duration,
) -> RetrievalResult<bool> {
    let ids = mailbox.list().await?;
    tracing::debug!(messages = ids.len(), expected_sender, "scanning mailbox");

    let mut confirmed = false;
    let mut flagged = 0usize;

    for id in ids {
        let raw = mailbox.fetch(id).await?;
        let headers = probe::decode(&raw);
        let class = classify(headers.as_ref(), expected_sender, now, window);
        tracing::debug!(id, ?class, "classified message");

        match class {
            Classification::NotAProbe | Classification::ForeignSender => {}
            Classification::Stale => {
                mailbox.mark_deleted(id).await?;
                flagged += 1;
            }
            Classification::Fresh => {
                confirmed = true;
                mailbox.mark_deleted(id).await?;
                flagged += 1;
            }
        }
    }

    if flagged > 0 {
        mailbox.commit().await?;
    }

    Ok(confirmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RetrievalError;
    use crate::mocks::{probe_fixture, MailboxOp, MockRetrieval};
    use rstest::rstest;

    const WINDOW: Duration = Duration::from_secs(1800);
    const NOW: f64 = 1700000000.0;

    fn headers(sender: &str, unixtime: Option<f64>) -> ProbeHeaders {
        ProbeHeaders {
            sender_host: sender.to_string(),
            unixtime,
        }
    }

    #[rstest]
    #[case(None, Classification::NotAProbe)]
    #[case(Some(headers("other.example.org", Some(NOW - 10.0))), Classification::ForeignSender)]
    #[case(Some(headers("peer.example.org", Some(NOW - 10.0))), Classification::Fresh)]
    #[case(Some(headers("peer.example.org", Some(NOW - 1800.0))), Classification::Fresh)]
    #[case(Some(headers("peer.example.org", Some(NOW - 2000.0))), Classification::Stale)]
    #[case(Some(headers("peer.example.org", None)), Classification::Stale)]
    #[case(Some(headers("peer.example.org", Some(NOW + 300.0))), Classification::Fresh)]
    fn test_classify(#[case] headers: Option<ProbeHeaders>, #[case] expected: Classification) {
        assert_eq!(
            classify(headers.as_ref(), "peer.example.org", NOW, WINDOW),
            expected
        );
    }

    #[tokio::test]
    async fn test_empty_mailbox_is_no_delivery() {
        let mut mailbox = MockRetrieval::new();
        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(!confirmed);
        assert!(mailbox.marked().is_empty());
        assert_eq!(mailbox.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_fresh_match_confirms_and_deletes() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("peer.example.org", NOW - 10.0));

        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(confirmed);
        assert_eq!(mailbox.marked(), vec![1]);
        assert_eq!(mailbox.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_match_deletes_without_confirming() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("peer.example.org", NOW - 2000.0));

        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(!confirmed);
        assert_eq!(mailbox.marked(), vec![1]);
        assert_eq!(mailbox.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_unrelated_mail_is_untouched() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, b"From: someone@example.org\r\n\r\nhi\r\n".to_vec());

        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(!confirmed);
        assert!(mailbox.marked().is_empty());
        assert_eq!(mailbox.commit_count(), 0);
    }

    #[tokio::test]
    async fn test_foreign_sender_is_untouched() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("third.example.org", NOW - 10.0));

        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(!confirmed);
        assert!(mailbox.marked().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_matches_collapse_to_one_signal() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("peer.example.org", NOW - 5.0));
        mailbox.seed(2, probe_fixture("peer.example.org", NOW - 30.0));
        mailbox.seed(3, probe_fixture("peer.example.org", NOW - 2500.0));

        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(confirmed);
        assert_eq!(mailbox.marked(), vec![1, 2, 3]);
        assert_eq!(mailbox.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_mixed_mailbox_only_owned_artifacts_are_purged() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, b"Subject: newsletter\r\n\r\n...\r\n".to_vec());
        mailbox.seed(2, probe_fixture("third.example.org", NOW - 20.0));
        mailbox.seed(3, probe_fixture("peer.example.org", NOW - 20.0));

        let confirmed = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW)
            .await
            .unwrap();

        assert!(confirmed);
        assert_eq!(mailbox.marked(), vec![3]);
    }

    #[tokio::test]
    async fn test_session_error_propagates() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("peer.example.org", NOW - 10.0));
        mailbox.fail_on(MailboxOp::Fetch, RetrievalError::protocol("dropped"));

        let result = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_commit_error_propagates() {
        let mut mailbox = MockRetrieval::new();
        mailbox.seed(1, probe_fixture("peer.example.org", NOW - 10.0));
        mailbox.fail_on(MailboxOp::Commit, RetrievalError::rejected("EXPUNGE", "NO"));

        let result = reconcile(&mut mailbox, "peer.example.org", NOW, WINDOW).await;
        assert!(result.is_err());
    }
}
