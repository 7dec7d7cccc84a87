//! Probe message codec.
//!
//! A probe is an ordinary RFC 5322 message carrying its correlation state
//! in custom headers, so it survives relaying verbatim and the reconciler
//! can parse it deterministically. The subject and body are diagnostic
//! only and never parsed.

use chrono::DateTime;
use uuid::Uuid;

/// Header naming the sending endpoint's SMTP host. Authoritative matching
/// key for reconciliation.
pub const SENDER_HOST_HEADER: &str = "X-Delivery-Probe-Host";

/// Header carrying the sender-clock send time, decimal seconds since
/// epoch, possibly fractional.
pub const UNIXTIME_HEADER: &str = "X-Delivery-Probe-Unixtime";

/// Header naming the monitoring process's hostname. Diagnostic only,
/// never used in matching.
pub const MONITOR_HEADER: &str = "X-Delivery-Probe-Monitor";

/// An outbound probe message.
#[derive(Debug, Clone)]
pub struct Probe {
    /// The sending endpoint's SMTP host, the matching key the peer's
    /// reconciler will compare against.
    pub sender_host: String,
    /// Send time on the sender's clock, seconds since epoch.
    pub unixtime: f64,
    /// Envelope/header From address.
    pub from: String,
    /// Envelope/header To address.
    pub to: String,
    /// Hostname of the monitoring process.
    pub monitor_host: String,
}

impl Probe {
    /// Encodes the probe as a transmittable RFC 5322 message with CRLF
    /// line endings.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(512);
        let message_id = format!("<{}@{}>", Uuid::new_v4(), self.sender_host);

        push_header(&mut out, "Date", &format_date(self.unixtime));
        push_header(&mut out, "From", &self.from);
        push_header(&mut out, "To", &self.to);
        push_header(&mut out, "Subject", "Monitoring probe");
        push_header(&mut out, "Message-ID", &message_id);
        push_header(&mut out, SENDER_HOST_HEADER, &self.sender_host);
        push_header(&mut out, UNIXTIME_HEADER, &format!("{:.3}", self.unixtime));
        push_header(&mut out, MONITOR_HEADER, &self.monitor_host);
        out.extend_from_slice(b"\r\n");

        out.extend_from_slice(
            format!(
                "Monitoring host: {}\r\nSender host: {}\r\nUnixtime: {:.3}\r\n",
                self.monitor_host, self.sender_host, self.unixtime
            )
            .as_bytes(),
        );

        out
    }
}

/// Correlation state recovered from an inbound message.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeHeaders {
    /// Claimed sender host.
    pub sender_host: String,
    /// Claimed send time. `None` when the header is missing, unparseable,
    /// or negative; such a probe is still recognizable but can never be
    /// fresh.
    pub unixtime: Option<f64>,
}

/// Recovers correlation headers from raw message bytes.
///
/// Total over arbitrary input: returns `None` when the sender-host header
/// is absent (the message is not a probe artifact), and never errors.
/// Header lookup is case-insensitive and unfolds continuation lines.
pub fn decode(raw: &[u8]) -> Option<ProbeHeaders> {
    let text = String::from_utf8_lossy(raw);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = headers.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
        // Lines without a colon are tolerated; mixed mailbox traffic
        // contains anything.
    }

    let lookup = |name: &str| {
        let name = name.to_ascii_lowercase();
        headers
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v.clone())
    };

    let sender_host = lookup(SENDER_HOST_HEADER).filter(|v| !v.is_empty())?;

    let unixtime = lookup(UNIXTIME_HEADER)
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|t| t.is_finite() && *t >= 0.0);

    Some(ProbeHeaders {
        sender_host,
        unixtime,
    })
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn format_date(unixtime: f64) -> String {
    DateTime::from_timestamp(unixtime as i64, 0)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc2822()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe() -> Probe {
        Probe {
            sender_host: "mail-a.example.org".to_string(),
            unixtime: 1700000000.25,
            from: "probe@a.example.org".to_string(),
            to: "probe@b.example.org".to_string(),
            monitor_host: "monitor.example.org".to_string(),
        }
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let raw = probe().encode();
        let headers = decode(&raw).unwrap();
        assert_eq!(headers.sender_host, "mail-a.example.org");
        assert_eq!(headers.unixtime, Some(1700000000.25));
    }

    #[test]
    fn test_encode_is_crlf_terminated() {
        let raw = probe().encode();
        let text = String::from_utf8(raw).unwrap();
        assert!(text.contains("\r\n\r\n"));
        for line in text.split("\r\n") {
            assert!(!line.contains('\n'));
        }
        assert!(text.contains("Subject: Monitoring probe\r\n"));
        assert!(text.contains("X-Delivery-Probe-Host: mail-a.example.org\r\n"));
    }

    #[test]
    fn test_decode_ignores_ordinary_mail() {
        let raw = b"From: someone@example.org\r\nSubject: lunch?\r\n\r\nbody\r\n";
        assert_eq!(decode(raw), None);
    }

    #[test]
    fn test_decode_is_case_insensitive() {
        let raw = b"x-delivery-probe-host: mail-a.example.org\r\nX-DELIVERY-PROBE-UNIXTIME: 12.5\r\n\r\n";
        let headers = decode(raw).unwrap();
        assert_eq!(headers.sender_host, "mail-a.example.org");
        assert_eq!(headers.unixtime, Some(12.5));
    }

    #[test]
    fn test_decode_unfolds_continuations() {
        let raw = b"X-Delivery-Probe-Host:\r\n mail-a.example.org\r\nX-Delivery-Probe-Unixtime: 5\r\n\r\n";
        let headers = decode(raw).unwrap();
        assert_eq!(headers.sender_host, "mail-a.example.org");
    }

    #[test]
    fn test_decode_degrades_bad_timestamps() {
        // Unparseable, negative, and missing timestamps all decode to a
        // recognizable probe with no usable time.
        for raw in [
            &b"X-Delivery-Probe-Host: h\r\nX-Delivery-Probe-Unixtime: soon\r\n\r\n"[..],
            &b"X-Delivery-Probe-Host: h\r\nX-Delivery-Probe-Unixtime: -4\r\n\r\n"[..],
            &b"X-Delivery-Probe-Host: h\r\n\r\n"[..],
        ] {
            let headers = decode(raw).unwrap();
            assert_eq!(headers.sender_host, "h");
            assert_eq!(headers.unixtime, None);
        }
    }

    #[test]
    fn test_decode_tolerates_arbitrary_bytes() {
        assert_eq!(decode(&[0xff, 0xfe, 0x00, b'\r', b'\n']), None);
        assert_eq!(decode(b""), None);
        assert_eq!(decode(b"no header section at all"), None);
    }

    #[test]
    fn test_headers_stop_at_blank_line() {
        // A probe header quoted in a message body must not count.
        let raw = b"From: someone@example.org\r\n\r\nX-Delivery-Probe-Host: forged\r\n";
        assert_eq!(decode(raw), None);
    }
}
