//! Error types for the delivery check.
//!
//! One enum per session kind: `TransportError` for the SMTP leg,
//! `RetrievalError` for the IMAP leg. The orchestrator wraps either in a
//! `CheckError` naming the failing endpoint, so a communication failure is
//! always distinguishable from a "no mail arrived" outcome.

use thiserror::Error;

/// Result type for SMTP operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for IMAP operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Low-level connection errors, shared by both protocol clients.
#[derive(Debug, Error)]
pub enum NetError {
    /// TCP connect failed.
    #[error("connection failed: {0}")]
    Connect(String),
    /// An I/O operation exceeded its timeout.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// TLS negotiation failed.
    #[error("TLS negotiation failed: {0}")]
    Tls(String),
    /// The peer closed the connection mid-session.
    #[error("connection closed by peer")]
    Closed,
    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors from the mail transport (SMTP) leg.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connect or server greeting failure.
    #[error("connection failed: {0}")]
    Connect(String),
    /// An I/O operation exceeded its timeout.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// TLS negotiation failed.
    #[error("TLS negotiation failed: {0}")]
    Tls(String),
    /// Authentication was refused or unavailable.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The server rejected a command.
    #[error("server rejected {command}: {code} {reply}")]
    Rejected {
        /// Command that was refused.
        command: &'static str,
        /// SMTP reply code.
        code: u16,
        /// Server reply text.
        reply: String,
    },
    /// The server response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Creates a connection error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Creates an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a rejected-command error from a reply code and text.
    pub fn rejected(command: &'static str, code: u16, reply: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            code,
            reply: reply.into(),
        }
    }

    /// Returns true if this error is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_)) || matches!(self, Self::Rejected { code: 530 | 535, .. })
    }
}

impl From<NetError> for TransportError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Connect(m) => Self::Connect(m),
            NetError::Timeout(op) => Self::Timeout(op),
            NetError::Tls(m) => Self::Tls(m),
            NetError::Closed => Self::Protocol("connection closed by peer".to_string()),
            NetError::Io(m) => Self::Protocol(format!("I/O error: {}", m)),
        }
    }
}

/// Errors from the mail retrieval (IMAP) leg.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// TCP connect or server greeting failure.
    #[error("connection failed: {0}")]
    Connect(String),
    /// An I/O operation exceeded its timeout.
    #[error("{0} timed out")]
    Timeout(&'static str),
    /// TLS negotiation failed.
    #[error("TLS negotiation failed: {0}")]
    Tls(String),
    /// LOGIN was refused.
    #[error("login failed: {0}")]
    Login(String),
    /// The server answered a command with NO or BAD.
    #[error("server rejected {command}: {reply}")]
    Rejected {
        /// Command that was refused.
        command: &'static str,
        /// Server status text.
        reply: String,
    },
    /// The server response could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RetrievalError {
    /// Creates a connection error.
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a TLS error.
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls(message.into())
    }

    /// Creates a login error.
    pub fn login(message: impl Into<String>) -> Self {
        Self::Login(message.into())
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Creates a rejected-command error.
    pub fn rejected(command: &'static str, reply: impl Into<String>) -> Self {
        Self::Rejected {
            command,
            reply: reply.into(),
        }
    }

    /// Returns true if this error is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Login(_))
    }
}

impl From<NetError> for RetrievalError {
    fn from(err: NetError) -> Self {
        match err {
            NetError::Connect(m) => Self::Connect(m),
            NetError::Timeout(op) => Self::Timeout(op),
            NetError::Tls(m) => Self::Tls(m),
            NetError::Closed => Self::Protocol("connection closed by peer".to_string()),
            NetError::Io(m) => Self::Protocol(format!("I/O error: {}", m)),
        }
    }
}

/// A fatal per-direction failure, produced by the orchestrator.
///
/// Maps upstream to an unknown/critical state distinct from a `false`
/// delivery confirmation.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A mailbox scan failed.
    #[error("mailbox scan on {endpoint} failed: {source}")]
    Retrieval {
        /// IMAP host of the mailbox that was being scanned.
        endpoint: String,
        /// Underlying session error.
        #[source]
        source: RetrievalError,
    },
    /// A probe dispatch failed.
    #[error("probe dispatch via {endpoint} failed: {source}")]
    Transport {
        /// SMTP host the probe was being sent through.
        endpoint: String,
        /// Underlying session error.
        #[source]
        source: TransportError,
    },
}

impl CheckError {
    /// Wraps a retrieval error with the mailbox host it occurred on.
    pub fn retrieval(endpoint: impl Into<String>, source: RetrievalError) -> Self {
        Self::Retrieval {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Wraps a transport error with the SMTP host it occurred on.
    pub fn transport(endpoint: impl Into<String>, source: TransportError) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }
}

/// Invalid endpoint or run configuration.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

impl ConfigError {
    /// Creates a configuration error.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = TransportError::rejected("MAIL FROM", 550, "mailbox unavailable");
        assert_eq!(
            err.to_string(),
            "server rejected MAIL FROM: 550 mailbox unavailable"
        );
    }

    #[test]
    fn test_transport_is_auth() {
        assert!(TransportError::auth("bad password").is_auth());
        assert!(TransportError::rejected("AUTH", 535, "denied").is_auth());
        assert!(!TransportError::connect("refused").is_auth());
    }

    #[test]
    fn test_net_error_conversions() {
        let transport: TransportError = NetError::Timeout("read").into();
        assert!(matches!(transport, TransportError::Timeout("read")));

        let retrieval: RetrievalError = NetError::Closed.into();
        assert!(matches!(retrieval, RetrievalError::Protocol(_)));
    }

    #[test]
    fn test_check_error_names_endpoint() {
        let err = CheckError::retrieval("imap.example.org", RetrievalError::login("denied"));
        let text = err.to_string();
        assert!(text.contains("imap.example.org"));
        assert!(text.contains("login failed"));
    }
}
