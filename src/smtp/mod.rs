//! SMTP client for the probe transport leg.
//!
//! Implements the subset of RFC 5321 the check needs: greeting, EHLO with
//! HELO fallback, STARTTLS upgrade with re-EHLO, AUTH PLAIN with LOGIN
//! fallback, and a single MAIL/RCPT/DATA transaction. The [`MailTransport`]
//! trait is the seam the probe dispatcher is written against.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use secrecy::ExposeSecret;
use std::fmt;
use std::time::Duration;

use crate::config::{Endpoint, TlsMode};
use crate::errors::{TransportError, TransportResult};
use crate::net::Connection;

/// Trait for the mail transport seam.
#[async_trait]
pub trait MailTransport: Send {
    /// Transmits a raw RFC 5322 message from `from` to `to`.
    async fn send_message(&mut self, from: &str, to: &str, raw: &[u8]) -> TransportResult<()>;

    /// Closes the session gracefully.
    async fn close(&mut self) -> TransportResult<()>;
}

/// SMTP commands used by the check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Extended HELLO with client identity.
    Ehlo(String),
    /// Basic HELLO.
    Helo(String),
    /// Start TLS negotiation.
    StartTls,
    /// Authenticate.
    Auth {
        /// Authentication mechanism.
        mechanism: &'static str,
        /// Initial response (optional).
        initial_response: Option<String>,
    },
    /// MAIL FROM command.
    MailFrom {
        /// Sender address.
        address: String,
    },
    /// RCPT TO command.
    RcptTo {
        /// Recipient address.
        address: String,
    },
    /// DATA command.
    Data,
    /// Quit connection.
    Quit,
}

impl Command {
    /// Formats the command for the wire.
    pub fn to_wire_string(&self) -> String {
        match self {
            Command::Ehlo(domain) => format!("EHLO {}", domain),
            Command::Helo(domain) => format!("HELO {}", domain),
            Command::StartTls => "STARTTLS".to_string(),
            Command::Auth {
                mechanism,
                initial_response,
            } => match initial_response {
                Some(response) => format!("AUTH {} {}", mechanism, response),
                None => format!("AUTH {}", mechanism),
            },
            Command::MailFrom { address } => format!("MAIL FROM:<{}>", address),
            Command::RcptTo { address } => format!("RCPT TO:<{}>", address),
            Command::Data => "DATA".to_string(),
            Command::Quit => "QUIT".to_string(),
        }
    }

    /// Returns the command verb, safe to log (no credentials).
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ehlo(_) => "EHLO",
            Command::Helo(_) => "HELO",
            Command::StartTls => "STARTTLS",
            Command::Auth { .. } => "AUTH",
            Command::MailFrom { .. } => "MAIL FROM",
            Command::RcptTo { .. } => "RCPT TO",
            Command::Data => "DATA",
            Command::Quit => "QUIT",
        }
    }
}

/// A parsed SMTP reply, possibly multiline.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Status code (e.g. 250, 354, 535).
    pub code: u16,
    /// Reply text, one entry per line, code stripped.
    pub lines: Vec<String>,
}

impl Reply {
    /// Parses a reply from raw lines.
    pub fn parse(lines: Vec<String>) -> TransportResult<Self> {
        let first = lines
            .first()
            .ok_or_else(|| TransportError::protocol("empty reply"))?;
        if first.len() < 3 || !first.is_char_boundary(3) {
            return Err(TransportError::protocol(format!(
                "reply too short: {}",
                first
            )));
        }

        let code: u16 = first[..3]
            .parse()
            .map_err(|_| TransportError::protocol(format!("invalid reply code: {}", first)))?;

        let text = lines
            .iter()
            .map(|line| {
                if line.len() > 4 && line.is_char_boundary(4) {
                    line[4..].to_string()
                } else {
                    String::new()
                }
            })
            .collect();

        Ok(Self { code, lines: text })
    }

    /// Returns true for a positive completion reply (2xx).
    pub fn is_positive(&self) -> bool {
        (200..300).contains(&self.code)
    }

    /// Returns all reply lines joined.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// ESMTP capabilities advertised in the EHLO reply.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// STARTTLS supported.
    pub starttls: bool,
    /// Advertised AUTH mechanisms, uppercased.
    pub auth_mechanisms: Vec<String>,
    /// Raw capability lines.
    pub raw: Vec<String>,
}

impl Capabilities {
    /// Parses capabilities from an EHLO reply. The first line is the
    /// server banner and carries no capability.
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut caps = Self::default();

        for line in reply.lines.iter().skip(1) {
            let upper = line.trim().to_uppercase();
            if upper.is_empty() {
                continue;
            }
            caps.raw.push(upper.clone());

            let (keyword, params) = match upper.split_once(' ') {
                Some((k, p)) => (k, p),
                None => (upper.as_str(), ""),
            };

            match keyword {
                "STARTTLS" => caps.starttls = true,
                "AUTH" => caps
                    .auth_mechanisms
                    .extend(params.split_whitespace().map(str::to_string)),
                _ => {}
            }
        }

        caps
    }

    /// Returns true if the given AUTH mechanism is advertised.
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.auth_mechanisms.iter().any(|m| m == mechanism)
    }
}

/// Reply codes for the operations the check performs.
pub mod codes {
    /// Service ready.
    pub const SERVICE_READY: u16 = 220;
    /// Requested action completed.
    pub const OK: u16 = 250;
    /// Authentication successful.
    pub const AUTH_SUCCESS: u16 = 235;
    /// Continue authentication exchange.
    pub const AUTH_CONTINUE: u16 = 334;
    /// Start mail input.
    pub const START_MAIL_INPUT: u16 = 354;
}

/// An authenticated SMTP session, scoped to a single dispatch.
pub struct SmtpSession {
    conn: Connection,
    capabilities: Capabilities,
}

impl SmtpSession {
    /// Connects, greets, upgrades to TLS per the endpoint's mode, and
    /// authenticates.
    pub async fn connect(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        command_timeout: Duration,
        client_name: &str,
    ) -> TransportResult<Self> {
        let mut conn = Connection::open(
            &endpoint.smtp_host,
            endpoint.smtp_port,
            connect_timeout,
            command_timeout,
        )
        .await?;

        let greeting = read_reply(&mut conn).await?;
        if greeting.code != codes::SERVICE_READY {
            return Err(TransportError::connect(format!(
                "unexpected greeting: {}",
                greeting
            )));
        }

        let mut session = Self {
            conn,
            capabilities: Capabilities::default(),
        };

        session.hello(client_name).await?;

        if endpoint.tls == TlsMode::StartTls {
            session.start_tls(&endpoint.smtp_host, client_name).await?;
        }

        session
            .authenticate(&endpoint.username, endpoint.password.expose_secret())
            .await?;

        Ok(session)
    }

    /// Returns the capabilities from the most recent EHLO.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    async fn command(&mut self, command: &Command) -> TransportResult<Reply> {
        tracing::debug!(command = command.name(), "sending SMTP command");
        self.conn.write_line(&command.to_wire_string()).await?;
        let reply = read_reply(&mut self.conn).await?;
        tracing::debug!(command = command.name(), code = reply.code, "SMTP reply");
        Ok(reply)
    }

    /// EHLO with HELO fallback. Capabilities are empty after a HELO-only
    /// greeting.
    async fn hello(&mut self, client_name: &str) -> TransportResult<()> {
        let reply = self.command(&Command::Ehlo(client_name.to_string())).await?;
        if reply.is_positive() {
            self.capabilities = Capabilities::from_ehlo(&reply);
            return Ok(());
        }

        let reply = self.command(&Command::Helo(client_name.to_string())).await?;
        if !reply.is_positive() {
            return Err(TransportError::rejected("HELO", reply.code, reply.text()));
        }
        self.capabilities = Capabilities::default();
        Ok(())
    }

    async fn start_tls(&mut self, host: &str, client_name: &str) -> TransportResult<()> {
        if !self.capabilities.starttls {
            return Err(TransportError::tls("server does not advertise STARTTLS"));
        }

        let reply = self.command(&Command::StartTls).await?;
        if reply.code != codes::SERVICE_READY {
            return Err(TransportError::tls(format!(
                "STARTTLS refused: {}",
                reply
            )));
        }

        self.conn.upgrade_tls(host).await?;

        // Capabilities must be re-read on the encrypted channel; AUTH is
        // typically only advertised there.
        self.hello(client_name).await
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> TransportResult<()> {
        if self.capabilities.supports_auth("PLAIN") {
            self.auth_plain(username, password).await
        } else if self.capabilities.supports_auth("LOGIN") {
            self.auth_login(username, password).await
        } else {
            Err(TransportError::auth(
                "server advertises no supported authentication mechanism",
            ))
        }
    }

    async fn auth_plain(&mut self, username: &str, password: &str) -> TransportResult<()> {
        let initial = BASE64.encode(format!("\0{}\0{}", username, password));
        let reply = self
            .command(&Command::Auth {
                mechanism: "PLAIN",
                initial_response: Some(initial),
            })
            .await?;

        if reply.code == codes::AUTH_SUCCESS {
            Ok(())
        } else {
            Err(TransportError::auth(reply.to_string()))
        }
    }

    async fn auth_login(&mut self, username: &str, password: &str) -> TransportResult<()> {
        let reply = self
            .command(&Command::Auth {
                mechanism: "LOGIN",
                initial_response: None,
            })
            .await?;
        if reply.code != codes::AUTH_CONTINUE {
            return Err(TransportError::auth(reply.to_string()));
        }

        self.conn.write_line(&BASE64.encode(username)).await?;
        let reply = read_reply(&mut self.conn).await?;
        if reply.code != codes::AUTH_CONTINUE {
            return Err(TransportError::auth(reply.to_string()));
        }

        self.conn.write_line(&BASE64.encode(password)).await?;
        let reply = read_reply(&mut self.conn).await?;
        if reply.code == codes::AUTH_SUCCESS {
            Ok(())
        } else {
            Err(TransportError::auth(reply.to_string()))
        }
    }
}

#[async_trait]
impl MailTransport for SmtpSession {
    async fn send_message(&mut self, from: &str, to: &str, raw: &[u8]) -> TransportResult<()> {
        let reply = self
            .command(&Command::MailFrom {
                address: from.to_string(),
            })
            .await?;
        if !reply.is_positive() {
            return Err(TransportError::rejected("MAIL FROM", reply.code, reply.text()));
        }

        let reply = self
            .command(&Command::RcptTo {
                address: to.to_string(),
            })
            .await?;
        if !reply.is_positive() {
            return Err(TransportError::rejected("RCPT TO", reply.code, reply.text()));
        }

        let reply = self.command(&Command::Data).await?;
        if reply.code != codes::START_MAIL_INPUT {
            return Err(TransportError::rejected("DATA", reply.code, reply.text()));
        }

        self.conn.write_all(&prepare_payload(raw)).await?;

        let reply = read_reply(&mut self.conn).await?;
        if !reply.is_positive() {
            return Err(TransportError::rejected(
                "message payload",
                reply.code,
                reply.text(),
            ));
        }

        Ok(())
    }

    async fn close(&mut self) -> TransportResult<()> {
        let _ = self.command(&Command::Quit).await;
        Ok(())
    }
}

/// Reads lines until a complete (possibly multiline) reply is assembled.
async fn read_reply(conn: &mut Connection) -> TransportResult<Reply> {
    let mut lines = Vec::new();

    loop {
        let line = conn.read_line().await?;
        let more = line.len() >= 4 && line.as_bytes()[3] == b'-';
        lines.push(line);
        if !more {
            break;
        }
    }

    Reply::parse(lines)
}

/// Dot-stuffs the message and appends the `CRLF.CRLF` terminator.
pub fn prepare_payload(raw: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(raw.len() + 16);
    let mut at_line_start = true;

    for &byte in raw {
        if at_line_start && byte == b'.' {
            output.push(b'.');
        }
        output.push(byte);
        at_line_start = byte == b'\n';
    }

    if !output.ends_with(b"\r\n") {
        if output.ends_with(b"\n") {
            output.pop();
        }
        output.extend_from_slice(b"\r\n");
    }

    output.extend_from_slice(b".\r\n");
    output
}
