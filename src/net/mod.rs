//! TCP connection plumbing shared by both protocol clients.
//!
//! [`Connection`] wraps a buffered stream that is either plain TCP or TLS,
//! with timeout-guarded line and byte I/O and an in-place STARTTLS upgrade.
//! Sessions are short-lived: opened, used for one reconciliation or
//! dispatch, and dropped.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::errors::NetError;

/// A timeout-guarded connection to a mail server.
pub struct Connection {
    stream: Stream,
    command_timeout: Duration,
}

/// Stream state: plain TCP, TLS, or detached mid-upgrade.
enum Stream {
    Plain(BufReader<TcpStream>),
    Tls(BufReader<tokio_rustls::client::TlsStream<TcpStream>>),
    /// Placeholder while the TCP stream is owned by the TLS handshake.
    Detached,
}

impl Connection {
    /// Opens a TCP connection to `host:port`.
    pub async fn open(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, NetError> {
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| NetError::Timeout("connect"))?
            .map_err(|e| NetError::Connect(format!("{}:{}: {}", host, port, e)))?;

        stream.set_nodelay(true).ok();

        Ok(Self {
            stream: Stream::Plain(BufReader::new(stream)),
            command_timeout,
        })
    }

    /// Reads one line, with the trailing CRLF removed.
    pub async fn read_line(&mut self) -> Result<String, NetError> {
        let mut line = String::new();
        let read = match &mut self.stream {
            Stream::Plain(r) => timeout(self.command_timeout, r.read_line(&mut line)).await,
            Stream::Tls(r) => timeout(self.command_timeout, r.read_line(&mut line)).await,
            Stream::Detached => return Err(NetError::Closed),
        }
        .map_err(|_| NetError::Timeout("read"))?
        .map_err(|e| NetError::Io(e.to_string()))?;

        if read == 0 {
            return Err(NetError::Closed);
        }

        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(line)
    }

    /// Reads exactly `len` bytes (IMAP literal payloads).
    pub async fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, NetError> {
        let mut buf = vec![0u8; len];
        match &mut self.stream {
            Stream::Plain(r) => timeout(self.command_timeout, r.read_exact(&mut buf)).await,
            Stream::Tls(r) => timeout(self.command_timeout, r.read_exact(&mut buf)).await,
            Stream::Detached => return Err(NetError::Closed),
        }
        .map_err(|_| NetError::Timeout("read"))?
        .map_err(|e| NetError::Io(e.to_string()))?;

        Ok(buf)
    }

    /// Writes one line, appending CRLF, and flushes.
    pub async fn write_line(&mut self, line: &str) -> Result<(), NetError> {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.write_all(&data).await
    }

    /// Writes raw bytes and flushes.
    pub async fn write_all(&mut self, data: &[u8]) -> Result<(), NetError> {
        match &mut self.stream {
            Stream::Plain(s) => write_inner(s.get_mut(), data, self.command_timeout).await,
            Stream::Tls(s) => write_inner(s.get_mut(), data, self.command_timeout).await,
            Stream::Detached => Err(NetError::Closed),
        }
    }

    /// Upgrades the connection to TLS in place.
    ///
    /// Must be called directly after reading the server's go-ahead, while
    /// the read buffer is empty.
    pub async fn upgrade_tls(&mut self, host: &str) -> Result<(), NetError> {
        let tcp = match std::mem::replace(&mut self.stream, Stream::Detached) {
            Stream::Plain(reader) => reader.into_inner(),
            other => {
                self.stream = other;
                return Err(NetError::Tls("connection is already encrypted".to_string()));
            }
        };

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| NetError::Tls(format!("invalid server name: {}", host)))?;

        let tls = timeout(self.command_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| NetError::Timeout("TLS handshake"))?
            .map_err(|e| NetError::Tls(e.to_string()))?;

        self.stream = Stream::Tls(BufReader::new(tls));
        Ok(())
    }

    /// Returns true if the connection is encrypted.
    pub fn is_tls(&self) -> bool {
        matches!(self.stream, Stream::Tls(_))
    }
}

async fn write_inner<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<(), NetError> {
    timeout(timeout_duration, writer.write_all(data))
        .await
        .map_err(|_| NetError::Timeout("write"))?
        .map_err(|e| NetError::Io(e.to_string()))?;

    timeout(timeout_duration, writer.flush())
        .await
        .map_err(|_| NetError::Timeout("flush"))?
        .map_err(|e| NetError::Io(e.to_string()))?;

    Ok(())
}
