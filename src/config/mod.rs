//! Configuration types for the delivery check.
//!
//! An [`Endpoint`] describes one monitored mail host (SMTP side, IMAP side,
//! credentials, probe address, TLS mode). A [`CheckConfig`] pairs two
//! endpoints with the run-wide knobs: freshness window and I/O timeouts.
//! Both deserialize from TOML; durations use humantime notation ("30m",
//! "1800s") and the password is never serialized.

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// Default SMTP port (submission with STARTTLS).
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// Default IMAP port (with STARTTLS).
pub const DEFAULT_IMAP_PORT: u16 = 143;

/// Default freshness window for probe reconciliation.
pub const DEFAULT_FRESHNESS_WINDOW: Duration = Duration::from_secs(1800);

/// Default timeout for connections.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for individual protocol commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// TLS mode for SMTP and IMAP sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsMode {
    /// Required STARTTLS upgrade (default).
    #[default]
    StartTls,
    /// No TLS (insecure, for hosts that cannot negotiate it).
    None,
}

/// One monitored mail host. Immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// IMAP server hostname.
    pub imap_host: String,
    /// IMAP server port.
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// Account username, shared by both sessions.
    pub username: String,
    /// Account password (never serialized).
    #[serde(skip_serializing)]
    pub password: SecretString,
    /// Mail address probes are sent from and delivered to.
    pub address: String,
    /// TLS mode for both sessions.
    #[serde(default)]
    pub tls: TlsMode,
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

fn default_imap_port() -> u16 {
    DEFAULT_IMAP_PORT
}

impl Endpoint {
    /// Creates a new endpoint builder.
    pub fn builder() -> EndpointBuilder {
        EndpointBuilder::default()
    }

    /// Validates the endpoint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_host.is_empty() {
            return Err(ConfigError::new("SMTP host is required"));
        }
        if self.imap_host.is_empty() {
            return Err(ConfigError::new("IMAP host is required"));
        }
        if self.smtp_port == 0 || self.imap_port == 0 {
            return Err(ConfigError::new("ports must be non-zero"));
        }
        if self.username.is_empty() {
            return Err(ConfigError::new("username is required"));
        }
        if !self.address.contains('@') {
            return Err(ConfigError::new(format!(
                "mail address '{}' is not an address",
                self.address
            )));
        }
        Ok(())
    }
}

/// Parses a `host[:port]` connection spec.
pub fn parse_host_port(spec: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    match spec.split_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(ConfigError::new(format!("empty host in spec '{}'", spec)));
            }
            let port: u16 = port
                .parse()
                .map_err(|_| ConfigError::new(format!("invalid port in spec '{}'", spec)))?;
            if port == 0 {
                return Err(ConfigError::new(format!("invalid port in spec '{}'", spec)));
            }
            Ok((host.to_string(), port))
        }
        None => {
            if spec.is_empty() {
                return Err(ConfigError::new("empty host spec"));
            }
            Ok((spec.to_string(), default_port))
        }
    }
}

/// Builder for [`Endpoint`].
#[derive(Debug, Default)]
pub struct EndpointBuilder {
    smtp_host: Option<String>,
    smtp_port: u16,
    imap_host: Option<String>,
    imap_port: u16,
    username: Option<String>,
    password: Option<SecretString>,
    address: Option<String>,
    tls: TlsMode,
}

impl EndpointBuilder {
    /// Sets the SMTP side from a `host[:port]` spec.
    pub fn smtp(mut self, spec: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_host_port(spec, DEFAULT_SMTP_PORT)?;
        self.smtp_host = Some(host);
        self.smtp_port = port;
        Ok(self)
    }

    /// Sets the IMAP side from a `host[:port]` spec.
    pub fn imap(mut self, spec: &str) -> Result<Self, ConfigError> {
        let (host, port) = parse_host_port(spec, DEFAULT_IMAP_PORT)?;
        self.imap_host = Some(host);
        self.imap_port = port;
        Ok(self)
    }

    /// Sets the account credentials.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(SecretString::new(password.into()));
        self
    }

    /// Sets the probe mail address.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Sets the TLS mode.
    pub fn tls_mode(mut self, mode: TlsMode) -> Self {
        self.tls = mode;
        self
    }

    /// Disables TLS (insecure).
    pub fn no_tls(mut self) -> Self {
        self.tls = TlsMode::None;
        self
    }

    /// Builds and validates the endpoint.
    pub fn build(self) -> Result<Endpoint, ConfigError> {
        let endpoint = Endpoint {
            smtp_host: self
                .smtp_host
                .ok_or_else(|| ConfigError::new("SMTP host is required"))?,
            smtp_port: if self.smtp_port == 0 {
                DEFAULT_SMTP_PORT
            } else {
                self.smtp_port
            },
            imap_host: self
                .imap_host
                .ok_or_else(|| ConfigError::new("IMAP host is required"))?,
            imap_port: if self.imap_port == 0 {
                DEFAULT_IMAP_PORT
            } else {
                self.imap_port
            },
            username: self
                .username
                .ok_or_else(|| ConfigError::new("username is required"))?,
            password: self
                .password
                .ok_or_else(|| ConfigError::new("password is required"))?,
            address: self
                .address
                .ok_or_else(|| ConfigError::new("mail address is required"))?,
            tls: self.tls,
        };

        endpoint.validate()?;
        Ok(endpoint)
    }
}

/// The full run configuration: two endpoints plus run-wide knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    /// First monitored host.
    pub first: Endpoint,
    /// Second monitored host.
    pub second: Endpoint,
    /// How old a probe may be and still count as delivered.
    #[serde(default = "default_freshness_window", with = "humantime_serde")]
    pub freshness_window: Duration,
    /// Timeout for establishing connections.
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout for individual protocol commands.
    #[serde(default = "default_command_timeout", with = "humantime_serde")]
    pub command_timeout: Duration,
}

fn default_freshness_window() -> Duration {
    DEFAULT_FRESHNESS_WINDOW
}

fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

impl CheckConfig {
    /// Creates a configuration with default knobs.
    pub fn new(first: Endpoint, second: Endpoint) -> Self {
        Self {
            first,
            second,
            freshness_window: DEFAULT_FRESHNESS_WINDOW,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Validates both endpoints and the knobs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.first.validate()?;
        self.second.validate()?;
        if self.freshness_window.is_zero() {
            return Err(ConfigError::new("freshness window must be non-zero"));
        }
        Ok(())
    }
}

// Humantime serde support
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::builder()
            .smtp("mail.example.org")
            .unwrap()
            .imap("mail.example.org:993")
            .unwrap()
            .credentials("probe", "secret")
            .address("probe@example.org")
            .build()
            .unwrap()
    }

    #[test]
    fn test_endpoint_builder_defaults() {
        let ep = endpoint();
        assert_eq!(ep.smtp_port, DEFAULT_SMTP_PORT);
        assert_eq!(ep.imap_port, 993);
        assert_eq!(ep.tls, TlsMode::StartTls);
    }

    #[test]
    fn test_parse_host_port() {
        assert_eq!(
            parse_host_port("mail.example.org", 587).unwrap(),
            ("mail.example.org".to_string(), 587)
        );
        assert_eq!(
            parse_host_port("mail.example.org:2525", 587).unwrap(),
            ("mail.example.org".to_string(), 2525)
        );
        assert!(parse_host_port("mail.example.org:x", 587).is_err());
        assert!(parse_host_port(":25", 587).is_err());
        assert!(parse_host_port("", 587).is_err());
    }

    #[test]
    fn test_endpoint_validation() {
        let result = Endpoint::builder()
            .smtp("mail.example.org")
            .unwrap()
            .imap("mail.example.org")
            .unwrap()
            .credentials("probe", "secret")
            .address("not-an-address")
            .build();
        assert!(result.is_err());

        let result = Endpoint::builder()
            .smtp("mail.example.org")
            .unwrap()
            .credentials("probe", "secret")
            .address("probe@example.org")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_check_config_defaults() {
        let config = CheckConfig::new(endpoint(), endpoint());
        assert_eq!(config.freshness_window, Duration::from_secs(1800));
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        config.validate().unwrap();
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            freshness_window = "30m"

            [first]
            smtp_host = "mail-a.example.org"
            imap_host = "mail-a.example.org"
            imap_port = 143
            username = "probe"
            password = "secret-a"
            address = "probe@a.example.org"

            [second]
            smtp_host = "mail-b.example.org"
            smtp_port = 2525
            imap_host = "mail-b.example.org"
            username = "probe"
            password = "secret-b"
            address = "probe@b.example.org"
            tls = "none"
        "#;

        let config: CheckConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.freshness_window, Duration::from_secs(1800));
        assert_eq!(config.first.smtp_port, DEFAULT_SMTP_PORT);
        assert_eq!(config.second.smtp_port, 2525);
        assert_eq!(config.second.tls, TlsMode::None);
    }

    #[test]
    fn test_password_not_serialized() {
        let rendered = toml::to_string(&endpoint()).unwrap();
        assert!(!rendered.contains("secret"));
        assert!(!rendered.contains("password"));
    }
}
