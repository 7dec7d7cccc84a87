//! # Bidirectional Mail Delivery Check
//!
//! Verifies mail delivery between two independently operated mail hosts,
//! for use as a health signal in a monitoring pipeline. Each run:
//! - scans both hosts' mailboxes for the probe messages the *previous*
//!   run sent, reporting per direction whether one arrived within the
//!   freshness window, and
//! - sends a fresh probe in each direction for the *next* run to verify.
//!
//! Send-time and receive-verification are decoupled across runs because
//! round-trip mail delivery is asynchronous and can outlast a single
//! check invocation. Probes carry their correlation state in custom
//! headers; every recognizable probe artifact a scan owns is deleted
//! before the scan ends, so mailboxes never accumulate probe debris.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mail_roundtrip::{check, CheckConfig, Endpoint, RunContext};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let first = Endpoint::builder()
//!         .smtp("mail-a.example.org")?
//!         .imap("mail-a.example.org")?
//!         .credentials("probe", "secret-a")
//!         .address("probe@a.example.org")
//!         .build()?;
//!
//!     let second = Endpoint::builder()
//!         .smtp("mail-b.example.org:2525")?
//!         .imap("mail-b.example.org")?
//!         .credentials("probe", "secret-b")
//!         .address("probe@b.example.org")
//!         .build()?;
//!
//!     let config = CheckConfig::new(first, second);
//!     let now = std::time::SystemTime::now()
//!         .duration_since(std::time::UNIX_EPOCH)?
//!         .as_secs_f64();
//!     let ctx = RunContext::new(now, "monitor.example.org");
//!
//!     let report = check::run(&config, &ctx).await?;
//!     println!(
//!         "first received: {}, second received: {}",
//!         report.first_received, report.second_received
//!     );
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod errors;

// Connection plumbing
pub mod net;

// Protocol clients
pub mod imap;
pub mod smtp;

// Probe engine
pub mod dispatch;
pub mod probe;
pub mod reconcile;

// Orchestration
pub mod check;

// Mocks for testing
pub mod mocks;

// Re-exports for convenience
pub use check::{run, RunContext, RunReport};
pub use config::{CheckConfig, Endpoint, EndpointBuilder, TlsMode};
pub use dispatch::dispatch;
pub use errors::{CheckError, ConfigError, RetrievalError, TransportError};
pub use imap::{ImapSession, MailRetrieval};
pub use probe::{decode, Probe, ProbeHeaders};
pub use reconcile::{classify, reconcile, Classification};
pub use smtp::{MailTransport, SmtpSession};
