//! Monitoring binary for the bidirectional mail delivery check.
//!
//! Renders a single status line and exits with monitoring-plugin
//! conventions: 0 when both directions confirmed delivery, 2 when a
//! mailbox was missing its probe, 3 when a session failed (the result is
//! unknown, not a delivery failure). Logs go to stderr so the status
//! line stays parseable.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mail_roundtrip::{check, CheckConfig, ConfigError, Endpoint, RunContext, RunReport};

const STATUS_PREFIX: &str = "MAIL ROUNDTRIP";

const EXIT_OK: u8 = 0;
const EXIT_CRITICAL: u8 = 2;
const EXIT_UNKNOWN: u8 = 3;

/// Check bidirectional mail delivery between two mail hosts.
///
/// Scans each host's mailbox for the probe its peer sent on the previous
/// run, then sends the next pair of probes.
#[derive(Debug, Parser)]
#[command(name = "mail-roundtrip", version)]
struct Args {
    /// TOML configuration file; replaces the per-host flags below
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// SMTP host[:port] of the first host
    #[arg(long, value_name = "HOST[:PORT]", required_unless_present = "config")]
    smtp1: Option<String>,

    /// IMAP host[:port] of the first host
    #[arg(long, value_name = "HOST[:PORT]", required_unless_present = "config")]
    imap1: Option<String>,

    /// Username on the first host
    #[arg(long, value_name = "USER", required_unless_present = "config")]
    user1: Option<String>,

    /// Password on the first host
    #[arg(
        long,
        value_name = "PASS",
        env = "MAIL_ROUNDTRIP_PASS1",
        hide_env_values = true,
        required_unless_present = "config"
    )]
    pass1: Option<String>,

    /// Mail address on the first host
    #[arg(long, value_name = "MAIL", required_unless_present = "config")]
    addr1: Option<String>,

    /// Do not use STARTTLS for the first host
    #[arg(long)]
    no_tls1: bool,

    /// SMTP host[:port] of the second host
    #[arg(long, value_name = "HOST[:PORT]", required_unless_present = "config")]
    smtp2: Option<String>,

    /// IMAP host[:port] of the second host
    #[arg(long, value_name = "HOST[:PORT]", required_unless_present = "config")]
    imap2: Option<String>,

    /// Username on the second host
    #[arg(long, value_name = "USER", required_unless_present = "config")]
    user2: Option<String>,

    /// Password on the second host
    #[arg(
        long,
        value_name = "PASS",
        env = "MAIL_ROUNDTRIP_PASS2",
        hide_env_values = true,
        required_unless_present = "config"
    )]
    pass2: Option<String>,

    /// Mail address on the second host
    #[arg(long, value_name = "MAIL", required_unless_present = "config")]
    addr2: Option<String>,

    /// Do not use STARTTLS for the second host
    #[arg(long)]
    no_tls2: bool,

    /// Freshness window for accepting a probe as delivered
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    window: Option<Duration>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(err) => {
            println!("{} UNKNOWN - {}", STATUS_PREFIX, err);
            return ExitCode::from(EXIT_UNKNOWN);
        }
    };

    let ctx = RunContext::new(unix_now(), monitor_host());

    match check::run(&config, &ctx).await {
        Ok(report) => {
            let detail = render_detail(&config, &report);
            if report.all_confirmed() {
                println!("{} OK - {}", STATUS_PREFIX, detail);
                ExitCode::from(EXIT_OK)
            } else {
                println!("{} CRITICAL - {}", STATUS_PREFIX, detail);
                ExitCode::from(EXIT_CRITICAL)
            }
        }
        Err(err) => {
            tracing::warn!(%err, "run failed");
            println!("{} UNKNOWN - {}", STATUS_PREFIX, err);
            ExitCode::from(EXIT_UNKNOWN)
        }
    }
}

fn load_config(args: &Args) -> Result<CheckConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::new(format!("cannot read {}: {}", path.display(), e)))?;
            toml::from_str(&raw)
                .map_err(|e| ConfigError::new(format!("cannot parse {}: {}", path.display(), e)))?
        }
        None => config_from_flags(args)?,
    };

    if let Some(window) = args.window {
        config.freshness_window = window;
    }

    config.validate()?;
    Ok(config)
}

fn config_from_flags(args: &Args) -> Result<CheckConfig, ConfigError> {
    let first = endpoint_from_flags(
        args.smtp1.as_deref(),
        args.imap1.as_deref(),
        args.user1.as_deref(),
        args.pass1.as_deref(),
        args.addr1.as_deref(),
        args.no_tls1,
    )?;
    let second = endpoint_from_flags(
        args.smtp2.as_deref(),
        args.imap2.as_deref(),
        args.user2.as_deref(),
        args.pass2.as_deref(),
        args.addr2.as_deref(),
        args.no_tls2,
    )?;

    Ok(CheckConfig::new(first, second))
}

fn endpoint_from_flags(
    smtp: Option<&str>,
    imap: Option<&str>,
    user: Option<&str>,
    pass: Option<&str>,
    addr: Option<&str>,
    no_tls: bool,
) -> Result<Endpoint, ConfigError> {
    let missing = |flag: &str| ConfigError::new(format!("--{} is required", flag));

    let mut builder = Endpoint::builder()
        .smtp(smtp.ok_or_else(|| missing("smtpN"))?)?
        .imap(imap.ok_or_else(|| missing("imapN"))?)?
        .credentials(
            user.ok_or_else(|| missing("userN"))?,
            pass.ok_or_else(|| missing("passN"))?,
        )
        .address(addr.ok_or_else(|| missing("addrN"))?);

    if no_tls {
        builder = builder.no_tls();
    }

    builder.build()
}

fn render_detail(config: &CheckConfig, report: &RunReport) -> String {
    format!(
        "{}={} {}={}",
        config.first.address,
        received(report.first_received),
        config.second.address,
        received(report.second_received),
    )
}

fn received(confirmed: bool) -> &'static str {
    if confirmed {
        "received"
    } else {
        "missing"
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn monitor_host() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}
