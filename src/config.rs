//! Service configuration.
//!
//! Every setting has a default and can be overridden by a command-line flag or
//! a `SALES_*` environment variable:
//!
//! ```text
//! --web-read-timeout      SALES_WEB_READ_TIMEOUT      5s
//! --web-write-timeout     SALES_WEB_WRITE_TIMEOUT     10s
//! --web-idle-timeout      SALES_WEB_IDLE_TIMEOUT      120s
//! --web-shutdown-timeout  SALES_WEB_SHUTDOWN_TIMEOUT  20s
//! --web-api-host          SALES_WEB_API_HOST          0.0.0.0:3000
//! --web-debug-host        SALES_WEB_DEBUG_HOST        0.0.0.0:4000
//! --log-format            SALES_LOG_FORMAT            text
//! --log-level             SALES_LOG_LEVEL             info
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, ValueEnum};

use crate::server::ServerConfig;

/// Build identifier, stamped at compile time through `SALES_BUILD`.
pub const BUILD: &str = match option_env!("SALES_BUILD") {
    Some(build) => build,
    None => "develop",
};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "sales-api", version = BUILD, about = "Sales API service")]
pub struct Config {
    #[command(flatten)]
    pub web: WebConfig,

    #[command(flatten)]
    pub log: LogConfig,
}

/// Listener addresses and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct WebConfig {
    #[arg(long = "web-read-timeout", env = "SALES_WEB_READ_TIMEOUT", default_value = "5s", value_parser = parse_duration)]
    pub read_timeout: Duration,

    #[arg(long = "web-write-timeout", env = "SALES_WEB_WRITE_TIMEOUT", default_value = "10s", value_parser = parse_duration)]
    pub write_timeout: Duration,

    #[arg(long = "web-idle-timeout", env = "SALES_WEB_IDLE_TIMEOUT", default_value = "120s", value_parser = parse_duration)]
    pub idle_timeout: Duration,

    #[arg(long = "web-shutdown-timeout", env = "SALES_WEB_SHUTDOWN_TIMEOUT", default_value = "20s", value_parser = parse_duration)]
    pub shutdown_timeout: Duration,

    #[arg(long = "web-api-host", env = "SALES_WEB_API_HOST", default_value = "0.0.0.0:3000")]
    pub api_host: SocketAddr,

    /// Masked in the startup config dump.
    #[arg(long = "web-debug-host", env = "SALES_WEB_DEBUG_HOST", default_value = "0.0.0.0:4000", hide_env_values = true)]
    pub debug_host: SocketAddr,
}

impl WebConfig {
    pub fn server(&self) -> ServerConfig {
        ServerConfig {
            read_timeout: self.read_timeout,
            idle_timeout: self.idle_timeout,
            shutdown_timeout: self.shutdown_timeout,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct LogConfig {
    #[arg(long = "log-format", env = "SALES_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub format: LogFormat,

    /// An `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    #[arg(long = "log-level", env = "SALES_LOG_LEVEL", default_value = "info")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { format: LogFormat::Text, level: "info".to_owned() }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// One `--flag=value` per line, debug host masked.
impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let web = &self.web;
        writeln!(f, "--web-read-timeout={}", format_duration(web.read_timeout))?;
        writeln!(f, "--web-write-timeout={}", format_duration(web.write_timeout))?;
        writeln!(f, "--web-idle-timeout={}", format_duration(web.idle_timeout))?;
        writeln!(f, "--web-shutdown-timeout={}", format_duration(web.shutdown_timeout))?;
        writeln!(f, "--web-api-host={}", web.api_host)?;
        writeln!(f, "--web-debug-host=xxxxxx")?;
        writeln!(f, "--log-format={}", match self.log.format {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
        })?;
        write!(f, "--log-level={}", self.log.level)
    }
}

/// Parses `250ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
/// Zero is rejected: every timeout must allow some time.
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit): (&str, fn(u64) -> Duration) = if let Some(n) = s.strip_suffix("ms") {
        (n, Duration::from_millis)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, Duration::from_secs)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, |m| Duration::from_secs(m.saturating_mul(60)))
    } else if let Some(n) = s.strip_suffix('h') {
        (n, |h| Duration::from_secs(h.saturating_mul(3600)))
    } else {
        (s, Duration::from_secs)
    };

    let n: u64 = digits.trim().parse().map_err(|_| format!("invalid duration `{s}`"))?;
    if n == 0 {
        return Err(format!("duration `{s}` must be greater than zero"));
    }
    Ok(unit(n))
}

fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}
