//! Configuration resolution: CLI flag > environment variable > compiled-in
//! default. No config file, no XDG directory -- this process only ever
//! needs a database URL, a bind address, and a handful of numeric knobs.

use std::time::Duration;

use anyhow::{Context, Result};

use calc_db::config::DbConfig;

const DEFAULT_COMPUTING_POWER: usize = 4;
const DEFAULT_BIND_HOST: &str = "0.0.0.0";
const DEFAULT_BIND_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-operation-kind emulated processing latency, resolved from env vars.
#[derive(Debug, Clone, Copy)]
pub struct LatencyConfig {
    pub addition: Duration,
    pub subtraction: Duration,
    pub multiplication: Duration,
    pub division: Duration,
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            addition: Duration::from_secs(1),
            subtraction: Duration::from_secs(1),
            multiplication: Duration::from_secs(2),
            division: Duration::from_secs(2),
        }
    }
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ServerConfig {
    pub db_config: DbConfig,
    pub bind_host: String,
    pub bind_port: u16,
    pub computing_power: usize,
    pub latency: LatencyConfig,
    pub graceful_shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Resolve configuration using the chain: CLI flag > env var > default.
    pub fn resolve(cli_db_url: Option<&str>, cli_bind_port: Option<u16>) -> Result<Self> {
        let db_url = cli_db_url
            .map(str::to_owned)
            .or_else(|| std::env::var("CALC_DATABASE_URL").ok())
            .unwrap_or_else(|| DbConfig::DEFAULT_URL.to_string());
        let db_config = DbConfig::new(db_url);

        let bind_host = env_or_default("CALC_BIND_HOST", DEFAULT_BIND_HOST.to_string());
        let bind_port = cli_bind_port
            .map(Ok)
            .or_else(|| env_parsed("CALC_BIND_PORT"))
            .transpose()
            .context("CALC_BIND_PORT is not a valid port number")?
            .unwrap_or(DEFAULT_BIND_PORT);

        let computing_power = env_parsed("CALC_COMPUTING_POWER")
            .transpose()
            .context("CALC_COMPUTING_POWER is not a valid number")?
            .unwrap_or(DEFAULT_COMPUTING_POWER);

        let latency = LatencyConfig {
            addition: env_duration("CALC_TIME_ADDITION")?.unwrap_or(Duration::from_secs(1)),
            subtraction: env_duration("CALC_TIME_SUBTRACTION")?.unwrap_or(Duration::from_secs(1)),
            multiplication: env_duration("CALC_TIME_MULTIPLICATION")?
                .unwrap_or(Duration::from_secs(2)),
            division: env_duration("CALC_TIME_DIVISION")?.unwrap_or(Duration::from_secs(2)),
        };

        let graceful_shutdown_timeout =
            env_duration("CALC_GRACEFUL_SHUTDOWN_TIMEOUT")?.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        Ok(Self {
            db_config,
            bind_host,
            bind_port,
            computing_power,
            latency,
            graceful_shutdown_timeout,
        })
    }
}

fn env_or_default(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<Result<T>>
where
    T::Err: std::fmt::Display,
{
    std::env::var(key).ok().map(|v| {
        v.parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value {v:?} for {key}: {e}"))
    })
}

/// Parse a duration from a suffixed string such as `1s`, `500ms`, `2s`. Bare
/// digits are treated as whole seconds.
fn env_duration(key: &str) -> Result<Option<Duration>> {
    let Some(raw) = std::env::var(key).ok() else {
        return Ok(None);
    };
    parse_duration(&raw)
        .map(Some)
        .with_context(|| format!("invalid duration {raw:?} for {key}"))
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Some(ms) = raw.strip_suffix("ms") {
        let n: u64 = ms
            .parse()
            .context("expected an integer millisecond count")?;
        return Ok(Duration::from_millis(n));
    }
    if let Some(secs) = raw.strip_suffix('s') {
        let n: u64 = secs.parse().context("expected an integer second count")?;
        return Ok(Duration::from_secs(n));
    }
    let n: u64 = raw.parse().context("expected an integer second count")?;
    Ok(Duration::from_secs(n))
}
