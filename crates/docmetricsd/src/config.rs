//! Command-line arguments and the immutable runtime configuration built
//! from them.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use docmetrics_core::Labels;
use docmetrics_core::collector::CollectorSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectorKind {
    /// Profiler entries of `--profile-database`.
    Profile,
    /// `serverStatus` of the node.
    ServerStatus,
}

#[derive(Debug, Parser)]
#[command(
    name = "docmetricsd",
    about = "Document-database metrics exporter",
    version = docmetrics_core::VERSION
)]
pub struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0:9216", env = "DOCMETRICS_LISTEN")]
    pub listen: String,

    /// Path the metrics are served on.
    #[arg(long, default_value = "/metrics", env = "DOCMETRICS_TELEMETRY_PATH")]
    pub telemetry_path: String,

    /// Directory of recorded command replies, laid out as
    /// `<database>/<command>.json`.
    #[arg(long, env = "DOCMETRICS_FIXTURES", value_name = "DIR")]
    pub fixtures: PathBuf,

    /// Emit metric names compatible with the previous exporter generation.
    #[arg(long, env = "DOCMETRICS_COMPATIBLE_MODE")]
    pub compatible_mode: bool,

    /// Collectors to run. Defaults to all of them.
    #[arg(long = "collector", value_enum, env = "DOCMETRICS_COLLECTORS", value_delimiter = ',')]
    pub collectors: Vec<CollectorKind>,

    /// Database whose profiler collection is read.
    #[arg(long, default_value = "test", env = "DOCMETRICS_PROFILE_DATABASE")]
    pub profile_database: String,

    /// Label attached to every sample, as `key=value`.
    #[arg(long = "label", env = "DOCMETRICS_LABELS", value_delimiter = ',')]
    pub labels: Vec<String>,

    /// Scrape deadline in milliseconds.
    #[arg(long, default_value = "10000", env = "DOCMETRICS_SCRAPE_TIMEOUT_MS")]
    pub scrape_timeout_ms: u64,

    /// Samples buffered per collector before it waits for the consumer.
    #[arg(long, default_value = "1024", env = "DOCMETRICS_SINK_CAPACITY")]
    pub sink_capacity: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    pub quiet: bool,
}

/// Routes the daemon serves besides the telemetry path.
const RESERVED_PATHS: &[&str] = &["/health", "/debug/scrape"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Listen(String),
    TelemetryPath(String),
    Label(String),
    ZeroTimeout,
    ZeroCapacity,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Listen(addr) => write!(f, "invalid listen address '{}'", addr),
            ConfigError::TelemetryPath(path) => {
                write!(f, "telemetry path '{}' must start with '/' and not shadow another route", path)
            }
            ConfigError::Label(label) => {
                write!(f, "invalid label '{}', expected key=value", label)
            }
            ConfigError::ZeroTimeout => write!(f, "scrape timeout must be positive"),
            ConfigError::ZeroCapacity => write!(f, "sink capacity must be positive"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Settings fixed at startup and shared read-only by every scrape.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub telemetry_path: String,
    pub fixtures: PathBuf,
    pub compatible: bool,
    pub collectors: Vec<CollectorKind>,
    pub profile_database: String,
    pub labels: Labels,
    pub scrape_timeout: Duration,
    pub sink_capacity: usize,
}

impl Config {
    pub fn from_args(args: &Args) -> Result<Self, ConfigError> {
        let listen = args
            .listen
            .parse()
            .map_err(|_| ConfigError::Listen(args.listen.clone()))?;

        if !args.telemetry_path.starts_with('/')
            || RESERVED_PATHS.contains(&args.telemetry_path.as_str())
        {
            return Err(ConfigError::TelemetryPath(args.telemetry_path.clone()));
        }
        if args.scrape_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout);
        }
        if args.sink_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let labels = args
            .labels
            .iter()
            .map(|l| parse_label(l))
            .collect::<Result<Labels, _>>()?;

        let mut collectors = args.collectors.clone();
        if collectors.is_empty() {
            collectors = vec![CollectorKind::Profile, CollectorKind::ServerStatus];
        }
        collectors.dedup();

        Ok(Self {
            listen,
            telemetry_path: args.telemetry_path.clone(),
            fixtures: args.fixtures.clone(),
            compatible: args.compatible_mode,
            collectors,
            profile_database: args.profile_database.clone(),
            labels,
            scrape_timeout: Duration::from_millis(args.scrape_timeout_ms),
            sink_capacity: args.sink_capacity,
        })
    }

    /// Collector definitions in configured order.
    pub fn collector_specs(&self) -> Vec<CollectorSpec> {
        self.collectors
            .iter()
            .map(|kind| match kind {
                CollectorKind::Profile => CollectorSpec::system_profile(&self.profile_database),
                CollectorKind::ServerStatus => CollectorSpec::server_status(),
            })
            .collect()
    }
}

fn parse_label(raw: &str) -> Result<(String, String), ConfigError> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| ConfigError::Label(raw.to_string()))?;
    let key = key.trim();
    let valid = !key.is_empty()
        && !key.starts_with(|c: char| c.is_ascii_digit())
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(ConfigError::Label(raw.to_string()));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Default level is INFO. `-q` limits output to errors.
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["docmetricsd", "docmetrics_core"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
