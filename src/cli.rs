use crate::error::{EngineError, EngineResult};
use crate::message::MessageTemplate;
use crate::report::RunLimit;
use crate::transport::TransportConfig;
use crate::validation::{PayloadPattern, PayloadValidator};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Loadgen - drive concurrent request/response exchanges and measure their latency
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Transport used to reach the target
    #[clap(short = 't', long, value_enum, default_value_t = TransportKind::Dummy, help_heading = "Target")]
    pub transport: TransportKind,

    /// Target address (host:port for tcp)
    #[clap(long, default_value = crate::defaults::TARGET, help_heading = "Target")]
    pub target: String,

    /// Timeout for establishing a connection
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Target")]
    pub connect_timeout: Duration,

    /// Timeout for a single write or read
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Target")]
    pub io_timeout: Duration,

    /// Artificial service time of the dummy transport
    #[clap(long, value_parser = parse_duration, help_heading = "Target")]
    pub delay: Option<Duration>,

    /// Message to send each iteration, optionally repeated: "payload" or "payload*N".
    /// May be given several times; with none, each iteration sends one empty heartbeat.
    #[clap(short = 'm', long = "message", value_parser = parse_message)]
    pub messages: Vec<MessageTemplate>,

    /// Stamp the iteration number into a header and the MessageNumber attribute
    #[clap(long, default_value_t = false)]
    pub numbering: bool,

    /// Number of iterations to run (ignored if duration is specified)
    #[clap(short = 'i', long, default_value_t = crate::defaults::ITERATIONS, help_heading = "Run")]
    pub iterations: u64,

    /// Duration to run (takes precedence over iterations)
    #[clap(short = 'd', long, value_parser = parse_duration, help_heading = "Run")]
    pub duration: Option<Duration>,

    /// Maximum sender tasks in flight [default: number of CPUs]
    #[clap(short = 'c', long, help_heading = "Run")]
    pub concurrency: Option<usize>,

    /// Number of pooled transports [default: same as concurrency]
    #[clap(short = 'p', long, help_heading = "Run")]
    pub pool_size: Option<usize>,

    /// Count a response as valid only if it equals this text
    #[clap(long, help_heading = "Validation")]
    pub expect_equals: Option<String>,

    /// Count a response as valid only if it contains this text
    #[clap(long, help_heading = "Validation")]
    pub expect_contains: Option<String>,

    /// Count a response as valid only if it starts with this text
    #[clap(long, help_heading = "Validation")]
    pub expect_starts_with: Option<String>,

    /// Count a response as valid only if it ends with this text
    #[clap(long, help_heading = "Validation")]
    pub expect_ends_with: Option<String>,

    /// Count a response as valid only if this regular expression matches all of it
    #[clap(long, help_heading = "Validation")]
    pub expect_regex: Option<String>,

    /// Percentiles to calculate for latency metrics
    #[clap(long, default_values_t = vec![50.0, 95.0, 99.0, 99.9], help_heading = "Output")]
    pub percentiles: Vec<f64>,

    /// Output file for results (JSON format)
    #[clap(short = 'o', long, default_value = crate::defaults::OUTPUT_FILE, help_heading = "Output")]
    pub output_file: PathBuf,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

/// Available transports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum TransportKind {
    /// In-process loopback
    #[default]
    #[clap(name = "dummy")]
    Dummy,

    /// Persistent TCP connection with length-prefixed frames
    #[clap(name = "tcp")]
    Tcp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Dummy => write!(f, "Dummy"),
            TransportKind::Tcp => write!(f, "TCP"),
        }
    }
}

/// Validated run configuration
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub transport: TransportConfig,
    pub messages: Vec<MessageTemplate>,
    pub numbering: bool,
    pub limit: RunLimit,
    pub concurrency: usize,
    pub pool_size: usize,
    pub validators: Vec<PayloadValidator>,
    pub percentiles: Vec<f64>,
    pub output_file: PathBuf,
}

impl RunConfig {
    pub fn from_args(args: &Args) -> EngineResult<Self> {
        let concurrency = args.concurrency.unwrap_or_else(crate::defaults::concurrency);
        let pool_size = args.pool_size.unwrap_or(concurrency);

        if concurrency == 0 {
            return Err(EngineError::Config(
                "concurrency must be greater than 0".to_string(),
            ));
        }
        if pool_size == 0 {
            return Err(EngineError::Config(
                "pool size must be greater than 0".to_string(),
            ));
        }
        if let Some(p) = args.percentiles.iter().find(|p| !(0.0..=100.0).contains(*p)) {
            return Err(EngineError::Config(format!(
                "percentile {} is outside 0..=100",
                p
            )));
        }

        let limit = match args.duration {
            Some(duration) => RunLimit::Duration(duration),
            None => RunLimit::Iterations(args.iterations),
        };

        let mut validators = Vec::new();
        if let Some(expected) = &args.expect_equals {
            validators.push(PayloadValidator::Equals(expected.clone()));
        }
        if let Some(needle) = &args.expect_contains {
            validators.push(PayloadValidator::Contains(needle.clone()));
        }
        if let Some(prefix) = &args.expect_starts_with {
            validators.push(PayloadValidator::StartsWith(prefix.clone()));
        }
        if let Some(suffix) = &args.expect_ends_with {
            validators.push(PayloadValidator::EndsWith(suffix.clone()));
        }
        if let Some(pattern) = &args.expect_regex {
            let pattern = PayloadPattern::new(pattern).map_err(|e| {
                EngineError::Config(format!("invalid response pattern '{}': {}", pattern, e))
            })?;
            validators.push(PayloadValidator::Matches(pattern));
        }

        Ok(Self {
            transport: TransportConfig {
                kind: args.transport,
                target: args.target.clone(),
                connect_timeout: args.connect_timeout,
                io_timeout: args.io_timeout,
                delay: args.delay,
                ..Default::default()
            },
            messages: args.messages.clone(),
            numbering: args.numbering,
            limit,
            concurrency,
            pool_size,
            validators,
            percentiles: args.percentiles.clone(),
            output_file: args.output_file.clone(),
        })
    }

    /// Validation runs when at least one validator is configured
    pub fn validation_enabled(&self) -> bool {
        !self.validators.is_empty()
    }
}

fn parse_message(s: &str) -> Result<MessageTemplate, String> {
    MessageTemplate::parse(s)
}

/// Parse duration from string (e.g., "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Invalid duration: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs).map_err(|e| format!("Invalid duration {}: {}", s, e))
}
