//! # Loadgen Engine Library
//!
//! A load-generation engine that drives many concurrent request/response
//! exchanges against a target and measures how long each one takes.
//!
//! ## Architecture Overview
//!
//! A run is made of iterations. For every iteration the [`Generator`] takes a
//! permit from the [`ConcurrencyGate`] and spawns a [`SenderTask`] which:
//!
//! - asks the [`ReportSink`] for a [`MeasurementUnit`], stopping if none is issued
//! - borrows a [`Transport`] from the [`TransportPool`]
//! - sends every message of the [`MessageStore`], timing only the measured phase
//! - hands each round trip to the [`ValidationSink`] when validation is on
//! - returns the transport, reports the unit and releases its permit
//!
//! The modules are:
//!
//! - `gate`: bound on in-flight sender tasks
//! - `pool`: fixed set of reusable transports with exclusive checkout
//! - `transport`: the transport lifecycle and the bundled dummy and TCP transports
//! - `message`: message templates, the message store and placeholder filtering
//! - `measurement`: per-iteration timing and result slots
//! - `report`: the report sink and the run-limit aware [`ReportManager`]
//! - `validation`: the validation sink and background response checking
//! - `task`, `generator`: the sender task and the loop that spawns it
//! - `metrics`, `results`: HDR latency aggregation and JSON output
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use loadgen_engine::{
//!     ConcurrencyGate, Generator, MessageStore, MessageTemplate, ReportManager, RunLimit,
//!     TaskContext, TransportConfig, TransportPool, ValidationManager,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = TransportPool::build(&TransportConfig::default(), 4).await?;
//!     let store = MessageStore::new(vec![MessageTemplate::new("ping").with_multiplicity(2)]);
//!     let report = Arc::new(ReportManager::new(RunLimit::Iterations(1000), vec![50.0, 99.0])?);
//!     let validation = Arc::new(ValidationManager::disabled());
//!
//!     let ctx = TaskContext::new(pool.clone(), store, report.clone(), validation);
//!     let generator = Generator::new(ctx, ConcurrencyGate::new(4)?);
//!
//!     report.start();
//!     let stats = generator.run().await?;
//!     pool.close().await;
//!
//!     println!("{} iterations, {:?}", stats.completed, report.summary().latency);
//!     Ok(())
//! }
//! ```

pub mod cli;

pub mod error;

/// Bound on the number of sender tasks in flight
pub mod gate;

pub mod generator;

pub mod logging;

pub mod measurement;

pub mod message;

/// HDR histogram latency and throughput aggregation
pub mod metrics;

pub mod pool;

pub mod report;

/// Run result collection and output
pub mod results;

pub mod task;

pub mod transport;

pub mod validation;

pub use cli::{Args, RunConfig, TransportKind};
pub use error::{EngineError, EngineResult};
pub use gate::{ConcurrencyGate, GatePermit};
pub use generator::{Generator, GeneratorStats};
pub use measurement::{MeasurementUnit, ResultValue};
pub use message::{Message, MessageStore, MessageTemplate};
pub use pool::{PooledTransport, TransportPool};
pub use report::{ReportManager, ReportSink, RunLimit, RunSummary};
pub use results::{ResultsManager, RunResults};
pub use task::{SenderTask, TaskContext, TaskOutcome};
pub use transport::{Transport, TransportConfig, TransportFactory};
pub use validation::{
    MessageValidator, PayloadPattern, PayloadValidator, RoundTripResult, ValidationManager,
    ValidationSink, ValidationSummary,
};

/// The current version of the engine, recorded in every result file
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    /// Default target address
    pub const TARGET: &str = "127.0.0.1:8080";

    /// Default number of iterations when no duration is given
    pub const ITERATIONS: u64 = 10000;

    /// Default output file name
    pub const OUTPUT_FILE: &str = "loadgen_results.json";

    /// Default number of concurrent sender tasks: one per CPU
    pub fn concurrency() -> usize {
        num_cpus::get()
    }
}
