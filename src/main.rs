//! # Loadgen - Main Entry Point
//!
//! Runs one load-generation session from the command line:
//!
//! 1. **Parse arguments** and initialize colored logging
//! 2. **Build the run configuration** and the transport pool
//! 3. **Run the generator** until the iteration or duration limit is hit,
//!    or until Ctrl-C stops the report manager
//! 4. **Drain validation**, close the pool and write the JSON results

use anyhow::Result;
use clap::Parser;
use loadgen_engine::{
    cli::{Args, RunConfig},
    logging, ConcurrencyGate, Generator, MessageStore, MessageValidator, ReportManager,
    ResultsManager, RunResults, TaskContext, TransportPool, ValidationManager,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    info!("Starting loadgen {}", loadgen_engine::VERSION);
    let config = RunConfig::from_args(&args)?;
    info!("Configuration: {:?}", config);

    let pool = TransportPool::build(&config.transport, config.pool_size).await?;

    let report = Arc::new(ReportManager::new(config.limit, config.percentiles.clone())?);

    let validators: Vec<Arc<dyn MessageValidator>> = config
        .validators
        .iter()
        .cloned()
        .map(|v| Arc::new(v) as Arc<dyn MessageValidator>)
        .collect();
    let validation = Arc::new(ValidationManager::new(
        config.validation_enabled(),
        validators,
    ));
    validation.start();

    let ctx = TaskContext::new(
        pool.clone(),
        MessageStore::new(config.messages.clone()),
        report.clone(),
        validation.clone(),
    )
    .with_numbering(config.numbering);
    let generator = Generator::new(ctx, ConcurrencyGate::new(config.concurrency)?);

    let interrupt = {
        let report = report.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    warn!("Interrupted, finishing in-flight iterations");
                    report.stop();
                }
                Err(e) => error!("Unable to listen for Ctrl-C: {}", e),
            }
        })
    };

    let started = Instant::now();
    report.start();
    let outcome = generator.run().await;
    report.stop();
    interrupt.abort();
    let run_duration = started.elapsed();

    let validation_summary = validation.finish().await;
    pool.close().await;
    let stats = outcome?;

    let results = RunResults::new(
        &config,
        report.summary(),
        stats,
        config.validation_enabled().then_some(validation_summary),
        run_duration,
    );

    let results_manager = ResultsManager::new(&config.output_file);
    results_manager.write(&results)?;
    results_manager.print_summary(&results);

    info!("Loadgen completed in {:?}", run_duration);
    Ok(())
}
