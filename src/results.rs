use crate::cli::RunConfig;
use crate::generator::GeneratorStats;
use crate::metrics::format_latency;
use crate::report::{RunLimit, RunSummary};
use crate::transport::TransportConfig;
use crate::validation::{PayloadValidator, ValidationSummary};
use anyhow::{Context, Result};
use colored::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Everything recorded about one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResults {
    pub metadata: RunMetadata,
    pub config: ConfigSnapshot,
    pub report: RunSummary,
    pub generator: GeneratorStats,
    pub validation: Option<ValidationSummary>,
    pub run_duration: Duration,
}

/// Identity of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub system_info: SystemInfo,
}

/// Configuration the run was started with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub transport: TransportConfig,
    pub messages: Vec<String>,
    pub numbering: bool,
    pub limit: RunLimit,
    pub concurrency: usize,
    pub pool_size: usize,
    pub validators: Vec<PayloadValidator>,
    pub percentiles: Vec<f64>,
}

impl From<&RunConfig> for ConfigSnapshot {
    fn from(config: &RunConfig) -> Self {
        Self {
            transport: config.transport.clone(),
            messages: config
                .messages
                .iter()
                .map(|m| format!("{}*{}", m.template(), m.multiplicity()))
                .collect(),
            numbering: config.numbering,
            limit: config.limit,
            concurrency: config.concurrency,
            pool_size: config.pool_size,
            validators: config.validators.clone(),
            percentiles: config.percentiles.clone(),
        }
    }
}

/// System information for reproducibility
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub architecture: String,
    pub cpu_cores: usize,
    pub rust_version: String,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            architecture: std::env::consts::ARCH.to_string(),
            cpu_cores: num_cpus::get(),
            rust_version: env!("CARGO_PKG_RUST_VERSION").to_string(),
        }
    }
}

impl RunResults {
    pub fn new(
        config: &RunConfig,
        report: RunSummary,
        generator: GeneratorStats,
        validation: Option<ValidationSummary>,
        run_duration: Duration,
    ) -> Self {
        Self {
            metadata: RunMetadata {
                run_id: Uuid::new_v4(),
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                system_info: SystemInfo::default(),
            },
            config: ConfigSnapshot::from(config),
            report,
            generator,
            validation,
            run_duration,
        }
    }
}

/// Writes results to the output file and the console
pub struct ResultsManager {
    output_file: PathBuf,
}

impl ResultsManager {
    pub fn new(output_file: &Path) -> Self {
        Self {
            output_file: output_file.to_path_buf(),
        }
    }

    pub fn output_file(&self) -> &Path {
        &self.output_file
    }

    /// Write pretty JSON to the output file
    pub fn write(&self, results: &RunResults) -> Result<()> {
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&self.output_file, json)
            .with_context(|| format!("Failed to write results to {:?}", self.output_file))?;

        info!("Results written to: {:?}", self.output_file);
        Ok(())
    }

    /// Print a human-readable summary table
    pub fn print_summary(&self, results: &RunResults) {
        let widths = [22, 20];
        let report = &results.report;

        println!();
        println!(
            "{} {}",
            "Run".bold(),
            results.metadata.run_id.to_string().dimmed()
        );
        print_table_separator(&widths);
        print_table_row(
            &["Transport", &results.config.transport.kind.to_string()],
            &widths,
        );
        print_table_row(
            &["Concurrency", &results.config.concurrency.to_string()],
            &widths,
        );
        print_table_row(&["Iterations", &report.reported.to_string()], &widths);
        print_table_row(
            &["Round trips", &report.throughput.total_round_trips.to_string()],
            &widths,
        );
        print_table_row(
            &[
                "Iterations/s",
                &format!("{:.1}", report.throughput.iterations_per_second),
            ],
            &widths,
        );
        print_table_separator(&widths);

        if let Some(latency) = &report.latency {
            print_table_row(&["Latency min", &format_latency(latency.min_ns)], &widths);
            print_table_row(
                &["Latency mean", &format_latency(latency.mean_ns as u64)],
                &widths,
            );
            for p in &latency.percentiles {
                print_table_row(
                    &[&format!("Latency p{}", p.percentile), &format_latency(p.value_ns)],
                    &widths,
                );
            }
            print_table_row(&["Latency max", &format_latency(latency.max_ns)], &widths);
            print_table_separator(&widths);
        }

        if report.absent_results > 0 {
            println!(
                "{}",
                format!("{} iteration(s) ended without a result", report.absent_results).yellow()
            );
        }
        if results.generator.failed > 0 {
            println!(
                "{}",
                format!("{} sender task(s) failed", results.generator.failed).red()
            );
        }
        if let Some(validation) = &results.validation {
            let line = format!(
                "Validation: {} passed, {} failed",
                validation.passed, validation.failed
            );
            if validation.failed == 0 {
                println!("{}", line.green());
            } else {
                println!("{}", line.red());
            }
        }
    }
}

fn print_table_row(columns: &[&str], widths: &[usize]) {
    print!("|");
    for (i, column) in columns.iter().enumerate() {
        let width = widths.get(i).copied().unwrap_or(10);
        print!(" {:width$} |", column, width = width);
    }
    println!();
}

fn print_table_separator(widths: &[usize]) {
    print!("+");
    for &width in widths {
        print!("{}+", "-".repeat(width + 2));
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Args;
    use crate::metrics::ThroughputMetrics;
    use clap::Parser;
    use tempfile::NamedTempFile;

    fn sample_results() -> RunResults {
        let args = Args::parse_from(["loadgen", "-m", "ping*2", "-c", "2", "-i", "10"]);
        let config = RunConfig::from_args(&args).unwrap();
        let report = RunSummary {
            issued: 10,
            reported: 10,
            absent_results: 0,
            latency: None,
            throughput: ThroughputMetrics {
                iterations_per_second: 100.0,
                round_trips_per_second: 200.0,
                total_iterations: 10,
                total_round_trips: 20,
                duration_ns: 100_000_000,
            },
        };
        RunResults::new(
            &config,
            report,
            GeneratorStats::default(),
            None,
            Duration::from_millis(100),
        )
    }

    #[test]
    fn test_config_snapshot() {
        let results = sample_results();
        assert_eq!(results.config.messages, vec!["ping*2".to_string()]);
        assert_eq!(results.config.concurrency, 2);
        assert_eq!(results.config.limit, RunLimit::Iterations(10));
        assert_eq!(results.metadata.version, crate::VERSION);
    }

    #[test]
    fn test_write_results() {
        let temp_file = NamedTempFile::new().unwrap();
        let manager = ResultsManager::new(temp_file.path());
        let results = sample_results();

        manager.write(&results).unwrap();
        manager.print_summary(&results);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(temp_file.path()).unwrap()).unwrap();
        assert_eq!(written["report"]["reported"], 10);
        assert_eq!(written["config"]["transport"]["kind"], "Dummy");
        assert_eq!(
            written["metadata"]["run_id"],
            results.metadata.run_id.to_string()
        );
    }

    #[test]
    fn test_system_info_default() {
        let info = SystemInfo::default();
        assert!(!info.os.is_empty());
        assert!(!info.architecture.is_empty());
        assert!(info.cpu_cores > 0);
    }
}
