//! shardplan CLI
//!
//! Computes and prints the resource sharding for each requested test stage.

mod commands;

use clap::{Parser, ValueEnum};
use shardplan_core::{Config, CpuPin, Feature, Launcher, System};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

/// shardplan - plan parallel test runs against the machine's resources
#[derive(Parser, Debug)]
#[command(name = "shardplan")]
#[command(version, about, long_about = None)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// TOML hardware inventory to plan against instead of this machine
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Feature stages to plan (cpus, cuda, openmp, eager)
    #[arg(long = "use", value_delimiter = ',')]
    features: Vec<Feature>,

    /// Number of CPUs per test process
    #[arg(long, help_heading = "Core allocation")]
    cpus: Option<u32>,

    /// Number of GPUs per test process
    #[arg(long, help_heading = "Core allocation")]
    gpus: Option<u32>,

    /// Number of OpenMP processors per test process
    #[arg(long, help_heading = "Core allocation")]
    omps: Option<u32>,

    /// Number of threads per OpenMP processor
    #[arg(long, value_name = "THREADS", help_heading = "Core allocation")]
    ompthreads: Option<u32>,

    /// Number of utility CPUs to reserve for runtime services
    #[arg(long, help_heading = "Core allocation")]
    utility: Option<u32>,

    /// Per-process CPU system memory limit (MB)
    #[arg(long, help_heading = "Memory allocation")]
    sysmem: Option<u64>,

    /// Per-process GPU framebuffer memory limit (MB)
    #[arg(long, help_heading = "Memory allocation")]
    fbmem: Option<u64>,

    /// Per-process NUMA memory for OpenMP processors limit (MB)
    #[arg(long, help_heading = "Memory allocation")]
    numamem: Option<u64>,

    /// Number of nodes to use
    #[arg(long, help_heading = "Multi-node configuration")]
    nodes: Option<u32>,

    /// Number of ranks per node to use
    #[arg(long, help_heading = "Multi-node configuration")]
    ranks_per_node: Option<u32>,

    /// Launcher program to use (mpirun, jsrun, srun, none)
    #[arg(long, help_heading = "Multi-node configuration")]
    launcher: Option<Launcher>,

    /// Additional argument to pass to the launcher (repeatable)
    #[arg(long, help_heading = "Multi-node configuration")]
    launcher_extra: Vec<String>,

    /// File for mpirun to write rank output to
    #[arg(long, help_heading = "Multi-node configuration")]
    mpi_output_filename: Option<String>,

    /// Number of parallel workers for testing
    #[arg(short = 'j', long, allow_negative_numbers = true, help_heading = "Test execution")]
    workers: Option<i64>,

    /// Timeout in seconds for individual tests
    #[arg(long, help_heading = "Test execution")]
    timeout: Option<u64>,

    /// CPU pinning behavior (partial, none, strict)
    #[arg(long, help_heading = "Test execution")]
    cpu_pin: Option<CpuPin>,

    /// Delay to introduce between GPU tests (ms)
    #[arg(long, help_heading = "Test execution")]
    gpu_delay: Option<u64>,

    /// Fudge factor to adjust memory reservations
    #[arg(long, help_heading = "Test execution")]
    bloat_factor: Option<f64>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Apply command line overrides on top of a loaded configuration
    fn apply(&self, mut config: Config) -> Config {
        if !self.features.is_empty() {
            config.features = self.features.clone();
        }

        let core = &mut config.core;
        core.cpus = self.cpus.unwrap_or(core.cpus);
        core.gpus = self.gpus.unwrap_or(core.gpus);
        core.omps = self.omps.unwrap_or(core.omps);
        core.ompthreads = self.ompthreads.unwrap_or(core.ompthreads);
        core.utility = self.utility.unwrap_or(core.utility);

        let memory = &mut config.memory;
        memory.sysmem = self.sysmem.unwrap_or(memory.sysmem);
        memory.fbmem = self.fbmem.unwrap_or(memory.fbmem);
        memory.numamem = self.numamem.unwrap_or(memory.numamem);

        let mn = &mut config.multi_node;
        mn.nodes = self.nodes.unwrap_or(mn.nodes);
        mn.ranks_per_node = self.ranks_per_node.unwrap_or(mn.ranks_per_node);
        mn.launcher = self.launcher.unwrap_or(mn.launcher);
        mn.launcher_extra.extend(self.launcher_extra.iter().cloned());
        if self.mpi_output_filename.is_some() {
            mn.mpi_output_filename = self.mpi_output_filename.clone();
        }

        let execution = &mut config.execution;
        if self.workers.is_some() {
            execution.workers = self.workers;
        }
        if self.timeout.is_some() {
            execution.timeout = self.timeout;
        }
        execution.cpu_pin = self.cpu_pin.unwrap_or(execution.cpu_pin);
        execution.gpu_delay = self.gpu_delay.unwrap_or(execution.gpu_delay);
        execution.bloat_factor = self.bloat_factor.unwrap_or(execution.bloat_factor);

        config
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let config = cli.apply(config);

    let system = match &cli.inventory {
        Some(path) => System::from_file(path)?,
        None => System::detect(),
    };

    debug!(
        cpus = system.cpus.len(),
        gpus = system.gpus.len(),
        memory_mb = system.memory,
        "Loaded hardware inventory"
    );

    let output = match cli.format {
        OutputFormat::Text => commands::render_text(&config, &system)?,
        OutputFormat::Json => commands::render_json(&config, &system)?,
    };
    println!("{}", output);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::parse_from([
            "shardplan",
            "--use",
            "cpus,openmp",
            "--cpus",
            "1",
            "--cpu-pin",
            "strict",
            "-j",
            "3",
            "--launcher",
            "srun",
            "--ranks-per-node",
            "2",
        ]);
        let config = cli.apply(Config::default());
        assert_eq!(config.features, vec![Feature::Cpus, Feature::Openmp]);
        assert_eq!(config.core.cpus, 1);
        assert_eq!(config.core.utility, 1);
        assert_eq!(config.execution.cpu_pin, CpuPin::Strict);
        assert_eq!(config.execution.workers, Some(3));
        assert_eq!(config.multi_node.launcher, Launcher::Srun);
        assert_eq!(config.multi_node.ranks_per_node, 2);
    }

    #[test]
    fn test_negative_workers_parse() {
        let cli = Cli::parse_from(["shardplan", "-j", "-1"]);
        assert_eq!(cli.workers, Some(-1));
    }

    #[test]
    fn test_bad_feature_rejected() {
        assert!(Cli::try_parse_from(["shardplan", "--use", "tpu"]).is_err());
    }
}
