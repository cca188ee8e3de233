//! cldrive: drive arbitrary compute kernels and measure them.
//!
//! Reads one or more kernel source files, drives every kernel they define
//! against the selected devices, and streams one result record per
//! instance as CSV or JSON lines.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Serialize;
use snafu::{ResultExt, Snafu};
use tracing_subscriber::EnvFilter;

use cldrive_device::{Device, registry};
use cldrive_driver::{
    DriveConfig, DynamicParams, FillPolicy, InstanceRecord, KernelSource, Outcome, Reporter, RunOutcome, drive,
};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to read kernel source {path:?}: {source}"))]
    ReadSource { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to open output file {path:?}: {source}"))]
    OpenOutput { path: PathBuf, source: std::io::Error },

    #[snafu(display("{source}"))]
    Device { source: cldrive_device::Error },

    #[snafu(display("{source}"))]
    Drive { source: cldrive_driver::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// One CSV row per instance, aggregates inlined.
    Csv,
    /// One JSON object per line, full record including per-run stats.
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Fill {
    Zero,
    Sequence,
    Random,
}

impl From<Fill> for FillPolicy {
    fn from(fill: Fill) -> Self {
        match fill {
            Fill::Zero => Self::Zero,
            Fill::Sequence => Self::Sequence,
            Fill::Random => Self::Random,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "cldrive", about = "Drive compute kernels and measure them", version)]
struct Cli {
    /// Kernel source files to drive.
    #[arg(long = "srcs", num_args = 1.., value_delimiter = ',', required_unless_present = "clinfo")]
    srcs: Vec<PathBuf>,

    /// Devices to drive against, by name substring. Defaults to every
    /// registered device.
    #[arg(long = "envs", value_delimiter = ',')]
    envs: Vec<String>,

    /// Global work size, in work items.
    #[arg(long, default_value_t = 1024)]
    gsize: usize,

    /// Local (workgroup) size, in work items.
    #[arg(long, default_value_t = 128)]
    lsize: usize,

    /// Timed dispatches per kernel instance.
    #[arg(long = "num-runs", default_value_t = 30)]
    num_runs: u32,

    /// Extra build options passed to the kernel compiler.
    #[arg(long = "cl-build-opt", default_value = "")]
    cl_build_opt: String,

    /// How synthesized inputs are filled.
    #[arg(long, value_enum, default_value_t = Fill::Sequence)]
    fill: Fill,

    /// Seed for random input synthesis.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    output_format: OutputFormat,

    /// Write records here instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// List available devices and exit.
    #[arg(long)]
    clinfo: bool,
}

/// Flattened per-instance CSV row. Per-run detail is summarized; use the
/// JSON format for the full record.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    source: &'a str,
    kernel: &'a str,
    device: &'a str,
    build_opts: &'a str,
    global_size: usize,
    local_size: usize,
    outcome: Outcome,
    runs_total: usize,
    runs_ok: usize,
    min_ns: Option<u64>,
    max_ns: Option<u64>,
    mean_ns: Option<u64>,
    build_log: Option<&'a str>,
}

struct CsvReporter<W: std::io::Write> {
    writer: csv::Writer<W>,
}

impl<W: std::io::Write> Reporter for CsvReporter<W> {
    fn report(&mut self, record: &InstanceRecord) -> cldrive_driver::Result<()> {
        let row = CsvRow {
            source: &record.kernel_source_id,
            kernel: &record.kernel_name,
            device: &record.device_id,
            build_opts: &record.build_opts,
            global_size: record.dynamic_params.global_size,
            local_size: record.dynamic_params.local_size,
            outcome: record.outcome,
            runs_total: record.runs.len(),
            runs_ok: record.runs.iter().filter(|run| run.outcome == RunOutcome::Ok).count(),
            min_ns: record.aggregate.map(|a| a.min_ns),
            max_ns: record.aggregate.map(|a| a.max_ns),
            mean_ns: record.aggregate.map(|a| a.mean_ns),
            build_log: record.build_log.as_deref(),
        };
        self.writer
            .serialize(row)
            .and_then(|()| self.writer.flush().map_err(Into::into))
            .map_err(|e| cldrive_driver::Error::Report { message: e.to_string() })
    }
}

struct JsonReporter<W: std::io::Write> {
    writer: W,
}

impl<W: std::io::Write> Reporter for JsonReporter<W> {
    fn report(&mut self, record: &InstanceRecord) -> cldrive_driver::Result<()> {
        serde_json::to_writer(&mut self.writer, record)
            .map_err(|e| cldrive_driver::Error::Report { message: e.to_string() })?;
        self.writer
            .write_all(b"\n")
            .and_then(|()| self.writer.flush())
            .map_err(|e| cldrive_driver::Error::Report { message: e.to_string() })
    }
}

fn load_sources(paths: &[PathBuf], build_opts: &str) -> Result<Vec<KernelSource>> {
    paths
        .iter()
        .map(|path| {
            let text = fs::read_to_string(path).context(ReadSourceSnafu { path: path.clone() })?;
            Ok(KernelSource::new(text)
                .with_build_opts(build_opts)
                .with_label(path.display().to_string()))
        })
        .collect()
}

fn select_devices(names: &[String]) -> Result<Vec<Device>> {
    if names.is_empty() {
        // Every registered device, in registration order.
        return registry()
            .list_devices()
            .iter()
            .map(|descriptor| registry().select(&descriptor.name).context(DeviceSnafu))
            .collect();
    }
    names.iter().map(|name| registry().select(name).context(DeviceSnafu)).collect()
}

fn print_clinfo() {
    for descriptor in registry().list_devices() {
        println!("{} / {} ({:?})", descriptor.platform, descriptor.name, descriptor.device_type);
    }
}

fn writer_for(output: Option<&PathBuf>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) => {
            let file = fs::File::create(path).context(OpenOutputSnafu { path: path.clone() })?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(std::io::stdout())),
    }
}

fn run(cli: Cli) -> Result<()> {
    if cli.clinfo {
        print_clinfo();
        return Ok(());
    }

    let config = DriveConfig {
        sources: load_sources(&cli.srcs, &cli.cl_build_opt)?,
        devices: select_devices(&cli.envs)?,
        params: DynamicParams { global_size: cli.gsize, local_size: cli.lsize, min_runs: cli.num_runs },
        fill: cli.fill.into(),
        seed: cli.seed,
    };

    let writer = writer_for(cli.output.as_ref())?;
    let summary = match cli.output_format {
        OutputFormat::Csv => {
            let mut reporter = CsvReporter { writer: csv::Writer::from_writer(writer) };
            drive(&config, &mut reporter).context(DriveSnafu)?
        }
        OutputFormat::Json => {
            let mut reporter = JsonReporter { writer };
            drive(&config, &mut reporter).context(DriveSnafu)?
        }
    };

    tracing::info!(instances = summary.instances, ok = summary.ok, failed = summary.failed, "done");
    Ok(())
}

#[snafu::report]
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse())
}
