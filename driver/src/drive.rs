//! The batch entry point: every source against every device, sequentially.
//!
//! Instances run strictly one at a time so wall-clock timings are never
//! polluted by concurrent device work. A failing instance produces its
//! record and the batch moves on; only configuration errors and reporter
//! failures abort.

use serde::Serialize;

use crate::config::DriveConfig;
use crate::error::Result;
use crate::instance::InstanceDriver;
use crate::report::{InstanceRecord, Reporter};
use crate::stat::Outcome;

/// Batch totals, returned after the last record is reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriveSummary {
    pub instances: usize,
    /// Instances with outcome `ok`, strictly.
    pub ok: usize,
    pub failed: usize,
}

/// Drive the whole configuration, streaming one record per instance into
/// the reporter.
pub fn drive(config: &DriveConfig, reporter: &mut dyn Reporter) -> Result<DriveSummary> {
    config.validate()?;

    let mut summary = DriveSummary::default();

    for device in &config.devices {
        for (source_idx, source) in config.sources.iter().enumerate() {
            tracing::info!(
                device = device.name(),
                source = source.id(),
                global_size = config.params.global_size,
                local_size = config.params.local_size,
                runs = config.params.min_runs,
                "driving source"
            );

            let driver = InstanceDriver::new(device)
                .with_fill(config.fill)
                .with_seed(config.seed.wrapping_add(source_idx as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));

            for result in driver.drive_source(source, &config.params) {
                summary.instances += 1;
                if result.outcome == Outcome::Ok {
                    summary.ok += 1;
                } else {
                    summary.failed += 1;
                }

                let record = InstanceRecord::new(source, device.name(), config.params, result);
                reporter.report(&record)?;
            }
        }
    }

    tracing::info!(instances = summary.instances, ok = summary.ok, failed = summary.failed, "batch complete");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cldrive_device::{Backend, Device, SimulatorBackend};

    use crate::config::{DynamicParams, FillPolicy, KernelSource};
    use crate::error::Error;
    use crate::report::VecReporter;

    use super::*;

    fn config(sources: Vec<KernelSource>) -> DriveConfig {
        let backend = Arc::new(SimulatorBackend::new());
        DriveConfig {
            sources,
            devices: vec![Device::new(backend as Arc<dyn Backend>)],
            params: DynamicParams { global_size: 16, local_size: 4, min_runs: 2 },
            fill: FillPolicy::Sequence,
            seed: 42,
        }
    }

    #[test]
    fn a_failing_source_does_not_abort_the_batch() {
        let cfg = config(vec![
            KernelSource::new("#error broken\n").with_label("bad.cl"),
            KernelSource::new("kernel void ok(global int* a) {}").with_label("good.cl"),
        ]);

        let mut reporter = VecReporter::default();
        let summary = drive(&cfg, &mut reporter).expect("batch should run");

        assert_eq!(summary, DriveSummary { instances: 2, ok: 1, failed: 1 });
        assert_eq!(reporter.records.len(), 2);
        assert_eq!(reporter.records[0].kernel_source_id, "bad.cl");
        assert_eq!(reporter.records[0].outcome, Outcome::BuildFailure);
        assert_eq!(reporter.records[1].kernel_name, "ok");
        assert_eq!(reporter.records[1].outcome, Outcome::Ok);
    }

    #[test]
    fn records_carry_source_and_device_identity() {
        let cfg = config(vec![KernelSource::new("kernel void k(global int* a) {}")
            .with_build_opts("-cl-fast-relaxed-math")
            .with_label("k.cl")]);

        let mut reporter = VecReporter::default();
        drive(&cfg, &mut reporter).expect("batch");

        let record = &reporter.records[0];
        assert_eq!(record.kernel_source_id, "k.cl");
        assert_eq!(record.build_opts, "-cl-fast-relaxed-math");
        assert_eq!(record.device_id, "Simulator");
        assert_eq!(record.dynamic_params.global_size, 16);
        assert_eq!(record.runs.len(), 2);
    }

    #[test]
    fn invalid_configuration_is_rejected_before_any_work() {
        let mut cfg = config(vec![KernelSource::new("kernel void k() {}")]);
        cfg.params.local_size = 5;

        let mut reporter = VecReporter::default();
        let err = drive(&cfg, &mut reporter).expect_err("bad work sizes");
        assert!(matches!(err, Error::WorkSize { .. }));
        assert!(reporter.records.is_empty());
    }

    #[test]
    fn empty_source_list_is_a_configuration_error() {
        let cfg = config(Vec::new());
        let mut reporter = VecReporter::default();
        assert!(matches!(drive(&cfg, &mut reporter), Err(Error::NoSources)));
    }

    #[test]
    fn same_seed_yields_identical_random_inputs_across_batches() {
        let source = || {
            vec![KernelSource::new("kernel void k(global float* data) {}").with_label("k.cl")]
        };
        let run = || {
            let mut cfg = config(source());
            cfg.fill = FillPolicy::Random;
            let mut reporter = VecReporter::default();
            drive(&cfg, &mut reporter).expect("batch");
            reporter.records
        };

        let a = run();
        let b = run();
        assert_eq!(a[0].args, b[0].args);
        assert_eq!(a[0].outcome, b[0].outcome);
    }
}
