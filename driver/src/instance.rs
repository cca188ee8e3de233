//! The instance driver: one (kernel, device, parameters) combination from
//! source text to a classified, timed result.
//!
//! Each instance walks `Uncompiled → Built → ArgumentsBound → Running →
//! Completed`, exiting early through `BuildFailed`, `BindFailed`, or
//! `RunFailed`. Every exit, early or not, yields an [`InstanceResult`] with
//! the outcome populated; nothing is silently swallowed. Device
//! allocations are owned by the instance's argument values and released
//! when the instance terminates, on every path.

use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use smallvec::SmallVec;

use cldrive_device::{BoundArg, Device, Kernel, NdRange};
use cldrive_dtype::AddrSpace;

use crate::arg_value::{ArgValue, buffers_equal};
use crate::config::{DynamicParams, FillPolicy, KernelSource};
use crate::introspect::{ArgSpec, introspect, materialize};
use crate::report::ArgRecord;
use crate::stat::{self, Outcome, RunAggregate, RunOutcome, RunStat};

/// Lifecycle of one instance. Terminal states are `Completed` and the
/// three failure exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Uncompiled,
    Built,
    ArgumentsBound,
    Running,
    Completed,
    BuildFailed,
    BindFailed,
    RunFailed,
}

/// What one instance produced. The reporter-facing schema adds source and
/// device identity around this.
#[derive(Debug)]
pub struct InstanceResult {
    pub kernel_name: String,
    pub state: InstanceState,
    pub outcome: Outcome,
    pub build_log: Option<String>,
    pub args: Vec<ArgRecord>,
    pub runs: Vec<RunStat>,
    pub aggregate: Option<RunAggregate>,
}

impl InstanceResult {
    fn build_failure(log: String) -> Self {
        Self {
            kernel_name: String::new(),
            state: InstanceState::BuildFailed,
            outcome: Outcome::BuildFailure,
            build_log: Some(log),
            args: Vec::new(),
            runs: Vec::new(),
            aggregate: None,
        }
    }

    fn failed(kernel_name: String, state: InstanceState, outcome: Outcome) -> Self {
        Self { kernel_name, state, outcome, build_log: None, args: Vec::new(), runs: Vec::new(), aggregate: None }
    }
}

/// Drives kernel instances against one device.
pub struct InstanceDriver<'d> {
    device: &'d Device,
    fill: FillPolicy,
    seed: u64,
}

impl<'d> InstanceDriver<'d> {
    pub fn new(device: &'d Device) -> Self {
        Self { device, fill: FillPolicy::default(), seed: 0 }
    }

    pub fn with_fill(mut self, fill: FillPolicy) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Compile a source and drive every kernel it defines, one instance
    /// per kernel. A build failure yields a single record for the whole
    /// source, since no kernel was ever enumerated.
    pub fn drive_source(&self, source: &KernelSource, params: &DynamicParams) -> Vec<InstanceResult> {
        let program = match self.device.compile(source.text(), source.build_opts()) {
            Ok(program) => program,
            Err(cldrive_device::Error::Build { log }) => {
                tracing::info!(source = source.id(), "build failed");
                return vec![InstanceResult::build_failure(log)];
            }
            Err(error) => {
                tracing::warn!(source = source.id(), %error, "unexpected compile error");
                return vec![InstanceResult::failed(String::new(), InstanceState::BuildFailed, Outcome::UnknownError)];
            }
        };

        let names = program.kernel_names();
        if names.is_empty() {
            return vec![InstanceResult::build_failure("no kernel definitions found in source".to_string())];
        }

        names
            .into_iter()
            .enumerate()
            .map(|(idx, name)| match program.kernel(&name) {
                Ok(kernel) => self.drive_kernel(&*kernel, params, self.seed.wrapping_add(idx as u64)),
                Err(error) => {
                    tracing::warn!(kernel = %name, %error, "kernel lookup failed after build");
                    InstanceResult::failed(name, InstanceState::BindFailed, Outcome::UnknownError)
                }
            })
            .collect()
    }

    /// Drive one built kernel: introspect, materialize, dispatch
    /// `min_runs` times, classify.
    pub fn drive_kernel(&self, kernel: &dyn Kernel, params: &DynamicParams, seed: u64) -> InstanceResult {
        let name = kernel.name().to_string();

        let specs = match introspect(kernel) {
            Ok(specs) => specs,
            Err(error) => {
                tracing::warn!(kernel = %name, %error, "introspection failed");
                return InstanceResult::failed(name, InstanceState::BindFailed, Outcome::UnknownError);
            }
        };
        let zero_args = specs.is_empty();

        // Bind-time classification comes before any device work: an
        // unsupported argument dominates a size mismatch, and both preclude
        // dispatch.
        if let Some(spec) = specs.iter().find(|spec| !spec.is_supported()) {
            tracing::info!(kernel = %name, index = spec.index, type_name = %spec.type_name, "unsupported argument");
            let mut result = InstanceResult::failed(name, InstanceState::BindFailed, Outcome::UnsupportedArgumentType);
            result.args = arg_records(&specs, None);
            return result;
        }
        if let Some(spec) = specs.iter().find(|spec| spec.size_mismatch(params)) {
            tracing::info!(
                kernel = %name,
                index = spec.index,
                declared = spec.declared_elems,
                global_size = params.global_size,
                "input size mismatch"
            );
            let mut result = InstanceResult::failed(name, InstanceState::BindFailed, Outcome::InputSizeMismatch);
            result.args = arg_records(&specs, None);
            return result;
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let mut values: Vec<ArgValue> =
            specs.iter().map(|spec| materialize(spec, params, self.fill, &mut rng)).collect();

        for value in &mut values {
            if let Err(error) = value.ensure_device(self.device) {
                tracing::warn!(kernel = %name, %error, "argument upload failed");
                let mut result = InstanceResult::failed(name, InstanceState::BindFailed, Outcome::RuntimeError);
                result.args = arg_records(&specs, Some(&values));
                return result;
            }
        }
        let args = arg_records(&specs, Some(&values));

        let range = NdRange::new_1d(params.global_size, params.local_size);
        let (runs, state) = self.run_loop(kernel, params, &specs, &values, &range);

        let outcome = if zero_args {
            Outcome::NoArgumentsFound
        } else if runs.iter().any(|run| run.outcome == RunOutcome::RuntimeError) {
            Outcome::RuntimeError
        } else if runs.iter().any(|run| run.outcome == RunOutcome::OutputNonDeterministic) {
            Outcome::OutputNonDeterministic
        } else {
            Outcome::Ok
        };
        let aggregate = stat::aggregate(&runs);

        tracing::debug!(kernel = %name, %outcome, runs = runs.len(), "instance complete");
        InstanceResult { kernel_name: name, state, outcome, build_log: None, args, runs, aggregate }
    }

    /// `ArgumentsBound → Running → Completed | RunFailed`.
    fn run_loop(
        &self,
        kernel: &dyn Kernel,
        params: &DynamicParams,
        specs: &[ArgSpec],
        values: &[ArgValue],
        range: &NdRange,
    ) -> (Vec<RunStat>, InstanceState) {
        let total = params.min_runs as usize;
        let mut runs: Vec<RunStat> = Vec::with_capacity(total);
        let mut snapshots: Vec<Option<Vec<u8>>> = Vec::new();

        for run_idx in 0..total {
            // Every run sees the original inputs, so cross-run output
            // differences can only come from the kernel itself.
            if let Err(error) = values.iter().try_for_each(ArgValue::reset_device) {
                tracing::warn!(kernel = kernel.name(), %error, "input reset failed");
                runs.push(RunStat { wall_time_ns: 0, outcome: RunOutcome::RuntimeError });
                runs.extend(std::iter::repeat_n(RunStat::skipped(), total - run_idx - 1));
                return (runs, InstanceState::RunFailed);
            }

            let bound: SmallVec<[BoundArg<'_>; 8]> = values.iter().filter_map(ArgValue::as_bound).collect();

            let start = Instant::now();
            let dispatched =
                self.device.enqueue_kernel(kernel, &bound, range).and_then(|()| self.device.wait());
            let wall_time_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);

            if let Err(error) = dispatched {
                tracing::warn!(kernel = kernel.name(), run = run_idx, %error, "dispatch failed");
                runs.push(RunStat { wall_time_ns, outcome: RunOutcome::RuntimeError });
                runs.extend(std::iter::repeat_n(RunStat::skipped(), total - run_idx - 1));
                return (runs, InstanceState::RunFailed);
            }

            match self.compare_outputs(specs, values, run_idx, &mut snapshots) {
                Ok(true) => runs.push(RunStat { wall_time_ns, outcome: RunOutcome::Ok }),
                Ok(false) => {
                    tracing::info!(kernel = kernel.name(), run = run_idx, "output differs from first run");
                    runs.push(RunStat { wall_time_ns, outcome: RunOutcome::OutputNonDeterministic });
                }
                Err(error) => {
                    tracing::warn!(kernel = kernel.name(), run = run_idx, %error, "readback failed");
                    runs.push(RunStat { wall_time_ns, outcome: RunOutcome::RuntimeError });
                    runs.extend(std::iter::repeat_n(RunStat::skipped(), total - run_idx - 1));
                    return (runs, InstanceState::RunFailed);
                }
            }
        }

        (runs, InstanceState::Completed)
    }

    /// Snapshot writable global buffers on the first run; on later runs,
    /// compare against the snapshot. `Ok(false)` means a mismatch beyond
    /// tolerance.
    fn compare_outputs(
        &self,
        specs: &[ArgSpec],
        values: &[ArgValue],
        run_idx: usize,
        snapshots: &mut Vec<Option<Vec<u8>>>,
    ) -> cldrive_device::Result<bool> {
        let mut equal = true;
        let mut current: Vec<Option<Vec<u8>>> = Vec::with_capacity(values.len());

        for (spec, value) in specs.iter().zip(values) {
            let is_output = spec.is_buffer() && spec.addr_space == AddrSpace::Global;
            current.push(if is_output { value.read_back()? } else { None });
        }

        if run_idx == 0 {
            *snapshots = current;
            return Ok(true);
        }

        for ((spec, first), now) in specs.iter().zip(snapshots.iter()).zip(&current) {
            if let (Some(kind), Some(first), Some(now)) = (spec.kind, first, now)
                && !buffers_equal(kind, first, now)
            {
                equal = false;
            }
        }
        Ok(equal)
    }
}

fn arg_records(specs: &[ArgSpec], values: Option<&[ArgValue]>) -> Vec<ArgRecord> {
    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| ArgRecord {
            index: spec.index,
            address_space: spec.addr_space,
            element_type: spec.type_name.clone(),
            bound_size: values.and_then(|v| v.get(i)).map_or(0, ArgValue::bound_size),
        })
        .collect()
}
