//! The result record boundary.
//!
//! One [`InstanceRecord`] is produced per kernel×device×parameter instance
//! and handed to a [`Reporter`] as soon as the instance terminates, so
//! output streams during long unattended batches. Serialization format is
//! the reporter's business; the record is the logical schema.

use cldrive_dtype::AddrSpace;
use serde::Serialize;

use crate::config::{DynamicParams, KernelSource};
use crate::error::Result;
use crate::instance::InstanceResult;
use crate::stat::{Outcome, RunAggregate, RunStat};

/// One argument as reported: position, placement, type, and how many bytes
/// were bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArgRecord {
    pub index: usize,
    pub address_space: AddrSpace,
    pub element_type: String,
    pub bound_size: usize,
}

/// The full per-instance result record.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceRecord {
    pub kernel_source_id: String,
    /// Empty when the whole source failed to build and no kernel was ever
    /// enumerated.
    pub kernel_name: String,
    pub device_id: String,
    pub build_opts: String,
    pub dynamic_params: DynamicParams,
    pub outcome: Outcome,
    pub build_log: Option<String>,
    pub args: Vec<ArgRecord>,
    pub runs: Vec<RunStat>,
    pub aggregate: Option<RunAggregate>,
}

impl InstanceRecord {
    pub fn new(
        source: &KernelSource,
        device_id: &str,
        params: DynamicParams,
        result: InstanceResult,
    ) -> Self {
        Self {
            kernel_source_id: source.id().to_string(),
            kernel_name: result.kernel_name,
            device_id: device_id.to_string(),
            build_opts: source.build_opts().to_string(),
            dynamic_params: params,
            outcome: result.outcome,
            build_log: result.build_log,
            args: result.args,
            runs: result.runs,
            aggregate: result.aggregate,
        }
    }
}

/// Consumes records one at a time.
pub trait Reporter {
    fn report(&mut self, record: &InstanceRecord) -> Result<()>;
}

/// Collects records in memory. The test double, also handy for callers
/// that post-process a whole batch.
#[derive(Debug, Default)]
pub struct VecReporter {
    pub records: Vec<InstanceRecord>,
}

impl Reporter for VecReporter {
    fn report(&mut self, record: &InstanceRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }
}
