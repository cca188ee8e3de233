//! Kernel driving harness.
//!
//! Takes arbitrary compute kernel source, a target device, and a set of
//! dispatch parameters; discovers each kernel's argument signature,
//! synthesizes typed inputs, executes the kernel repeatedly under wall-clock
//! timing, classifies the outcome, and emits one structured record per
//! instance.
//!
//! The pipeline, leaf-first:
//! - [`arg_value`]: synthesized argument values and cross-run output
//!   equality.
//! - [`introspect`]: from backend argument metadata to driveable specs.
//! - [`instance`]: the per-instance state machine (the heart of the crate).
//! - [`stat`]: run statistics, the outcome taxonomy, timing aggregation.
//! - [`report`]: the record schema and reporter boundary.
//! - [`drive`]: the sequential batch loop.

pub mod arg_value;
pub mod config;
pub mod drive;
pub mod error;
pub mod instance;
pub mod introspect;
pub mod report;
pub mod stat;

pub use arg_value::{ArgValue, buffers_equal};
pub use config::{DriveConfig, DynamicParams, FillPolicy, KernelSource};
pub use drive::{DriveSummary, drive};
pub use error::{Error, Result};
pub use instance::{InstanceDriver, InstanceResult, InstanceState};
pub use introspect::{ArgSpec, introspect, materialize};
pub use report::{ArgRecord, InstanceRecord, Reporter, VecReporter};
pub use stat::{Outcome, RunAggregate, RunOutcome, RunStat, aggregate};
