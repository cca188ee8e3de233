//! Driving configuration: kernel sources, work sizes, input synthesis.
//!
//! Everything the batch loop needs arrives through [`DriveConfig`]; there is
//! no ambient mutable state. Defaults mirror common harness settings (1024
//! global work items in groups of 128, 30 timed runs).

use serde::Serialize;

use crate::error::Result;

/// One kernel source as handed to the driver: immutable text plus the build
/// options it must be compiled with. Identity is the (text, options) pair;
/// the label only names the source in result records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    text: String,
    build_opts: String,
    label: Option<String>,
}

impl KernelSource {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), build_opts: String::new(), label: None }
    }

    pub fn with_build_opts(mut self, opts: impl Into<String>) -> Self {
        self.build_opts = opts.into();
        self
    }

    /// Label used as `kernel_source_id` in result records, typically the
    /// file path the source was loaded from.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn build_opts(&self) -> &str {
        &self.build_opts
    }

    pub fn id(&self) -> &str {
        self.label.as_deref().unwrap_or("<source>")
    }
}

/// Per-instance dispatch parameters.
///
/// Sizes are work-item counts, not bytes. `local_size` must be nonzero and
/// divide `global_size` evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DynamicParams {
    pub global_size: usize,
    pub local_size: usize,
    pub min_runs: u32,
}

impl DynamicParams {
    pub fn new(global_size: usize, local_size: usize, min_runs: u32) -> Result<Self> {
        let params = Self { global_size, local_size, min_runs };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        snafu::ensure!(
            self.local_size > 0 && self.local_size <= self.global_size && self.global_size % self.local_size == 0,
            crate::error::WorkSizeSnafu { global: self.global_size, local: self.local_size }
        );
        snafu::ensure!(self.min_runs >= 1, crate::error::NoRunsSnafu);
        Ok(())
    }
}

impl Default for DynamicParams {
    fn default() -> Self {
        Self { global_size: 1024, local_size: 128, min_runs: 30 }
    }
}

/// How synthesized inputs are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillPolicy {
    /// All-zero values.
    Zero,
    /// Ascending sequence 0, 1, 2, ... cast into the element kind. The
    /// default: deterministic and readable in dumps.
    #[default]
    Sequence,
    /// Uniform pseudo-random values from the per-instance seeded generator.
    Random,
}

/// Full input to one driving batch.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub sources: Vec<KernelSource>,
    /// Device names, resolved against the registry in order.
    pub devices: Vec<cldrive_device::Device>,
    pub params: DynamicParams,
    pub fill: FillPolicy,
    /// Base seed for input synthesis; each instance derives its own stream.
    pub seed: u64,
}

impl DriveConfig {
    pub fn validate(&self) -> Result<()> {
        snafu::ensure!(!self.sources.is_empty(), crate::error::NoSourcesSnafu);
        snafu::ensure!(!self.devices.is_empty(), crate::error::NoDevicesSnafu);
        self.params.validate()
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use crate::error::Error;

    use super::*;

    #[test_case(1024, 128, 30 => true; "defaults are valid")]
    #[test_case(1024, 1024, 1 => true; "single group")]
    #[test_case(128, 1024, 1 => false; "local exceeds global")]
    #[test_case(1000, 128, 1 => false; "local does not divide global")]
    #[test_case(1024, 0, 1 => false; "zero local size")]
    #[test_case(1024, 128, 0 => false; "zero runs")]
    fn work_size_validation(global: usize, local: usize, runs: u32) -> bool {
        DynamicParams::new(global, local, runs).is_ok()
    }

    #[test]
    fn work_size_error_names_both_sizes() {
        let err = DynamicParams::new(100, 33, 1).expect_err("invalid");
        assert!(matches!(err, Error::WorkSize { global: 100, local: 33 }));
    }

    #[test]
    fn source_identity_and_label() {
        let source = KernelSource::new("kernel void k() {}").with_label("a.cl");
        assert_eq!(source.id(), "a.cl");
        assert_eq!(KernelSource::new("x").id(), "<source>");
    }
}
