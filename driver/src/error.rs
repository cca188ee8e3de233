use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Caller-facing driver errors.
///
/// Per-instance failures (build, bind, runtime) are not errors at this
/// level; they are classified into the instance outcome and reported as
/// records. Only configuration problems and reporter I/O abort a batch.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Work sizes that no dispatch model accepts.
    #[snafu(display("invalid work sizes: local size {local} must be nonzero, no larger than global size {global}, and divide it evenly"))]
    WorkSize { global: usize, local: usize },

    /// A run count of zero would produce no measurements.
    #[snafu(display("min_runs must be at least 1"))]
    NoRuns,

    /// Nothing to drive.
    #[snafu(display("no kernel sources supplied"))]
    NoSources,

    #[snafu(display("no devices supplied"))]
    NoDevices,

    /// The reporter failed to accept a record. This is the one per-record
    /// failure that aborts the batch, since losing output silently would
    /// defeat the harness.
    #[snafu(display("reporter failed: {message}"))]
    Report { message: String },
}
