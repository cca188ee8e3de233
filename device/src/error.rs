use snafu::Snafu;

use crate::backend::AllocId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// Kernel compilation failed. Carries the full diagnostic text.
    #[snafu(display("kernel build failed: {log}"))]
    Build { log: String },

    /// Device memory allocation failed.
    #[snafu(display("allocation of {requested} bytes failed: {reason}"))]
    Allocation { requested: usize, reason: String },

    /// Host/device transfer size does not match the allocation.
    #[snafu(display("transfer size mismatch: allocation is {expected} bytes, host side is {actual}"))]
    TransferSize { expected: usize, actual: usize },

    /// Allocation handle does not name a live allocation.
    #[snafu(display("unknown allocation handle {id:?}"))]
    UnknownAlloc { id: AllocId },

    /// Requested kernel does not exist in the built program.
    #[snafu(display("kernel '{name}' not found in program"))]
    KernelNotFound { name: String },

    /// Argument index out of range for the kernel signature.
    #[snafu(display("argument index {index} out of range for kernel with {arity} arguments"))]
    ArgIndex { index: usize, arity: usize },

    /// Bound argument count does not match the kernel signature.
    #[snafu(display("kernel '{name}' takes {arity} arguments, {bound} bound"))]
    ArityMismatch { name: String, arity: usize, bound: usize },

    /// No device matched the requested name.
    #[snafu(display("device '{name}' not found; available: {available:?}"))]
    DeviceNotFound { name: String, available: Vec<String> },

    /// Device-reported failure during dispatch or transfer.
    #[snafu(display("device runtime error: {message}"))]
    Runtime { message: String },
}
