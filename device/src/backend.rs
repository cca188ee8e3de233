//! The backend seam: everything the driver needs from a compute device.
//!
//! A backend exposes exactly the capability set the instance driver
//! consumes: compile, allocate, enqueue-write, enqueue-kernel, enqueue-read,
//! wait. Real hardware APIs and the in-memory simulator both sit behind
//! these traits, which is what lets the whole driver state machine run in
//! unit tests without a device.

use std::sync::Arc;

use cldrive_dtype::AddrSpace;

use crate::error::Result;

/// Opaque handle to one device-side allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocId(pub u64);

/// What kind of hardware a device is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Cpu,
    Gpu,
    /// Built-in in-memory device (no hardware required).
    Simulator,
}

/// Identity of a compute device: platform and device names as the driver
/// reports them in result records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub platform: String,
    pub device_type: DeviceType,
}

/// Work sizes for one dispatch. Sizes are work-item counts, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    /// Total work items per dimension.
    pub global: [usize; 3],
    /// Work items per group, per dimension.
    pub local: [usize; 3],
}

impl NdRange {
    pub fn new_1d(global: usize, local: usize) -> Self {
        Self { global: [global, 1, 1], local: [local, 1, 1] }
    }

    /// Total work-item count.
    pub fn work_items(&self) -> usize {
        self.global.iter().product()
    }
}

impl Default for NdRange {
    fn default() -> Self {
        Self { global: [1, 1, 1], local: [1, 1, 1] }
    }
}

/// Per-argument metadata a backend recovers from a built kernel.
///
/// `type_name` is the source spelling; interpreting it (supported kinds,
/// element counts) is the driver's introspection policy, not the backend's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgInfo {
    pub index: usize,
    pub addr_space: AddrSpace,
    pub type_name: String,
    pub is_pointer: bool,
    /// Element count when statically determinable from the declaration.
    pub declared_elems: Option<usize>,
}

/// Handle to one kernel inside a built program.
pub trait Kernel: Send + Sync {
    fn name(&self) -> &str;
    fn arity(&self) -> usize;
    fn arg_info(&self, index: usize) -> Result<ArgInfo>;
}

/// A successfully built program. One source may define several kernels;
/// each is driven as its own instance.
pub trait Program: Send + Sync + std::fmt::Debug {
    fn kernel_names(&self) -> Vec<String>;
    fn kernel(&self, name: &str) -> Result<Box<dyn Kernel>>;
}

/// One bound kernel argument, as handed to `enqueue_kernel`.
#[derive(Debug)]
pub enum BoundArg<'a> {
    /// Pass-by-value scalar, raw little-endian bytes.
    Scalar(&'a [u8]),
    /// Device allocation bound to a global or constant pointer.
    Buffer(AllocId),
    /// Workgroup-local scratch of the given byte size; no host value.
    LocalSlab(usize),
}

/// A compute backend with the full capability set the driver needs.
///
/// All operations are synchronous from the caller's perspective once
/// `wait` returns; the driver times enqueue-plus-wait as one dispatch.
pub trait Backend: Send + Sync + std::fmt::Debug {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Compile kernel source with the given build options. Failure carries
    /// the compiler diagnostic text.
    fn compile(&self, source: &str, options: &str) -> Result<Box<dyn Program>>;

    fn alloc(&self, size: usize) -> Result<AllocId>;

    /// Release an allocation. Unknown handles are ignored (release is
    /// called from Drop and must not fail).
    fn free(&self, id: AllocId);

    fn enqueue_write(&self, id: AllocId, data: &[u8]) -> Result<()>;

    fn enqueue_read(&self, id: AllocId, dst: &mut [u8]) -> Result<()>;

    fn enqueue_kernel(&self, kernel: &dyn Kernel, args: &[BoundArg<'_>], range: &NdRange) -> Result<()>;

    /// Block until all enqueued work has completed.
    fn wait(&self) -> Result<()>;
}

/// Shared handle to a compute device.
///
/// The device itself is externally owned; cloning shares the backend. The
/// driver never closes a device, it only allocates and dispatches against
/// one.
#[derive(Debug, Clone)]
pub struct Device {
    backend: Arc<dyn Backend>,
}

impl Device {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        self.backend.descriptor()
    }

    pub fn name(&self) -> &str {
        &self.backend.descriptor().name
    }

    pub fn compile(&self, source: &str, options: &str) -> Result<Box<dyn Program>> {
        self.backend.compile(source, options)
    }

    /// Allocate device memory, returning a scoped handle that frees the
    /// allocation on drop.
    pub fn alloc(&self, size: usize) -> Result<DeviceAlloc> {
        let id = self.backend.alloc(size)?;
        Ok(DeviceAlloc { id, size, backend: Arc::clone(&self.backend) })
    }

    pub fn enqueue_kernel(&self, kernel: &dyn Kernel, args: &[BoundArg<'_>], range: &NdRange) -> Result<()> {
        self.backend.enqueue_kernel(kernel, args, range)
    }

    pub fn wait(&self) -> Result<()> {
        self.backend.wait()
    }
}

/// Exclusively-owned device allocation, released exactly once on drop.
#[derive(Debug)]
pub struct DeviceAlloc {
    id: AllocId,
    size: usize,
    backend: Arc<dyn Backend>,
}

impl DeviceAlloc {
    pub fn id(&self) -> AllocId {
        self.id
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn write(&self, data: &[u8]) -> Result<()> {
        self.backend.enqueue_write(self.id, data)
    }

    pub fn read(&self, dst: &mut [u8]) -> Result<()> {
        self.backend.enqueue_read(self.id, dst)
    }
}

impl Drop for DeviceAlloc {
    fn drop(&mut self) {
        self.backend.free(self.id);
    }
}
