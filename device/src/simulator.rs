//! In-memory simulator backend.
//!
//! A CPU reference implementation of the backend seam: allocations are host
//! byte vectors, compilation is the signature scanner plus a couple of
//! whole-program diagnostics, and dispatch runs an optional per-kernel hook
//! over the bound buffers. It is both the default device when no hardware
//! backend is registered and the test double for the instance driver.
//!
//! Hooks receive a [`DispatchView`] with the buffer arguments (in argument
//! order), the raw scalar bytes, the dispatch range, and a per-kernel
//! dispatch counter, which is enough to script deterministic, racy, or
//! failing kernels for tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::backend::{AllocId, ArgInfo, Backend, BoundArg, DeviceDescriptor, DeviceType, Kernel, NdRange, Program};
use crate::error::{AllocationSnafu, ArityMismatchSnafu, BuildSnafu, KernelNotFoundSnafu, Result, TransferSizeSnafu, UnknownAllocSnafu};
use crate::signature::{self, KernelDecl};

/// Everything a scripted kernel body sees for one dispatch.
///
/// Buffer-like and scalar arguments are compacted into separate vectors:
/// `buffers[i]` is the i-th buffer or local-slab argument counting only
/// those, and `scalars[j]` the j-th by-value scalar counting only scalars.
/// A signature `(global int* a, int n, global int* b)` yields two buffers
/// and one scalar, with `b` at `buffers[1]`.
pub struct DispatchView<'a> {
    /// Local slabs appear as zeroed scratch; global/constant buffers are
    /// written back after the hook returns.
    pub buffers: &'a mut [Vec<u8>],
    /// Raw bytes of the by-value scalar arguments.
    pub scalars: &'a [Vec<u8>],
    pub range: &'a NdRange,
    /// 0-based count of prior dispatches of this kernel.
    pub dispatch: u64,
}

/// Scripted kernel body.
pub type KernelHook = dyn Fn(&mut DispatchView<'_>) -> Result<()> + Send + Sync;

pub struct SimulatorBackend {
    descriptor: DeviceDescriptor,
    store: Mutex<HashMap<AllocId, Vec<u8>>>,
    next_id: AtomicU64,
    hooks: RwLock<HashMap<String, Arc<KernelHook>>>,
    dispatches: Mutex<HashMap<String, u64>>,
    alloc_limit: Option<usize>,
}

impl std::fmt::Debug for SimulatorBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatorBackend")
            .field("descriptor", &self.descriptor)
            .field("live_allocs", &self.store.lock().len())
            .finish()
    }
}

impl SimulatorBackend {
    pub fn new() -> Self {
        Self::with_name("Simulator")
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            descriptor: DeviceDescriptor {
                name: name.to_string(),
                platform: "cldrive".to_string(),
                device_type: DeviceType::Simulator,
            },
            store: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            hooks: RwLock::new(HashMap::new()),
            dispatches: Mutex::new(HashMap::new()),
            alloc_limit: None,
        }
    }

    /// Cap single allocations, for exercising allocation-failure paths.
    pub fn with_alloc_limit(mut self, bytes: usize) -> Self {
        self.alloc_limit = Some(bytes);
        self
    }

    /// Script the body of a kernel by name. Kernels without a hook dispatch
    /// as no-ops.
    pub fn set_hook<F>(&self, kernel: &str, hook: F)
    where
        F: Fn(&mut DispatchView<'_>) -> Result<()> + Send + Sync + 'static,
    {
        self.hooks.write().insert(kernel.to_string(), Arc::new(hook));
    }

    /// How many times a kernel has been dispatched.
    pub fn dispatch_count(&self, kernel: &str) -> u64 {
        self.dispatches.lock().get(kernel).copied().unwrap_or(0)
    }

    /// Number of live allocations (for leak assertions in tests).
    pub fn live_allocs(&self) -> usize {
        self.store.lock().len()
    }
}

impl Default for SimulatorBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SimProgram {
    decls: Vec<KernelDecl>,
}

impl Program for SimProgram {
    fn kernel_names(&self) -> Vec<String> {
        self.decls.iter().map(|d| d.name.clone()).collect()
    }

    fn kernel(&self, name: &str) -> Result<Box<dyn Kernel>> {
        let decl = self
            .decls
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| KernelNotFoundSnafu { name: name.to_string() }.build())?;
        Ok(Box::new(SimKernel { decl: decl.clone() }))
    }
}

struct SimKernel {
    decl: KernelDecl,
}

impl Kernel for SimKernel {
    fn name(&self) -> &str {
        &self.decl.name
    }

    fn arity(&self) -> usize {
        self.decl.params.len()
    }

    fn arg_info(&self, index: usize) -> Result<ArgInfo> {
        let param = self.decl.params.get(index).ok_or_else(|| {
            crate::error::ArgIndexSnafu { index, arity: self.decl.params.len() }.build()
        })?;
        Ok(ArgInfo {
            index: param.index,
            addr_space: param.addr_space,
            type_name: param.type_name.clone(),
            is_pointer: param.is_pointer,
            declared_elems: param.declared_elems,
        })
    }
}

impl Backend for SimulatorBackend {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn compile(&self, source: &str, options: &str) -> Result<Box<dyn Program>> {
        if source.trim().is_empty() {
            return BuildSnafu { log: "empty kernel source" }.fail();
        }

        // Honor #error the way a preprocessor would; tests use it to force
        // specific diagnostics.
        for line in source.lines() {
            if let Some(message) = line.trim_start().strip_prefix("#error") {
                return BuildSnafu { log: message.trim().to_string() }.fail();
            }
        }

        if !signature::braces_balanced(source) {
            return BuildSnafu { log: "syntax error: unbalanced braces" }.fail();
        }

        let decls = signature::scan(source)?;
        tracing::debug!(kernels = decls.len(), options, "simulator program built");
        Ok(Box::new(SimProgram { decls }))
    }

    fn alloc(&self, size: usize) -> Result<AllocId> {
        if let Some(limit) = self.alloc_limit
            && size > limit
        {
            return AllocationSnafu { requested: size, reason: format!("exceeds device limit of {limit} bytes") }
                .fail();
        }

        let id = AllocId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // Device memory is zero-initialized, which keeps the transfer
        // round-trip law deterministic.
        self.store.lock().insert(id, vec![0u8; size]);
        Ok(id)
    }

    fn free(&self, id: AllocId) {
        self.store.lock().remove(&id);
    }

    fn enqueue_write(&self, id: AllocId, data: &[u8]) -> Result<()> {
        let mut store = self.store.lock();
        let buffer = store.get_mut(&id).ok_or_else(|| UnknownAllocSnafu { id }.build())?;
        snafu::ensure!(buffer.len() == data.len(), TransferSizeSnafu { expected: buffer.len(), actual: data.len() });
        buffer.copy_from_slice(data);
        Ok(())
    }

    fn enqueue_read(&self, id: AllocId, dst: &mut [u8]) -> Result<()> {
        let store = self.store.lock();
        let buffer = store.get(&id).ok_or_else(|| UnknownAllocSnafu { id }.build())?;
        snafu::ensure!(buffer.len() == dst.len(), TransferSizeSnafu { expected: buffer.len(), actual: dst.len() });
        dst.copy_from_slice(buffer);
        Ok(())
    }

    fn enqueue_kernel(&self, kernel: &dyn Kernel, args: &[BoundArg<'_>], range: &NdRange) -> Result<()> {
        snafu::ensure!(
            args.len() == kernel.arity(),
            ArityMismatchSnafu { name: kernel.name().to_string(), arity: kernel.arity(), bound: args.len() }
        );

        let dispatch = {
            let mut counts = self.dispatches.lock();
            let count = counts.entry(kernel.name().to_string()).or_insert(0);
            let current = *count;
            *count += 1;
            current
        };

        // Snapshot buffer arguments so a hook mutates copies; successful
        // hooks are written back, failed ones leave device memory intact.
        let mut buffers: Vec<Vec<u8>> = Vec::new();
        let mut writeback: Vec<Option<AllocId>> = Vec::new();
        let mut scalars: Vec<Vec<u8>> = Vec::new();

        for arg in args {
            match arg {
                BoundArg::Buffer(id) => {
                    let store = self.store.lock();
                    let data = store.get(id).ok_or_else(|| UnknownAllocSnafu { id: *id }.build())?.clone();
                    buffers.push(data);
                    writeback.push(Some(*id));
                }
                BoundArg::LocalSlab(bytes) => {
                    buffers.push(vec![0u8; *bytes]);
                    writeback.push(None);
                }
                BoundArg::Scalar(bytes) => scalars.push(bytes.to_vec()),
            }
        }

        let hook = self.hooks.read().get(kernel.name()).cloned();
        if let Some(hook) = hook {
            let mut view = DispatchView { buffers: &mut buffers, scalars: &scalars, range, dispatch };
            hook(&mut view)?;
        }

        let mut store = self.store.lock();
        for (buffer, target) in buffers.into_iter().zip(writeback) {
            if let Some(id) = target {
                store.insert(id, buffer);
            }
        }

        tracing::trace!(kernel = kernel.name(), dispatch, "simulator dispatch complete");
        Ok(())
    }

    fn wait(&self) -> Result<()> {
        // Dispatch is synchronous; there is never outstanding work.
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::backend::Device;

    use super::*;

    fn device() -> (Arc<SimulatorBackend>, Device) {
        let backend = Arc::new(SimulatorBackend::new());
        let device = Device::new(Arc::clone(&backend) as Arc<dyn Backend>);
        (backend, device)
    }

    #[test]
    fn write_read_round_trip_is_byte_identical() {
        let (_, device) = device();
        let alloc = device.alloc(16).expect("alloc");

        let data: Vec<u8> = (0..16).collect();
        alloc.write(&data).expect("write");

        let mut out = vec![0u8; 16];
        alloc.read(&mut out).expect("read");
        assert_eq!(out, data);
    }

    #[test]
    fn alloc_is_released_on_drop() {
        let (backend, device) = device();
        {
            let _alloc = device.alloc(64).expect("alloc");
            assert_eq!(backend.live_allocs(), 1);
        }
        assert_eq!(backend.live_allocs(), 0);
    }

    #[test]
    fn alloc_limit_surfaces_allocation_failure() {
        let backend = SimulatorBackend::new().with_alloc_limit(1024);
        let err = backend.alloc(4096).expect_err("should exceed limit");
        assert!(matches!(err, crate::error::Error::Allocation { requested: 4096, .. }));
    }

    #[test]
    fn empty_source_is_a_build_failure() {
        let (backend, _) = device();
        let err = backend.compile("  \n ", "").expect_err("empty source");
        assert!(err.to_string().contains("empty kernel source"));
    }

    #[test]
    fn error_directive_becomes_the_diagnostic() {
        let (backend, _) = device();
        let err = backend.compile("#error undefined reference to `foo`\n", "").expect_err("should fail");
        assert!(err.to_string().contains("undefined reference to `foo`"));
    }

    #[test]
    fn hook_mutations_reach_device_memory() {
        let (backend, device) = device();
        let program = backend.compile("kernel void fill(global uchar* out) {}", "").expect("compile");
        let kernel = program.kernel("fill").expect("kernel");

        backend.set_hook("fill", |view| {
            for byte in view.buffers[0].iter_mut() {
                *byte = 7;
            }
            Ok(())
        });

        let alloc = device.alloc(8).expect("alloc");
        device
            .enqueue_kernel(&*kernel, &[BoundArg::Buffer(alloc.id())], &NdRange::new_1d(8, 1))
            .expect("dispatch");
        device.wait().expect("wait");

        let mut out = vec![0u8; 8];
        alloc.read(&mut out).expect("read");
        assert_eq!(out, vec![7u8; 8]);
        assert_eq!(backend.dispatch_count("fill"), 1);
    }

    #[test]
    fn failed_hook_leaves_device_memory_intact() {
        let (backend, device) = device();
        let program = backend.compile("kernel void bad(global uchar* out) {}", "").expect("compile");
        let kernel = program.kernel("bad").expect("kernel");

        backend.set_hook("bad", |view| {
            view.buffers[0].fill(9);
            crate::error::RuntimeSnafu { message: "CL_OUT_OF_RESOURCES" }.fail()
        });

        let alloc = device.alloc(4).expect("alloc");
        let err = device
            .enqueue_kernel(&*kernel, &[BoundArg::Buffer(alloc.id())], &NdRange::new_1d(4, 1))
            .expect_err("hook fails");
        assert!(err.to_string().contains("CL_OUT_OF_RESOURCES"));

        let mut out = vec![1u8; 4];
        alloc.read(&mut out).expect("read");
        assert_eq!(out, vec![0u8; 4]);
    }

    #[test]
    fn buffers_and_scalars_compact_separately() {
        let (backend, device) = device();
        let program = backend
            .compile("kernel void mix(global int* a, int n, global int* b) {}", "")
            .expect("compile");
        let kernel = program.kernel("mix").expect("kernel");

        // With scalars interleaved, the second buffer argument sits at
        // buffers[1], not at its absolute signature position.
        backend.set_hook("mix", |view| {
            assert_eq!(view.buffers.len(), 2);
            assert_eq!(view.scalars.len(), 1);
            view.buffers[1].fill(3);
            Ok(())
        });

        let a = device.alloc(4).expect("alloc");
        let b = device.alloc(4).expect("alloc");
        let n = 1i32.to_le_bytes();
        device
            .enqueue_kernel(
                &*kernel,
                &[BoundArg::Buffer(a.id()), BoundArg::Scalar(&n), BoundArg::Buffer(b.id())],
                &NdRange::new_1d(1, 1),
            )
            .expect("dispatch");

        let mut out = [0u8; 4];
        b.read(&mut out).expect("read");
        assert_eq!(out, [3u8; 4]);
    }

    #[test]
    fn arity_is_enforced() {
        let (backend, device) = device();
        let program = backend.compile("kernel void two(global int* a, int n) {}", "").expect("compile");
        let kernel = program.kernel("two").expect("kernel");

        let err = device
            .enqueue_kernel(&*kernel, &[], &NdRange::default())
            .expect_err("no args bound");
        assert!(matches!(err, crate::error::Error::ArityMismatch { arity: 2, bound: 0, .. }));
    }
}
