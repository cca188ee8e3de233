//! Compute-device abstraction for the kernel driver.
//!
//! Defines the backend trait seam ([`backend`]), a registry for discovering
//! and caching devices ([`registry`]), the built-in in-memory simulator
//! ([`simulator`]), and the OpenCL C signature scanner the simulator builds
//! programs from ([`signature`]).

pub mod backend;
pub mod error;
pub mod registry;
pub mod signature;
pub mod simulator;

pub use backend::{AllocId, ArgInfo, Backend, BoundArg, Device, DeviceAlloc, DeviceDescriptor, DeviceType, Kernel, NdRange, Program};
pub use error::{Error, Result};
pub use registry::{DeviceRegistry, registry};
pub use simulator::{DispatchView, SimulatorBackend};
