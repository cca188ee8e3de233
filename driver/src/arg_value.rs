//! Synthesized kernel argument values.
//!
//! An [`ArgValue`] owns the host bytes for one kernel parameter and, for
//! buffer arguments, the device allocation they are uploaded into. Device
//! memory is acquired lazily on first bind so values can be built for
//! inspection without touching the device, and is released when the value
//! is dropped or explicitly reset.
//!
//! [`buffers_equal`] is the observational equality used to compare outputs
//! across runs: bit-exact for integer kinds, tolerance-bounded for floats,
//! and component-wise over every lane of vector kinds.

use cldrive_dtype::{ElemKind, ScalarKind};
use rand::Rng;
use rand::rngs::StdRng;

use cldrive_device::{BoundArg, Device, DeviceAlloc};

use crate::config::FillPolicy;

/// One materialized kernel argument.
#[derive(Debug)]
pub enum ArgValue {
    /// By-value scalar; bound directly, never allocated on the device.
    Scalar { kind: ElemKind, bytes: Vec<u8> },
    /// 1-D buffer: host backing plus the lazily-created device allocation.
    Array { kind: ElemKind, elems: usize, host: Vec<u8>, alloc: Option<DeviceAlloc> },
    /// Workgroup-local scratch. Sized at bind time, no host value.
    LocalSlab { kind: ElemKind, bytes: usize },
    /// A parameter type the harness cannot synthesize.
    Unsupported { type_name: String },
}

impl ArgValue {
    pub fn scalar(kind: ElemKind, policy: FillPolicy, rng: &mut StdRng) -> Self {
        let mut bytes = Vec::with_capacity(kind.bytes());
        for lane in 0..kind.lanes() {
            push_lane(&mut bytes, kind.base(), policy, lane as u64, rng);
        }
        Self::Scalar { kind, bytes }
    }

    pub fn array(kind: ElemKind, elems: usize, policy: FillPolicy, rng: &mut StdRng) -> Self {
        let lanes = elems * kind.lanes();
        let mut host = Vec::with_capacity(elems * kind.bytes());
        for lane in 0..lanes {
            push_lane(&mut host, kind.base(), policy, lane as u64, rng);
        }
        Self::Array { kind, elems, host, alloc: None }
    }

    pub fn local_slab(kind: ElemKind, elems: usize) -> Self {
        Self::LocalSlab { kind, bytes: elems * kind.bytes() }
    }

    /// Bytes this value occupies when bound (0 for unsupported).
    pub fn bound_size(&self) -> usize {
        match self {
            Self::Scalar { bytes, .. } => bytes.len(),
            Self::Array { host, .. } => host.len(),
            Self::LocalSlab { bytes, .. } => *bytes,
            Self::Unsupported { .. } => 0,
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }

    /// Whether post-run contents of this value are compared across runs.
    /// Only writable device buffers qualify.
    pub fn is_output(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    /// Allocate device memory and upload the host bytes. Idempotent for
    /// values that already hold an allocation; a no-op for non-buffer
    /// values.
    pub fn ensure_device(&mut self, device: &Device) -> cldrive_device::Result<()> {
        if let Self::Array { host, alloc, .. } = self {
            if alloc.is_none() {
                let buffer = device.alloc(host.len())?;
                buffer.write(host)?;
                *alloc = Some(buffer);
            }
        }
        Ok(())
    }

    /// Re-upload the original host bytes so the next dispatch sees the same
    /// inputs as the first.
    pub fn reset_device(&self) -> cldrive_device::Result<()> {
        if let Self::Array { host, alloc: Some(buffer), .. } = self {
            buffer.write(host)?;
        }
        Ok(())
    }

    /// Read current device contents back into a fresh vector. `None` for
    /// values with nothing on the device.
    pub fn read_back(&self) -> cldrive_device::Result<Option<Vec<u8>>> {
        if let Self::Array { alloc: Some(buffer), .. } = self {
            let mut out = vec![0u8; buffer.size()];
            buffer.read(&mut out)?;
            return Ok(Some(out));
        }
        Ok(None)
    }

    /// The bound form handed to `enqueue_kernel`. `None` for unsupported
    /// values and for arrays not yet on the device.
    pub fn as_bound(&self) -> Option<BoundArg<'_>> {
        match self {
            Self::Scalar { bytes, .. } => Some(BoundArg::Scalar(bytes)),
            Self::Array { alloc: Some(buffer), .. } => Some(BoundArg::Buffer(buffer.id())),
            Self::Array { alloc: None, .. } => None,
            Self::LocalSlab { bytes, .. } => Some(BoundArg::LocalSlab(*bytes)),
            Self::Unsupported { .. } => None,
        }
    }

    /// Drop the device allocation, keeping the host bytes.
    pub fn release(&mut self) {
        if let Self::Array { alloc, .. } = self {
            *alloc = None;
        }
    }

    pub fn kind(&self) -> Option<ElemKind> {
        match self {
            Self::Scalar { kind, .. } | Self::Array { kind, .. } | Self::LocalSlab { kind, .. } => Some(*kind),
            Self::Unsupported { .. } => None,
        }
    }

    pub fn host_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Scalar { bytes, .. } => Some(bytes),
            Self::Array { host, .. } => Some(host),
            _ => None,
        }
    }
}

fn push_lane(out: &mut Vec<u8>, kind: ScalarKind, policy: FillPolicy, counter: u64, rng: &mut StdRng) {
    match policy {
        FillPolicy::Zero => out.extend(std::iter::repeat_n(0u8, kind.bytes())),
        FillPolicy::Sequence => match kind {
            ScalarKind::Int8 => out.extend_from_slice(&(counter as i8).to_le_bytes()),
            ScalarKind::Int16 => out.extend_from_slice(&(counter as i16).to_le_bytes()),
            ScalarKind::Int32 => out.extend_from_slice(&(counter as i32).to_le_bytes()),
            ScalarKind::Int64 => out.extend_from_slice(&(counter as i64).to_le_bytes()),
            ScalarKind::UInt8 => out.extend_from_slice(&(counter as u8).to_le_bytes()),
            ScalarKind::UInt16 => out.extend_from_slice(&(counter as u16).to_le_bytes()),
            ScalarKind::UInt32 => out.extend_from_slice(&(counter as u32).to_le_bytes()),
            ScalarKind::UInt64 => out.extend_from_slice(&counter.to_le_bytes()),
            ScalarKind::Float32 => out.extend_from_slice(&(counter as f32).to_le_bytes()),
            ScalarKind::Float64 => out.extend_from_slice(&(counter as f64).to_le_bytes()),
        },
        FillPolicy::Random => match kind {
            ScalarKind::Int8 => out.extend_from_slice(&rng.random::<i8>().to_le_bytes()),
            ScalarKind::Int16 => out.extend_from_slice(&rng.random::<i16>().to_le_bytes()),
            ScalarKind::Int32 => out.extend_from_slice(&rng.random::<i32>().to_le_bytes()),
            ScalarKind::Int64 => out.extend_from_slice(&rng.random::<i64>().to_le_bytes()),
            ScalarKind::UInt8 => out.extend_from_slice(&rng.random::<u8>().to_le_bytes()),
            ScalarKind::UInt16 => out.extend_from_slice(&rng.random::<u16>().to_le_bytes()),
            ScalarKind::UInt32 => out.extend_from_slice(&rng.random::<u32>().to_le_bytes()),
            ScalarKind::UInt64 => out.extend_from_slice(&rng.random::<u64>().to_le_bytes()),
            ScalarKind::Float32 => out.extend_from_slice(&rng.random::<f32>().to_le_bytes()),
            ScalarKind::Float64 => out.extend_from_slice(&rng.random::<f64>().to_le_bytes()),
        },
    }
}

/// Observational equality of two buffers of the same element kind.
///
/// Integers compare bit-exact. Floats compare within an absolute plus
/// relative tolerance, and two NaNs compare equal so a kernel that
/// deterministically produces NaN is not misread as racy. Vector kinds
/// compare every lane.
pub fn buffers_equal(kind: ElemKind, a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let lane_bytes = kind.base().bytes();
    a.chunks_exact(lane_bytes)
        .zip(b.chunks_exact(lane_bytes))
        .all(|(la, lb)| lane_equal(kind.base(), la, lb))
}

fn lane_equal(kind: ScalarKind, a: &[u8], b: &[u8]) -> bool {
    let bits_a = le_bits(a);
    let bits_b = le_bits(b);
    match kind {
        ScalarKind::Float32 => f32_close(f32::from_bits(bits_a as u32), f32::from_bits(bits_b as u32)),
        ScalarKind::Float64 => f64_close(f64::from_bits(bits_a), f64::from_bits(bits_b)),
        _ => bits_a == bits_b,
    }
}

fn le_bits(chunk: &[u8]) -> u64 {
    chunk.iter().rev().fold(0u64, |acc, &byte| (acc << 8) | u64::from(byte))
}

const F32_ABS_TOL: f32 = 1e-6;
const F32_REL_TOL: f32 = 1e-4;
const F64_ABS_TOL: f64 = 1e-12;
const F64_REL_TOL: f64 = 1e-8;

fn f32_close(a: f32, b: f32) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a == b {
        return true;
    }
    (a - b).abs() <= F32_ABS_TOL.max(F32_REL_TOL * a.abs().max(b.abs()))
}

fn f64_close(a: f64, b: f64) -> bool {
    if a.is_nan() && b.is_nan() {
        return true;
    }
    if a == b {
        return true;
    }
    (a - b).abs() <= F64_ABS_TOL.max(F64_REL_TOL * a.abs().max(b.abs()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cldrive_device::{Backend, SimulatorBackend};
    use proptest::prelude::*;
    use rand::SeedableRng;
    use strum::IntoEnumIterator;
    use test_case::test_case;

    use super::*;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0xC1D0)
    }

    #[test]
    fn zero_filled_scalars_are_zero_for_every_kind() {
        for kind in ScalarKind::iter() {
            let value = ArgValue::scalar(kind.into(), FillPolicy::Zero, &mut rng());
            let bytes = value.host_bytes().expect("scalar has host bytes");
            assert_eq!(bytes, vec![0u8; kind.bytes()], "{kind:?}");
        }
    }

    #[test]
    fn sequence_fill_counts_up() {
        let value = ArgValue::array(ElemKind::int32(), 4, FillPolicy::Sequence, &mut rng());
        let host = value.host_bytes().expect("array has host bytes");
        let elems: Vec<i32> = host
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(elems, vec![0, 1, 2, 3]);
    }

    #[test]
    fn random_fill_is_reproducible_per_seed() {
        let a = ArgValue::array(ElemKind::float32(), 16, FillPolicy::Random, &mut StdRng::seed_from_u64(7));
        let b = ArgValue::array(ElemKind::float32(), 16, FillPolicy::Random, &mut StdRng::seed_from_u64(7));
        assert_eq!(a.host_bytes(), b.host_bytes());
    }

    #[test_case(ElemKind::uint8(), 13)]
    #[test_case(ElemKind::int64(), 5)]
    #[test_case(ElemKind::vec(ScalarKind::Float32, 4), 8)]
    fn array_has_exactly_count_elements(kind: ElemKind, count: usize) {
        let value = ArgValue::array(kind, count, FillPolicy::Sequence, &mut rng());
        assert_eq!(value.bound_size(), count * kind.bytes());
    }

    #[test]
    fn upload_download_round_trip_is_byte_identical() {
        let backend = Arc::new(SimulatorBackend::new());
        let device = Device::new(Arc::clone(&backend) as Arc<dyn Backend>);

        let mut value = ArgValue::array(ElemKind::uint16(), 32, FillPolicy::Random, &mut rng());
        let original = value.host_bytes().expect("host bytes").to_vec();

        value.ensure_device(&device).expect("upload");
        let back = value.read_back().expect("read").expect("device contents");
        assert_eq!(back, original);
    }

    #[test]
    fn device_allocation_is_lazy_and_released_on_drop() {
        let backend = Arc::new(SimulatorBackend::new());
        let device = Device::new(Arc::clone(&backend) as Arc<dyn Backend>);

        let mut value = ArgValue::array(ElemKind::int32(), 8, FillPolicy::Zero, &mut rng());
        assert_eq!(backend.live_allocs(), 0);
        assert!(value.as_bound().is_none());

        value.ensure_device(&device).expect("upload");
        assert_eq!(backend.live_allocs(), 1);
        assert!(matches!(value.as_bound(), Some(BoundArg::Buffer(_))));

        drop(value);
        assert_eq!(backend.live_allocs(), 0);
    }

    #[test]
    fn scalars_never_allocate() {
        let backend = Arc::new(SimulatorBackend::new());
        let device = Device::new(Arc::clone(&backend) as Arc<dyn Backend>);

        let mut value = ArgValue::scalar(ElemKind::float64(), FillPolicy::Sequence, &mut rng());
        value.ensure_device(&device).expect("no-op");
        assert_eq!(backend.live_allocs(), 0);
        assert!(matches!(value.as_bound(), Some(BoundArg::Scalar(_))));
    }

    #[test_case(1.0f32, 1.0 + 1e-6 => true; "within tolerance")]
    #[test_case(1.0f32, 1.1 => false; "beyond tolerance")]
    #[test_case(0.0f32, 1e-7 => true; "near zero absolute")]
    #[test_case(f32::NAN, f32::NAN => true; "nan equals nan")]
    #[test_case(1.0f32, f32::NAN => false; "nan vs value")]
    fn float_equality(a: f32, b: f32) -> bool {
        buffers_equal(ElemKind::float32(), &a.to_le_bytes(), &b.to_le_bytes())
    }

    #[test]
    fn integer_equality_is_exact() {
        let a = 41i32.to_le_bytes();
        let b = 42i32.to_le_bytes();
        assert!(buffers_equal(ElemKind::int32(), &a, &a));
        assert!(!buffers_equal(ElemKind::int32(), &a, &b));
    }

    #[test]
    fn vector_equality_compares_every_lane() {
        let kind = ElemKind::vec(ScalarKind::Float32, 4);
        let mut a = Vec::new();
        for v in [1.0f32, 2.0, 3.0, 4.0] {
            a.extend_from_slice(&v.to_le_bytes());
        }
        let mut b = a.clone();
        assert!(buffers_equal(kind, &a, &b));

        // Corrupt only the last lane.
        let last = b.len() - 4;
        b[last..].copy_from_slice(&9.0f32.to_le_bytes());
        assert!(!buffers_equal(kind, &a, &b));
    }

    #[test]
    fn length_mismatch_is_never_equal() {
        let a = [0u8; 8];
        let b = [0u8; 4];
        assert!(!buffers_equal(ElemKind::int32(), &a, &b));
    }

    proptest! {
        #[test]
        fn equality_is_reflexive_for_float_bytes(lanes in proptest::collection::vec(any::<f32>(), 1..64)) {
            let mut bytes = Vec::with_capacity(lanes.len() * 4);
            for lane in &lanes {
                bytes.extend_from_slice(&lane.to_le_bytes());
            }
            prop_assert!(buffers_equal(ElemKind::float32(), &bytes, &bytes));
        }

        #[test]
        fn equality_is_reflexive_for_integer_bytes(mut bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            bytes.truncate(bytes.len() / 8 * 8);
            prop_assert!(buffers_equal(ElemKind::uint64(), &bytes, &bytes));
        }
    }
}
