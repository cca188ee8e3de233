//! Signature introspection: from backend argument metadata to driveable
//! argument specs.
//!
//! The backend reports what a built kernel declares ([`cldrive_device::ArgInfo`]);
//! this module decides what the harness can do with it: which element kind
//! backs each parameter, how many elements a buffer gets, and which
//! parameters are unsupported. Unknown types classify as unsupported rather
//! than failing introspection, so the instance driver can report them as an
//! outcome.

use cldrive_dtype::{AddrSpace, ElemKind};
use rand::rngs::StdRng;

use cldrive_device::Kernel;

use crate::arg_value::ArgValue;
use crate::config::{DynamicParams, FillPolicy};

/// Everything the driver knows about one kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub index: usize,
    pub addr_space: AddrSpace,
    /// Parsed element kind; `None` when the harness has no host
    /// representation for the declared type.
    pub kind: Option<ElemKind>,
    /// Source spelling of the type, kept for reporting.
    pub type_name: String,
    pub is_pointer: bool,
    /// Element count fixed by the declaration, when statically known.
    pub declared_elems: Option<usize>,
}

impl ArgSpec {
    /// Whether the harness can synthesize a value for this parameter.
    /// Private-space pointers have no bindable host value, so they are
    /// unsupported even when the element kind parses.
    pub fn is_supported(&self) -> bool {
        self.kind.is_some() && !(self.is_pointer && self.addr_space == AddrSpace::Private)
    }

    pub fn is_buffer(&self) -> bool {
        self.is_pointer && matches!(self.addr_space, AddrSpace::Global | AddrSpace::Constant)
    }

    /// Element count policy: the declared count when the source fixes one,
    /// otherwise one element per work item.
    pub fn elem_count(&self, params: &DynamicParams) -> usize {
        self.declared_elems.unwrap_or(params.global_size)
    }

    /// A declared count that does not divide the global size evenly cannot
    /// be indexed safely by every work item.
    pub fn size_mismatch(&self, params: &DynamicParams) -> bool {
        match self.declared_elems {
            Some(declared) if self.is_buffer() => declared == 0 || params.global_size % declared != 0,
            _ => false,
        }
    }
}

/// Recover the ordered argument specs of a built kernel.
pub fn introspect(kernel: &dyn Kernel) -> cldrive_device::Result<Vec<ArgSpec>> {
    let mut specs = Vec::with_capacity(kernel.arity());
    for index in 0..kernel.arity() {
        let info = kernel.arg_info(index)?;
        let kind = ElemKind::parse(&info.type_name);
        if kind.is_none() {
            tracing::debug!(
                kernel = kernel.name(),
                index,
                type_name = %info.type_name,
                "argument type has no host representation"
            );
        }
        specs.push(ArgSpec {
            index: info.index,
            addr_space: info.addr_space,
            kind,
            type_name: info.type_name,
            is_pointer: info.is_pointer,
            declared_elems: info.declared_elems,
        });
    }
    Ok(specs)
}

/// Synthesize the argument value a spec calls for.
///
/// Buffers get `elem_count` elements filled per policy; local pointers get
/// a scratch slab of one element per work item in a group; everything else
/// binds as a by-value scalar.
pub fn materialize(spec: &ArgSpec, params: &DynamicParams, policy: FillPolicy, rng: &mut StdRng) -> ArgValue {
    let Some(kind) = spec.kind else {
        return ArgValue::Unsupported { type_name: spec.type_name.clone() };
    };
    if !spec.is_supported() {
        return ArgValue::Unsupported { type_name: spec.type_name.clone() };
    }

    if spec.is_buffer() {
        ArgValue::array(kind, spec.elem_count(params), policy, rng)
    } else if spec.is_pointer && spec.addr_space == AddrSpace::Local {
        ArgValue::local_slab(kind, params.local_size)
    } else {
        ArgValue::scalar(kind, policy, rng)
    }
}
