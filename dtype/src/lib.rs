//! Element kinds and address spaces for kernel arguments.
//!
//! OpenCL C spells its argument types as scalar names (`int`, `uchar`,
//! `double`) and vector names (`float4`, `long16`). This crate models both,
//! knows their host-side byte sizes, and parses the source spellings back
//! into kinds. Anything it cannot name is the caller's problem to classify
//! as unsupported.

/// Address space of a kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(serde::Serialize, serde::Deserialize)]
#[derive(strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum AddrSpace {
    /// Global/device memory.
    Global,
    /// Local/workgroup-shared memory.
    Local,
    /// Constant (read-only global) memory.
    Constant,
    /// Private/register memory. Scalars passed by value live here.
    Private,
}

impl AddrSpace {
    /// Parse an OpenCL C address-space qualifier, with or without the
    /// double-underscore prefix.
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "global" | "__global" => Some(Self::Global),
            "local" | "__local" => Some(Self::Local),
            "constant" | "__constant" => Some(Self::Constant),
            "private" | "__private" => Some(Self::Private),
            _ => None,
        }
    }
}

/// Scalar numeric kinds (base element types).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(strum::EnumCount, strum::EnumIter, strum::VariantArray)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ScalarKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
}

impl ScalarKind {
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    pub const fn is_signed(&self) -> bool {
        matches!(self, Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }

    pub const fn is_unsigned(&self) -> bool {
        matches!(self, Self::UInt8 | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    pub const fn is_int(&self) -> bool {
        self.is_signed() || self.is_unsigned()
    }

    pub const fn is_float(&self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    /// The OpenCL C spelling.
    pub const fn opencl_style(&self) -> &'static str {
        match self {
            Self::Int8 => "char",
            Self::Int16 => "short",
            Self::Int32 => "int",
            Self::Int64 => "long",
            Self::UInt8 => "uchar",
            Self::UInt16 => "ushort",
            Self::UInt32 => "uint",
            Self::UInt64 => "ulong",
            Self::Float32 => "float",
            Self::Float64 => "double",
        }
    }

    fn parse_base(name: &str) -> Option<Self> {
        let kind = match name {
            "char" | "signed char" => Self::Int8,
            "short" | "signed short" => Self::Int16,
            "int" | "signed int" => Self::Int32,
            "long" | "signed long" => Self::Int64,
            "uchar" | "unsigned char" => Self::UInt8,
            "ushort" | "unsigned short" => Self::UInt16,
            "uint" | "unsigned int" => Self::UInt32,
            "ulong" | "unsigned long" => Self::UInt64,
            "float" => Self::Float32,
            "double" => Self::Float64,
            _ => return None,
        };
        Some(kind)
    }
}

/// Vector widths OpenCL C defines and this harness synthesizes values for.
///
/// Width 3 exists in the language but has padded, implementation-defined
/// host layout, so it is deliberately absent: `float3` parses as
/// unsupported rather than as a kind we would fill incorrectly.
pub const VECTOR_WIDTHS: [usize; 4] = [2, 4, 8, 16];

/// Element type of a kernel argument: a scalar kind or a fixed-width vector
/// of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[derive(serde::Serialize, serde::Deserialize)]
pub enum ElemKind {
    Scalar(ScalarKind),
    Vector { scalar: ScalarKind, width: usize },
}

impl ElemKind {
    /// Byte size of one element on the host.
    pub const fn bytes(&self) -> usize {
        match self {
            Self::Scalar(s) => s.bytes(),
            Self::Vector { scalar, width } => scalar.bytes() * *width,
        }
    }

    /// The base scalar kind.
    pub const fn base(&self) -> ScalarKind {
        match self {
            Self::Scalar(s) => *s,
            Self::Vector { scalar, .. } => *scalar,
        }
    }

    /// Number of scalar lanes (1 for scalars).
    pub const fn lanes(&self) -> usize {
        match self {
            Self::Scalar(_) => 1,
            Self::Vector { width, .. } => *width,
        }
    }

    pub const fn is_vector(&self) -> bool {
        matches!(self, Self::Vector { .. })
    }

    /// The OpenCL C spelling, e.g. `float4`.
    pub fn opencl_style(&self) -> String {
        match self {
            Self::Scalar(s) => s.opencl_style().to_string(),
            Self::Vector { scalar, width } => format!("{}{}", scalar.opencl_style(), width),
        }
    }

    /// Parse an OpenCL C type spelling. Returns `None` for spellings this
    /// harness has no host representation for (`half`, `image2d_t`,
    /// width-3 vectors, vendor types, ...).
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();

        if let Some(kind) = ScalarKind::parse_base(name) {
            return Some(Self::Scalar(kind));
        }

        // Vector spelling: base name followed by a decimal width.
        let digits_at = name.find(|c: char| c.is_ascii_digit())?;
        let (base, width) = name.split_at(digits_at);
        let width: usize = width.parse().ok()?;
        if !VECTOR_WIDTHS.contains(&width) {
            return None;
        }
        let scalar = ScalarKind::parse_base(base)?;
        Some(Self::Vector { scalar, width })
    }
}

impl From<ScalarKind> for ElemKind {
    fn from(scalar: ScalarKind) -> Self {
        Self::Scalar(scalar)
    }
}

// Convenient constructors for common kinds.
impl ElemKind {
    pub const fn int8() -> Self {
        Self::Scalar(ScalarKind::Int8)
    }
    pub const fn int16() -> Self {
        Self::Scalar(ScalarKind::Int16)
    }
    pub const fn int32() -> Self {
        Self::Scalar(ScalarKind::Int32)
    }
    pub const fn int64() -> Self {
        Self::Scalar(ScalarKind::Int64)
    }
    pub const fn uint8() -> Self {
        Self::Scalar(ScalarKind::UInt8)
    }
    pub const fn uint16() -> Self {
        Self::Scalar(ScalarKind::UInt16)
    }
    pub const fn uint32() -> Self {
        Self::Scalar(ScalarKind::UInt32)
    }
    pub const fn uint64() -> Self {
        Self::Scalar(ScalarKind::UInt64)
    }
    pub const fn float32() -> Self {
        Self::Scalar(ScalarKind::Float32)
    }
    pub const fn float64() -> Self {
        Self::Scalar(ScalarKind::Float64)
    }
    pub const fn vec(scalar: ScalarKind, width: usize) -> Self {
        Self::Vector { scalar, width }
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;
    use test_case::test_case;

    use super::*;

    #[test_case("int", ElemKind::int32())]
    #[test_case("uchar", ElemKind::uint8())]
    #[test_case("unsigned short", ElemKind::uint16())]
    #[test_case("long", ElemKind::int64())]
    #[test_case("float", ElemKind::float32())]
    #[test_case("double", ElemKind::float64())]
    #[test_case("float4", ElemKind::vec(ScalarKind::Float32, 4))]
    #[test_case("char2", ElemKind::vec(ScalarKind::Int8, 2))]
    #[test_case("ulong16", ElemKind::vec(ScalarKind::UInt64, 16))]
    fn parse_known(name: &str, expected: ElemKind) {
        assert_eq!(ElemKind::parse(name), Some(expected));
    }

    #[test_case("half")]
    #[test_case("float3")]
    #[test_case("image2d_t")]
    #[test_case("sampler_t")]
    #[test_case("size_t")]
    #[test_case("my_struct")]
    #[test_case("float32")]
    fn parse_unknown(name: &str) {
        assert_eq!(ElemKind::parse(name), None);
    }

    #[test]
    fn spelling_round_trips_for_all_kinds() {
        for scalar in ScalarKind::iter() {
            let kind = ElemKind::Scalar(scalar);
            assert_eq!(ElemKind::parse(&kind.opencl_style()), Some(kind));

            for width in VECTOR_WIDTHS {
                let kind = ElemKind::vec(scalar, width);
                assert_eq!(ElemKind::parse(&kind.opencl_style()), Some(kind));
            }
        }
    }

    #[test]
    fn vector_bytes_scale_with_width() {
        assert_eq!(ElemKind::vec(ScalarKind::Float32, 4).bytes(), 16);
        assert_eq!(ElemKind::vec(ScalarKind::Int8, 16).bytes(), 16);
        assert_eq!(ElemKind::float64().bytes(), 8);
    }

    #[test_case("global", Some(AddrSpace::Global))]
    #[test_case("__local", Some(AddrSpace::Local))]
    #[test_case("constant", Some(AddrSpace::Constant))]
    #[test_case("__private", Some(AddrSpace::Private))]
    #[test_case("register", None)]
    fn parse_addr_space(token: &str, expected: Option<AddrSpace>) {
        assert_eq!(AddrSpace::parse(token), expected);
    }
}
