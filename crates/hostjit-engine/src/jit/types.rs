//! Native type system
//!
//! Primitive, pointer, aggregate and signature types with explicit sizes,
//! alignments and field offsets. Types are immutable values; aggregates and
//! signatures are shared behind an `Arc`, so cloning a type is cheap.

use std::fmt;
use std::sync::Arc;

const WORD: usize = std::mem::size_of::<usize>();

/// Type kind tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value
    Void,
    /// 8-bit signed
    SByte,
    /// 8-bit unsigned
    UByte,
    /// 16-bit signed
    Short,
    /// 16-bit unsigned
    UShort,
    /// 32-bit signed
    Int,
    /// 32-bit unsigned
    UInt,
    /// Word-sized signed
    NInt,
    /// Word-sized unsigned
    NUInt,
    /// 64-bit signed
    Long,
    /// 64-bit unsigned
    ULong,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Pointer
    Pointer,
    /// Struct
    Struct,
    /// Union
    Union,
    /// Function signature
    Signature,
}

/// Calling convention of a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Abi {
    /// The platform C calling convention
    #[default]
    Cdecl,
}

/// One field of an aggregate
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    /// Field type
    pub ty: Type,
    /// Byte offset from the start of the aggregate
    pub offset: usize,
    /// Field name, for named structs
    pub name: Option<String>,
}

/// Layout of a struct or union
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregateType {
    fields: Vec<Field>,
    size: usize,
    align: usize,
    packed: bool,
}

/// Parameter and return types of a callable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureType {
    abi: Abi,
    params: Vec<Type>,
    ret: Type,
}

impl SignatureType {
    /// Calling convention
    pub fn abi(&self) -> Abi {
        self.abi
    }

    /// Parameter types
    pub fn params(&self) -> &[Type] {
        &self.params
    }

    /// Return type
    pub fn ret(&self) -> &Type {
        &self.ret
    }
}

/// A native type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value
    Void,
    /// 8-bit signed
    SByte,
    /// 8-bit unsigned
    UByte,
    /// 16-bit signed
    Short,
    /// 16-bit unsigned
    UShort,
    /// 32-bit signed
    Int,
    /// 32-bit unsigned
    UInt,
    /// Word-sized signed
    NInt,
    /// Word-sized unsigned
    NUInt,
    /// 64-bit signed
    Long,
    /// 64-bit unsigned
    ULong,
    /// 32-bit float
    Float32,
    /// 64-bit float
    Float64,
    /// Pointer to the referenced type
    Pointer(Arc<Type>),
    /// Struct
    Struct(Arc<AggregateType>),
    /// Union
    Union(Arc<AggregateType>),
    /// Function signature
    Signature(Arc<SignatureType>),
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

impl Type {
    // ===== Construction =====

    /// `void*`
    pub fn void_ptr() -> Type {
        Type::Pointer(Arc::new(Type::Void))
    }

    /// Pointer to `ty`
    pub fn create_pointer(ty: Type) -> Type {
        Type::Pointer(Arc::new(ty))
    }

    /// Struct with naturally aligned fields
    pub fn create_struct(fields: Vec<Type>) -> Type {
        Type::Struct(Arc::new(Self::layout_struct(
            fields.into_iter().map(|ty| (None, ty)),
            false,
        )))
    }

    /// Struct with naturally aligned, named fields
    pub fn create_struct_named(fields: Vec<(String, Type)>) -> Type {
        Type::Struct(Arc::new(Self::layout_struct(
            fields.into_iter().map(|(name, ty)| (Some(name), ty)),
            false,
        )))
    }

    /// Struct whose field offsets are the cumulative sizes of the fields
    /// before them, with alignment 1
    pub fn create_packed_struct(fields: Vec<Type>) -> Type {
        Type::Struct(Arc::new(Self::layout_struct(
            fields.into_iter().map(|ty| (None, ty)),
            true,
        )))
    }

    /// Union: every field at offset 0
    pub fn create_union(fields: Vec<Type>) -> Type {
        let size = fields.iter().map(Type::size).max().unwrap_or(0);
        let align = fields.iter().map(Type::alignment).max().unwrap_or(1);
        let fields = fields
            .into_iter()
            .map(|ty| Field {
                ty,
                offset: 0,
                name: None,
            })
            .collect();
        Type::Union(Arc::new(AggregateType {
            fields,
            size: align_up(size, align),
            align,
            packed: false,
        }))
    }

    /// Signature with the C calling convention
    pub fn create_signature(params: Vec<Type>, ret: Type) -> Type {
        Type::Signature(Arc::new(SignatureType {
            abi: Abi::Cdecl,
            params,
            ret,
        }))
    }

    fn layout_struct(fields: impl Iterator<Item = (Option<String>, Type)>, packed: bool) -> AggregateType {
        let mut offset = 0;
        let mut align = 1;
        let fields: Vec<Field> = fields
            .map(|(name, ty)| {
                if !packed {
                    let field_align = ty.alignment();
                    align = align.max(field_align);
                    offset = align_up(offset, field_align);
                }
                let field = Field { ty, offset, name };
                offset += field.ty.size();
                field
            })
            .collect();
        AggregateType {
            fields,
            size: if packed { offset } else { align_up(offset, align) },
            align,
            packed,
        }
    }

    // ===== Introspection =====

    /// Kind tag
    pub fn kind(&self) -> TypeKind {
        match self {
            Type::Void => TypeKind::Void,
            Type::SByte => TypeKind::SByte,
            Type::UByte => TypeKind::UByte,
            Type::Short => TypeKind::Short,
            Type::UShort => TypeKind::UShort,
            Type::Int => TypeKind::Int,
            Type::UInt => TypeKind::UInt,
            Type::NInt => TypeKind::NInt,
            Type::NUInt => TypeKind::NUInt,
            Type::Long => TypeKind::Long,
            Type::ULong => TypeKind::ULong,
            Type::Float32 => TypeKind::Float32,
            Type::Float64 => TypeKind::Float64,
            Type::Pointer(_) => TypeKind::Pointer,
            Type::Struct(_) => TypeKind::Struct,
            Type::Union(_) => TypeKind::Union,
            Type::Signature(_) => TypeKind::Signature,
        }
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::SByte | Type::UByte => 1,
            Type::Short | Type::UShort => 2,
            Type::Int | Type::UInt | Type::Float32 => 4,
            Type::Long | Type::ULong | Type::Float64 => 8,
            Type::NInt | Type::NUInt | Type::Pointer(_) | Type::Signature(_) => WORD,
            Type::Struct(agg) | Type::Union(agg) => agg.size,
        }
    }

    /// Alignment in bytes
    pub fn alignment(&self) -> usize {
        match self {
            Type::Struct(agg) | Type::Union(agg) => agg.align,
            Type::Void => 1,
            _ => self.size(),
        }
    }

    /// The strictest alignment any primitive needs on this platform
    pub fn best_alignment() -> usize {
        std::mem::align_of::<u64>()
            .max(std::mem::align_of::<f64>())
            .max(WORD)
    }

    fn aggregate(&self) -> Option<&AggregateType> {
        match self {
            Type::Struct(agg) | Type::Union(agg) => Some(agg),
            _ => None,
        }
    }

    /// Number of fields of an aggregate, 0 otherwise
    pub fn num_fields(&self) -> usize {
        self.aggregate().map(|agg| agg.fields.len()).unwrap_or(0)
    }

    /// Fields of an aggregate
    pub fn fields(&self) -> &[Field] {
        self.aggregate().map(|agg| agg.fields.as_slice()).unwrap_or(&[])
    }

    /// Type of field `index`
    pub fn field(&self, index: usize) -> Option<&Type> {
        self.fields().get(index).map(|f| &f.ty)
    }

    /// Offset of field `index`
    pub fn offset(&self, index: usize) -> Option<usize> {
        self.fields().get(index).map(|f| f.offset)
    }

    /// Name of field `index`
    pub fn name(&self, index: usize) -> Option<&str> {
        self.fields().get(index).and_then(|f| f.name.as_deref())
    }

    /// Index of the field called `name`
    pub fn find_name(&self, name: &str) -> Option<usize> {
        self.fields()
            .iter()
            .position(|f| f.name.as_deref() == Some(name))
    }

    /// Whether an aggregate was laid out without alignment padding
    pub fn is_packed(&self) -> bool {
        self.aggregate().map(|agg| agg.packed).unwrap_or(false)
    }

    /// Signature details
    pub fn signature(&self) -> Option<&SignatureType> {
        match self {
            Type::Signature(sig) => Some(sig),
            _ => None,
        }
    }

    /// Number of parameters of a signature
    pub fn num_params(&self) -> usize {
        self.signature().map(|s| s.params.len()).unwrap_or(0)
    }

    /// Type of parameter `index` of a signature
    pub fn param(&self, index: usize) -> Option<&Type> {
        self.signature().and_then(|s| s.params.get(index))
    }

    /// Return type of a signature
    pub fn return_type(&self) -> Option<&Type> {
        self.signature().map(|s| &s.ret)
    }

    /// Referenced type of a pointer
    pub fn ref_type(&self) -> Option<&Type> {
        match self {
            Type::Pointer(inner) => Some(inner),
            _ => None,
        }
    }

    /// Every kind that is not an aggregate or a signature
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Type::Struct(_) | Type::Union(_) | Type::Signature(_) | Type::Pointer(_))
    }

    /// Struct kind
    pub fn is_struct(&self) -> bool {
        matches!(self, Type::Struct(_))
    }

    /// Union kind
    pub fn is_union(&self) -> bool {
        matches!(self, Type::Union(_))
    }

    /// Struct or union
    pub fn is_aggregate(&self) -> bool {
        self.aggregate().is_some()
    }

    /// Signature kind
    pub fn is_signature(&self) -> bool {
        matches!(self, Type::Signature(_))
    }

    /// Pointer kind
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    /// Void kind
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Integer kinds, pointers included
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::SByte
                | Type::UByte
                | Type::Short
                | Type::UShort
                | Type::Int
                | Type::UInt
                | Type::NInt
                | Type::NUInt
                | Type::Long
                | Type::ULong
                | Type::Pointer(_)
        )
    }

    /// Float kinds
    pub fn is_float(&self) -> bool {
        matches!(self, Type::Float32 | Type::Float64)
    }

    /// Held in a single machine register
    pub fn is_scalar(&self) -> bool {
        self.is_integer() || self.is_float() || self.is_signature()
    }

    /// Signed integer kinds
    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            Type::SByte | Type::Short | Type::Int | Type::NInt | Type::Long
        )
    }

    /// Type both operands of a binary operation are converted to
    pub fn promote(a: &Type, b: &Type) -> Type {
        if matches!(a, Type::Float64) || matches!(b, Type::Float64) {
            return Type::Float64;
        }
        if matches!(a, Type::Float32) || matches!(b, Type::Float32) {
            return Type::Float32;
        }
        let widen = |t: &Type| {
            if t.is_pointer() || t.is_signature() {
                Type::NUInt
            } else if t.size() < 4 {
                Type::Int
            } else {
                t.clone()
            }
        };
        let (a, b) = (widen(a), widen(b));
        if b.size() > a.size() || (b.size() == a.size() && !b.is_signed()) {
            b
        } else {
            a
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::SByte => write!(f, "sbyte"),
            Type::UByte => write!(f, "ubyte"),
            Type::Short => write!(f, "short"),
            Type::UShort => write!(f, "ushort"),
            Type::Int => write!(f, "int"),
            Type::UInt => write!(f, "uint"),
            Type::NInt => write!(f, "nint"),
            Type::NUInt => write!(f, "nuint"),
            Type::Long => write!(f, "long"),
            Type::ULong => write!(f, "ulong"),
            Type::Float32 => write!(f, "float32"),
            Type::Float64 => write!(f, "float64"),
            Type::Pointer(inner) => write!(f, "{}*", inner),
            Type::Struct(agg) | Type::Union(agg) => {
                let tag = match (self.is_union(), agg.packed) {
                    (true, _) => "union",
                    (false, true) => "packed struct",
                    (false, false) => "struct",
                };
                write!(f, "{} {{", tag)?;
                for (i, field) in agg.fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match &field.name {
                        Some(name) => write!(f, " {}: {}", name, field.ty)?,
                        None => write!(f, " {}", field.ty)?,
                    }
                }
                write!(f, " }}")
            }
            Type::Signature(sig) => {
                write!(f, "(")?;
                for (i, p) in sig.params.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", p)?;
                }
                write!(f, ") -> {}", sig.ret)
            }
        }
    }
}
