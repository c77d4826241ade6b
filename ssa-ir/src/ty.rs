//! The value type lattice consumed by the passes. Only as much of a real
//! compiler's type system as the optimizer needs to reason about arithmetic
//! width/signedness, memory opacity, and tuple projection survives here; a
//! real front end's type checker is out of scope (see spec §1).

/// The type of a [`Value`](crate::value::Value).
///
/// `PartialOrd`/`Ord` back CSE's structural type-compare sort key (spec
/// §4.4); the ordering is arbitrary but total and stable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    /// Placeholder for values that no longer carry a meaningful type (e.g. an
    /// `Invalid` no-op left behind by hoisting).
    Invalid,
    /// The memory "token" type. Every side-effecting operation on memory
    /// reads and produces exactly one memory value, forming a single chain
    /// per function. Memory-typed values are always conservatively opaque.
    Memory,
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// A fixed-arity tuple type, used by multi-result operations together
    /// with `Select0`/`Select1` projections.
    Tuple(Vec<Type>),
}

impl Type {
    pub fn is_memory(&self) -> bool {
        matches!(self, Type::Memory)
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Bool)
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Type::I8
                | Type::I16
                | Type::I32
                | Type::I64
                | Type::U8
                | Type::U16
                | Type::U32
                | Type::U64
        )
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, Type::I8 | Type::I16 | Type::I32 | Type::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    pub fn is_tuple(&self) -> bool {
        matches!(self, Type::Tuple(_))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Type::Invalid)
    }

    /// Size in bits, for the scalar types that fold functions need to mask or
    /// sign/zero-extend to.
    pub fn size(&self) -> u32 {
        match self {
            Type::Invalid | Type::Memory => 0,
            Type::Bool | Type::I8 | Type::U8 => 8,
            Type::I16 | Type::U16 => 16,
            Type::I32 | Type::U32 | Type::F32 => 32,
            Type::I64 | Type::U64 | Type::F64 => 64,
            Type::Tuple(fields) => fields.iter().map(Type::size).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_agree_with_size() {
        assert!(Type::I32.is_integer());
        assert!(Type::I32.is_signed());
        assert!(!Type::U32.is_signed());
        assert_eq!(Type::I32.size(), 32);
        assert!(Type::Memory.is_memory());
        assert_eq!(Type::Memory.size(), 0);
        assert!(Type::Tuple(vec![Type::I32, Type::Bool]).is_tuple());
    }
}
