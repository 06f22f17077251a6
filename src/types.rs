//! Structural types: `i1`/`i8`/`i16`/`i32`/`i64`, `void`, `block`, `function`,
//! and pointers with an indirection count. Identity is interned by
//! [`crate::context::Context`]; two `TypeId`s are equal iff the types are
//! structurally equal (spec.md 3.1).

use std::fmt;

/// Handle into [`crate::context::Context`]'s type arena. Equality of
/// `TypeId` is equality of the interned type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub(crate) u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    Block,
    Function,
    /// `base` is never void/block/function/i1/pointer; `indirection >= 1`.
    Pointer { base: TypeId, indirection: u32 },
}

impl TypeKind {
    pub fn is_void(self) -> bool {
        matches!(self, TypeKind::Void)
    }

    pub fn is_pointer(self) -> bool {
        matches!(self, TypeKind::Pointer { .. })
    }

    pub fn is_block(self) -> bool {
        matches!(self, TypeKind::Block)
    }

    pub fn is_function(self) -> bool {
        matches!(self, TypeKind::Function)
    }

    /// i8/i16/i32/i64 only -- i1 is the boolean carrier, excluded (spec 3.1,
    /// i.e. not void or a pointer).
    pub fn is_arithmetic(self) -> bool {
        matches!(self, TypeKind::I8 | TypeKind::I16 | TypeKind::I32 | TypeKind::I64)
    }

    pub fn is_arithmetic_or_pointer(self) -> bool {
        self.is_arithmetic() || self.is_pointer()
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            TypeKind::I1 | TypeKind::I8 | TypeKind::I16 | TypeKind::I32 | TypeKind::I64
        )
    }

    /// Bit size for integer kinds and pointers; undefined (panics) for
    /// void/block/function.
    pub fn bit_size(self) -> u32 {
        match self {
            TypeKind::I1 => 1,
            TypeKind::I8 => 8,
            TypeKind::I16 => 16,
            TypeKind::I32 => 32,
            TypeKind::I64 => 64,
            TypeKind::Pointer { .. } => 64,
            TypeKind::Void | TypeKind::Block | TypeKind::Function => {
                panic!("type has no bit size")
            }
        }
    }

    pub fn bit_mask(self) -> u64 {
        let size = self.bit_size();
        if size == 64 {
            u64::MAX
        } else {
            (1u64 << size) - 1
        }
    }

    pub fn indirection(self) -> u32 {
        match self {
            TypeKind::Pointer { indirection, .. } => indirection,
            _ => 0,
        }
    }
}

/// Display of a type name, given a way to format the pointer base.
pub fn format_type(kind: TypeKind, base_name: impl Fn(TypeId) -> String) -> String {
    match kind {
        TypeKind::Void => "void".to_string(),
        TypeKind::I1 => "i1".to_string(),
        TypeKind::I8 => "i8".to_string(),
        TypeKind::I16 => "i16".to_string(),
        TypeKind::I32 => "i32".to_string(),
        TypeKind::I64 => "i64".to_string(),
        TypeKind::Block => "block".to_string(),
        TypeKind::Function => "function".to_string(),
        TypeKind::Pointer { base, indirection } => {
            let mut s = base_name(base);
            for _ in 0..indirection {
                s.push('*');
            }
            s
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i1_is_not_arithmetic() {
        assert!(!TypeKind::I1.is_arithmetic());
        assert!(TypeKind::I32.is_arithmetic());
    }

    #[test]
    fn bit_masks_match_width() {
        assert_eq!(TypeKind::I8.bit_mask(), 0xFF);
        assert_eq!(TypeKind::I32.bit_mask(), 0xFFFF_FFFF);
        assert_eq!(TypeKind::I64.bit_mask(), u64::MAX);
    }
}
