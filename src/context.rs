//! The interning authority for types, constants, and undefs (spec.md 4.1).
//!
//! Eagerly constructs the eight base types,
//! masks constants to their type's bit width on construction, and tracks a
//! reference count that every value carrying a context pointer bumps on
//! construction and releases on destruction. In this crate the refcount
//! tracks `Function`/`Module` construction (the only long-lived owners that
//! hold a context handle); it must read zero when the owning `Module` is
//! dropped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::types::{TypeId, TypeKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstId(pub(crate) u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UndefId(pub(crate) u32);

#[derive(Debug, Clone, Copy)]
pub struct ConstantData {
    pub ty: TypeId,
    /// Two's-complement bit pattern masked to the type's width.
    pub bits: u64,
}

pub struct Context {
    types: Vec<TypeKind>,
    type_map: HashMap<TypeKey, TypeId>,

    constants: Vec<ConstantData>,
    constant_map: HashMap<(TypeId, u64), ConstId>,

    undefs: Vec<TypeId>,
    undef_map: HashMap<TypeId, UndefId>,

    refcount: i64,

    void_ty: TypeId,
    i1_ty: TypeId,
    i8_ty: TypeId,
    i16_ty: TypeId,
    i32_ty: TypeId,
    i64_ty: TypeId,
    block_ty: TypeId,
    function_ty: TypeId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TypeKey {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    Block,
    Function,
    Pointer(TypeId, u32),
}

impl Context {
    pub fn new() -> Rc<RefCell<Context>> {
        let mut types = Vec::new();
        let mut type_map = HashMap::new();

        let mut intern_base = |kind: TypeKind, key: TypeKey| -> TypeId {
            let id = TypeId(types.len() as u32);
            types.push(kind);
            type_map.insert(key, id);
            id
        };

        let void_ty = intern_base(TypeKind::Void, TypeKey::Void);
        let i1_ty = intern_base(TypeKind::I1, TypeKey::I1);
        let i8_ty = intern_base(TypeKind::I8, TypeKey::I8);
        let i16_ty = intern_base(TypeKind::I16, TypeKey::I16);
        let i32_ty = intern_base(TypeKind::I32, TypeKey::I32);
        let i64_ty = intern_base(TypeKind::I64, TypeKey::I64);
        let block_ty = intern_base(TypeKind::Block, TypeKey::Block);
        let function_ty = intern_base(TypeKind::Function, TypeKey::Function);

        Rc::new(RefCell::new(Context {
            types,
            type_map,
            constants: Vec::new(),
            constant_map: HashMap::new(),
            undefs: Vec::new(),
            undef_map: HashMap::new(),
            refcount: 0,
            void_ty,
            i1_ty,
            i8_ty,
            i16_ty,
            i32_ty,
            i64_ty,
            block_ty,
            function_ty,
        }))
    }

    pub fn void_ty(&self) -> TypeId {
        self.void_ty
    }
    pub fn i1_ty(&self) -> TypeId {
        self.i1_ty
    }
    pub fn i8_ty(&self) -> TypeId {
        self.i8_ty
    }
    pub fn i16_ty(&self) -> TypeId {
        self.i16_ty
    }
    pub fn i32_ty(&self) -> TypeId {
        self.i32_ty
    }
    pub fn i64_ty(&self) -> TypeId {
        self.i64_ty
    }
    pub fn block_ty(&self) -> TypeId {
        self.block_ty
    }
    pub fn function_ty(&self) -> TypeId {
        self.function_ty
    }

    pub fn type_kind(&self, id: TypeId) -> TypeKind {
        self.types[id.index()]
    }

    pub fn integer_ty(&self, bits: u32) -> TypeId {
        match bits {
            1 => self.i1_ty,
            8 => self.i8_ty,
            16 => self.i16_ty,
            32 => self.i32_ty,
            64 => self.i64_ty,
            _ => panic!("no integer type of width {bits}"),
        }
    }

    /// `pointer_type(pointee, indirection)`: peels an existing pointer
    /// pointee and adds its indirection to the requested one, then interns
    /// each indirection level recursively. A pointer to `void` collapses the
    /// base to `i8` (spec.md 4.1).
    pub fn pointer_type(&mut self, pointee: TypeId, indirection: u32) -> TypeId {
        assert!(indirection >= 1, "pointer_type requires indirection >= 1");

        let (base, total_indirection) = match self.type_kind(pointee) {
            TypeKind::Pointer { base, indirection: existing } => (base, existing + indirection),
            TypeKind::Void => (self.i8_ty, indirection),
            _ => (pointee, indirection),
        };

        self.intern_pointer(base, total_indirection)
    }

    fn intern_pointer(&mut self, base: TypeId, indirection: u32) -> TypeId {
        assert!(
            !matches!(
                self.type_kind(base),
                TypeKind::Void | TypeKind::Block | TypeKind::Function | TypeKind::I1 | TypeKind::Pointer { .. }
            ),
            "invalid pointer base"
        );

        if let Some(&id) = self.type_map.get(&TypeKey::Pointer(base, indirection)) {
            return id;
        }

        // Recursively intern every smaller indirection level first so that
        // `deref_pointer` always finds a previously-interned TypeId to
        // return, mirroring Context::get_pointer_type_internal.
        if indirection > 1 {
            self.intern_pointer(base, indirection - 1);
        }

        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeKind::Pointer { base, indirection });
        self.type_map.insert(TypeKey::Pointer(base, indirection), id);
        id
    }

    pub fn deref_pointer(&mut self, ty: TypeId) -> TypeId {
        match self.type_kind(ty) {
            TypeKind::Pointer { base, indirection } if indirection > 1 => {
                self.intern_pointer(base, indirection - 1)
            }
            TypeKind::Pointer { base, .. } => base,
            _ => panic!("deref_pointer on non-pointer type"),
        }
    }

    pub fn ref_type(&mut self, ty: TypeId, extra_indirection: u32) -> TypeId {
        self.pointer_type(ty, extra_indirection)
    }

    pub fn get_constant(&mut self, ty: TypeId, value: u64) -> ConstId {
        let kind = self.type_kind(ty);
        assert!(
            !matches!(kind, TypeKind::Void | TypeKind::Block | TypeKind::Function),
            "cannot form a constant of this type"
        );
        let bits = value & kind.bit_mask();
        if let Some(&id) = self.constant_map.get(&(ty, bits)) {
            return id;
        }
        let id = ConstId(self.constants.len() as u32);
        self.constants.push(ConstantData { ty, bits });
        self.constant_map.insert((ty, bits), id);
        id
    }

    pub fn get_undef(&mut self, ty: TypeId) -> UndefId {
        let kind = self.type_kind(ty);
        assert!(
            !matches!(kind, TypeKind::Void | TypeKind::Block | TypeKind::Function),
            "cannot form undef of this type"
        );
        if let Some(&id) = self.undef_map.get(&ty) {
            return id;
        }
        let id = UndefId(self.undefs.len() as u32);
        self.undefs.push(ty);
        self.undef_map.insert(ty, id);
        id
    }

    pub fn constant_data(&self, id: ConstId) -> ConstantData {
        self.constants[id.0 as usize]
    }

    pub fn undef_type(&self, id: UndefId) -> TypeId {
        self.undefs[id.0 as usize]
    }

    pub(crate) fn increase_refcount(&mut self) {
        self.refcount += 1;
    }

    pub(crate) fn decrease_refcount(&mut self) {
        assert!(self.refcount > 0, "context refcount underflow");
        self.refcount -= 1;
    }

    pub fn refcount(&self) -> i64 {
        self.refcount
    }

    pub fn format_type(&self, ty: TypeId) -> String {
        crate::types::format_type(self.type_kind(ty), |base| self.format_type(base))
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        debug_assert_eq!(self.refcount, 0, "context dropped while values still reference it");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_interned() {
        let ctx = Context::new();
        let mut c = ctx.borrow_mut();
        let i32_ty = c.i32_ty();
        let a = c.get_constant(i32_ty, 42);
        let b = c.get_constant(i32_ty, 42);
        assert_eq!(a, b);
    }

    #[test]
    fn constants_mask_to_width() {
        let ctx = Context::new();
        let mut c = ctx.borrow_mut();
        let i8_ty = c.i8_ty();
        let a = c.get_constant(i8_ty, 0x1FF);
        assert_eq!(c.constant_data(a).bits, 0xFF);
    }

    #[test]
    fn pointer_to_void_collapses_to_i8() {
        let ctx = Context::new();
        let mut c = ctx.borrow_mut();
        let void_ty = c.void_ty();
        let p = c.pointer_type(void_ty, 1);
        let TypeKind::Pointer { base, .. } = c.type_kind(p) else { panic!("expected pointer") };
        assert_eq!(c.type_kind(base), TypeKind::I8);
    }

    #[test]
    fn pointer_type_peels_existing_indirection() {
        let ctx = Context::new();
        let mut c = ctx.borrow_mut();
        let i32_ty = c.i32_ty();
        let p1 = c.pointer_type(i32_ty, 1);
        let p2 = c.pointer_type(p1, 1);
        let p2_direct = c.pointer_type(i32_ty, 2);
        assert_eq!(p2, p2_direct);
    }

    #[test]
    fn refcount_reaches_zero() {
        let ctx = Context::new();
        {
            let mut c = ctx.borrow_mut();
            c.increase_refcount();
            c.decrease_refcount();
        }
        assert_eq!(ctx.borrow().refcount(), 0);
    }
}
