//! `Module`: a set of functions keyed by name, names unique inside the
//! module (spec.md 3.5). Keeps an ordered function list plus a
//! name -> function map kept in sync on insertion/removal.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::context::Context;
use crate::error::{IrError, Result};
use crate::function::{FuncId, Function};
use crate::types::TypeId;

pub struct Module {
    context: Rc<RefCell<Context>>,
    functions: Vec<Option<Function>>,
    order: Vec<FuncId>,
    by_name: IndexMap<String, FuncId>,
}

impl Module {
    pub fn new(context: Rc<RefCell<Context>>) -> Self {
        context.borrow_mut().increase_refcount();
        Module { context, functions: Vec::new(), order: Vec::new(), by_name: IndexMap::new() }
    }

    pub fn context(&self) -> Rc<RefCell<Context>> {
        self.context.clone()
    }

    pub fn function_count(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn create_function(
        &mut self,
        name: impl Into<String>,
        return_type: TypeId,
        param_types: &[TypeId],
    ) -> Result<FuncId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(IrError::DuplicateFunction(name));
        }
        let f = Function::new(self.context.clone(), name.clone(), return_type, param_types);
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Some(f));
        self.order.push(id);
        self.by_name.insert(name, id);
        Ok(id)
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.by_name.get(name).copied()
    }

    pub fn function(&self, id: FuncId) -> &Function {
        self.functions[id.0 as usize].as_ref().expect("use of destroyed function")
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut Function {
        self.functions[id.0 as usize].as_mut().expect("use of destroyed function")
    }

    pub fn function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.order.iter().copied()
    }

    pub fn local_function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.order.iter().copied().filter(|&id| !self.function(id).is_extern())
    }

    pub fn extern_function_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
        self.order.iter().copied().filter(|&id| self.function(id).is_extern())
    }

    pub fn destroy_function(&mut self, id: FuncId) {
        let name = self.function(id).name.clone();
        let f = self.functions[id.0 as usize].take().expect("function already destroyed");
        f.destroy();
        let pos = self.order.iter().position(|&x| x == id).unwrap();
        self.order.remove(pos);
        self.by_name.swap_remove(&name);
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        debug_assert!(
            self.order.is_empty() || std::thread::panicking(),
            "module dropped with functions still attached; call destroy_function or drain first"
        );
        self.context.borrow_mut().decrease_refcount();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names_are_unique() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut m = Module::new(ctx);
        m.create_function("f", i32_ty, &[]).unwrap();
        let err = m.create_function("f", i32_ty, &[]).unwrap_err();
        assert_eq!(err, IrError::DuplicateFunction("f".to_string()));
    }

    #[test]
    fn find_function_roundtrips() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut m = Module::new(ctx);
        let id = m.create_function("f", i32_ty, &[]).unwrap();
        assert_eq!(m.find_function("f"), Some(id));
        assert_eq!(m.find_function("g"), None);
    }
}
