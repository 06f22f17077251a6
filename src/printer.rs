//! Deterministic textual IR printer (spec.md 6.1): one line per
//! instruction, blocks separated by a label line, in definition order.

use std::fmt::Write as _;
use std::rc::Rc;
use std::cell::RefCell;
use std::collections::HashMap;

use crate::context::Context;
use crate::function::{FuncId, Function};
use crate::instr::{InstData, Opcode};
use crate::module::Module;
use crate::types::{TypeId, TypeKind};
use crate::value::{BlockId, InstrId, ParamId, ValueRef};

/// Resolves a `Call` target to the name it should print as. `print_module`
/// supplies the real function name; `print_function` on a lone `Function`
/// (no owning module in scope) falls back to a synthetic `funcN` label.
type CalleeResolver<'a> = dyn Fn(FuncId) -> String + 'a;

pub fn print_module(module: &Module) -> String {
    let names: HashMap<FuncId, String> = module.function_ids().map(|id| (id, module.function(id).name.clone())).collect();
    let resolve = |id: FuncId| names.get(&id).cloned().unwrap_or_else(|| callee_name(id));

    let mut out = String::new();
    for (i, id) in module.function_ids().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        print_function_into(&mut out, module.function(id), &resolve);
    }
    out
}

pub fn print_function(f: &Function) -> String {
    let mut out = String::new();
    print_function_into(&mut out, f, &callee_name);
    out
}

fn print_function_into(out: &mut String, f: &Function, resolve_callee: &CalleeResolver) {
    let context = f.context();
    let ret_ty = context.borrow().format_type(f.return_type);

    if f.is_extern() {
        let params: Vec<String> = (0..f.params.len())
            .map(|i| context.borrow().format_type(f.param(ParamId(i as u32)).ty))
            .collect();
        let _ = writeln!(out, "extern {} {}({});", ret_ty, f.name, params.join(", "));
        return;
    }

    let params: Vec<String> = (0..f.params.len())
        .map(|i| format!("{} {}", context.borrow().format_type(f.param(ParamId(i as u32)).ty), value_name(f, ValueRef::Param(ParamId(i as u32)))))
        .collect();
    let _ = writeln!(out, "{} {}({}) {{", ret_ty, f.name, params.join(", "));

    for &block in f.block_order() {
        let _ = writeln!(out, "{}:", block_name(f, block));
        for &inst in &f.block(block).instructions {
            let _ = writeln!(out, "  {}", print_instruction(f, &context, inst, resolve_callee));
        }
    }

    let _ = writeln!(out, "}}");
}

fn block_name(f: &Function, b: BlockId) -> String {
    if f.block(b).is_entry {
        "entry".to_string()
    } else {
        format!("block_{}", f.block(b).display_index)
    }
}

fn value_name(f: &Function, v: ValueRef) -> String {
    match v {
        ValueRef::Param(p) => format!("v{}", f.param(p).display_index),
        ValueRef::Instr(i) => format!("v{}", f.inst(i).display_index),
        ValueRef::Block(b) => block_name(f, b),
        ValueRef::Func(id) => callee_name(id),
        ValueRef::Const(_) | ValueRef::Undef(_) => unreachable!("constants/undefs print via print_operand"),
    }
}

fn print_operand(f: &Function, context: &Rc<RefCell<Context>>, v: ValueRef) -> String {
    match v {
        ValueRef::Const(c) => {
            let data = context.borrow().constant_data(c);
            let kind = context.borrow().type_kind(data.ty);
            if kind.is_pointer() && data.bits == 0 {
                "null".to_string()
            } else if kind == TypeKind::I1 {
                if data.bits != 0 { "true".to_string() } else { "false".to_string() }
            } else {
                data.bits.to_string()
            }
        }
        ValueRef::Undef(_) => "undef".to_string(),
        other => value_name(f, other),
    }
}

fn pointee_type_name(context: &Rc<RefCell<Context>>, pointer_ty: TypeId) -> String {
    match context.borrow().type_kind(pointer_ty) {
        TypeKind::Pointer { base, indirection } if indirection > 1 => {
            format!("{}{}", context.borrow().format_type(base), "*".repeat((indirection - 1) as usize))
        }
        TypeKind::Pointer { base, .. } => context.borrow().format_type(base),
        _ => panic!("pointee_type_name on non-pointer type"),
    }
}

fn print_instruction(f: &Function, context: &Rc<RefCell<Context>>, id: InstrId, resolve_callee: &CalleeResolver) -> String {
    let data = f.inst(id);
    let is_void = context.borrow().type_kind(data.ty).is_void();
    let prefix = if is_void { String::new() } else { format!("{} = ", value_name(f, ValueRef::Instr(id))) };
    let ty_str = |ty: TypeId| context.borrow().format_type(ty);

    let body = match data.opcode {
        Opcode::Unary(op) => format!("{} {} {}", op.mnemonic(), ty_str(data.ty), print_operand(f, context, data.operands[0])),
        Opcode::Binary(op) => format!(
            "{} {} {}, {}",
            op.mnemonic(),
            ty_str(data.ty),
            print_operand(f, context, data.operands[0]),
            print_operand(f, context, data.operands[1])
        ),
        Opcode::IntCompare(pred) => {
            let operand_ty = f.value_type(data.operands[0]);
            format!(
                "cmp {} {} {}, {}",
                pred.mnemonic(),
                ty_str(operand_ty),
                print_operand(f, context, data.operands[0]),
                print_operand(f, context, data.operands[1])
            )
        }
        Opcode::Load => format!("load {}", print_operand(f, context, data.operands[0])),
        Opcode::Store => format!("store {}, {}", print_operand(f, context, data.operands[0]), print_operand(f, context, data.operands[1])),
        Opcode::Call => print_call(f, context, data, resolve_callee),
        Opcode::Branch => format!("branch {}", print_operand(f, context, data.operands[0])),
        Opcode::CondBranch => format!(
            "bcond i1 {}, {}, {}",
            print_operand(f, context, data.operands[0]),
            print_operand(f, context, data.operands[1]),
            print_operand(f, context, data.operands[2])
        ),
        Opcode::StackAlloc => {
            let element = pointee_type_name(context, data.ty);
            if data.stackalloc_size == 1 {
                format!("stackalloc {}", element)
            } else {
                format!("stackalloc {}, {}", element, data.stackalloc_size)
            }
        }
        Opcode::Ret => {
            if data.operands.is_empty() {
                "ret void".to_string()
            } else {
                format!("ret {} {}", ty_str(f.value_type(data.operands[0])), print_operand(f, context, data.operands[0]))
            }
        }
        Opcode::Offset => format!("offset {} {}, {}", ty_str(data.ty), print_operand(f, context, data.operands[0]), print_operand(f, context, data.operands[1])),
        Opcode::Cast(kind) => {
            let src_ty = f.value_type(data.operands[0]);
            format!("{} {} {} to {}", kind.mnemonic(), ty_str(src_ty), print_operand(f, context, data.operands[0]), ty_str(data.ty))
        }
        Opcode::Select => format!(
            "select {}, {}, {}",
            print_operand(f, context, data.operands[0]),
            print_operand(f, context, data.operands[1]),
            print_operand(f, context, data.operands[2])
        ),
        Opcode::Phi => print_phi(f, context, data),
    };

    format!("{prefix}{body}")
}

fn print_call(f: &Function, context: &Rc<RefCell<Context>>, data: &InstData, resolve_callee: &CalleeResolver) -> String {
    let callee = data.callee().expect("call opcode must have a callee operand");
    let args: Vec<String> = data
        .arguments()
        .iter()
        .map(|&a| format!("{} {}", context.borrow().format_type(f.value_type(a)), print_operand(f, context, a)))
        .collect();
    format!("call {} {}({})", context.borrow().format_type(data.ty), resolve_callee(callee), args.join(", "))
}

/// Fallback used only when a `Function` is printed without its owning
/// `Module` in scope, so the real callee name isn't resolvable.
fn callee_name(id: FuncId) -> String {
    format!("func{}", id.0)
}

fn print_phi(f: &Function, context: &Rc<RefCell<Context>>, data: &InstData) -> String {
    let mut parts = Vec::new();
    for i in 0..data.phi_incoming_count() {
        let (block, value) = data.phi_incoming(i);
        parts.push(format!("{}: {}", block_name(f, block), print_operand(f, context, value)));
    }
    format!("phi {} [{}]", context.borrow().format_type(data.ty), parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context as Ctx;
    use crate::instr::BinaryOp;

    #[test]
    fn prints_simple_function() {
        let ctx = Ctx::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut f = crate::function::Function::new(ctx.clone(), "f", i32_ty, &[i32_ty, i32_ty]);
        let entry = f.create_block();
        let add = f.make_binary(ValueRef::Param(ParamId(0)), BinaryOp::Add, ValueRef::Param(ParamId(1)));
        let add_id = f.push_back(entry, add);
        let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
        f.push_back(entry, ret);

        let printed = print_function(&f);
        assert!(printed.contains("entry:"));
        assert!(printed.contains("add i32"));
        assert!(printed.contains("ret i32"));
    }

    #[test]
    fn prints_extern_declaration() {
        let ctx = Ctx::new();
        let i32_ty = ctx.borrow().i32_ty();
        let f = crate::function::Function::new(ctx.clone(), "puts", i32_ty, &[i32_ty]);
        let printed = print_function(&f);
        assert_eq!(printed, "extern i32 puts(i32);\n");
    }
}
