//! Pass pipeline runner (spec.md 2, 4.9, 6.2): a `serde`-deserializable
//! `PassPipelineConfig` naming which passes run, in what order, how many
//! times, and whether strict (revalidate-after-every-pass) mode is on,
//! plus `PassManager` that drives it over a `Module`.
//!
//! `PassKind` covers the eighteen function-scoped passes and the one
//! module-scoped pass (`Inline`) uniformly; `PassManager` dispatches on
//! that distinction internally so callers never see it.

use serde::{Deserialize, Serialize};

use crate::context::Context;
use crate::error::ValidationError;
use crate::function::Function;
use crate::module::Module;
use crate::passes;
use crate::validator;

/// One entry in the catalogue (spec.md 4.9), in the order named there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassKind {
    ConstFold,
    Simplify,
    BlockInvariant,
    CfgSimplify,
    DeadBlockElim,
    Dse,
    LoadElim,
    Dedup,
    Mem2Ssa,
    PhiMinimize,
    PhiToMemory,
    CondFlatten,
    GlobalReorder,
    Licm,
    LoopRotate,
    LoopUnroll,
    LoopMemExtract,
    KnownBits,
    Inline,
}

impl PassKind {
    fn name(self) -> &'static str {
        match self {
            PassKind::ConstFold => "const_fold",
            PassKind::Simplify => "simplify",
            PassKind::BlockInvariant => "block_invariant",
            PassKind::CfgSimplify => "cfg_simplify",
            PassKind::DeadBlockElim => "dead_block_elim",
            PassKind::Dse => "dse",
            PassKind::LoadElim => "load_elim",
            PassKind::Dedup => "dedup",
            PassKind::Mem2Ssa => "mem2ssa",
            PassKind::PhiMinimize => "phi_minimize",
            PassKind::PhiToMemory => "phi_to_memory",
            PassKind::CondFlatten => "cond_flatten",
            PassKind::GlobalReorder => "global_reorder",
            PassKind::Licm => "licm",
            PassKind::LoopRotate => "loop_rotate",
            PassKind::LoopUnroll => "loop_unroll",
            PassKind::LoopMemExtract => "loop_mem_extract",
            PassKind::KnownBits => "known_bits",
            PassKind::Inline => "inline",
        }
    }

    /// Runs this pass over one function; `false` for `Inline`, which is
    /// module-scoped and handled separately by `PassManager`.
    fn run_on_function(self, f: &mut Function) -> bool {
        match self {
            PassKind::ConstFold => passes::const_fold::run(f),
            PassKind::Simplify => passes::simplify::run(f),
            PassKind::BlockInvariant => passes::block_invariant::run(f),
            PassKind::CfgSimplify => passes::cfg_simplify::run(f),
            PassKind::DeadBlockElim => passes::dead_block_elim::run(f),
            PassKind::Dse => passes::dse::run(f),
            PassKind::LoadElim => passes::load_elim::run(f),
            PassKind::Dedup => passes::dedup::run(f),
            PassKind::Mem2Ssa => passes::mem2ssa::run(f),
            PassKind::PhiMinimize => passes::phi_minimize::run(f),
            PassKind::PhiToMemory => passes::phi_to_memory::run(f),
            PassKind::CondFlatten => passes::cond_flatten::run(f),
            PassKind::GlobalReorder => passes::global_reorder::run(f),
            PassKind::Licm => passes::licm::run(f),
            PassKind::LoopRotate => passes::loop_rotate::run(f),
            PassKind::LoopUnroll => passes::loop_unroll::run(f),
            PassKind::LoopMemExtract => passes::loop_mem_extract::run(f),
            PassKind::KnownBits => passes::known_bits::run(f),
            PassKind::Inline => unreachable!("Inline is module-scoped"),
        }
    }

    fn default_order() -> Vec<PassKind> {
        vec![
            PassKind::ConstFold,
            PassKind::Simplify,
            PassKind::BlockInvariant,
            PassKind::CfgSimplify,
            PassKind::DeadBlockElim,
            PassKind::Dse,
            PassKind::LoadElim,
            PassKind::Dedup,
            PassKind::Mem2Ssa,
            PassKind::PhiMinimize,
            PassKind::PhiToMemory,
            PassKind::CondFlatten,
            PassKind::GlobalReorder,
            PassKind::Licm,
            PassKind::LoopRotate,
            PassKind::LoopUnroll,
            PassKind::LoopMemExtract,
            PassKind::KnownBits,
            PassKind::Inline,
        ]
    }
}

/// Describes one pipeline run (spec.md 6.2): which passes, in what
/// order, how many times around the list, and whether to revalidate
/// after every pass. Deserializable from TOML; never reads environment
/// variables (spec.md 6.2 is explicit that there are none).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassPipelineConfig {
    pub passes: Vec<PassKind>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub strict: bool,
}

fn default_max_iterations() -> usize {
    4
}

impl Default for PassPipelineConfig {
    fn default() -> Self {
        PassPipelineConfig { passes: PassKind::default_order(), max_iterations: default_max_iterations(), strict: false }
    }
}

impl PassPipelineConfig {
    pub fn from_toml(s: &str) -> crate::error::Result<Self> {
        toml::from_str(s).map_err(|e| crate::error::IrError::Context(e.to_string()))
    }
}

/// Fatal: strict-mode validation failed after a pass (spec.md 6.2: "a
/// failed validation is fatal").
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("strict-mode validation failed after pass '{pass}': {errors:?}")]
pub struct StrictValidationFailure {
    pub pass: &'static str,
    pub errors: Vec<ValidationError>,
}

/// Drives a `PassPipelineConfig` over a `Module`, one pass at a time, up
/// to `max_iterations` full passes over the list or until a round makes
/// no change (spec.md 2: "runner threads flags"; 6.2: strict mode).
pub struct PassManager {
    config: PassPipelineConfig,
}

impl PassManager {
    pub fn new(config: PassPipelineConfig) -> Self {
        PassManager { config }
    }

    /// Runs the configured passes over every local (non-extern) function
    /// in `module`, plus `Inline` at module scope whenever it is listed.
    /// Returns whether anything changed.
    pub fn run(&self, module: &mut Module) -> Result<bool, StrictValidationFailure> {
        let context = module.context();
        let mut any_changed = false;
        for iteration in 0..self.config.max_iterations.max(1) {
            let mut round_changed = false;
            for &kind in &self.config.passes {
                let changed = if kind == PassKind::Inline {
                    passes::inline::run(module)
                } else {
                    self.run_function_pass(kind, module, &context)?
                };
                if changed {
                    log::trace!("pipeline: iteration {iteration}, pass '{}' changed the module", kind.name());
                    round_changed = true;
                } else {
                    log::trace!("pipeline: iteration {iteration}, pass '{}' made no change", kind.name());
                }
            }
            any_changed |= round_changed;
            if !round_changed {
                break;
            }
        }
        Ok(any_changed)
    }

    fn run_function_pass(
        &self,
        kind: PassKind,
        module: &mut Module,
        context: &std::rc::Rc<std::cell::RefCell<Context>>,
    ) -> Result<bool, StrictValidationFailure> {
        let mut changed = false;
        let ids: Vec<_> = module.local_function_ids().collect();
        for id in ids {
            let f = module.function_mut(id);
            let this_changed = kind.run_on_function(f);
            changed |= this_changed;
            log::debug!("pipeline: pass '{}' on function '{}': changed={}", kind.name(), f.name, this_changed);

            if self.config.strict && this_changed {
                if let Err(errors) = validator::validate(f, context) {
                    log::warn!("pipeline: strict-mode validation failed after pass '{}' on '{}'", kind.name(), f.name);
                    return Err(StrictValidationFailure { pass: kind.name(), errors });
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::BinaryOp;
    use crate::value::ValueRef;

    #[test]
    fn default_config_matches_catalogue_order() {
        let cfg = PassPipelineConfig::default();
        assert_eq!(cfg.passes.len(), 19);
        assert_eq!(cfg.passes[0], PassKind::ConstFold);
        assert_eq!(cfg.passes[18], PassKind::Inline);
        assert!(!cfg.strict);
    }

    #[test]
    fn roundtrips_through_toml() {
        let cfg = PassPipelineConfig::default();
        let s = toml::to_string(&cfg).unwrap();
        let parsed = PassPipelineConfig::from_toml(&s).unwrap();
        assert_eq!(parsed.passes.len(), cfg.passes.len());
        assert_eq!(parsed.max_iterations, cfg.max_iterations);
    }

    #[test]
    fn folds_constant_add_through_the_manager() {
        let ctx = Context::new();
        let i32_ty = ctx.borrow().i32_ty();
        let mut module = Module::new(ctx.clone());
        let id = module.create_function("f", i32_ty, &[]).unwrap();
        {
            let f = module.function_mut(id);
            let entry = f.create_block();
            let two = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 2));
            let three = ValueRef::Const(ctx.borrow_mut().get_constant(i32_ty, 3));
            let add = f.make_binary(two, BinaryOp::Add, three);
            let add_id = f.push_back(entry, add);
            let ret = f.make_ret(Some(ValueRef::Instr(add_id)));
            f.push_back(entry, ret);
        }

        let manager = PassManager::new(PassPipelineConfig { strict: true, ..PassPipelineConfig::default() });
        let changed = manager.run(&mut module).unwrap();
        assert!(changed);
        let f = module.function(id);
        let entry = f.entry_block().unwrap();
        let ret_inst = f.block(entry).instructions[0];
        assert!(matches!(f.inst(ret_inst).operands[0], ValueRef::Const(_)));
    }
}
