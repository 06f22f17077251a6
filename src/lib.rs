//! An SSA intermediate representation and optimizing middle-end: value
//! hierarchy, context/interning, dominance and loop analysis, pointer
//! aliasing, validation, a textual printer/parser, and a pass pipeline
//! driven by a serializable configuration (spec.md OVERVIEW).

pub mod analysis;
pub mod block;
pub mod builder;
pub mod context;
pub mod error;
pub mod function;
pub mod instr;
pub mod module;
pub mod parser;
pub mod passes;
pub mod pipeline;
pub mod printer;
pub mod types;
pub mod validator;
pub mod value;

pub use context::Context;
pub use error::{IrError, Result, ValidationError};
pub use function::{FuncId, Function};
pub use module::Module;
pub use pipeline::{PassManager, PassKind, PassPipelineConfig, StrictValidationFailure};
pub use types::{TypeId, TypeKind};
pub use value::{BlockId, InstrId, ParamId, ValueRef};
