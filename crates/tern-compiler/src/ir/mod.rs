//! Intermediate representation
//!
//! SSA-form IR in per-function arenas. Values are instruction results,
//! parameters or literals; environments are explicit values produced by
//! scope instructions.

pub mod block;
pub mod builder;
pub mod function;
pub mod instr;
pub mod js;
pub mod module;
pub mod pretty;
pub mod types;
pub mod value;

pub use block::BasicBlock;
pub use builder::FunctionBuilder;
pub use function::IrFunction;
pub use instr::{BinaryOp, InstrKind, Instruction, UnaryOp};
pub use module::{env_scope, IrModule, ScopeDesc, Variable};
pub use pretty::PrettyPrint;
pub use types::Type;
pub use value::{BlockId, FuncId, InstrId, Literal, Operand, ScopeId, VarId};
