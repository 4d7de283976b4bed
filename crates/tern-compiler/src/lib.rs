//! Tern compiler core
//!
//! Turns an analyzed JavaScript AST into register-allocated bytecode:
//! IR construction, type inference, an optimization pipeline, linear scan
//! register allocation and bytecode emission.

pub mod analysis;
pub mod bytecode;
pub mod compiler;
pub mod config;
pub mod constants;
pub mod error;
pub mod infer;
pub mod ir;
pub mod lower;
pub mod optimize;
pub mod regalloc;
pub mod verify;

pub use bytecode::{BytecodeFunction, BytecodeModule, Constant, Instr};
pub use compiler::{CompileOutput, Compiler};
pub use config::{CompilerOptions, OptLevel};
pub use constants::ConstantTable;
pub use error::{CompileError, CompileResult};
pub use ir::{IrFunction, IrModule, PrettyPrint};
pub use optimize::Pipeline;
pub use regalloc::{Allocation, Loc};
