//! Compilation driver
//!
//! Runs the stages in order over one module: IR construction, the
//! optimization pipeline (which owns type inference), register allocation
//! and bytecode emission. Every stage consumes the previous stage's output.

use crate::bytecode::{BytecodeModule, Emitter, LayoutTable};
use crate::config::CompilerOptions;
use crate::constants::ConstantTable;
use crate::error::{CompileError, CompileResult};
use crate::infer::infer_module;
use crate::ir::{IrFunction, IrModule};
use crate::lower::lower_program;
use crate::optimize::{Pipeline, PipelineStats};
use crate::regalloc::{allocate, Allocation, LirFunction};
use crate::verify::verify_module;
use rayon::prelude::*;
use tern_ast::{DeclTable, Program};
use tracing::{debug, instrument};

/// Everything a compilation produced, for inspection
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub bytecode: BytecodeModule,
    /// The module after optimization
    pub ir: IrModule,
    /// Allocated code per function, indexed like `ir.functions`
    pub lir: Vec<LirFunction>,
    pub allocations: Vec<Allocation>,
    pub stats: PipelineStats,
}

pub struct Compiler {
    options: CompilerOptions,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Compile an analyzed program into a bytecode module
    pub fn compile(&self, program: &Program, decls: &DeclTable) -> CompileResult<CompileOutput> {
        let module = self.build_ir(program, decls)?;
        self.compile_ir(module)
    }

    /// Compile a module that is already in IR form
    pub fn compile_ir(&self, mut module: IrModule) -> CompileResult<CompileOutput> {
        let stats = self.optimize(&mut module)?;
        let (lir, allocations) = self.allocate(&module)?;
        let bytecode = self.emit(&module, &lir)?;
        Ok(CompileOutput {
            bytecode,
            ir: module,
            lir,
            allocations,
            stats,
        })
    }

    #[instrument(skip_all)]
    pub fn build_ir(&self, program: &Program, decls: &DeclTable) -> CompileResult<IrModule> {
        let module = lower_program(program, decls)?;
        if self.options.verify {
            verify_module(&module, "lower")?;
        }
        debug!(
            functions = module.function_count(),
            instructions = module.instruction_count(),
            "built IR"
        );
        Ok(module)
    }

    #[instrument(skip_all, fields(module = %module.name))]
    pub fn optimize(&self, module: &mut IrModule) -> CompileResult<PipelineStats> {
        let stats = Pipeline::new(&self.options).run(module, &self.options)?;
        // Allocation reads operand types even when nothing ran
        if !module.types_inferred {
            infer_module(module);
        }
        Ok(stats)
    }

    #[instrument(skip_all, fields(module = %module.name))]
    pub fn allocate(&self, module: &IrModule) -> CompileResult<(Vec<LirFunction>, Vec<Allocation>)> {
        let allocate_one = |func: &IrFunction| -> CompileResult<(LirFunction, Allocation)> {
            let (lir, allocation) = allocate(module, func, &self.options)?;
            if self.options.verify {
                allocation
                    .verify()
                    .map_err(|message| CompileError::internal(func.display_name(), "regalloc", message))?;
            }
            Ok((lir, allocation))
        };
        let results: Vec<(LirFunction, Allocation)> = if self.options.parallel {
            module.functions.par_iter().map(allocate_one).collect::<CompileResult<_>>()?
        } else {
            module.functions.iter().map(allocate_one).collect::<CompileResult<_>>()?
        };
        Ok(results.into_iter().unzip())
    }

    #[instrument(skip_all, fields(module = %module.name))]
    pub fn emit(&self, module: &IrModule, lir: &[LirFunction]) -> CompileResult<BytecodeModule> {
        let constants = ConstantTable::new();
        let layouts = LayoutTable::new(module);
        let emitter = Emitter::new(module, &constants, &layouts, self.options.debug_info);
        let functions = if self.options.parallel {
            lir.par_iter()
                .map(|f| emitter.emit_function(f))
                .collect::<CompileResult<Vec<_>>>()?
        } else {
            lir.iter()
                .map(|f| emitter.emit_function(f))
                .collect::<CompileResult<Vec<_>>>()?
        };
        let (strings, bigints) = constants.into_tables();
        let bytecode = BytecodeModule {
            name: module.name.clone(),
            functions,
            strings,
            bigints,
            layouts: layouts.layouts,
            register_file: self.options.register_count,
            caller_saved: self.options.caller_saved_registers,
        };
        if self.options.verify {
            bytecode
                .validate()
                .map_err(|message| CompileError::internal(module.name.clone(), "emit", message))?;
        }
        debug!(instructions = bytecode.instruction_count(), "emitted module");
        Ok(bytecode)
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}
