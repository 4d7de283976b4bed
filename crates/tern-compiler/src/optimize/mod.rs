//! Optimization pipeline
//!
//! Passes run in a fixed order, repeatedly, until a whole round reports no
//! change or `max_iterations` is reached. Types are re-inferred after every
//! pass that changed something, and the verifier runs after it when
//! verification is on.

pub mod cse;
pub mod dce;
pub mod env_lower;
pub mod inline;
pub mod mem2reg;
pub mod simplify;

use crate::analysis::Cfg;
use crate::config::{CompilerOptions, OptLevel};
use crate::error::{CompileError, CompileResult};
use crate::infer::TypeInference;
use crate::ir::{InstrKind, IrFunction, IrModule};
use crate::verify::verify_module;
use rayon::prelude::*;
use tracing::{debug, info_span};

pub use cse::CommonSubexpressionElimination;
pub use dce::DeadCodeElimination;
pub use env_lower::EnvironmentLowering;
pub use inline::Inliner;
pub use mem2reg::ScalarPromotion;
pub use simplify::Simplify;

/// Every pass name, in pipeline order
pub const PASS_NAMES: &[&str] = &["mem2reg", "inline", "cse", "dce", "simplify", "env-lower"];

/// A checkable property of the IR
#[derive(Clone, Copy)]
pub struct Condition {
    pub name: &'static str,
    pub check: fn(&IrModule) -> bool,
}

impl std::fmt::Debug for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Types reflect the current instructions
pub const TYPES_INFERRED: Condition = Condition {
    name: "types-inferred",
    check: |module| module.types_inferred,
};

/// Every live block is reachable from its function's entry
pub const NO_UNREACHABLE_BLOCKS: Condition = Condition {
    name: "no-unreachable-blocks",
    check: |module| {
        module.functions.iter().all(|func| {
            let cfg = Cfg::new(func);
            func.blocks().all(|b| cfg.is_reachable(b.id))
        })
    },
};

/// No phi merges a single value
pub const NO_TRIVIAL_PHIS: Condition = Condition {
    name: "no-trivial-phis",
    check: |module| {
        module.functions.iter().all(|func| {
            func.instr_ids()
                .into_iter()
                .all(|id| simplify::trivial_phi_value(func, id).is_none())
        })
    },
};

/// No environment is created without being used
pub const NO_DEAD_SCOPES: Condition = Condition {
    name: "no-dead-scopes",
    check: |module| {
        module.functions.iter().all(|func| {
            func.instr_ids().into_iter().all(|id| {
                let instr = func.instr(id);
                !matches!(instr.kind, InstrKind::CreateScope(_)) || instr.has_users()
            })
        })
    },
};

/// Settings visible to every pass
#[derive(Debug, Clone, Copy)]
pub struct PassContext<'a> {
    pub options: &'a CompilerOptions,
}

impl PassContext<'_> {
    pub fn parallel(&self) -> bool {
        self.options.parallel
    }
}

/// An optimization pass over a whole module
pub trait OptPass: Send + Sync {
    /// Name of this pass (for configuration and diagnostics)
    fn name(&self) -> &'static str;

    /// Properties the pass relies on
    fn preconditions(&self) -> &'static [Condition] {
        &[]
    }

    /// Properties the pass establishes
    fn postconditions(&self) -> &'static [Condition] {
        &[]
    }

    /// Run the pass; returns whether the IR changed
    fn run(&self, module: &mut IrModule, ctx: &PassContext<'_>) -> bool;
}

/// Apply `f` to every function, on the rayon pool when `parallel` is set.
/// Returns whether any call reported a change.
pub(crate) fn for_each_function<F>(functions: &mut [IrFunction], parallel: bool, f: F) -> bool
where
    F: Fn(&mut IrFunction) -> bool + Send + Sync,
{
    if parallel {
        functions
            .par_iter_mut()
            .map(|func| f(func))
            .reduce(|| false, |a, b| a | b)
    } else {
        functions
            .iter_mut()
            .fold(false, |changed, func| f(func) | changed)
    }
}

/// What a pipeline run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub iterations: usize,
    /// Names of passes that changed the IR, in execution order
    pub changes: Vec<&'static str>,
}

/// The ordered pass list
pub struct Pipeline {
    passes: Vec<Box<dyn OptPass>>,
}

impl Pipeline {
    /// The standard pipeline for the given options
    pub fn new(options: &CompilerOptions) -> Self {
        let candidates: Vec<Box<dyn OptPass>> = match options.opt_level {
            OptLevel::None => Vec::new(),
            OptLevel::Basic => vec![
                Box::new(ScalarPromotion),
                Box::new(CommonSubexpressionElimination),
                Box::new(DeadCodeElimination),
                Box::new(Simplify),
                Box::new(EnvironmentLowering),
            ],
            OptLevel::Full => vec![
                Box::new(ScalarPromotion),
                Box::new(Inliner),
                Box::new(CommonSubexpressionElimination),
                Box::new(DeadCodeElimination),
                Box::new(Simplify),
                Box::new(EnvironmentLowering),
            ],
        };
        Pipeline {
            passes: candidates
                .into_iter()
                .filter(|pass| options.is_pass_enabled(pass.name()))
                .collect(),
        }
    }

    /// Create an empty pipeline (no passes)
    pub fn empty() -> Self {
        Pipeline { passes: Vec::new() }
    }

    /// Add a pass to the end of the pipeline
    pub fn add_pass(&mut self, pass: Box<dyn OptPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Optimize `module` to a fixed point
    pub fn run(&self, module: &mut IrModule, options: &CompilerOptions) -> CompileResult<PipelineStats> {
        let ctx = PassContext { options };
        let mut inference = TypeInference::new();
        let mut stats = PipelineStats::default();
        if self.passes.is_empty() {
            return Ok(stats);
        }
        if !module.types_inferred {
            inference.run(module);
        }

        for iteration in 0..options.max_iterations.max(1) {
            stats.iterations = iteration + 1;
            let mut changed_any = false;
            for pass in &self.passes {
                let _span = info_span!("pass", name = pass.name(), iteration).entered();
                if options.verify {
                    check_conditions(module, pass.name(), "precondition", pass.preconditions())?;
                }
                let changed = pass.run(module, &ctx);
                debug!(
                    pass = pass.name(),
                    changed,
                    instructions = module.instruction_count(),
                    "pass finished"
                );
                if changed {
                    changed_any = true;
                    stats.changes.push(pass.name());
                    inference.run(module);
                    if options.verify {
                        verify_module(module, pass.name())?;
                    }
                }
                if options.verify {
                    check_conditions(module, pass.name(), "postcondition", pass.postconditions())?;
                }
            }
            if !changed_any {
                break;
            }
        }
        debug!(iterations = stats.iterations, "pipeline finished");
        Ok(stats)
    }
}

fn check_conditions(module: &IrModule, pass: &str, what: &str, conditions: &[Condition]) -> CompileResult<()> {
    for condition in conditions {
        if !(condition.check)(module) {
            return Err(CompileError::internal(
                module.name.clone(),
                pass,
                format!("{} '{}' does not hold", what, condition.name),
            ));
        }
    }
    Ok(())
}
