//! Bytecode modules
//!
//! The compiler's output: one [`BytecodeFunction`] per IR function plus the
//! module-wide string, BigInt and environment layout tables the functions
//! index into.

pub mod emitter;
pub mod opcode;

pub use emitter::{Emitter, LayoutTable};
pub use opcode::{Constant, Instr};

use crate::ir::Type;
use crate::regalloc::Loc;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::fmt;
use tern_ast::FunctionKind;

/// One slot of an environment layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotInfo {
    pub name: String,
    /// Union of every value the slot may hold
    pub ty: Type,
}

/// Shape of an environment record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvLayout {
    /// Layout of the next environment on the static chain
    pub parent: Option<u32>,
    pub slots: Vec<SlotInfo>,
}

/// Instructions in `start..end` transfer exceptions to `handler`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
}

/// Source position of one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugEntry {
    pub line: u32,
    pub column: u32,
}

/// Function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeFunction {
    pub name: Option<String>,
    /// Declared parameters, `this` excluded
    pub param_count: u32,
    pub kind: FunctionKind,
    pub instrs: Vec<Instr>,
    /// Registers the function touches
    pub register_count: u16,
    /// Stack slots for spills and stack variables
    pub stack_size: u32,
    /// Disjoint ranges, sorted by start
    pub exception_table: Vec<ExceptionEntry>,
    /// Layout of the environment the function creates
    pub environment: Option<u32>,
    /// Parallel to `instrs` when debug info is enabled, empty otherwise
    pub debug: Vec<DebugEntry>,
}

impl BytecodeFunction {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }

    /// Innermost handler covering instruction `pc`
    pub fn handler_for(&self, pc: u32) -> Option<u32> {
        self.exception_table
            .iter()
            .find(|entry| entry.start <= pc && pc < entry.end)
            .map(|entry| entry.handler)
    }
}

/// A compiled module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BytecodeModule {
    pub name: String,
    /// Function 0 is the top-level program
    pub functions: Vec<BytecodeFunction>,
    pub strings: Vec<String>,
    pub bigints: Vec<BigInt>,
    pub layouts: Vec<EnvLayout>,
    /// Size of the register file the code was allocated for
    pub register_file: u16,
    /// Registers a call may clobber
    pub caller_saved: u16,
}

impl BytecodeModule {
    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index as usize).map(String::as_str)
    }

    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instrs.len()).sum()
    }

    /// Pretty JSON for inspection
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Check that every index an instruction holds is in range
    pub fn validate(&self) -> Result<(), String> {
        for func in &self.functions {
            let name = func.display_name();
            let len = func.instrs.len() as u32;
            let check_loc = |loc: &Loc| -> Result<(), String> {
                match *loc {
                    Loc::Reg(r) if r >= self.register_file => {
                        Err(format!("{}: register r{} outside the register file", name, r))
                    }
                    Loc::Stack(s) if s >= func.stack_size => Err(format!("{}: stack slot s{} out of range", name, s)),
                    _ => Ok(()),
                }
            };
            for (pc, instr) in func.instrs.iter().enumerate() {
                let mut instr = instr.clone();
                for target in instr.targets_mut() {
                    if *target >= len {
                        return Err(format!("{}: jump at {} to {} past the end", name, pc, target));
                    }
                }
                for loc in locations(&instr) {
                    check_loc(&loc)?;
                }
                match &instr {
                    Instr::LoadConst {
                        value: Constant::String(i),
                        ..
                    }
                    | Instr::LoadGlobal { name: i, .. }
                    | Instr::TryLoadGlobal { name: i, .. }
                    | Instr::StoreGlobal { name: i, .. }
                    | Instr::DeclareGlobal { name: i }
                    | Instr::GetById { key: i, .. }
                    | Instr::PutById { key: i, .. }
                    | Instr::DeleteById { key: i, .. }
                        if *i as usize >= self.strings.len() =>
                    {
                        return Err(format!("{}: string #{} out of range", name, i));
                    }
                    Instr::CreateEnv { layout, .. } if *layout as usize >= self.layouts.len() => {
                        return Err(format!("{}: layout #{} out of range", name, layout));
                    }
                    Instr::CreateClosure { func: f, .. } if *f as usize >= self.functions.len() => {
                        return Err(format!("{}: function #{} out of range", name, f));
                    }
                    _ => {}
                }
            }
            for entry in &func.exception_table {
                if entry.start >= entry.end || entry.end > len || entry.handler >= len {
                    return Err(format!("{}: malformed exception entry {:?}", name, entry));
                }
            }
            if !func.debug.is_empty() && func.debug.len() != func.instrs.len() {
                return Err(format!("{}: debug records do not match instructions", name));
            }
        }
        Ok(())
    }
}

/// Every register or stack slot an instruction reads or writes
pub fn locations(instr: &Instr) -> Vec<Loc> {
    match instr {
        Instr::LoadConst { dst, .. }
        | Instr::LoadParam { dst, .. }
        | Instr::GetParentEnv { dst }
        | Instr::LoadGlobal { dst, .. }
        | Instr::TryLoadGlobal { dst, .. }
        | Instr::NewObject { dst }
        | Instr::CatchValue { dst } => vec![*dst],
        Instr::Mov { dst, src } | Instr::Unary { dst, src, .. } | Instr::CheckInit { dst, src } => vec![*dst, *src],
        Instr::Binary { dst, lhs, rhs, .. } | Instr::BinaryN { dst, lhs, rhs, .. } => vec![*dst, *lhs, *rhs],
        Instr::CreateEnv { dst, parent, .. } => std::iter::once(*dst).chain(*parent).collect(),
        Instr::ResolveEnv { dst, env, .. } | Instr::LoadFrame { dst, env, .. } => vec![*dst, *env],
        Instr::StoreFrame { env, src, .. } => vec![*env, *src],
        Instr::CreateClosure { dst, env, .. } => std::iter::once(*dst).chain(*env).collect(),
        Instr::StoreGlobal { src, .. } => vec![*src],
        Instr::DeclareGlobal { .. } | Instr::Jump { .. } | Instr::Unreachable => Vec::new(),
        Instr::NewArray { dst, elements } => std::iter::once(*dst).chain(elements.iter().copied()).collect(),
        Instr::GetById { dst, obj, .. } | Instr::DeleteById { dst, obj, .. } => vec![*dst, *obj],
        Instr::PutById { obj, src, .. } => vec![*obj, *src],
        Instr::GetByVal { dst, obj, key } | Instr::DeleteByVal { dst, obj, key } => vec![*dst, *obj, *key],
        Instr::PutByVal { obj, key, src } => vec![*obj, *key, *src],
        Instr::Call { dst, callee, this, args } => [*dst, *callee, *this].into_iter().chain(args.iter().copied()).collect(),
        Instr::Construct { dst, callee, args } => [*dst, *callee].into_iter().chain(args.iter().copied()).collect(),
        Instr::JumpIfTrue { cond, .. } | Instr::JumpIfFalse { cond, .. } => vec![*cond],
        Instr::Switch { value, .. } => vec![*value],
        Instr::Return { src } | Instr::Throw { src } => vec![*src],
    }
}

impl fmt::Display for BytecodeModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for (i, s) in self.strings.iter().enumerate() {
            writeln!(f, "  str#{} = {:?}", i, s)?;
        }
        for (i, layout) in self.layouts.iter().enumerate() {
            let slots: Vec<&str> = layout.slots.iter().map(|s| s.name.as_str()).collect();
            match layout.parent {
                Some(parent) => writeln!(f, "  layout#{} (parent #{}) [{}]", i, parent, slots.join(", "))?,
                None => writeln!(f, "  layout#{} [{}]", i, slots.join(", "))?,
            }
        }
        for (index, func) in self.functions.iter().enumerate() {
            writeln!(
                f,
                "fn#{} {} (params: {}, registers: {}, stack: {})",
                index,
                func.display_name(),
                func.param_count,
                func.register_count,
                func.stack_size
            )?;
            for (pc, instr) in func.instrs.iter().enumerate() {
                writeln!(f, "  {:4}  {}", pc, instr)?;
            }
            for entry in &func.exception_table {
                writeln!(f, "  try [{}, {}) -> @{}", entry.start, entry.end, entry.handler)?;
            }
        }
        Ok(())
    }
}
