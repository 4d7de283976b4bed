//! Low-level IR
//!
//! The allocator's output: blocks of operations whose operands and results
//! are concrete registers or stack slots, with explicit moves for phi
//! resolution, spills and reloads.

use crate::ir::{BlockId, FuncId, InstrKind, ScopeId, Type};
use serde::{Deserialize, Serialize};
use std::fmt;
use tern_ast::{FunctionKind, Span};

/// Where a value lives after allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Loc {
    Reg(u16),
    Stack(u32),
}

impl Loc {
    pub fn is_stack(self) -> bool {
        matches!(self, Loc::Stack(_))
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Loc::Reg(r) => write!(f, "r{}", r),
            Loc::Stack(s) => write!(f, "s{}", s),
        }
    }
}

/// Operand of a LIR operation
#[derive(Debug, Clone, PartialEq)]
pub enum LirOperand {
    Loc(Loc),
    /// Literal property name of a named property access
    Key(String),
}

impl fmt::Display for LirOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirOperand::Loc(loc) => loc.fmt(f),
            LirOperand::Key(key) => write!(f, "{:?}", key),
        }
    }
}

/// An IR operation with allocated operands
#[derive(Debug, Clone)]
pub struct LirOp {
    pub kind: InstrKind,
    pub dst: Option<Loc>,
    pub args: Vec<LirOperand>,
    /// Inferred types of the IR operands, parallel to `args`
    pub arg_types: Vec<Type>,
    /// Parent links to walk for `ResolveScope`
    pub hops: Option<u32>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum LirInstr {
    Op(LirOp),
    Move { dst: Loc, src: Loc },
}

impl fmt::Display for LirInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LirInstr::Move { dst, src } => write!(f, "{} = mov {}", dst, src),
            LirInstr::Op(op) => {
                if let Some(dst) = op.dst {
                    write!(f, "{} = ", dst)?;
                }
                write!(f, "{}", op.kind.name())?;
                for (i, arg) in op.args.iter().enumerate() {
                    write!(f, "{}{}", if i == 0 { " " } else { ", " }, arg)?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct LirBlock {
    pub id: BlockId,
    pub handler: Option<BlockId>,
    pub instrs: Vec<LirInstr>,
}

/// A function after register allocation
#[derive(Debug, Clone)]
pub struct LirFunction {
    pub id: FuncId,
    pub name: Option<String>,
    pub param_count: u32,
    pub kind: FunctionKind,
    /// Environment layout the function creates
    pub scope: Option<ScopeId>,
    /// Blocks in emission order; the first is the entry
    pub blocks: Vec<LirBlock>,
    /// Registers used, scratch registers included
    pub register_count: u16,
    pub stack_slots: u32,
    pub span: Span,
}

impl LirFunction {
    pub fn instr_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instrs.len()).sum()
    }

    /// Every location an instruction reads or writes
    pub fn locations(&self) -> impl Iterator<Item = Loc> + '_ {
        self.blocks.iter().flat_map(|b| b.instrs.iter()).flat_map(|instr| {
            let locs: Vec<Loc> = match instr {
                LirInstr::Move { dst, src } => vec![*dst, *src],
                LirInstr::Op(op) => op
                    .dst
                    .into_iter()
                    .chain(op.args.iter().filter_map(|a| match a {
                        LirOperand::Loc(loc) => Some(*loc),
                        LirOperand::Key(_) => None,
                    }))
                    .collect(),
            };
            locs
        })
    }
}

impl fmt::Display for LirFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "lir {} (registers: {}, stack: {})",
            self.name.as_deref().unwrap_or("<anonymous>"),
            self.register_count,
            self.stack_slots
        )?;
        for block in &self.blocks {
            match block.handler {
                Some(handler) => writeln!(f, "{} (handler {}):", block.id, handler)?,
                None => writeln!(f, "{}:", block.id)?,
            }
            for instr in &block.instrs {
                writeln!(f, "    {}", instr)?;
            }
        }
        Ok(())
    }
}
