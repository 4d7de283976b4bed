//! Bytecode instruction set
//!
//! Register machine instructions. Operands are registers or stack slots
//! ([`Loc`]); jump targets are instruction indices within the function.
//! Fixed operands of an instruction are always registers, variadic ones
//! (call arguments, array elements) may be stack slots.

use crate::ir::{BinaryOp, UnaryOp};
use crate::regalloc::Loc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A constant embedded in an instruction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Undefined,
    Null,
    /// Uninitialized `let`/`const` binding
    Empty,
    Bool(bool),
    Number(f64),
    /// Index into the module string table
    String(u32),
    /// Index into the module BigInt table
    BigInt(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // ===== Constants & moves =====
    /// dst = constant
    LoadConst { dst: Loc, value: Constant },
    /// dst = this (index 0) or argument `index`
    LoadParam { dst: Loc, index: u32 },
    /// dst = src
    Mov { dst: Loc, src: Loc },

    // ===== Arithmetic =====
    /// dst = lhs op rhs, generic JavaScript semantics
    Binary { op: BinaryOp, dst: Loc, lhs: Loc, rhs: Loc },
    /// dst = lhs op rhs, both operands known to be Numbers
    BinaryN { op: BinaryOp, dst: Loc, lhs: Loc, rhs: Loc },
    /// dst = op src
    Unary { op: UnaryOp, dst: Loc, src: Loc },
    /// Throw a ReferenceError if src holds the empty sentinel; dst = src
    CheckInit { dst: Loc, src: Loc },

    // ===== Environments =====
    /// dst = new environment of `layout` whose parent is `parent`
    CreateEnv { dst: Loc, layout: u32, parent: Option<Loc> },
    /// dst = environment captured by the running closure
    GetParentEnv { dst: Loc },
    /// dst = environment `hops` parent links above env
    ResolveEnv { dst: Loc, env: Loc, hops: u32 },
    /// dst = env[slot]
    LoadFrame { dst: Loc, env: Loc, slot: u32 },
    /// env[slot] = src
    StoreFrame { env: Loc, slot: u32, src: Loc },
    /// dst = closure of function `func` capturing env
    CreateClosure { dst: Loc, func: u32, env: Option<Loc> },

    // ===== Globals =====
    /// dst = globals[strings[name]]
    LoadGlobal { dst: Loc, name: u32 },
    /// dst = globals[strings[name]], undefined when absent
    TryLoadGlobal { dst: Loc, name: u32 },
    /// globals[strings[name]] = src
    StoreGlobal { name: u32, src: Loc },
    /// Define globals[strings[name]] as undefined unless present
    DeclareGlobal { name: u32 },

    // ===== Objects =====
    /// dst = new empty object
    NewObject { dst: Loc },
    /// dst = [elements...]
    NewArray { dst: Loc, elements: Vec<Loc> },
    /// dst = obj[strings[key]]
    GetById { dst: Loc, obj: Loc, key: u32 },
    /// obj[strings[key]] = src
    PutById { obj: Loc, key: u32, src: Loc },
    /// dst = obj[key]
    GetByVal { dst: Loc, obj: Loc, key: Loc },
    /// obj[key] = src
    PutByVal { obj: Loc, key: Loc, src: Loc },
    /// dst = delete obj[strings[key]]
    DeleteById { dst: Loc, obj: Loc, key: u32 },
    /// dst = delete obj[key]
    DeleteByVal { dst: Loc, obj: Loc, key: Loc },

    // ===== Calls =====
    /// dst = callee.call(this, args...)
    Call { dst: Loc, callee: Loc, this: Loc, args: Vec<Loc> },
    /// dst = new callee(args...)
    Construct { dst: Loc, callee: Loc, args: Vec<Loc> },
    /// dst = exception being handled
    CatchValue { dst: Loc },

    // ===== Control flow =====
    Jump { target: u32 },
    JumpIfTrue { cond: Loc, target: u32 },
    JumpIfFalse { cond: Loc, target: u32 },
    /// Jump to the first case strictly equal to value, else to default
    Switch { value: Loc, cases: Vec<(Constant, u32)>, default: u32 },
    Return { src: Loc },
    Throw { src: Loc },
    /// Control never reaches here
    Unreachable,
}

impl Instr {
    /// Jump targets, for patching and inspection
    pub fn targets_mut(&mut self) -> Vec<&mut u32> {
        match self {
            Instr::Jump { target } | Instr::JumpIfTrue { target, .. } | Instr::JumpIfFalse { target, .. } => {
                vec![target]
            }
            Instr::Switch { cases, default, .. } => {
                let mut targets: Vec<&mut u32> = cases.iter_mut().map(|(_, t)| t).collect();
                targets.push(default);
                targets
            }
            _ => Vec::new(),
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::LoadConst { .. } => "LoadConst",
            Instr::LoadParam { .. } => "LoadParam",
            Instr::Mov { .. } => "Mov",
            Instr::Binary { .. } => "Binary",
            Instr::BinaryN { .. } => "BinaryN",
            Instr::Unary { .. } => "Unary",
            Instr::CheckInit { .. } => "CheckInit",
            Instr::CreateEnv { .. } => "CreateEnv",
            Instr::GetParentEnv { .. } => "GetParentEnv",
            Instr::ResolveEnv { .. } => "ResolveEnv",
            Instr::LoadFrame { .. } => "LoadFrame",
            Instr::StoreFrame { .. } => "StoreFrame",
            Instr::CreateClosure { .. } => "CreateClosure",
            Instr::LoadGlobal { .. } => "LoadGlobal",
            Instr::TryLoadGlobal { .. } => "TryLoadGlobal",
            Instr::StoreGlobal { .. } => "StoreGlobal",
            Instr::DeclareGlobal { .. } => "DeclareGlobal",
            Instr::NewObject { .. } => "NewObject",
            Instr::NewArray { .. } => "NewArray",
            Instr::GetById { .. } => "GetById",
            Instr::PutById { .. } => "PutById",
            Instr::GetByVal { .. } => "GetByVal",
            Instr::PutByVal { .. } => "PutByVal",
            Instr::DeleteById { .. } => "DeleteById",
            Instr::DeleteByVal { .. } => "DeleteByVal",
            Instr::Call { .. } => "Call",
            Instr::Construct { .. } => "Construct",
            Instr::CatchValue { .. } => "CatchValue",
            Instr::Jump { .. } => "Jump",
            Instr::JumpIfTrue { .. } => "JumpIfTrue",
            Instr::JumpIfFalse { .. } => "JumpIfFalse",
            Instr::Switch { .. } => "Switch",
            Instr::Return { .. } => "Return",
            Instr::Throw { .. } => "Throw",
            Instr::Unreachable => "Unreachable",
        }
    }

    /// Can control continue with the next instruction?
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instr::Jump { .. }
                | Instr::Switch { .. }
                | Instr::Return { .. }
                | Instr::Throw { .. }
                | Instr::Unreachable
        )
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Undefined => write!(f, "undefined"),
            Constant::Null => write!(f, "null"),
            Constant::Empty => write!(f, "<empty>"),
            Constant::Bool(b) => write!(f, "{}", b),
            Constant::Number(n) => write!(f, "{}", crate::ir::js::number_to_string(*n)),
            Constant::String(i) => write!(f, "str#{}", i),
            Constant::BigInt(i) => write!(f, "bigint#{}", i),
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |locs: &[Loc]| locs.iter().map(|l| l.to_string()).collect::<Vec<_>>().join(", ");
        match self {
            Instr::LoadConst { dst, value } => write!(f, "{} = LoadConst {}", dst, value),
            Instr::LoadParam { dst, index } => write!(f, "{} = LoadParam {}", dst, index),
            Instr::Mov { dst, src } => write!(f, "{} = Mov {}", dst, src),
            Instr::Binary { op, dst, lhs, rhs } => write!(f, "{} = {} {} {}", dst, lhs, op.symbol(), rhs),
            Instr::BinaryN { op, dst, lhs, rhs } => write!(f, "{} = {} {}n {}", dst, lhs, op.symbol(), rhs),
            Instr::Unary { op, dst, src } => write!(f, "{} = {} {}", dst, op.name(), src),
            Instr::CheckInit { dst, src } => write!(f, "{} = CheckInit {}", dst, src),
            Instr::CreateEnv { dst, layout, parent } => match parent {
                Some(parent) => write!(f, "{} = CreateEnv #{} parent {}", dst, layout, parent),
                None => write!(f, "{} = CreateEnv #{}", dst, layout),
            },
            Instr::GetParentEnv { dst } => write!(f, "{} = GetParentEnv", dst),
            Instr::ResolveEnv { dst, env, hops } => write!(f, "{} = ResolveEnv {} up {}", dst, env, hops),
            Instr::LoadFrame { dst, env, slot } => write!(f, "{} = {}[{}]", dst, env, slot),
            Instr::StoreFrame { env, slot, src } => write!(f, "{}[{}] = {}", env, slot, src),
            Instr::CreateClosure { dst, func, env } => match env {
                Some(env) => write!(f, "{} = CreateClosure fn#{} env {}", dst, func, env),
                None => write!(f, "{} = CreateClosure fn#{}", dst, func),
            },
            Instr::LoadGlobal { dst, name } => write!(f, "{} = LoadGlobal str#{}", dst, name),
            Instr::TryLoadGlobal { dst, name } => write!(f, "{} = TryLoadGlobal str#{}", dst, name),
            Instr::StoreGlobal { name, src } => write!(f, "StoreGlobal str#{} = {}", name, src),
            Instr::DeclareGlobal { name } => write!(f, "DeclareGlobal str#{}", name),
            Instr::NewObject { dst } => write!(f, "{} = NewObject", dst),
            Instr::NewArray { dst, elements } => write!(f, "{} = NewArray [{}]", dst, list(elements)),
            Instr::GetById { dst, obj, key } => write!(f, "{} = {}.str#{}", dst, obj, key),
            Instr::PutById { obj, key, src } => write!(f, "{}.str#{} = {}", obj, key, src),
            Instr::GetByVal { dst, obj, key } => write!(f, "{} = {}[{}]", dst, obj, key),
            Instr::PutByVal { obj, key, src } => write!(f, "{}[{}] = {}", obj, key, src),
            Instr::DeleteById { dst, obj, key } => write!(f, "{} = delete {}.str#{}", dst, obj, key),
            Instr::DeleteByVal { dst, obj, key } => write!(f, "{} = delete {}[{}]", dst, obj, key),
            Instr::Call { dst, callee, this, args } => {
                write!(f, "{} = Call {} this {} ({})", dst, callee, this, list(args))
            }
            Instr::Construct { dst, callee, args } => write!(f, "{} = Construct {} ({})", dst, callee, list(args)),
            Instr::CatchValue { dst } => write!(f, "{} = CatchValue", dst),
            Instr::Jump { target } => write!(f, "Jump @{}", target),
            Instr::JumpIfTrue { cond, target } => write!(f, "JumpIfTrue {} @{}", cond, target),
            Instr::JumpIfFalse { cond, target } => write!(f, "JumpIfFalse {} @{}", cond, target),
            Instr::Switch { value, cases, default } => {
                write!(f, "Switch {}", value)?;
                for (constant, target) in cases {
                    write!(f, " {} => @{},", constant, target)?;
                }
                write!(f, " default => @{}", default)
            }
            Instr::Return { src } => write!(f, "Return {}", src),
            Instr::Throw { src } => write!(f, "Throw {}", src),
            Instr::Unreachable => write!(f, "Unreachable"),
        }
    }
}
