//! IR instructions
//!
//! An [`Instruction`] is an opcode ([`InstrKind`], which carries every
//! non-value immediate) plus an operand list. Terminators are ordinary
//! instructions that must come last in their block.
//!
//! Operand conventions:
//!
//! | kind            | operands                         |
//! |-----------------|----------------------------------|
//! | `Binary`        | `[lhs, rhs]`                     |
//! | `Phi`           | one per entry of its block list  |
//! | `StoreStack`    | `[slot, value]`                  |
//! | `CreateScope`   | `[]` or `[parent env]`           |
//! | `LoadFrame`     | `[env]`                          |
//! | `StoreFrame`    | `[env, value]`                   |
//! | `CreateClosure` | `[]` or `[env]`                  |
//! | `StoreProperty` | `[object, key, value]`           |
//! | `Call`          | `[callee, this, args...]`        |
//! | `Construct`     | `[callee, args...]`              |

use super::types::Type;
use super::value::{BlockId, FuncId, InstrId, Literal, Operand, ScopeId, VarId};
use serde::{Deserialize, Serialize};
use tern_ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    InstanceOf,
    In,
}

impl BinaryOp {
    pub fn from_ast(op: tern_ast::BinaryOp) -> Self {
        use tern_ast::BinaryOp as A;
        match op {
            A::Add => BinaryOp::Add,
            A::Sub => BinaryOp::Sub,
            A::Mul => BinaryOp::Mul,
            A::Div => BinaryOp::Div,
            A::Mod => BinaryOp::Mod,
            A::Exp => BinaryOp::Exp,
            A::BitAnd => BinaryOp::BitAnd,
            A::BitOr => BinaryOp::BitOr,
            A::BitXor => BinaryOp::BitXor,
            A::Shl => BinaryOp::Shl,
            A::Shr => BinaryOp::Shr,
            A::UShr => BinaryOp::UShr,
            A::Eq => BinaryOp::Eq,
            A::NotEq => BinaryOp::NotEq,
            A::StrictEq => BinaryOp::StrictEq,
            A::StrictNotEq => BinaryOp::StrictNotEq,
            A::Lt => BinaryOp::Lt,
            A::LtEq => BinaryOp::LtEq,
            A::Gt => BinaryOp::Gt,
            A::GtEq => BinaryOp::GtEq,
            A::InstanceOf => BinaryOp::InstanceOf,
            A::In => BinaryOp::In,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Exp => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::UShr => ">>>",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::StrictEq => "===",
            BinaryOp::StrictNotEq => "!==",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::InstanceOf => "instanceof",
            BinaryOp::In => "in",
        }
    }

    /// Operators whose result is always a boolean
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::StrictEq
                | BinaryOp::StrictNotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
                | BinaryOp::InstanceOf
                | BinaryOp::In
        )
    }

    /// Operators whose result is always an int32 when both operands are Numbers
    pub fn is_int32_producer(self) -> bool {
        matches!(
            self,
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr
        )
    }

    /// Arithmetic that has a Number-only fast form
    pub fn is_arithmetic(self) -> bool {
        !self.is_comparison()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    TypeOf,
    Void,
    Inc,
    Dec,
    ToNumeric,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Plus => "plus",
            UnaryOp::Not => "not",
            UnaryOp::BitNot => "bitnot",
            UnaryOp::TypeOf => "typeof",
            UnaryOp::Void => "void",
            UnaryOp::Inc => "inc",
            UnaryOp::Dec => "dec",
            UnaryOp::ToNumeric => "tonumeric",
        }
    }
}

/// Opcode and immediates of an instruction
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstrKind {
    // ===== Values =====
    Mov,
    Binary(BinaryOp),
    Unary(UnaryOp),
    /// Operands are parallel to the predecessor list
    Phi(Vec<BlockId>),
    /// Throws a ReferenceError when the operand is the empty sentinel
    ThrowIfEmpty,
    /// The exception being handled; first instruction of a catch block
    CatchValue,

    // ===== Stack variables =====
    AllocStack(String),
    LoadStack,
    StoreStack,

    // ===== Environments =====
    CreateScope(ScopeId),
    /// The environment captured by the running closure
    GetParentScope,
    /// Walk the parent chain from the operand up to the given layout
    ResolveScope(ScopeId),
    LoadFrame(VarId),
    StoreFrame(VarId),
    CreateClosure(FuncId),

    // ===== Globals =====
    LoadGlobal(String),
    /// `LoadGlobal` yielding undefined for a missing name (`typeof`)
    TryLoadGlobal(String),
    StoreGlobal(String),
    DeclareGlobal(String),

    // ===== Objects =====
    LoadProperty,
    StoreProperty,
    DeleteProperty,
    AllocObject,
    AllocArray,

    // ===== Calls =====
    /// `chain` lists the functions inlined to produce this call site
    Call { chain: Vec<FuncId> },
    Construct,

    // ===== Register allocation only =====
    LoadConst(Literal),
    LoadParam(u32),

    // ===== Terminators =====
    Branch(BlockId),
    CondBranch { then_block: BlockId, else_block: BlockId },
    Switch { cases: Vec<(Literal, BlockId)>, default: BlockId },
    Return,
    Throw,
    Unreachable,
    /// Enter the region guarded by `catch` and continue at `body`
    TryStart { body: BlockId, catch: BlockId },
    /// Leave the innermost guarded region and continue at `next`
    TryEnd { next: BlockId },
}

impl InstrKind {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstrKind::Branch(_)
                | InstrKind::CondBranch { .. }
                | InstrKind::Switch { .. }
                | InstrKind::Return
                | InstrKind::Throw
                | InstrKind::Unreachable
                | InstrKind::TryStart { .. }
                | InstrKind::TryEnd { .. }
        )
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstrKind::Phi(_))
    }

    pub fn is_call(&self) -> bool {
        matches!(self, InstrKind::Call { .. } | InstrKind::Construct)
    }

    /// Does the instruction define a value?
    pub fn has_result(&self) -> bool {
        !self.is_terminator()
            && !matches!(
                self,
                InstrKind::StoreStack
                    | InstrKind::StoreFrame(_)
                    | InstrKind::StoreGlobal(_)
                    | InstrKind::DeclareGlobal(_)
                    | InstrKind::StoreProperty
            )
    }

    /// Normal-flow successors of a terminator
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            InstrKind::Branch(target) => vec![*target],
            InstrKind::CondBranch {
                then_block,
                else_block,
            } => vec![*then_block, *else_block],
            InstrKind::Switch { cases, default } => {
                let mut succs: Vec<BlockId> = Vec::with_capacity(cases.len() + 1);
                for (_, target) in cases {
                    if !succs.contains(target) {
                        succs.push(*target);
                    }
                }
                if !succs.contains(default) {
                    succs.push(*default);
                }
                succs
            }
            InstrKind::TryStart { body, catch } => vec![*body, *catch],
            InstrKind::TryEnd { next } => vec![*next],
            _ => Vec::new(),
        }
    }

    /// Redirect every edge to `from` so it goes to `to`
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        self.map_targets(|b| if b == from { to } else { b });
    }

    /// Rewrite every block a terminator or phi names
    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        let mut swap = |b: &mut BlockId| *b = f(*b);
        match self {
            InstrKind::Branch(target) => swap(target),
            InstrKind::CondBranch {
                then_block,
                else_block,
            } => {
                swap(then_block);
                swap(else_block);
            }
            InstrKind::Switch { cases, default } => {
                for (_, target) in cases.iter_mut() {
                    swap(target);
                }
                swap(default);
            }
            InstrKind::TryStart { body, catch } => {
                swap(body);
                swap(catch);
            }
            InstrKind::TryEnd { next } => swap(next),
            InstrKind::Phi(blocks) => blocks.iter_mut().for_each(&mut swap),
            _ => {}
        }
    }

    /// Can running this instruction invoke user code (getters, valueOf, calls)?
    pub fn may_execute_code(&self, operand_types: &[Type]) -> bool {
        let all_primitive = || operand_types.iter().all(|t| t.is_primitive());
        match self {
            InstrKind::Call { .. }
            | InstrKind::Construct
            | InstrKind::LoadProperty
            | InstrKind::StoreProperty
            | InstrKind::DeleteProperty
            | InstrKind::LoadGlobal(_)
            | InstrKind::TryLoadGlobal(_)
            | InstrKind::StoreGlobal(_) => true,
            InstrKind::Binary(BinaryOp::StrictEq | BinaryOp::StrictNotEq) => false,
            InstrKind::Binary(BinaryOp::InstanceOf | BinaryOp::In) => true,
            InstrKind::Binary(_) => !all_primitive(),
            InstrKind::Unary(UnaryOp::Not | UnaryOp::TypeOf | UnaryOp::Void) => false,
            InstrKind::Unary(_) => !all_primitive(),
            _ => false,
        }
    }

    /// Can running this instruction throw?
    pub fn may_throw(&self, operand_types: &[Type]) -> bool {
        if self.may_execute_code(operand_types) {
            return true;
        }
        match self {
            InstrKind::ThrowIfEmpty | InstrKind::Throw => true,
            InstrKind::Binary(op) if op.is_arithmetic() => {
                // BigInt mixed with Number, BigInt `>>>`, division by 0n
                let lhs = operand_types.first().copied().unwrap_or(Type::ANY);
                let rhs = operand_types.get(1).copied().unwrap_or(Type::ANY);
                lhs.may_be(Type::BIGINT) || rhs.may_be(Type::BIGINT)
            }
            InstrKind::Unary(UnaryOp::Plus) => operand_types
                .first()
                .is_none_or(|t| t.may_be(Type::BIGINT)),
            _ => false,
        }
    }

    /// Must the instruction be kept even when its result is unused?
    pub fn has_side_effects(&self, operand_types: &[Type]) -> bool {
        if self.is_terminator() || !self.has_result() || self.is_call() {
            return true;
        }
        self.may_throw(operand_types)
    }

    /// Pure and deterministic: two instances with equal operands compute
    /// equal values
    pub fn is_value_numberable(&self, operand_types: &[Type]) -> bool {
        match self {
            InstrKind::Binary(_) | InstrKind::Unary(_) => !self.may_execute_code(operand_types),
            InstrKind::GetParentScope | InstrKind::ResolveScope(_) | InstrKind::Mov => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstrKind::Mov => "mov",
            InstrKind::Binary(_) => "binary",
            InstrKind::Unary(_) => "unary",
            InstrKind::Phi(_) => "phi",
            InstrKind::ThrowIfEmpty => "throwifempty",
            InstrKind::CatchValue => "catch",
            InstrKind::AllocStack(_) => "allocstack",
            InstrKind::LoadStack => "loadstack",
            InstrKind::StoreStack => "storestack",
            InstrKind::CreateScope(_) => "createscope",
            InstrKind::GetParentScope => "getparentscope",
            InstrKind::ResolveScope(_) => "resolvescope",
            InstrKind::LoadFrame(_) => "loadframe",
            InstrKind::StoreFrame(_) => "storeframe",
            InstrKind::CreateClosure(_) => "createclosure",
            InstrKind::LoadGlobal(_) => "loadglobal",
            InstrKind::TryLoadGlobal(_) => "tryloadglobal",
            InstrKind::StoreGlobal(_) => "storeglobal",
            InstrKind::DeclareGlobal(_) => "declareglobal",
            InstrKind::LoadProperty => "loadprop",
            InstrKind::StoreProperty => "storeprop",
            InstrKind::DeleteProperty => "deleteprop",
            InstrKind::AllocObject => "allocobject",
            InstrKind::AllocArray => "allocarray",
            InstrKind::Call { .. } => "call",
            InstrKind::Construct => "construct",
            InstrKind::LoadConst(_) => "loadconst",
            InstrKind::LoadParam(_) => "loadparam",
            InstrKind::Branch(_) => "br",
            InstrKind::CondBranch { .. } => "condbr",
            InstrKind::Switch { .. } => "switch",
            InstrKind::Return => "ret",
            InstrKind::Throw => "throw",
            InstrKind::Unreachable => "unreachable",
            InstrKind::TryStart { .. } => "trystart",
            InstrKind::TryEnd { .. } => "tryend",
        }
    }
}

/// An instruction in a function's arena
#[derive(Debug, Clone)]
pub struct Instruction {
    pub kind: InstrKind,
    pub(crate) operands: Vec<Operand>,
    /// Inferred result type; `ANY` until type inference runs
    pub ty: Type,
    pub span: Span,
    pub(crate) block: BlockId,
    /// One entry per operand slot that references this instruction
    pub(crate) users: Vec<InstrId>,
    pub(crate) alive: bool,
}

impl Instruction {
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn operand(&self, index: usize) -> Option<&Operand> {
        self.operands.get(index)
    }

    pub fn users(&self) -> &[InstrId] {
        &self.users
    }

    pub fn block(&self) -> BlockId {
        self.block
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn has_users(&self) -> bool {
        !self.users.is_empty()
    }

    /// Blocks a phi's operands flow in from
    pub fn phi_blocks(&self) -> Option<&[BlockId]> {
        match &self.kind {
            InstrKind::Phi(blocks) => Some(blocks),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_successors_are_unique() {
        let kind = InstrKind::Switch {
            cases: vec![
                (Literal::Number(1.0), BlockId(2)),
                (Literal::Number(2.0), BlockId(2)),
                (Literal::Number(3.0), BlockId(3)),
            ],
            default: BlockId(3),
        };
        assert_eq!(kind.successors(), vec![BlockId(2), BlockId(3)]);
    }

    #[test]
    fn test_retarget() {
        let mut kind = InstrKind::CondBranch {
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        kind.retarget(BlockId(2), BlockId(7));
        assert_eq!(kind.successors(), vec![BlockId(1), BlockId(7)]);
    }

    #[test]
    fn test_side_effects_depend_on_operand_types() {
        let add = InstrKind::Binary(BinaryOp::Add);
        assert!(!add.has_side_effects(&[Type::NUMBER, Type::NUMBER]));
        assert!(add.has_side_effects(&[Type::OBJECT, Type::NUMBER]));
        assert!(add.has_side_effects(&[Type::BIGINT, Type::NUMBER]));
        assert!(!InstrKind::Binary(BinaryOp::StrictEq).has_side_effects(&[Type::ANY, Type::ANY]));
        assert!(InstrKind::StoreStack.has_side_effects(&[]));
        assert!(InstrKind::ThrowIfEmpty.has_side_effects(&[Type::ANY]));
    }

    #[test]
    fn test_value_numberable() {
        let sub = InstrKind::Binary(BinaryOp::Sub);
        assert!(sub.is_value_numberable(&[Type::NUMBER, Type::STRING]));
        assert!(!sub.is_value_numberable(&[Type::ANY, Type::NUMBER]));
        assert!(!InstrKind::AllocObject.is_value_numberable(&[]));
        assert!(!InstrKind::LoadFrame(VarId(0)).is_value_numberable(&[Type::ENVIRONMENT]));
    }
}
