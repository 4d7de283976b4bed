//! IR values
//!
//! Identifiers for arena entries and the operand forms an instruction can
//! reference: another instruction's result, a parameter, or a literal.

use super::types::Type;
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(id: u32) -> Self {
                Self(id)
            }

            pub fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_type!(
    /// Instruction index in its function's arena
    InstrId,
    "%"
);
id_type!(
    /// Basic block index in its function's arena
    BlockId,
    "bb"
);
id_type!(
    /// Function index in the module
    FuncId,
    "fn"
);
id_type!(
    /// Environment layout index in the module
    ScopeId,
    "scope"
);
id_type!(
    /// Environment variable index in the module
    VarId,
    "var"
);

/// A compile-time constant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    Undefined,
    Null,
    /// Sentinel stored in a `let`/`const` binding before initialization
    Empty,
    Bool(bool),
    Number(f64),
    String(String),
    BigInt(BigInt),
}

impl Literal {
    pub fn ty(&self) -> Type {
        match self {
            Literal::Undefined => Type::UNDEFINED,
            Literal::Null => Type::NULL,
            Literal::Empty => Type::EMPTY,
            Literal::Bool(_) => Type::BOOLEAN,
            Literal::Number(_) => Type::NUMBER,
            Literal::String(_) => Type::STRING,
            Literal::BigInt(_) => Type::BIGINT,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Literal::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::String(s) => Some(s),
            _ => None,
        }
    }
}

// Numbers compare by bit pattern so that NaN keys are stable and 0 / -0 stay
// distinct; `strict_equals` in `js` implements the language's equality.
impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Undefined, Literal::Undefined)
            | (Literal::Null, Literal::Null)
            | (Literal::Empty, Literal::Empty) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Number(a), Literal::Number(b)) => a.to_bits() == b.to_bits(),
            (Literal::String(a), Literal::String(b)) => a == b,
            (Literal::BigInt(a), Literal::BigInt(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Literal::Bool(b) => b.hash(state),
            Literal::Number(n) => n.to_bits().hash(state),
            Literal::String(s) => s.hash(state),
            Literal::BigInt(b) => b.hash(state),
            Literal::Undefined | Literal::Null | Literal::Empty => {}
        }
    }
}

impl std::fmt::Display for Literal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Undefined => write!(f, "undefined"),
            Literal::Null => write!(f, "null"),
            Literal::Empty => write!(f, "empty"),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Number(n) => write!(f, "{}", super::js::number_to_string(*n)),
            Literal::String(s) => write!(f, "{:?}", s),
            Literal::BigInt(b) => write!(f, "{}n", b),
        }
    }
}

/// An instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operand {
    /// Result of an instruction in the same function
    Instr(InstrId),
    /// Parameter by index; 0 is `this`, formal `i` is `i + 1`
    Param(u32),
    Literal(Literal),
}

impl Operand {
    pub fn undefined() -> Self {
        Operand::Literal(Literal::Undefined)
    }

    pub fn number(n: f64) -> Self {
        Operand::Literal(Literal::Number(n))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Operand::Literal(Literal::String(s.into()))
    }

    pub fn as_instr(&self) -> Option<InstrId> {
        match self {
            Operand::Instr(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_literal(&self) -> Option<&Literal> {
        match self {
            Operand::Literal(lit) => Some(lit),
            _ => None,
        }
    }
}

impl From<InstrId> for Operand {
    fn from(id: InstrId) -> Self {
        Operand::Instr(id)
    }
}

impl From<Literal> for Operand {
    fn from(lit: Literal) -> Self {
        Operand::Literal(lit)
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Instr(id) => write!(f, "{}", id),
            Operand::Param(0) => write!(f, "this"),
            Operand::Param(i) => write!(f, "$arg{}", i - 1),
            Operand::Literal(lit) => write!(f, "{}", lit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_literals_compare_by_bits() {
        assert_eq!(Literal::Number(f64::NAN), Literal::Number(f64::NAN));
        assert_ne!(Literal::Number(0.0), Literal::Number(-0.0));
    }

    #[test]
    fn test_operand_display() {
        assert_eq!(Operand::Instr(InstrId(4)).to_string(), "%4");
        assert_eq!(Operand::Param(0).to_string(), "this");
        assert_eq!(Operand::Param(2).to_string(), "$arg1");
        assert_eq!(Operand::string("x").to_string(), "\"x\"");
        assert_eq!(Operand::number(5.0).to_string(), "5");
    }

    #[test]
    fn test_literal_types() {
        assert_eq!(Literal::Null.ty(), Type::NULL);
        assert_eq!(Literal::BigInt(BigInt::from(3)).ty(), Type::BIGINT);
    }
}
