//! The value type lattice
//!
//! A [`Type`] is a set of primitive kinds. The empty set is bottom (no value
//! has flowed here yet), [`Type::ANY`] is the top of the JavaScript value
//! lattice. `ENVIRONMENT` and `EMPTY` never mix with ordinary values:
//! environments only flow through scope instructions and `EMPTY` is the
//! uninitialized-binding sentinel.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Type: u16 {
        const UNDEFINED = 1 << 0;
        const NULL = 1 << 1;
        const BOOLEAN = 1 << 2;
        const NUMBER = 1 << 3;
        const STRING = 1 << 4;
        const BIGINT = 1 << 5;
        const OBJECT = 1 << 6;
        const CLOSURE = 1 << 7;
        const ENVIRONMENT = 1 << 8;
        const EMPTY = 1 << 9;

        const PRIMITIVE = Self::UNDEFINED.bits()
            | Self::NULL.bits()
            | Self::BOOLEAN.bits()
            | Self::NUMBER.bits()
            | Self::STRING.bits()
            | Self::BIGINT.bits();
        const ANY = Self::PRIMITIVE.bits() | Self::OBJECT.bits() | Self::CLOSURE.bits();
        const NUMERIC = Self::NUMBER.bits() | Self::BIGINT.bits();
    }
}

impl Type {
    /// Bottom of the lattice
    pub const fn none() -> Type {
        Type::empty()
    }

    /// Non-empty and contained in `other`
    pub fn is_only(self, other: Type) -> bool {
        !self.is_empty() && other.contains(self)
    }

    pub fn may_be(self, other: Type) -> bool {
        self.intersects(other)
    }

    /// Converting this value to a primitive cannot run user code
    pub fn is_primitive(self) -> bool {
        !self.intersects(Type::OBJECT | Type::CLOSURE)
    }

    /// ToPrimitive may yield a string
    pub fn may_be_string_like(self) -> bool {
        self.intersects(Type::STRING | Type::OBJECT | Type::CLOSURE)
    }

    /// ToNumeric may yield a BigInt
    pub fn may_be_bigint_like(self) -> bool {
        self.intersects(Type::BIGINT | Type::OBJECT | Type::CLOSURE)
    }

    /// Result of `typeof` when this type determines it
    pub fn typeof_name(self) -> Option<&'static str> {
        if self.is_empty() {
            return None;
        }
        if self.is_only(Type::UNDEFINED) {
            Some("undefined")
        } else if self.is_only(Type::BOOLEAN) {
            Some("boolean")
        } else if self.is_only(Type::NUMBER) {
            Some("number")
        } else if self.is_only(Type::STRING) {
            Some("string")
        } else if self.is_only(Type::BIGINT) {
            Some("bigint")
        } else if self.is_only(Type::CLOSURE) {
            Some("function")
        } else if self.is_only(Type::OBJECT | Type::NULL) {
            Some("object")
        } else {
            None
        }
    }

    /// Truthiness when every member of the type agrees
    pub fn known_truthiness(self) -> Option<bool> {
        if self.is_only(Type::OBJECT | Type::CLOSURE) {
            Some(true)
        } else if self.is_only(Type::UNDEFINED | Type::NULL) {
            Some(false)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        if *self == Type::ANY {
            return write!(f, "any");
        }
        let names = [
            (Type::UNDEFINED, "undefined"),
            (Type::NULL, "null"),
            (Type::BOOLEAN, "boolean"),
            (Type::NUMBER, "number"),
            (Type::STRING, "string"),
            (Type::BIGINT, "bigint"),
            (Type::OBJECT, "object"),
            (Type::CLOSURE, "closure"),
            (Type::ENVIRONMENT, "environment"),
            (Type::EMPTY, "empty"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_any_excludes_internal_kinds() {
        assert!(!Type::ANY.contains(Type::ENVIRONMENT));
        assert!(!Type::ANY.contains(Type::EMPTY));
        assert!(Type::ANY.contains(Type::CLOSURE));
    }

    #[test]
    fn test_typeof_name() {
        assert_eq!(Type::NUMBER.typeof_name(), Some("number"));
        assert_eq!((Type::NULL | Type::OBJECT).typeof_name(), Some("object"));
        assert_eq!((Type::NUMBER | Type::STRING).typeof_name(), None);
        assert_eq!(Type::none().typeof_name(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::ANY.to_string(), "any");
        assert_eq!((Type::NUMBER | Type::STRING).to_string(), "number|string");
        assert_eq!(Type::none().to_string(), "none");
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(Type::CLOSURE.known_truthiness(), Some(true));
        assert_eq!(Type::UNDEFINED.known_truthiness(), Some(false));
        assert_eq!(Type::NUMBER.known_truthiness(), None);
    }
}
