//! Declaration table
//!
//! Every identifier in the AST that resolves to a declaration carries a
//! [`BindingId`] into this table. Identifiers without a binding are free
//! references to the global object.

use crate::ast::FunctionId;
use serde::{Deserialize, Serialize};

/// Index of a binding in the [`DeclTable`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(pub u32);

impl std::fmt::Display for BindingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Where the binding lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Storage {
    /// A property of the global object (top-level `var` and functions)
    Global,
    /// A formal parameter
    Parameter,
    /// A function- or block-scoped local
    Local,
    /// The parameter of a `catch` clause
    CatchBound,
}

/// How the binding was declared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclKind {
    Var,
    Let,
    Const,
    Function,
    Param,
    Catch,
}

impl DeclKind {
    /// `let` and `const` are in their temporal dead zone until initialized
    pub fn is_lexical(self) -> bool {
        matches!(self, DeclKind::Let | DeclKind::Const)
    }
}

/// A single declared name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub kind: DeclKind,
    pub storage: Storage,
    /// True when a function nested inside the declaring one reads or writes it
    pub captured: bool,
    /// The function whose body declares it
    pub function: FunctionId,
    /// Function nesting depth of the declaring function (program = 0)
    pub depth: u32,
}

/// Bindings indexed by [`BindingId`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclTable {
    pub bindings: Vec<Binding>,
}

impl DeclTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a binding and return its id
    pub fn add(&mut self, binding: Binding) -> BindingId {
        let id = BindingId(self.bindings.len() as u32);
        self.bindings.push(binding);
        id
    }

    pub fn get(&self, id: BindingId) -> Option<&Binding> {
        self.bindings.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: BindingId) -> Option<&mut Binding> {
        self.bindings.get_mut(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bindings declared directly by `function`, in declaration order
    pub fn declared_in(&self, function: FunctionId) -> impl Iterator<Item = (BindingId, &Binding)> {
        self.bindings
            .iter()
            .enumerate()
            .filter(move |(_, b)| b.function == function)
            .map(|(i, b)| (BindingId(i as u32), b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(name: &str, function: u32) -> Binding {
        Binding {
            name: name.to_string(),
            kind: DeclKind::Let,
            storage: Storage::Local,
            captured: false,
            function: FunctionId(function),
            depth: function,
        }
    }

    #[test]
    fn test_add_and_get() {
        let mut table = DeclTable::new();
        let a = table.add(local("a", 0));
        let b = table.add(local("b", 1));
        assert_eq!(a, BindingId(0));
        assert_eq!(table.get(b).map(|b| b.name.as_str()), Some("b"));
        assert!(table.get(BindingId(7)).is_none());
    }

    #[test]
    fn test_declared_in() {
        let mut table = DeclTable::new();
        table.add(local("a", 0));
        table.add(local("b", 1));
        table.add(local("c", 0));
        let names: Vec<_> = table
            .declared_in(FunctionId(0))
            .map(|(_, b)| b.name.clone())
            .collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn test_lexical_kinds() {
        assert!(DeclKind::Let.is_lexical());
        assert!(DeclKind::Const.is_lexical());
        assert!(!DeclKind::Var.is_lexical());
        assert!(!DeclKind::Catch.is_lexical());
    }
}
