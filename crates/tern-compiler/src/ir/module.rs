//! IR modules
//!
//! A module owns every function of a compilation unit plus the module-wide
//! table of environment layouts and the variables stored in them.

use super::function::IrFunction;
use super::instr::InstrKind;
use super::value::{FuncId, Operand, ScopeId, VarId};

/// Layout of one environment (heap frame of captured variables)
#[derive(Debug, Clone)]
pub struct ScopeDesc {
    pub id: ScopeId,
    /// Layout of the enclosing environment on the static chain
    pub parent: Option<ScopeId>,
    /// Function that declared the variables
    pub function: FuncId,
    /// Variables in slot order
    pub variables: Vec<VarId>,
    pub(crate) alive: bool,
}

impl ScopeDesc {
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// A variable stored in an environment slot
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub scope: ScopeId,
    /// `let`/`const`: reads check for the empty sentinel
    pub lexical: bool,
    pub(crate) alive: bool,
}

impl Variable {
    pub fn is_alive(&self) -> bool {
        self.alive
    }
}

/// A compilation unit in IR form
#[derive(Debug, Clone, Default)]
pub struct IrModule {
    pub name: String,
    /// Function 0 is the top-level program
    pub functions: Vec<IrFunction>,
    pub scopes: Vec<ScopeDesc>,
    pub variables: Vec<Variable>,
    /// Set once type inference has run over the module
    pub types_inferred: bool,
}

impl IrModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn function(&self, id: FuncId) -> &IrFunction {
        &self.functions[id.index()]
    }

    pub fn function_mut(&mut self, id: FuncId) -> &mut IrFunction {
        &mut self.functions[id.index()]
    }

    pub fn get_function(&self, id: FuncId) -> Option<&IrFunction> {
        self.functions.get(id.index())
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Total live instructions across all functions
    pub fn instruction_count(&self) -> usize {
        self.functions.iter().map(|f| f.instr_count()).sum()
    }

    // ===== Environments =====

    pub fn add_scope(&mut self, parent: Option<ScopeId>, function: FuncId) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(ScopeDesc {
            id,
            parent,
            function,
            variables: Vec::new(),
            alive: true,
        });
        id
    }

    pub fn scope(&self, id: ScopeId) -> &ScopeDesc {
        &self.scopes[id.index()]
    }

    pub fn live_scopes(&self) -> impl Iterator<Item = &ScopeDesc> {
        self.scopes.iter().filter(|s| s.alive)
    }

    pub fn add_variable(&mut self, scope: ScopeId, name: impl Into<String>, lexical: bool) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(Variable {
            id,
            name: name.into(),
            scope,
            lexical,
            alive: true,
        });
        self.scopes[scope.index()].variables.push(id);
        id
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    /// Take a variable out of its layout; later slots shift down
    pub fn remove_variable(&mut self, id: VarId) {
        let scope = self.variables[id.index()].scope;
        self.scopes[scope.index()].variables.retain(|v| *v != id);
        self.variables[id.index()].alive = false;
    }

    /// Remove a layout, splicing it out of the static chain
    pub fn remove_scope(&mut self, id: ScopeId) {
        let parent = self.scopes[id.index()].parent;
        for scope in self.scopes.iter_mut() {
            if scope.parent == Some(id) {
                scope.parent = parent;
            }
        }
        for func in self.functions.iter_mut() {
            if func.parent_scope == Some(id) {
                func.parent_scope = parent;
            }
            if func.scope == Some(id) {
                func.scope = None;
            }
        }
        self.scopes[id.index()].alive = false;
    }

    /// Slot index of a variable in its environment
    pub fn slot_of(&self, id: VarId) -> Option<u32> {
        let var = self.variable(id);
        self.scope(var.scope)
            .variables
            .iter()
            .position(|v| *v == id)
            .map(|p| p as u32)
    }

    /// Number of parent links from `from` up to `to`
    pub fn scope_hops(&self, from: ScopeId, to: ScopeId) -> Option<u32> {
        let mut current = Some(from);
        let mut hops = 0;
        while let Some(scope) = current {
            if scope == to {
                return Some(hops);
            }
            current = self.scope(scope).parent;
            hops += 1;
        }
        None
    }
}

/// Environment layout an environment-valued operand refers to
pub fn env_scope(func: &IrFunction, op: &Operand) -> Option<ScopeId> {
    let id = op.as_instr()?;
    match &func.instr(id).kind {
        InstrKind::CreateScope(scope) | InstrKind::ResolveScope(scope) => Some(*scope),
        InstrKind::GetParentScope => func.parent_scope,
        InstrKind::Mov => env_scope(func, func.instr(id).operand(0)?),
        _ => None,
    }
}
