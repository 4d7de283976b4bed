//! AST to IR lowering
//!
//! Turns the analyzed AST into one [`IrFunction`] per function node.
//! Storage follows the declaration table: bindings a nested function
//! captures live in the declaring function's environment, every other local
//! gets a stack slot (promoted to SSA later), and globals go through the
//! global object.
//!
//! Captured bindings a nested block declares get an environment of their
//! own, created each time the block is entered. Functions are lowered
//! outer-first from a queue, so every enclosing layout exists before the
//! closures that reach it are built.

mod control_flow;
mod expr;
mod scope;
mod stmt;

use crate::error::{CompileError, CompileResult};
use crate::ir::{
    BlockId, FuncId, FunctionBuilder, InstrId, InstrKind, IrFunction, IrModule, Literal, Operand,
    ScopeId, VarId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use tern_ast::{
    self as ast, BindingId, DeclTable, FunctionId as AstFunctionId, FunctionKind, Span, Storage,
};
use tracing::debug;

/// A function discovered but not yet lowered
struct PendingFunction<'a> {
    ast_id: AstFunctionId,
    ir_id: FuncId,
    name: Option<String>,
    params: &'a [BindingId],
    body: &'a [ast::Stmt],
    kind: FunctionKind,
    span: Span,
    parent_scope: Option<ScopeId>,
    depth: u32,
    /// For arrows, the function whose `this` they see
    this_owner: Option<AstFunctionId>,
}

/// Module-wide lowering state
pub struct Lowerer<'a> {
    decls: &'a DeclTable,
    module: IrModule,
    queue: VecDeque<PendingFunction<'a>>,
    /// Environment variable of each captured binding
    binding_vars: FxHashMap<BindingId, VarId>,
    /// Environment variable holding the `this` of functions whose arrows read it
    this_vars: FxHashMap<AstFunctionId, VarId>,
}

/// Lower a whole program; function 0 of the result is the top level
pub fn lower_program(program: &ast::Program, decls: &DeclTable) -> CompileResult<IrModule> {
    Lowerer::new(decls).lower(program)
}

impl<'a> Lowerer<'a> {
    pub fn new(decls: &'a DeclTable) -> Self {
        Lowerer {
            decls,
            module: IrModule::new("main"),
            queue: VecDeque::new(),
            binding_vars: FxHashMap::default(),
            this_vars: FxHashMap::default(),
        }
    }

    pub fn lower(mut self, program: &'a ast::Program) -> CompileResult<IrModule> {
        let main = self.reserve(Some("main".to_string()), 0, FunctionKind::Normal, program.span);
        self.queue.push_back(PendingFunction {
            ast_id: AstFunctionId::PROGRAM,
            ir_id: main,
            name: Some("main".to_string()),
            params: &[],
            body: &program.body,
            kind: FunctionKind::Normal,
            span: program.span,
            parent_scope: None,
            depth: 0,
            this_owner: None,
        });
        while let Some(pending) = self.queue.pop_front() {
            self.lower_function(pending)?;
        }
        debug!(
            functions = self.module.function_count(),
            instructions = self.module.instruction_count(),
            "lowered program"
        );
        Ok(self.module)
    }

    /// Reserve a function slot so closures can refer to it before it is lowered
    fn reserve(&mut self, name: Option<String>, param_count: u32, kind: FunctionKind, span: Span) -> FuncId {
        let id = FuncId(self.module.functions.len() as u32);
        self.module
            .functions
            .push(IrFunction::new(id, name, param_count, kind, span));
        id
    }

    /// Queue a nested function node; returns its IR id
    fn discover(
        &mut self,
        node: &'a ast::FunctionNode,
        parent_scope: Option<ScopeId>,
        depth: u32,
        this_owner: Option<AstFunctionId>,
    ) -> CompileResult<FuncId> {
        if node.kind == FunctionKind::Generator {
            return Err(CompileError::Unsupported {
                feature: format!(
                    "generator function '{}'",
                    node.name.as_deref().unwrap_or("<anonymous>")
                ),
            });
        }
        let id = self.reserve(node.name.clone(), node.params.len() as u32, node.kind, node.span);
        self.queue.push_back(PendingFunction {
            ast_id: node.id,
            ir_id: id,
            name: node.name.clone(),
            params: &node.params,
            body: &node.body,
            kind: node.kind,
            span: node.span,
            parent_scope,
            depth,
            this_owner,
        });
        Ok(id)
    }

    fn lower_function(&mut self, pending: PendingFunction<'a>) -> CompileResult<()> {
        let mut func = IrFunction::new(
            pending.ir_id,
            pending.name.clone(),
            pending.params.len() as u32,
            pending.kind,
            pending.span,
        );
        func.parent_scope = pending.parent_scope;

        let scope = {
            let mut lowerer = FunctionLowerer::new(self, &mut func, &pending);
            lowerer.lower_body(pending.params, pending.body)?;
            lowerer.scope
        };
        func.scope = scope;
        crate::optimize::dce::remove_unreachable_blocks(&mut func);

        debug!(
            function = func.display_name(),
            blocks = func.block_count(),
            instructions = func.instr_count(),
            "lowered function"
        );
        self.module.functions[pending.ir_id.index()] = func;
        Ok(())
    }
}

/// A `break`/`continue` destination
#[derive(Debug, Clone)]
struct JumpTarget {
    labels: Vec<String>,
    break_target: BlockId,
    /// Set for loops
    continue_target: Option<BlockId>,
    /// Target of an unlabeled `break` (loops and `switch`)
    breakable: bool,
    /// `try_stack` depth when the construct was entered
    try_depth: usize,
}

/// An enclosing `try` region
#[derive(Debug, Clone)]
struct TryEntry<'a> {
    /// `finally` body to run when control leaves the region
    finalizer: Option<&'a [ast::Stmt]>,
    /// Handler of the code outside the region
    outer_handler: Option<BlockId>,
    /// Environments open at the `try` statement
    env_depth: usize,
}

/// Per-function lowering state
struct FunctionLowerer<'a, 'b> {
    shared: &'b mut Lowerer<'a>,
    b: FunctionBuilder<'b>,
    ast_id: AstFunctionId,
    depth: u32,
    name: String,
    is_program: bool,
    this_owner: Option<AstFunctionId>,
    /// Layout of the environment this function creates on entry
    scope: Option<ScopeId>,
    /// Open environments, innermost last
    envs: Vec<(ScopeId, Operand)>,
    parent_scope: Option<ScopeId>,
    parent_env: Option<Operand>,
    /// Stack slot of each non-captured local
    slots: FxHashMap<BindingId, InstrId>,
    targets: Vec<JumpTarget>,
    /// Labels waiting for the loop they name
    pending_labels: Vec<String>,
    try_stack: Vec<TryEntry<'a>>,
}

impl<'a, 'b> FunctionLowerer<'a, 'b> {
    fn new(shared: &'b mut Lowerer<'a>, func: &'b mut IrFunction, pending: &PendingFunction<'a>) -> Self {
        FunctionLowerer {
            shared,
            b: FunctionBuilder::new(func),
            ast_id: pending.ast_id,
            depth: pending.depth,
            name: pending.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
            is_program: pending.ast_id == AstFunctionId::PROGRAM,
            this_owner: pending.this_owner,
            scope: None,
            envs: Vec::new(),
            parent_scope: pending.parent_scope,
            parent_env: None,
            slots: FxHashMap::default(),
            targets: Vec::new(),
            pending_labels: Vec::new(),
            try_stack: Vec::new(),
        }
    }

    fn contract(&self, message: impl Into<String>) -> CompileError {
        CompileError::ContractViolation {
            function: self.name.clone(),
            message: message.into(),
        }
    }

    fn binding(&self, id: BindingId) -> CompileResult<&'a ast::Binding> {
        let decls: &'a DeclTable = self.shared.decls;
        decls
            .get(id)
            .ok_or_else(|| self.contract(format!("unknown binding {}", id)))
    }

    // ===== Prologue =====

    fn lower_body(&mut self, params: &'a [BindingId], body: &'a [ast::Stmt]) -> CompileResult<()> {
        if self.parent_scope.is_some() {
            self.parent_env = Some(self.b.emit(InstrKind::GetParentScope, vec![]).into());
        }

        let decls: &'a DeclTable = self.shared.decls;
        let declared: Vec<(BindingId, &'a ast::Binding)> = decls
            .declared_in(self.ast_id)
            .filter(|(_, b)| b.storage != Storage::Global)
            .collect();
        let in_blocks: FxHashSet<BindingId> = scope::block_bindings(decls, body);
        let function_level: Vec<(BindingId, &'a ast::Binding)> = declared
            .iter()
            .filter(|(id, b)| b.captured && !in_blocks.contains(id))
            .copied()
            .collect();
        let keeps_this = self.this_owner.is_none() && scope::arrow_reads_this(body);

        // Environment for captured function-level bindings
        if !function_level.is_empty() || keeps_this {
            let scope = self.shared.module.add_scope(self.parent_scope, self.b.func().id);
            self.scope = Some(scope);
            let env = self.b.create_scope(scope, self.parent_env.clone());
            self.envs.push((scope, env.clone()));
            for (id, binding) in &function_level {
                let var = self
                    .shared
                    .module
                    .add_variable(scope, binding.name.clone(), binding.kind.is_lexical());
                self.shared.binding_vars.insert(*id, var);
                if binding.kind.is_lexical() {
                    self.b.store_frame(var, env.clone(), Operand::Literal(Literal::Empty));
                }
            }
            if keeps_this {
                let var = self.shared.module.add_variable(scope, "this", false);
                self.shared.this_vars.insert(self.ast_id, var);
                self.b.store_frame(var, env, Operand::Param(0));
            }
        }

        // Stack slots for everything else
        for (id, binding) in declared.iter().filter(|(_, b)| !b.captured) {
            let slot = self.b.alloc_stack(&binding.name);
            self.slots.insert(*id, slot);
            let init = if binding.kind.is_lexical() {
                Literal::Empty
            } else {
                Literal::Undefined
            };
            if binding.kind != ast::DeclKind::Param {
                self.b.store_stack(slot, Operand::Literal(init));
            }
        }

        for (index, param) in params.iter().enumerate() {
            let binding = self.binding(*param)?;
            if binding.function != self.ast_id {
                return Err(self.contract(format!(
                    "parameter '{}' is declared by another function",
                    binding.name
                )));
            }
            self.write_binding(*param, Operand::Param(index as u32 + 1), true, Span::default())?;
        }

        if self.is_program {
            self.declare_globals(body)?;
        }
        self.hoist_functions(body)?;

        for stmt in body {
            self.lower_stmt(stmt)?;
        }
        if !self.b.is_terminated() {
            self.b.ret(Operand::undefined());
        }
        Ok(())
    }

    /// `DeclareGlobal` for every top-level binding stored on the global object
    fn declare_globals(&mut self, _body: &'a [ast::Stmt]) -> CompileResult<()> {
        let decls: &'a DeclTable = self.shared.decls;
        for (_, binding) in decls.declared_in(self.ast_id) {
            if binding.storage == Storage::Global {
                self.b.emit(InstrKind::DeclareGlobal(binding.name.clone()), vec![]);
            }
        }
        Ok(())
    }

    /// Create the closures of function declarations before the body runs.
    /// Blocks with an environment of their own hoist theirs on entry.
    fn hoist_functions(&mut self, stmts: &'a [ast::Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.hoist_in_stmt(stmt)?;
        }
        Ok(())
    }

    fn hoist_in_stmt(&mut self, stmt: &'a ast::Stmt) -> CompileResult<()> {
        use ast::StmtKind;
        match &stmt.kind {
            StmtKind::FunctionDecl(node) => {
                let binding = node
                    .binding
                    .ok_or_else(|| self.contract("function declaration without a binding"))?;
                self.b.set_span(node.span);
                let closure = self.create_closure(node)?;
                self.write_binding(binding, closure, true, node.span)?;
            }
            StmtKind::If {
                consequent,
                alternate,
                ..
            } => {
                self.hoist_in_stmt(consequent)?;
                if let Some(alt) = alternate {
                    self.hoist_in_stmt(alt)?;
                }
            }
            StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::Labeled { body, .. } => {
                self.hoist_in_stmt(body)?
            }
            StmtKind::For { init, body, .. } => {
                let head = scope::for_head(self.shared.decls, init.as_ref());
                if !self.any_captured(&head)? {
                    self.hoist_in_stmt(body)?;
                }
            }
            StmtKind::Block(stmts) => self.hoist_unscoped(stmts, None)?,
            StmtKind::Switch { cases, .. } => {
                let lists: Vec<&'a [ast::Stmt]> = cases.iter().map(|c| c.body.as_slice()).collect();
                if !self.any_captured(&self.block_ids(&lists, None))? {
                    for list in lists {
                        self.hoist_functions(list)?;
                    }
                }
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.hoist_unscoped(block, None)?;
                if let Some(handler) = handler {
                    self.hoist_unscoped(&handler.body, handler.param)?;
                }
                if let Some(finalizer) = finalizer {
                    self.hoist_unscoped(finalizer, None)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn hoist_unscoped(&mut self, stmts: &'a [ast::Stmt], param: Option<BindingId>) -> CompileResult<()> {
        if self.any_captured(&self.block_ids(&[stmts], param))? {
            return Ok(());
        }
        self.hoist_functions(stmts)
    }

    // ===== Block scopes =====

    /// Bindings a block owns: its direct `let`/`const` plus a catch parameter
    fn block_ids(&self, lists: &[&'a [ast::Stmt]], param: Option<BindingId>) -> Vec<BindingId> {
        let mut ids: Vec<BindingId> = param.into_iter().collect();
        for list in lists {
            ids.extend(scope::lexical_in(self.shared.decls, list));
        }
        ids
    }

    fn any_captured(&self, ids: &[BindingId]) -> CompileResult<bool> {
        for id in ids {
            if self.binding(*id)?.captured {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Layout of the environment holding `captured`, made on first use so a
    /// block lowered more than once (inside `finally`) reuses it
    fn block_layout(&mut self, captured: &[(BindingId, &'a ast::Binding)]) -> ScopeId {
        if let Some(var) = captured.first().and_then(|(id, _)| self.shared.binding_vars.get(id)) {
            return self.shared.module.variable(*var).scope;
        }
        let parent = self.closure_scope();
        let scope = self.shared.module.add_scope(parent, self.b.func().id);
        for (id, binding) in captured {
            let var = self
                .shared
                .module
                .add_variable(scope, binding.name.clone(), binding.kind.is_lexical());
            self.shared.binding_vars.insert(*id, var);
        }
        scope
    }

    /// Enter a block owning `ids`: restart their dead zones and, when any is
    /// captured, open a fresh environment for them. Returns true when an
    /// environment was pushed.
    fn enter_block(&mut self, ids: &[BindingId]) -> CompileResult<bool> {
        let mut captured = Vec::new();
        for id in ids {
            let binding = self.binding(*id)?;
            if binding.captured {
                captured.push((*id, binding));
            } else if binding.kind.is_lexical() {
                let slot = self.local_slot(*id, binding)?;
                self.b.store_stack(slot, Operand::Literal(Literal::Empty));
            }
        }
        if captured.is_empty() {
            return Ok(false);
        }
        let scope = self.block_layout(&captured);
        let parent = self.closure_env();
        let env = self.b.create_scope(scope, parent);
        for (id, binding) in &captured {
            if binding.kind.is_lexical() {
                let var = self.captured_var(*id, binding)?;
                self.b.store_frame(var, env.clone(), Operand::Literal(Literal::Empty));
            }
        }
        self.envs.push((scope, env));
        Ok(true)
    }

    fn leave_block(&mut self, pushed: bool) {
        if pushed {
            self.envs.pop();
        }
    }

    /// A `{ ... }` statement list with its own scope
    fn lower_block(&mut self, stmts: &'a [ast::Stmt]) -> CompileResult<()> {
        let ids = self.block_ids(&[stmts], None);
        let pushed = self.enter_block(&ids)?;
        if pushed {
            self.hoist_functions(stmts)?;
        }
        self.lower_stmts(stmts)?;
        self.leave_block(pushed);
        Ok(())
    }

    /// Replace the open environment of a `for` head with a fresh instance of
    /// the same layout holding copies of the current values
    fn copy_environment(&mut self, head: &[BindingId]) -> CompileResult<()> {
        let (scope, from) = self
            .envs
            .pop()
            .ok_or_else(|| self.contract("no open environment to copy"))?;
        let parent = self.closure_env();
        let to = self.b.create_scope(scope, parent);
        for id in head {
            let binding = self.binding(*id)?;
            if binding.captured {
                let var = self.captured_var(*id, binding)?;
                let value = self.b.load_frame(var, from.clone());
                self.b.store_frame(var, to.clone(), value);
            }
        }
        self.envs.push((scope, to));
        Ok(())
    }

    /// Copy values back from the iteration environment `from` into the head
    /// environment and reopen it
    fn restore_environment(&mut self, head: &[BindingId], scope: ScopeId, to: Operand) -> CompileResult<()> {
        let from = self
            .envs
            .pop()
            .map(|(_, env)| env)
            .ok_or_else(|| self.contract("no open iteration environment"))?;
        for id in head {
            let binding = self.binding(*id)?;
            if binding.captured {
                let var = self.captured_var(*id, binding)?;
                let value = self.b.load_frame(var, from.clone());
                self.b.store_frame(var, to.clone(), value);
            }
        }
        self.envs.push((scope, to));
        Ok(())
    }

    // ===== Bindings =====

    /// Environment holding variables of layout `target`
    fn env_for(&mut self, target: ScopeId) -> CompileResult<Operand> {
        if let Some((_, env)) = self.envs.iter().rev().find(|(scope, _)| *scope == target) {
            return Ok(env.clone());
        }
        let parent = self
            .parent_env
            .clone()
            .ok_or_else(|| self.contract(format!("no environment chain reaches {}", target)))?;
        if self.parent_scope == Some(target) {
            return Ok(parent);
        }
        if let Some(start) = self.parent_scope {
            if self.shared.module.scope_hops(start, target).is_none() {
                return Err(self.contract(format!("{} is not on the environment chain", target)));
            }
        }
        Ok(self.b.emit(InstrKind::ResolveScope(target), vec![parent]).into())
    }

    fn check_visible(&self, binding: &ast::Binding) -> CompileResult<()> {
        if binding.function != self.ast_id && binding.depth >= self.depth {
            return Err(self.contract(format!(
                "binding '{}' of another function is not in scope here",
                binding.name
            )));
        }
        if binding.function != self.ast_id && !binding.captured {
            return Err(self.contract(format!(
                "free variable '{}' is not marked captured",
                binding.name
            )));
        }
        Ok(())
    }

    fn captured_var(&self, id: BindingId, binding: &ast::Binding) -> CompileResult<VarId> {
        self.shared
            .binding_vars
            .get(&id)
            .copied()
            .ok_or_else(|| self.contract(format!("captured binding '{}' has no environment slot", binding.name)))
    }

    fn local_slot(&self, id: BindingId, binding: &ast::Binding) -> CompileResult<InstrId> {
        self.slots
            .get(&id)
            .copied()
            .ok_or_else(|| self.contract(format!("local '{}' has no stack slot", binding.name)))
    }

    /// Read a binding's current value without a TDZ check
    fn load_binding_raw(&mut self, id: BindingId) -> CompileResult<Operand> {
        let binding = self.binding(id)?;
        if binding.storage == Storage::Global {
            return Ok(self
                .b
                .emit(InstrKind::LoadGlobal(binding.name.clone()), vec![])
                .into());
        }
        self.check_visible(binding)?;
        if binding.captured {
            let var = self.captured_var(id, binding)?;
            let scope = self.shared.module.variable(var).scope;
            let env = self.env_for(scope)?;
            Ok(self.b.load_frame(var, env))
        } else {
            let slot = self.local_slot(id, binding)?;
            Ok(self.b.load_stack(slot))
        }
    }

    fn read_binding(&mut self, id: BindingId) -> CompileResult<Operand> {
        let value = self.load_binding_raw(id)?;
        if self.binding(id)?.kind.is_lexical() {
            return Ok(self.b.emit(InstrKind::ThrowIfEmpty, vec![value]).into());
        }
        Ok(value)
    }

    /// Store to a binding; `init` marks the declaration's own initialization
    fn write_binding(&mut self, id: BindingId, value: Operand, init: bool, span: Span) -> CompileResult<()> {
        let binding = self.binding(id)?;
        if !init && binding.kind == ast::DeclKind::Const {
            return Err(CompileError::StaticError {
                message: format!("Assignment to constant variable '{}'", binding.name),
                span,
            });
        }
        if !init && binding.kind.is_lexical() {
            // Assigning before the declaration runs is a ReferenceError
            let current = self.load_binding_raw(id)?;
            self.b.emit(InstrKind::ThrowIfEmpty, vec![current]);
        }
        if binding.storage == Storage::Global {
            self.b
                .emit(InstrKind::StoreGlobal(binding.name.clone()), vec![value]);
            return Ok(());
        }
        self.check_visible(binding)?;
        if binding.captured {
            let var = self.captured_var(id, binding)?;
            let scope = self.shared.module.variable(var).scope;
            let env = self.env_for(scope)?;
            self.b.store_frame(var, env, value);
        } else {
            let slot = self.local_slot(id, binding)?;
            self.b.store_stack(slot, value);
        }
        Ok(())
    }

    /// `this`, which arrows read from the environment of their owner
    fn load_this(&mut self) -> CompileResult<Operand> {
        let Some(owner) = self.this_owner else {
            return Ok(Operand::Param(0));
        };
        let var = self
            .shared
            .this_vars
            .get(&owner)
            .copied()
            .ok_or_else(|| self.contract(format!("{} keeps no `this` for its arrows", owner)))?;
        let scope = self.shared.module.variable(var).scope;
        let env = self.env_for(scope)?;
        Ok(self.b.load_frame(var, env))
    }

    /// Environment new closures capture
    fn closure_env(&self) -> Option<Operand> {
        match self.envs.last() {
            Some((_, env)) => Some(env.clone()),
            None => self.parent_env.clone(),
        }
    }

    fn closure_scope(&self) -> Option<ScopeId> {
        match self.envs.last() {
            Some((scope, _)) => Some(*scope),
            None => self.parent_scope,
        }
    }

    fn create_closure(&mut self, node: &'a ast::FunctionNode) -> CompileResult<Operand> {
        let parent_scope = self.closure_scope();
        let this_owner = match node.kind {
            FunctionKind::Arrow => Some(self.this_owner.unwrap_or(self.ast_id)),
            _ => None,
        };
        let id = self.shared.discover(node, parent_scope, self.depth + 1, this_owner)?;
        let env = self.closure_env();
        Ok(self.b.create_closure(id, env))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verify::verify_module;
    use tern_ast::{Binding, DeclKind, Expr, ExprKind, FunctionNode, Ident, Stmt, StmtKind, SwitchCase, VarDeclarator};

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, Span::default())
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(kind, Span::default())
    }

    fn ident(name: &str, binding: Option<BindingId>) -> Expr {
        expr(ExprKind::Ident(Ident {
            name: name.to_string(),
            binding,
        }))
    }

    fn declare(
        decls: &mut DeclTable,
        name: &str,
        kind: DeclKind,
        storage: Storage,
        function: u32,
        captured: bool,
    ) -> BindingId {
        decls.add(Binding {
            name: name.to_string(),
            kind,
            storage,
            captured,
            function: AstFunctionId(function),
            depth: function.min(1),
        })
    }

    fn let_decl(binding: BindingId, init: Expr) -> Stmt {
        stmt(StmtKind::VarDecl(vec![VarDeclarator {
            binding,
            init: Some(init),
            span: Span::default(),
        }]))
    }

    fn function(id: u32, name: &str, binding: Option<BindingId>, body: Vec<Stmt>) -> FunctionNode {
        FunctionNode {
            id: AstFunctionId(id),
            name: Some(name.to_string()),
            binding,
            params: vec![],
            body,
            kind: FunctionKind::Normal,
            span: Span::default(),
        }
    }

    fn program(body: Vec<Stmt>) -> ast::Program {
        ast::Program {
            body,
            span: Span::default(),
        }
    }

    fn count(func: &IrFunction, pred: impl Fn(&InstrKind) -> bool) -> usize {
        func.instr_ids()
            .into_iter()
            .filter(|id| pred(&func.instr(*id).kind))
            .count()
    }

    #[test]
    fn test_captured_binding_lives_in_environment() {
        // let x = 1; function f() { return x; }
        let mut decls = DeclTable::new();
        let x = declare(&mut decls, "x", DeclKind::Let, Storage::Local, 0, true);
        let f = declare(&mut decls, "f", DeclKind::Function, Storage::Global, 0, false);
        let inner = function(1, "f", Some(f), vec![stmt(StmtKind::Return(Some(ident("x", Some(x)))))]);
        let program = program(vec![
            let_decl(x, expr(ExprKind::Number(1.0))),
            stmt(StmtKind::FunctionDecl(Box::new(inner))),
        ]);

        let module = lower_program(&program, &decls).unwrap();
        assert_eq!(module.function_count(), 2);
        assert_eq!(module.live_scopes().count(), 1);
        let main = module.function(FuncId(0));
        let callee = module.function(FuncId(1));
        assert!(main.scope.is_some());
        assert_eq!(callee.parent_scope, main.scope);
        assert_eq!(count(callee, |k| matches!(k, InstrKind::LoadFrame(_))), 1);
        assert_eq!(count(callee, |k| matches!(k, InstrKind::ThrowIfEmpty)), 1);
        assert_eq!(count(main, |k| matches!(k, InstrKind::DeclareGlobal(_))), 1);
        verify_module(&module, "lower").unwrap();
    }

    #[test]
    fn test_uncaptured_locals_use_stack_slots() {
        // function-level: var a = 1; a = a + 1;
        let mut decls = DeclTable::new();
        let a = declare(&mut decls, "a", DeclKind::Var, Storage::Local, 0, false);
        let program = program(vec![
            let_decl(a, expr(ExprKind::Number(1.0))),
            stmt(StmtKind::Expr(expr(ExprKind::Assign {
                op: Some(tern_ast::BinaryOp::Add),
                target: Box::new(ident("a", Some(a))),
                value: Box::new(expr(ExprKind::Number(1.0))),
            }))),
        ]);
        let module = lower_program(&program, &decls).unwrap();
        let main = module.function(FuncId(0));
        assert!(main.scope.is_none());
        assert_eq!(count(main, |k| matches!(k, InstrKind::AllocStack(_))), 1);
        assert_eq!(count(main, |k| matches!(k, InstrKind::StoreStack)), 3);
        verify_module(&module, "lower").unwrap();
    }

    #[test]
    fn test_const_assignment_is_static_error() {
        let mut decls = DeclTable::new();
        let c = declare(&mut decls, "c", DeclKind::Const, Storage::Local, 0, false);
        let program = program(vec![
            let_decl(c, expr(ExprKind::Number(1.0))),
            stmt(StmtKind::Expr(expr(ExprKind::Assign {
                op: None,
                target: Box::new(ident("c", Some(c))),
                value: Box::new(expr(ExprKind::Number(2.0))),
            }))),
        ]);
        let err = lower_program(&program, &decls).unwrap_err();
        assert!(matches!(err, CompileError::StaticError { .. }));
    }

    #[test]
    fn test_uncaptured_free_variable_is_contract_violation() {
        let mut decls = DeclTable::new();
        let x = declare(&mut decls, "x", DeclKind::Var, Storage::Local, 0, false);
        let inner = function(1, "g", None, vec![stmt(StmtKind::Return(Some(ident("x", Some(x)))))]);
        let program = program(vec![stmt(StmtKind::Expr(expr(ExprKind::Function(Box::new(inner)))))]);
        let err = lower_program(&program, &decls).unwrap_err();
        assert!(matches!(err, CompileError::ContractViolation { .. }));
    }

    #[test]
    fn test_generators_are_unsupported() {
        let decls = DeclTable::new();
        let mut inner = function(1, "gen", None, vec![]);
        inner.kind = FunctionKind::Generator;
        let program = program(vec![stmt(StmtKind::Expr(expr(ExprKind::Function(Box::new(inner)))))]);
        let err = lower_program(&program, &decls).unwrap_err();
        assert!(matches!(&err, CompileError::Unsupported { feature } if feature == "generator function 'gen'"));
        assert_eq!(err.to_string(), "Unsupported: generator function 'gen'");
    }

    #[test]
    fn test_duplicate_switch_case_keeps_first() {
        let mut decls = DeclTable::new();
        let v = declare(&mut decls, "v", DeclKind::Var, Storage::Local, 0, false);
        let case = |n: f64| SwitchCase {
            test: Some(expr(ExprKind::Number(n))),
            body: vec![stmt(StmtKind::Expr(expr(ExprKind::Number(n))))],
            span: Span::default(),
        };
        let program = program(vec![stmt(StmtKind::Switch {
            discriminant: ident("v", Some(v)),
            cases: vec![case(1.0), case(2.0), case(1.0)],
        })]);
        let module = lower_program(&program, &decls).unwrap();
        let main = module.function(FuncId(0));
        let switch = main
            .instr_ids()
            .into_iter()
            .find_map(|id| match &main.instr(id).kind {
                InstrKind::Switch { cases, .. } => Some(cases.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(switch.len(), 2);
        assert_eq!(switch[0].0, Literal::Number(1.0));
        verify_module(&module, "lower").unwrap();
    }

    #[test]
    fn test_return_inside_try_runs_finally() {
        // try { return 1; } finally { 2; }
        let decls = DeclTable::new();
        let program = program(vec![stmt(StmtKind::Try {
            block: vec![stmt(StmtKind::Return(Some(expr(ExprKind::Number(1.0)))))],
            handler: None,
            finalizer: Some(vec![stmt(StmtKind::Expr(ident("g", None)))]),
        })]);
        let module = lower_program(&program, &decls).unwrap();
        let main = module.function(FuncId(0));
        // once on the return path, once on the exceptional path
        assert_eq!(count(main, |k| matches!(k, InstrKind::LoadGlobal(_))), 2);
        assert_eq!(count(main, |k| matches!(k, InstrKind::CatchValue)), 1);
        verify_module(&module, "lower").unwrap();
    }
}
