//! Identifier resolution
//!
//! Binds every identifier reference to the declaration it sees and marks
//! bindings that a nested function reaches as captured. Names that resolve
//! to nothing stay free and refer to the global object.

use rustc_hash::FxHashMap;
use tern_ast::{
    BindingId, DeclTable, Expr, ExprKind, ForInit, FunctionId, FunctionNode, MemberProp, Program, PropKey, Stmt,
    StmtKind, Storage, VarDeclarator,
};

struct Scope {
    function: FunctionId,
    names: FxHashMap<String, BindingId>,
}

pub struct Resolver<'a> {
    decls: &'a mut DeclTable,
    scopes: Vec<Scope>,
}

/// Resolve all identifiers of `program` in place
pub fn resolve(program: &mut Program, decls: &mut DeclTable) {
    let mut resolver = Resolver {
        decls,
        scopes: Vec::new(),
    };
    resolver.function_scope(FunctionId::PROGRAM, &[], &program.body);
    resolver.stmts(&mut program.body);
    resolver.scopes.pop();
    tracing::trace!(bindings = resolver.decls.len(), "resolved program");
}

impl<'a> Resolver<'a> {
    fn current_function(&self) -> FunctionId {
        self.scopes.last().map(|s| s.function).unwrap_or(FunctionId::PROGRAM)
    }

    fn name_of(&self, id: BindingId) -> Option<String> {
        self.decls.get(id).map(|b| b.name.clone())
    }

    fn insert(&self, names: &mut FxHashMap<String, BindingId>, id: BindingId) {
        if let Some(name) = self.name_of(id) {
            names.insert(name, id);
        }
    }

    /// Open a function's scope: parameters, hoisted declarations and the
    /// body's own lexical declarations
    fn function_scope(&mut self, function: FunctionId, params: &[BindingId], body: &[Stmt]) {
        let mut names = FxHashMap::default();
        for param in params {
            self.insert(&mut names, *param);
        }
        let mut hoisted = Vec::new();
        collect_hoisted(self.decls, body, &mut hoisted);
        for id in hoisted {
            self.insert(&mut names, id);
        }
        for id in lexical_in(self.decls, body) {
            self.insert(&mut names, id);
        }
        self.scopes.push(Scope { function, names });
    }

    fn block_scope(&mut self, ids: Vec<BindingId>) {
        let mut names = FxHashMap::default();
        for id in ids {
            self.insert(&mut names, id);
        }
        let function = self.current_function();
        self.scopes.push(Scope { function, names });
    }

    fn lookup(&mut self, name: &str) -> Option<BindingId> {
        let current = self.current_function();
        let id = self.scopes.iter().rev().find_map(|scope| scope.names.get(name).copied())?;
        if let Some(binding) = self.decls.get_mut(id) {
            if binding.function != current && binding.storage != Storage::Global {
                binding.captured = true;
            }
        }
        Some(id)
    }

    fn function(&mut self, node: &mut FunctionNode) {
        self.function_scope(node.id, &node.params, &node.body);
        self.stmts(&mut node.body);
        self.scopes.pop();
    }

    fn block(&mut self, stmts: &mut [Stmt]) {
        let ids = lexical_in(self.decls, stmts);
        self.block_scope(ids);
        self.stmts(stmts);
        self.scopes.pop();
    }

    fn stmts(&mut self, stmts: &mut [Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn declarators(&mut self, declarators: &mut [VarDeclarator]) {
        for declarator in declarators {
            if let Some(init) = &mut declarator.init {
                self.expr(init);
            }
        }
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::VarDecl(declarators) => self.declarators(declarators),
            StmtKind::FunctionDecl(node) => self.function(node),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.stmt(consequent);
                if let Some(alternate) = alternate {
                    self.stmt(alternate);
                }
            }
            StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                self.expr(test);
                self.stmt(body);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                let ids = match init {
                    Some(ForInit::VarDecl(declarators)) => declarators
                        .iter()
                        .map(|d| d.binding)
                        .filter(|id| self.decls.get(*id).is_some_and(|b| b.kind.is_lexical()))
                        .collect(),
                    _ => Vec::new(),
                };
                self.block_scope(ids);
                match init {
                    Some(ForInit::VarDecl(declarators)) => self.declarators(declarators),
                    Some(ForInit::Expr(expr)) => self.expr(expr),
                    None => {}
                }
                if let Some(test) = test {
                    self.expr(test);
                }
                if let Some(update) = update {
                    self.expr(update);
                }
                self.stmt(body);
                self.scopes.pop();
            }
            StmtKind::Block(stmts) => self.block(stmts),
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => {}
            StmtKind::Labeled { body, .. } => self.stmt(body),
            StmtKind::Switch { discriminant, cases } => {
                self.expr(discriminant);
                let ids = cases
                    .iter()
                    .flat_map(|case| lexical_in(self.decls, &case.body))
                    .collect();
                self.block_scope(ids);
                for case in cases.iter_mut() {
                    if let Some(test) = &mut case.test {
                        self.expr(test);
                    }
                    self.stmts(&mut case.body);
                }
                self.scopes.pop();
            }
            StmtKind::Throw(value) | StmtKind::Expr(value) => self.expr(value),
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => {
                self.block(block);
                if let Some(handler) = handler {
                    let mut ids = lexical_in(self.decls, &handler.body);
                    ids.extend(handler.param);
                    self.block_scope(ids);
                    self.stmts(&mut handler.body);
                    self.scopes.pop();
                }
                if let Some(finalizer) = finalizer {
                    self.block(finalizer);
                }
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Number(_)
            | ExprKind::String(_)
            | ExprKind::BigInt(_)
            | ExprKind::Bool(_)
            | ExprKind::Null
            | ExprKind::This => {}
            ExprKind::Ident(ident) => ident.binding = self.lookup(&ident.name),
            ExprKind::Array(elements) | ExprKind::Sequence(elements) => {
                for element in elements {
                    self.expr(element);
                }
            }
            ExprKind::Object(properties) => {
                for property in properties {
                    if let PropKey::Computed(key) = &mut property.key {
                        self.expr(key);
                    }
                    self.expr(&mut property.value);
                }
            }
            ExprKind::Function(node) => self.function(node),
            ExprKind::Unary { arg, .. } => self.expr(arg),
            ExprKind::Update { target, .. } => self.expr(target),
            ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            ExprKind::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.expr(test);
                self.expr(consequent);
                self.expr(alternate);
            }
            ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::Member { object, property } => {
                self.expr(object);
                if let MemberProp::Computed(key) = property {
                    self.expr(key);
                }
            }
        }
    }
}

/// `let`/`const` bindings declared directly in `stmts`
fn lexical_in(decls: &DeclTable, stmts: &[Stmt]) -> Vec<BindingId> {
    stmts
        .iter()
        .filter_map(|stmt| match &stmt.kind {
            StmtKind::VarDecl(declarators) => Some(declarators),
            _ => None,
        })
        .flatten()
        .map(|d| d.binding)
        .filter(|id| decls.get(*id).is_some_and(|b| b.kind.is_lexical()))
        .collect()
}

/// `var` and function declarations anywhere in a function body, nested
/// functions excluded
fn collect_hoisted(decls: &DeclTable, stmts: &[Stmt], out: &mut Vec<BindingId>) {
    for stmt in stmts {
        collect_hoisted_stmt(decls, stmt, out);
    }
}

fn collect_hoisted_stmt(decls: &DeclTable, stmt: &Stmt, out: &mut Vec<BindingId>) {
    let var_ids = |declarators: &[VarDeclarator], out: &mut Vec<BindingId>| {
        out.extend(
            declarators
                .iter()
                .map(|d| d.binding)
                .filter(|id| decls.get(*id).is_some_and(|b| !b.kind.is_lexical())),
        );
    };
    match &stmt.kind {
        StmtKind::VarDecl(declarators) => var_ids(declarators, out),
        StmtKind::FunctionDecl(node) => out.extend(node.binding),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            collect_hoisted_stmt(decls, consequent, out);
            if let Some(alternate) = alternate {
                collect_hoisted_stmt(decls, alternate, out);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::Labeled { body, .. } => {
            collect_hoisted_stmt(decls, body, out)
        }
        StmtKind::For { init, body, .. } => {
            if let Some(ForInit::VarDecl(declarators)) = init {
                var_ids(declarators, out);
            }
            collect_hoisted_stmt(decls, body, out);
        }
        StmtKind::Block(stmts) => collect_hoisted(decls, stmts, out),
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_hoisted(decls, &case.body, out);
            }
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            collect_hoisted(decls, block, out);
            if let Some(handler) = handler {
                collect_hoisted(decls, &handler.body, out);
            }
            if let Some(finalizer) = finalizer {
                collect_hoisted(decls, finalizer, out);
            }
        }
        StmtKind::Return(_)
        | StmtKind::Break(_)
        | StmtKind::Continue(_)
        | StmtKind::Throw(_)
        | StmtKind::Expr(_)
        | StmtKind::Empty => {}
    }
}
