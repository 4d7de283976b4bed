//! Block-scope and `this` analysis over function bodies

use rustc_hash::FxHashSet;
use tern_ast::{BindingId, DeclTable, Expr, ExprKind, ForInit, FunctionKind, MemberProp, PropKey, Stmt, StmtKind};

/// `let`/`const` bindings declared directly in `stmts`
pub(super) fn lexical_in(decls: &DeclTable, stmts: &[Stmt]) -> Vec<BindingId> {
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

/// Lexical `for` head bindings
pub(super) fn for_head(decls: &DeclTable, init: Option<&ForInit>) -> Vec<BindingId> {
    match init {
        Some(ForInit::VarDecl(declarators)) => declarators
            .iter()
            .map(|d| d.binding)
            .filter(|id| decls.get(*id).is_some_and(|b| b.kind.is_lexical()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Bindings owned by a nested block of `body` rather than by the function:
/// block, `switch`, `try` and `for`-head lexicals, and catch parameters.
/// Nested functions are not entered.
pub(super) fn block_bindings(decls: &DeclTable, body: &[Stmt]) -> FxHashSet<BindingId> {
    let mut out = FxHashSet::default();
    for stmt in body {
        collect_stmt(decls, stmt, &mut out);
    }
    out
}

fn collect_list(decls: &DeclTable, stmts: &[Stmt], out: &mut FxHashSet<BindingId>) {
    out.extend(lexical_in(decls, stmts));
    for stmt in stmts {
        collect_stmt(decls, stmt, out);
    }
}

fn collect_stmt(decls: &DeclTable, stmt: &Stmt, out: &mut FxHashSet<BindingId>) {
    match &stmt.kind {
        StmtKind::Block(stmts) => collect_list(decls, stmts, out),
        StmtKind::If {
            consequent,
            alternate,
            ..
        } => {
            collect_stmt(decls, consequent, out);
            if let Some(alternate) = alternate {
                collect_stmt(decls, alternate, out);
            }
        }
        StmtKind::While { body, .. } | StmtKind::DoWhile { body, .. } | StmtKind::Labeled { body, .. } => {
            collect_stmt(decls, body, out)
        }
        StmtKind::For { init, body, .. } => {
            out.extend(for_head(decls, init.as_ref()));
            collect_stmt(decls, body, out);
        }
        StmtKind::Switch { cases, .. } => {
            for case in cases {
                collect_list(decls, &case.body, out);
            }
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            collect_list(decls, block, out);
            if let Some(handler) = handler {
                out.extend(handler.param);
                collect_list(decls, &handler.body, out);
            }
            if let Some(finalizer) = finalizer {
                collect_list(decls, finalizer, out);
            }
        }
        _ => {}
    }
}

/// Does an arrow function in `body`, possibly nested in other arrows, read
/// `this`?
pub(super) fn arrow_reads_this(body: &[Stmt]) -> bool {
    body.iter().any(|stmt| stmt_reads_this(stmt, false))
}

fn stmt_reads_this(stmt: &Stmt, in_arrow: bool) -> bool {
    let expr = |e: &Expr| expr_reads_this(e, in_arrow);
    let stmts = |list: &[Stmt]| list.iter().any(|s| stmt_reads_this(s, in_arrow));
    match &stmt.kind {
        StmtKind::VarDecl(declarators) => declarators.iter().filter_map(|d| d.init.as_ref()).any(expr),
        StmtKind::FunctionDecl(_) | StmtKind::Break(_) | StmtKind::Continue(_) | StmtKind::Empty => false,
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => {
            expr(test)
                || stmt_reads_this(consequent, in_arrow)
                || alternate.as_deref().is_some_and(|s| stmt_reads_this(s, in_arrow))
        }
        StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
            expr(test) || stmt_reads_this(body, in_arrow)
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            let init = match init {
                Some(ForInit::VarDecl(declarators)) => {
                    declarators.iter().filter_map(|d| d.init.as_ref()).any(expr)
                }
                Some(ForInit::Expr(e)) => expr(e),
                None => false,
            };
            init || test.as_ref().is_some_and(expr)
                || update.as_ref().is_some_and(expr)
                || stmt_reads_this(body, in_arrow)
        }
        StmtKind::Block(list) => stmts(list),
        StmtKind::Return(value) => value.as_ref().is_some_and(expr),
        StmtKind::Labeled { body, .. } => stmt_reads_this(body, in_arrow),
        StmtKind::Switch { discriminant, cases } => {
            expr(discriminant)
                || cases
                    .iter()
                    .any(|case| case.test.as_ref().is_some_and(expr) || stmts(&case.body))
        }
        StmtKind::Throw(value) | StmtKind::Expr(value) => expr(value),
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            stmts(block)
                || handler.as_ref().is_some_and(|h| stmts(&h.body))
                || finalizer.as_deref().is_some_and(stmts)
        }
    }
}

fn expr_reads_this(expr: &Expr, in_arrow: bool) -> bool {
    let sub = |e: &Expr| expr_reads_this(e, in_arrow);
    match &expr.kind {
        ExprKind::This => in_arrow,
        ExprKind::Number(_)
        | ExprKind::String(_)
        | ExprKind::BigInt(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::Ident(_) => false,
        // Ordinary functions bind their own `this`
        ExprKind::Function(node) => {
            node.kind == FunctionKind::Arrow && node.body.iter().any(|s| stmt_reads_this(s, true))
        }
        ExprKind::Array(elements) | ExprKind::Sequence(elements) => elements.iter().any(sub),
        ExprKind::Object(props) => props.iter().any(|p| {
            matches!(&p.key, PropKey::Computed(key) if sub(key)) || sub(&p.value)
        }),
        ExprKind::Unary { arg, .. } => sub(arg),
        ExprKind::Update { target, .. } => sub(target),
        ExprKind::Binary { left, right, .. } | ExprKind::Logical { left, right, .. } => {
            sub(left) || sub(right)
        }
        ExprKind::Assign { target, value, .. } => sub(target) || sub(value),
        ExprKind::Conditional {
            test,
            consequent,
            alternate,
        } => sub(test) || sub(consequent) || sub(alternate),
        ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
            sub(callee) || args.iter().any(sub)
        }
        ExprKind::Member { object, property } => {
            sub(object) || matches!(property, MemberProp::Computed(key) if sub(key))
        }
    }
}
