//! Statement lowering

use super::{scope, FunctionLowerer, JumpTarget};
use crate::error::CompileResult;
use crate::ir::{InstrKind, Operand};
use tern_ast::{self as ast, ForInit, StmtKind};

impl<'a, 'b> FunctionLowerer<'a, 'b> {
    pub(super) fn lower_stmts(&mut self, stmts: &'a [ast::Stmt]) -> CompileResult<()> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    pub(super) fn lower_stmt(&mut self, stmt: &'a ast::Stmt) -> CompileResult<()> {
        self.b.set_span(stmt.span);
        // Labels only attach to the statement directly under them
        let labels = std::mem::take(&mut self.pending_labels);

        match &stmt.kind {
            StmtKind::VarDecl(decls) => self.lower_var_decl(decls),
            // Hoisted to the function entry
            StmtKind::FunctionDecl(_) => Ok(()),
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => self.lower_if(test, consequent, alternate.as_deref()),
            StmtKind::While { test, body } => self.lower_while(test, body, labels),
            StmtKind::DoWhile { body, test } => self.lower_do_while(body, test, labels),
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => self.lower_for(init.as_ref(), test.as_ref(), update.as_ref(), body, labels),
            StmtKind::Block(stmts) => self.lower_block(stmts),
            StmtKind::Return(value) => self.lower_return(value.as_ref()),
            StmtKind::Break(label) => self.lower_break(label.as_deref(), stmt.span),
            StmtKind::Continue(label) => self.lower_continue(label.as_deref(), stmt.span),
            StmtKind::Labeled { label, body } => self.lower_labeled(label, body, labels),
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.lower_switch(discriminant, cases, labels),
            StmtKind::Throw(value) => {
                let value = self.lower_expr(value)?;
                self.b.throw(value);
                Ok(())
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => self.lower_try(block, handler.as_ref(), finalizer.as_deref()),
            StmtKind::Expr(expr) => {
                self.lower_expr(expr)?;
                Ok(())
            }
            StmtKind::Empty => Ok(()),
        }
    }

    pub(super) fn lower_var_decl(&mut self, decls: &'a [ast::VarDeclarator]) -> CompileResult<()> {
        for decl in decls {
            self.b.set_span(decl.span);
            let binding = self.binding(decl.binding)?;
            match &decl.init {
                Some(init) => {
                    let value = self.lower_expr(init)?;
                    self.write_binding(decl.binding, value, true, decl.span)?;
                }
                // `let x;` ends the dead zone; `var x;` does nothing
                None if binding.kind.is_lexical() => {
                    self.write_binding(decl.binding, Operand::undefined(), true, decl.span)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    fn lower_if(
        &mut self,
        test: &'a ast::Expr,
        consequent: &'a ast::Stmt,
        alternate: Option<&'a ast::Stmt>,
    ) -> CompileResult<()> {
        let cond = self.lower_expr(test)?;
        let then_block = self.b.create_block("if.then");
        let exit = self.b.create_block("if.end");
        let else_block = match alternate {
            Some(_) => self.b.create_block("if.else"),
            None => exit,
        };
        self.b.cond_branch(cond, then_block, else_block);

        self.b.switch_to_block(then_block);
        self.lower_stmt(consequent)?;
        self.b.branch(exit);

        if let Some(alternate) = alternate {
            self.b.switch_to_block(else_block);
            self.lower_stmt(alternate)?;
            self.b.branch(exit);
        }

        self.b.switch_to_block(exit);
        Ok(())
    }

    fn lower_while(&mut self, test: &'a ast::Expr, body: &'a ast::Stmt, labels: Vec<String>) -> CompileResult<()> {
        let cond_block = self.b.create_block("while.cond");
        let body_block = self.b.create_block("while.body");
        let exit = self.b.create_block("while.end");
        self.b.branch(cond_block);

        self.b.switch_to_block(cond_block);
        let cond = self.lower_expr(test)?;
        self.b.cond_branch(cond, body_block, exit);

        self.b.switch_to_block(body_block);
        self.with_loop(labels, exit, cond_block, |this| this.lower_stmt(body))?;
        self.b.branch(cond_block);

        self.b.switch_to_block(exit);
        Ok(())
    }

    fn lower_do_while(&mut self, body: &'a ast::Stmt, test: &'a ast::Expr, labels: Vec<String>) -> CompileResult<()> {
        let body_block = self.b.create_block("do.body");
        let cond_block = self.b.create_block("do.cond");
        let exit = self.b.create_block("do.end");
        self.b.branch(body_block);

        self.b.switch_to_block(body_block);
        self.with_loop(labels, exit, cond_block, |this| this.lower_stmt(body))?;
        self.b.branch(cond_block);

        self.b.switch_to_block(cond_block);
        let cond = self.lower_expr(test)?;
        self.b.cond_branch(cond, body_block, exit);

        self.b.switch_to_block(exit);
        Ok(())
    }

    /// A head declaring captured `let`/`const` gets a fresh environment per
    /// iteration: the body runs in a copy of the head environment whose
    /// values are copied back before the update expression.
    fn lower_for(
        &mut self,
        init: Option<&'a ForInit>,
        test: Option<&'a ast::Expr>,
        update: Option<&'a ast::Expr>,
        body: &'a ast::Stmt,
        labels: Vec<String>,
    ) -> CompileResult<()> {
        let head = scope::for_head(self.shared.decls, init);
        let per_iteration = self.enter_block(&head)?;
        let head_env = if per_iteration { self.envs.last().cloned() } else { None };
        match init {
            Some(ForInit::VarDecl(decls)) => self.lower_var_decl(decls)?,
            Some(ForInit::Expr(expr)) => {
                self.lower_expr(expr)?;
            }
            None => {}
        }

        let cond_block = self.b.create_block("for.cond");
        let body_block = self.b.create_block("for.body");
        let update_block = self.b.create_block("for.update");
        let exit = self.b.create_block("for.end");
        self.b.branch(cond_block);

        self.b.switch_to_block(cond_block);
        match test {
            Some(test) => {
                let cond = self.lower_expr(test)?;
                self.b.cond_branch(cond, body_block, exit);
            }
            None => self.b.branch(body_block),
        }

        self.b.switch_to_block(body_block);
        if per_iteration {
            self.copy_environment(&head)?;
            self.hoist_in_stmt(body)?;
        }
        self.with_loop(labels, exit, update_block, |this| this.lower_stmt(body))?;
        self.b.branch(update_block);

        self.b.switch_to_block(update_block);
        if let Some((scope, env)) = head_env {
            self.restore_environment(&head, scope, env)?;
        }
        if let Some(update) = update {
            self.lower_expr(update)?;
        }
        self.b.branch(cond_block);

        self.b.switch_to_block(exit);
        self.leave_block(per_iteration);
        Ok(())
    }

    fn lower_labeled(&mut self, label: &'a str, body: &'a ast::Stmt, mut labels: Vec<String>) -> CompileResult<()> {
        labels.push(label.to_string());
        match &body.kind {
            StmtKind::While { .. }
            | StmtKind::DoWhile { .. }
            | StmtKind::For { .. }
            | StmtKind::Switch { .. }
            | StmtKind::Labeled { .. } => {
                self.pending_labels = labels;
                self.lower_stmt(body)
            }
            _ => {
                // `label: { ... break label; ... }`
                let exit = self.b.create_block("label.end");
                self.targets.push(JumpTarget {
                    labels,
                    break_target: exit,
                    continue_target: None,
                    breakable: false,
                    try_depth: self.try_stack.len(),
                });
                let result = self.lower_stmt(body);
                self.targets.pop();
                result?;
                self.b.branch(exit);
                self.b.switch_to_block(exit);
                Ok(())
            }
        }
    }

    fn lower_return(&mut self, value: Option<&'a ast::Expr>) -> CompileResult<()> {
        let value = match value {
            Some(expr) => self.lower_expr(expr)?,
            None => Operand::undefined(),
        };
        self.exit_try_regions(0)?;
        self.b.ret(value);
        Ok(())
    }

    fn lower_break(&mut self, label: Option<&str>, span: tern_ast::Span) -> CompileResult<()> {
        let target = self
            .targets
            .iter()
            .rev()
            .find(|t| match label {
                Some(label) => t.labels.iter().any(|l| l == label),
                None => t.breakable,
            })
            .cloned();
        let Some(target) = target else {
            return Err(crate::error::CompileError::StaticError {
                message: match label {
                    Some(label) => format!("undefined label '{}'", label),
                    None => "illegal break statement".to_string(),
                },
                span,
            });
        };
        self.exit_try_regions(target.try_depth)?;
        self.b.branch(target.break_target);
        Ok(())
    }

    fn lower_continue(&mut self, label: Option<&str>, span: tern_ast::Span) -> CompileResult<()> {
        let target = self
            .targets
            .iter()
            .rev()
            .filter(|t| t.continue_target.is_some())
            .find(|t| match label {
                Some(label) => t.labels.iter().any(|l| l == label),
                None => true,
            })
            .cloned();
        let Some(JumpTarget {
            continue_target: Some(continue_target),
            try_depth,
            ..
        }) = target
        else {
            return Err(crate::error::CompileError::StaticError {
                message: match label {
                    Some(label) => format!("'{}' does not label a loop", label),
                    None => "illegal continue statement".to_string(),
                },
                span,
            });
        };
        self.exit_try_regions(try_depth)?;
        self.b.branch(continue_target);
        Ok(())
    }

    /// Run `f` with a loop's break/continue targets installed
    pub(super) fn with_loop(
        &mut self,
        labels: Vec<String>,
        break_target: crate::ir::BlockId,
        continue_target: crate::ir::BlockId,
        f: impl FnOnce(&mut Self) -> CompileResult<()>,
    ) -> CompileResult<()> {
        self.targets.push(JumpTarget {
            labels,
            break_target,
            continue_target: Some(continue_target),
            breakable: true,
            try_depth: self.try_stack.len(),
        });
        let result = f(self);
        self.targets.pop();
        result
    }

    /// Leave every `try` region above `depth`, popping each handler with
    /// `TryEnd` and inlining its `finally` body, innermost first.
    pub(super) fn exit_try_regions(&mut self, depth: usize) -> CompileResult<()> {
        if self.try_stack.len() <= depth {
            return Ok(());
        }
        let saved = self.try_stack.clone();
        let saved_envs = self.envs.clone();
        let saved_handler = self.b.handler();
        let mut index = saved.len();
        while index > depth {
            index -= 1;
            let entry = saved[index].clone();
            // Jumps inside the finally body only see the outer regions, and
            // its code only the environments open at the `try`
            self.try_stack.truncate(index);
            self.envs.truncate(entry.env_depth);
            self.b.set_handler(entry.outer_handler);
            let next = self.b.create_block("try.exit");
            self.b.terminate(InstrKind::TryEnd { next }, vec![]);
            self.b.switch_to_block(next);
            if let Some(finalizer) = entry.finalizer {
                self.lower_block(finalizer)?;
            }
        }
        self.try_stack = saved;
        self.envs = saved_envs;
        self.b.set_handler(saved_handler);
        Ok(())
    }
}
