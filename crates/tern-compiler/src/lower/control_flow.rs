//! `switch` and `try` lowering

use super::expr::literal_of;
use super::{FunctionLowerer, JumpTarget, TryEntry};
use crate::error::CompileResult;
use crate::ir::{BinaryOp, BlockId, InstrKind, Literal, Operand};
use tern_ast::{self as ast, CatchClause, SwitchCase};

impl<'a, 'b> FunctionLowerer<'a, 'b> {
    /// All-literal case lists become a `Switch` terminator, anything else a
    /// chain of strict-equality tests in source order.
    pub(super) fn lower_switch(
        &mut self,
        discriminant: &'a ast::Expr,
        cases: &'a [SwitchCase],
        labels: Vec<String>,
    ) -> CompileResult<()> {
        let value = self.lower_expr(discriminant)?;
        // All cases share one scope
        let lists: Vec<&'a [ast::Stmt]> = cases.iter().map(|case| case.body.as_slice()).collect();
        let ids = self.block_ids(&lists, None);
        let scoped = self.enter_block(&ids)?;
        if scoped {
            for &list in &lists {
                self.hoist_functions(list)?;
            }
        }
        let exit = self.b.create_block("switch.end");
        let bodies: Vec<BlockId> = cases
            .iter()
            .map(|_| self.b.create_block("switch.case"))
            .collect();
        let default = cases
            .iter()
            .position(|case| case.test.is_none())
            .map_or(exit, |index| bodies[index]);

        let mut literals = Vec::new();
        for (case, body) in cases.iter().zip(&bodies) {
            if let Some(test) = &case.test {
                match literal_of(test)? {
                    Some(literal) => literals.push((literal, *body)),
                    None => {
                        literals.clear();
                        break;
                    }
                }
            }
        }
        let all_literal = literals.len() == cases.iter().filter(|c| c.test.is_some()).count();

        if all_literal {
            // A repeated case value can never be reached
            let mut table: Vec<(Literal, BlockId)> = Vec::with_capacity(literals.len());
            for (literal, body) in literals {
                if !table.iter().any(|(seen, _)| *seen == literal) {
                    table.push((literal, body));
                }
            }
            self.b
                .terminate(InstrKind::Switch { cases: table, default }, vec![value]);
        } else {
            for (case, body) in cases.iter().zip(&bodies) {
                let Some(test) = &case.test else { continue };
                self.b.set_span(case.span);
                let expected = self.lower_expr(test)?;
                let matches = self.b.binary(BinaryOp::StrictEq, value.clone(), expected);
                let next = self.b.create_block("switch.test");
                self.b.cond_branch(matches, *body, next);
                self.b.switch_to_block(next);
            }
            self.b.branch(default);
        }

        self.targets.push(JumpTarget {
            labels,
            break_target: exit,
            continue_target: None,
            breakable: true,
            try_depth: self.try_stack.len(),
        });
        let mut result = Ok(());
        for (index, case) in cases.iter().enumerate() {
            self.b.switch_to_block(bodies[index]);
            result = self.lower_stmts(&case.body);
            if result.is_err() {
                break;
            }
            // Fall through into the next case
            let next = bodies.get(index + 1).copied().unwrap_or(exit);
            self.b.branch(next);
        }
        self.targets.pop();
        result?;
        self.leave_block(scoped);

        self.b.switch_to_block(exit);
        Ok(())
    }

    /// `finally` bodies are emitted once for normal completion, once on the
    /// exceptional path (which rethrows), and once more at every jump that
    /// leaves the region.
    pub(super) fn lower_try(
        &mut self,
        block: &'a [ast::Stmt],
        handler: Option<&'a CatchClause>,
        finalizer: Option<&'a [ast::Stmt]>,
    ) -> CompileResult<()> {
        let outer = self.b.handler();
        let exit = self.b.create_block("try.end");

        let finally_catch = match finalizer {
            Some(finalizer) => {
                let catch = self.b.create_block("finally.catch");
                self.b.set_handler(Some(catch));
                let body = self.b.create_block("finally.region");
                self.b.terminate(InstrKind::TryStart { body, catch }, vec![]);
                self.b.switch_to_block(body);
                self.try_stack.push(TryEntry {
                    finalizer: Some(finalizer),
                    outer_handler: outer,
                    env_depth: self.envs.len(),
                });
                Some(catch)
            }
            None => None,
        };
        let region_handler = self.b.handler();
        let after = match finally_catch {
            Some(_) => self.b.create_block("try.after"),
            None => exit,
        };

        match handler {
            Some(clause) => {
                let catch = self.b.create_block("catch");
                self.b.set_handler(Some(catch));
                let body = self.b.create_block("try.body");
                self.b.terminate(InstrKind::TryStart { body, catch }, vec![]);
                self.b.switch_to_block(body);
                self.try_stack.push(TryEntry {
                    finalizer: None,
                    outer_handler: region_handler,
                    env_depth: self.envs.len(),
                });
                let result = self.lower_block(block);
                self.try_stack.pop();
                result?;
                self.b.set_handler(region_handler);
                self.b.terminate(InstrKind::TryEnd { next: after }, vec![]);

                self.b.switch_to_block(catch);
                self.b.set_span(clause.span);
                let exception: Operand = self.b.emit(InstrKind::CatchValue, vec![]).into();
                let ids = self.block_ids(&[clause.body.as_slice()], clause.param);
                let scoped = self.enter_block(&ids)?;
                if let Some(param) = clause.param {
                    self.write_binding(param, exception, true, clause.span)?;
                }
                if scoped {
                    self.hoist_functions(&clause.body)?;
                }
                self.lower_stmts(&clause.body)?;
                self.leave_block(scoped);
                self.b.branch(after);
            }
            None => {
                self.lower_block(block)?;
                self.b.branch(after);
            }
        }

        if let (Some(finalizer), Some(catch)) = (finalizer, finally_catch) {
            self.try_stack.pop();
            self.b.switch_to_block(after);
            self.b.set_handler(outer);
            let normal = self.b.create_block("finally");
            self.b.terminate(InstrKind::TryEnd { next: normal }, vec![]);
            self.b.switch_to_block(normal);
            self.lower_block(finalizer)?;
            self.b.branch(exit);

            self.b.switch_to_block(catch);
            let exception: Operand = self.b.emit(InstrKind::CatchValue, vec![]).into();
            self.lower_block(finalizer)?;
            self.b.throw(exception);
        }

        self.b.set_handler(outer);
        self.b.switch_to_block(exit);
        Ok(())
    }
}
