//! Expression lowering

use super::FunctionLowerer;
use crate::error::{CompileError, CompileResult};
use crate::ir::{BinaryOp, InstrKind, Literal, Operand, UnaryOp};
use num_bigint::BigInt;
use tern_ast::{self as ast, BindingId, ExprKind, LogicalOp, MemberProp, PropKey, Span, UpdateOp};

/// An assignable location
enum Place {
    Binding(BindingId),
    Global(String),
    Property { object: Operand, key: Operand },
}

/// The constant value of a literal expression
pub(super) fn literal_of(expr: &ast::Expr) -> CompileResult<Option<Literal>> {
    Ok(Some(match &expr.kind {
        ExprKind::Number(n) => Literal::Number(*n),
        ExprKind::String(s) => Literal::String(s.clone()),
        ExprKind::Bool(b) => Literal::Bool(*b),
        ExprKind::Null => Literal::Null,
        ExprKind::BigInt(digits) => {
            let value = digits.parse::<BigInt>().map_err(|_| CompileError::StaticError {
                message: format!("invalid BigInt literal '{}n'", digits),
                span: expr.span,
            })?;
            Literal::BigInt(value)
        }
        _ => return Ok(None),
    }))
}

impl<'a, 'b> FunctionLowerer<'a, 'b> {
    pub(super) fn lower_expr(&mut self, expr: &'a ast::Expr) -> CompileResult<Operand> {
        self.b.set_span(expr.span);
        match &expr.kind {
            ExprKind::Number(_)
            | ExprKind::String(_)
            | ExprKind::BigInt(_)
            | ExprKind::Bool(_)
            | ExprKind::Null => Ok(Operand::Literal(
                literal_of(expr)?.unwrap_or(Literal::Undefined),
            )),
            ExprKind::Ident(ident) => match ident.binding {
                Some(id) => self.read_binding(id),
                None if ident.name == "undefined" => Ok(Operand::undefined()),
                None => Ok(self
                    .b
                    .emit(InstrKind::LoadGlobal(ident.name.clone()), vec![])
                    .into()),
            },
            ExprKind::This => self.load_this(),
            ExprKind::Array(elements) => {
                let values = elements
                    .iter()
                    .map(|e| self.lower_expr(e))
                    .collect::<CompileResult<Vec<_>>>()?;
                self.b.set_span(expr.span);
                Ok(self.b.emit(InstrKind::AllocArray, values).into())
            }
            ExprKind::Object(props) => {
                let object: Operand = self.b.emit(InstrKind::AllocObject, vec![]).into();
                for prop in props {
                    let key = match &prop.key {
                        PropKey::Named(name) => Operand::string(name.clone()),
                        PropKey::Computed(key) => self.lower_expr(key)?,
                    };
                    let value = self.lower_expr(&prop.value)?;
                    self.b
                        .emit(InstrKind::StoreProperty, vec![object.clone(), key, value]);
                }
                Ok(object)
            }
            ExprKind::Function(node) => self.create_closure(node),
            ExprKind::Unary { op, arg } => self.lower_unary(*op, arg, expr.span),
            ExprKind::Update { op, prefix, target } => self.lower_update(*op, *prefix, target),
            ExprKind::Binary { op, left, right } => {
                let lhs = self.lower_expr(left)?;
                let rhs = self.lower_expr(right)?;
                self.b.set_span(expr.span);
                Ok(self.b.binary(BinaryOp::from_ast(*op), lhs, rhs))
            }
            ExprKind::Logical { op, left, right } => self.lower_logical(*op, left, right),
            ExprKind::Assign { op, target, value } => self.lower_assign(*op, target, value),
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => self.lower_conditional(test, consequent, alternate),
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr.span),
            ExprKind::New { callee, args } => {
                let mut operands = vec![self.lower_expr(callee)?];
                for arg in args {
                    operands.push(self.lower_expr(arg)?);
                }
                self.b.set_span(expr.span);
                Ok(self.b.emit(InstrKind::Construct, operands).into())
            }
            ExprKind::Member { object, property } => {
                let object = self.lower_expr(object)?;
                let key = self.lower_member_key(property)?;
                self.b.set_span(expr.span);
                Ok(self.b.emit(InstrKind::LoadProperty, vec![object, key]).into())
            }
            ExprKind::Sequence(exprs) => {
                let mut last = Operand::undefined();
                for e in exprs {
                    last = self.lower_expr(e)?;
                }
                Ok(last)
            }
        }
    }

    fn lower_member_key(&mut self, property: &'a MemberProp) -> CompileResult<Operand> {
        match property {
            MemberProp::Named(name) => Ok(Operand::string(name.clone())),
            MemberProp::Computed(key) => self.lower_expr(key),
        }
    }

    fn lower_unary(&mut self, op: ast::UnaryOp, arg: &'a ast::Expr, span: Span) -> CompileResult<Operand> {
        let op = match op {
            ast::UnaryOp::Neg => UnaryOp::Neg,
            ast::UnaryOp::Plus => UnaryOp::Plus,
            ast::UnaryOp::Not => UnaryOp::Not,
            ast::UnaryOp::BitNot => UnaryOp::BitNot,
            ast::UnaryOp::TypeOf => UnaryOp::TypeOf,
            ast::UnaryOp::Void => UnaryOp::Void,
            ast::UnaryOp::Delete => {
                if let ExprKind::Member { object, property } = &arg.kind {
                    let object = self.lower_expr(object)?;
                    let key = self.lower_member_key(property)?;
                    self.b.set_span(span);
                    return Ok(self
                        .b
                        .emit(InstrKind::DeleteProperty, vec![object, key])
                        .into());
                }
                self.lower_expr(arg)?;
                return Ok(Operand::Literal(Literal::Bool(true)));
            }
        };
        let value = match &arg.kind {
            // `typeof missing` is "undefined", not a ReferenceError
            ExprKind::Ident(ident)
                if op == UnaryOp::TypeOf && ident.binding.is_none() && ident.name != "undefined" =>
            {
                self.b.set_span(arg.span);
                self.b
                    .emit(InstrKind::TryLoadGlobal(ident.name.clone()), vec![])
                    .into()
            }
            _ => self.lower_expr(arg)?,
        };
        self.b.set_span(span);
        Ok(self.b.unary(op, value))
    }

    fn lower_place(&mut self, target: &'a ast::Expr) -> CompileResult<Place> {
        match &target.kind {
            ExprKind::Ident(ident) => Ok(match ident.binding {
                Some(id) => Place::Binding(id),
                None => Place::Global(ident.name.clone()),
            }),
            ExprKind::Member { object, property } => {
                let object = self.lower_expr(object)?;
                let key = self.lower_member_key(property)?;
                Ok(Place::Property { object, key })
            }
            _ => Err(CompileError::StaticError {
                message: "invalid assignment target".to_string(),
                span: target.span,
            }),
        }
    }

    fn read_place(&mut self, place: &Place) -> CompileResult<Operand> {
        match place {
            Place::Binding(id) => self.read_binding(*id),
            Place::Global(name) => Ok(self
                .b
                .emit(InstrKind::LoadGlobal(name.clone()), vec![])
                .into()),
            Place::Property { object, key } => Ok(self
                .b
                .emit(InstrKind::LoadProperty, vec![object.clone(), key.clone()])
                .into()),
        }
    }

    fn write_place(&mut self, place: &Place, value: Operand, span: Span) -> CompileResult<()> {
        match place {
            Place::Binding(id) => self.write_binding(*id, value, false, span)?,
            Place::Global(name) => {
                self.b.emit(InstrKind::StoreGlobal(name.clone()), vec![value]);
            }
            Place::Property { object, key } => {
                self.b
                    .emit(InstrKind::StoreProperty, vec![object.clone(), key.clone(), value]);
            }
        }
        Ok(())
    }

    fn lower_assign(
        &mut self,
        op: Option<ast::BinaryOp>,
        target: &'a ast::Expr,
        value: &'a ast::Expr,
    ) -> CompileResult<Operand> {
        let span = target.span.to(value.span);
        let place = self.lower_place(target)?;
        let value = match op {
            None => self.lower_expr(value)?,
            Some(op) => {
                let current = self.read_place(&place)?;
                let rhs = self.lower_expr(value)?;
                self.b.set_span(span);
                self.b.binary(BinaryOp::from_ast(op), current, rhs)
            }
        };
        self.b.set_span(span);
        self.write_place(&place, value.clone(), span)?;
        Ok(value)
    }

    fn lower_update(&mut self, op: UpdateOp, prefix: bool, target: &'a ast::Expr) -> CompileResult<Operand> {
        let place = self.lower_place(target)?;
        let current = self.read_place(&place)?;
        let old = self.b.unary(UnaryOp::ToNumeric, current);
        let step = match op {
            UpdateOp::Increment => UnaryOp::Inc,
            UpdateOp::Decrement => UnaryOp::Dec,
        };
        let new = self.b.unary(step, old.clone());
        self.write_place(&place, new.clone(), target.span)?;
        Ok(if prefix { new } else { old })
    }

    /// Short-circuit operators join through a stack temporary
    fn lower_logical(&mut self, op: LogicalOp, left: &'a ast::Expr, right: &'a ast::Expr) -> CompileResult<Operand> {
        let result = self.b.alloc_stack("logical");
        let lhs = self.lower_expr(left)?;
        self.b.store_stack(result, lhs.clone());

        let rhs_block = self.b.create_block("logical.rhs");
        let exit = self.b.create_block("logical.end");
        match op {
            LogicalOp::And => self.b.cond_branch(lhs, rhs_block, exit),
            LogicalOp::Or => self.b.cond_branch(lhs, exit, rhs_block),
            LogicalOp::Nullish => {
                let is_nullish = self
                    .b
                    .binary(BinaryOp::Eq, lhs, Operand::Literal(Literal::Null));
                self.b.cond_branch(is_nullish, rhs_block, exit);
            }
        }

        self.b.switch_to_block(rhs_block);
        let rhs = self.lower_expr(right)?;
        self.b.store_stack(result, rhs);
        self.b.branch(exit);

        self.b.switch_to_block(exit);
        Ok(self.b.load_stack(result))
    }

    fn lower_conditional(
        &mut self,
        test: &'a ast::Expr,
        consequent: &'a ast::Expr,
        alternate: &'a ast::Expr,
    ) -> CompileResult<Operand> {
        let result = self.b.alloc_stack("cond");
        let cond = self.lower_expr(test)?;
        let then_block = self.b.create_block("cond.then");
        let else_block = self.b.create_block("cond.else");
        let exit = self.b.create_block("cond.end");
        self.b.cond_branch(cond, then_block, else_block);

        self.b.switch_to_block(then_block);
        let value = self.lower_expr(consequent)?;
        self.b.store_stack(result, value);
        self.b.branch(exit);

        self.b.switch_to_block(else_block);
        let value = self.lower_expr(alternate)?;
        self.b.store_stack(result, value);
        self.b.branch(exit);

        self.b.switch_to_block(exit);
        Ok(self.b.load_stack(result))
    }

    fn lower_call(&mut self, callee: &'a ast::Expr, args: &'a [ast::Expr], span: Span) -> CompileResult<Operand> {
        let (function, this) = match &callee.kind {
            ExprKind::Member { object, property } => {
                let object = self.lower_expr(object)?;
                let key = self.lower_member_key(property)?;
                let method: Operand = self
                    .b
                    .emit(InstrKind::LoadProperty, vec![object.clone(), key])
                    .into();
                (method, object)
            }
            _ => (self.lower_expr(callee)?, Operand::undefined()),
        };
        let args = args
            .iter()
            .map(|arg| self.lower_expr(arg))
            .collect::<CompileResult<Vec<_>>>()?;
        self.b.set_span(span);
        Ok(self.b.call(function, this, args))
    }
}
