//! Recursive descent parser for the JavaScript subset
//!
//! Declarations are entered into the [`DeclTable`] as they are parsed, with
//! `var`, function and parameter names shared per function and `let`/`const`
//! names fresh per declaration. Identifier references are left unresolved;
//! [`crate::resolve`] binds them once the whole program is known.

use crate::lexer::{tokenize, LexError, Token};
use rustc_hash::{FxHashMap, FxHashSet};
use tern_ast::{
    BinaryOp, Binding, BindingId, CatchClause, DeclKind, DeclTable, Expr, ExprKind, ForInit, FunctionId, FunctionKind,
    FunctionNode, Ident, LogicalOp, MemberProp, Program, PropKey, Property, Span, Stmt, StmtKind, Storage, SwitchCase,
    UnaryOp, UpdateOp, VarDeclarator,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("Expected {expected}, found {found:?} at {span}")]
    UnexpectedToken { expected: String, found: Token, span: Span },

    #[error("Invalid syntax at {span}: {reason}")]
    InvalidSyntax { reason: String, span: Span },

    #[error("Identifier '{name}' has already been declared at {span}")]
    DuplicateDeclaration { name: String, span: Span },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Declarations of the function being parsed
struct FunctionScope {
    id: FunctionId,
    depth: u32,
    /// `var`, function and parameter names
    vars: FxHashMap<String, BindingId>,
    /// Lexical names of each open block
    blocks: Vec<FxHashSet<String>>,
}

impl FunctionScope {
    fn new(id: FunctionId, depth: u32) -> Self {
        Self {
            id,
            depth,
            vars: FxHashMap::default(),
            blocks: vec![FxHashSet::default()],
        }
    }
}

enum InfixOp {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

/// Binding power and operator of a binary token
fn infix_op(token: &Token) -> Option<(u8, InfixOp)> {
    use InfixOp::{Binary, Logical};
    let op = match token {
        Token::Nullish => (1, Logical(LogicalOp::Nullish)),
        Token::OrOr => (2, Logical(LogicalOp::Or)),
        Token::AndAnd => (3, Logical(LogicalOp::And)),
        Token::Pipe => (4, Binary(BinaryOp::BitOr)),
        Token::Caret => (5, Binary(BinaryOp::BitXor)),
        Token::Amp => (6, Binary(BinaryOp::BitAnd)),
        Token::EqEq => (7, Binary(BinaryOp::Eq)),
        Token::NotEq => (7, Binary(BinaryOp::NotEq)),
        Token::StrictEq => (7, Binary(BinaryOp::StrictEq)),
        Token::StrictNotEq => (7, Binary(BinaryOp::StrictNotEq)),
        Token::Lt => (8, Binary(BinaryOp::Lt)),
        Token::LtEq => (8, Binary(BinaryOp::LtEq)),
        Token::Gt => (8, Binary(BinaryOp::Gt)),
        Token::GtEq => (8, Binary(BinaryOp::GtEq)),
        Token::Instanceof => (8, Binary(BinaryOp::InstanceOf)),
        Token::In => (8, Binary(BinaryOp::In)),
        Token::Shl => (9, Binary(BinaryOp::Shl)),
        Token::Shr => (9, Binary(BinaryOp::Shr)),
        Token::UShr => (9, Binary(BinaryOp::UShr)),
        Token::Plus => (10, Binary(BinaryOp::Add)),
        Token::Minus => (10, Binary(BinaryOp::Sub)),
        Token::Star => (11, Binary(BinaryOp::Mul)),
        Token::Slash => (11, Binary(BinaryOp::Div)),
        Token::Percent => (11, Binary(BinaryOp::Mod)),
        Token::StarStar => (12, Binary(BinaryOp::Exp)),
        _ => return None,
    };
    Some(op)
}

/// `Some(None)` for `=`, `Some(Some(op))` for a compound assignment
fn assign_op(token: &Token) -> Option<Option<BinaryOp>> {
    let op = match token {
        Token::Assign => None,
        Token::PlusAssign => Some(BinaryOp::Add),
        Token::MinusAssign => Some(BinaryOp::Sub),
        Token::StarAssign => Some(BinaryOp::Mul),
        Token::SlashAssign => Some(BinaryOp::Div),
        Token::PercentAssign => Some(BinaryOp::Mod),
        Token::ExpAssign => Some(BinaryOp::Exp),
        Token::ShlAssign => Some(BinaryOp::Shl),
        Token::ShrAssign => Some(BinaryOp::Shr),
        Token::UShrAssign => Some(BinaryOp::UShr),
        Token::AmpAssign => Some(BinaryOp::BitAnd),
        Token::PipeAssign => Some(BinaryOp::BitOr),
        Token::CaretAssign => Some(BinaryOp::BitXor),
        _ => return None,
    };
    Some(op)
}

/// Source text of a keyword, for use as a property name
fn keyword_text(token: &Token) -> Option<&'static str> {
    let text = match token {
        Token::Var => "var",
        Token::Let => "let",
        Token::Const => "const",
        Token::Function => "function",
        Token::Return => "return",
        Token::If => "if",
        Token::Else => "else",
        Token::While => "while",
        Token::Do => "do",
        Token::For => "for",
        Token::Break => "break",
        Token::Continue => "continue",
        Token::Switch => "switch",
        Token::Case => "case",
        Token::Default => "default",
        Token::Throw => "throw",
        Token::Try => "try",
        Token::Catch => "catch",
        Token::Finally => "finally",
        Token::New => "new",
        Token::This => "this",
        Token::Typeof => "typeof",
        Token::Void => "void",
        Token::Delete => "delete",
        Token::Instanceof => "instanceof",
        Token::In => "in",
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        _ => return None,
    };
    Some(text)
}

/// Parse a whole program
pub fn parse(source: &str) -> ParseResult<(Program, DeclTable)> {
    Parser::new(source)?.parse_program()
}

pub struct Parser {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    decls: DeclTable,
    current: FunctionScope,
    outer: Vec<FunctionScope>,
    next_function: u32,
}

impl Parser {
    pub fn new(source: &str) -> ParseResult<Self> {
        Ok(Self {
            tokens: tokenize(source)?,
            pos: 0,
            decls: DeclTable::new(),
            current: FunctionScope::new(FunctionId::PROGRAM, 0),
            outer: Vec::new(),
            next_function: 1,
        })
    }

    pub fn parse_program(mut self) -> ParseResult<(Program, DeclTable)> {
        let start = self.current_span();
        let mut body = Vec::new();
        while !self.at_end() {
            body.push(self.parse_statement()?);
        }
        let span = start.to(self.current_span());
        Ok((Program { body, span }, self.decls))
    }

    // ========================================================================
    // Token Navigation
    // ========================================================================

    fn current(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn current_span(&self) -> Span {
        self.tokens[self.pos].1
    }

    fn peek(&self) -> &Token {
        let index = (self.pos + 1).min(self.tokens.len() - 1);
        &self.tokens[index].0
    }

    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].1
    }

    fn span_from(&self, start: Span) -> Span {
        start.to(self.previous_span())
    }

    fn at_end(&self) -> bool {
        matches!(self.current(), Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        std::mem::discriminant(self.current()) == std::mem::discriminant(expected)
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token) -> ParseResult<Span> {
        if self.check(&expected) {
            let span = self.current_span();
            self.advance();
            Ok(span)
        } else {
            Err(self.unexpected(&format!("{:?}", expected)))
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<(String, Span)> {
        let span = self.current_span();
        match self.current().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok((name, span))
            }
            _ => Err(self.unexpected("identifier")),
        }
    }

    /// Optional statement terminator
    fn semicolon(&mut self) {
        self.eat(&Token::Semicolon);
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: self.current().clone(),
            span: self.current_span(),
        }
    }

    fn invalid(&self, reason: impl Into<String>, span: Span) -> ParseError {
        ParseError::InvalidSyntax {
            reason: reason.into(),
            span,
        }
    }

    // ========================================================================
    // Declarations
    // ========================================================================

    fn declare(&mut self, name: String, kind: DeclKind, span: Span) -> ParseResult<BindingId> {
        let storage = match kind {
            DeclKind::Var | DeclKind::Function if self.current.depth == 0 => Storage::Global,
            DeclKind::Param => Storage::Parameter,
            DeclKind::Catch => Storage::CatchBound,
            _ => Storage::Local,
        };
        let shared = matches!(kind, DeclKind::Var | DeclKind::Function | DeclKind::Param);
        if shared {
            if let Some(&existing) = self.current.vars.get(&name) {
                return Ok(existing);
            }
        } else if let Some(block) = self.current.blocks.last_mut() {
            if !block.insert(name.clone()) {
                return Err(ParseError::DuplicateDeclaration { name, span });
            }
        }
        let id = self.decls.add(Binding {
            name: name.clone(),
            kind,
            storage,
            captured: false,
            function: self.current.id,
            depth: self.current.depth,
        });
        if shared {
            self.current.vars.insert(name, id);
        }
        Ok(id)
    }

    fn enter_block(&mut self) {
        self.current.blocks.push(FxHashSet::default());
    }

    fn exit_block(&mut self) {
        self.current.blocks.pop();
    }

    fn enter_function(&mut self) -> FunctionId {
        let id = FunctionId(self.next_function);
        self.next_function += 1;
        let scope = FunctionScope::new(id, self.current.depth + 1);
        let outer = std::mem::replace(&mut self.current, scope);
        self.outer.push(outer);
        id
    }

    fn exit_function(&mut self) {
        if let Some(outer) = self.outer.pop() {
            self.current = outer;
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn parse_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.current_span();
        let kind = match self.current() {
            Token::Var | Token::Let | Token::Const => {
                let declarators = self.parse_var_declarations()?;
                self.semicolon();
                StmtKind::VarDecl(declarators)
            }
            Token::Function => {
                let node = self.parse_function(true)?;
                StmtKind::FunctionDecl(Box::new(node))
            }
            Token::If => self.parse_if()?,
            Token::While => {
                self.advance();
                self.expect(Token::LeftParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                let body = Box::new(self.parse_statement()?);
                StmtKind::While { test, body }
            }
            Token::Do => {
                self.advance();
                let body = Box::new(self.parse_statement()?);
                self.expect(Token::While)?;
                self.expect(Token::LeftParen)?;
                let test = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                self.semicolon();
                StmtKind::DoWhile { body, test }
            }
            Token::For => self.parse_for()?,
            Token::LeftBrace => StmtKind::Block(self.parse_block()?),
            Token::Return => {
                self.advance();
                let value = if self.check(&Token::Semicolon) || self.check(&Token::RightBrace) || self.at_end() {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                self.semicolon();
                StmtKind::Return(value)
            }
            Token::Break | Token::Continue => {
                let is_break = matches!(self.advance(), Token::Break);
                let label = match self.current().clone() {
                    Token::Identifier(name) if self.current_span().line == self.previous_span().line => {
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                self.semicolon();
                if is_break {
                    StmtKind::Break(label)
                } else {
                    StmtKind::Continue(label)
                }
            }
            Token::Switch => self.parse_switch()?,
            Token::Throw => {
                self.advance();
                let value = self.parse_expression()?;
                self.semicolon();
                StmtKind::Throw(value)
            }
            Token::Try => self.parse_try()?,
            Token::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            Token::Identifier(_) if matches!(self.peek(), Token::Colon) => {
                let (label, _) = self.expect_identifier()?;
                self.advance();
                let body = Box::new(self.parse_statement()?);
                StmtKind::Labeled { label, body }
            }
            _ => {
                let expr = self.parse_expression()?;
                self.semicolon();
                StmtKind::Expr(expr)
            }
        };
        Ok(Stmt::new(kind, self.span_from(start)))
    }

    /// `{ ... }` as its own lexical block
    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.enter_block();
        let body = self.parse_block_body();
        self.exit_block();
        body
    }

    /// `{ ... }` in the block the caller opened
    fn parse_block_body(&mut self) -> ParseResult<Vec<Stmt>> {
        self.expect(Token::LeftBrace)?;
        let mut body = Vec::new();
        while !self.check(&Token::RightBrace) {
            if self.at_end() {
                return Err(self.unexpected("'}'"));
            }
            body.push(self.parse_statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn parse_var_declarations(&mut self) -> ParseResult<Vec<VarDeclarator>> {
        let kind = match self.advance() {
            Token::Let => DeclKind::Let,
            Token::Const => DeclKind::Const,
            _ => DeclKind::Var,
        };
        let mut declarators = Vec::new();
        loop {
            let (name, start) = self.expect_identifier()?;
            let binding = self.declare(name, kind, start)?;
            let init = if self.eat(&Token::Assign) {
                Some(self.parse_assignment()?)
            } else {
                None
            };
            if init.is_none() && kind == DeclKind::Const {
                return Err(self.invalid("Missing initializer in const declaration", start));
            }
            declarators.push(VarDeclarator {
                binding,
                init,
                span: self.span_from(start),
            });
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok(declarators)
    }

    fn parse_if(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect(Token::LeftParen)?;
        let test = self.parse_expression()?;
        self.expect(Token::RightParen)?;
        let consequent = Box::new(self.parse_statement()?);
        let alternate = if self.eat(&Token::Else) {
            Some(Box::new(self.parse_statement()?))
        } else {
            None
        };
        Ok(StmtKind::If {
            test,
            consequent,
            alternate,
        })
    }

    fn parse_for(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect(Token::LeftParen)?;
        self.enter_block();
        let init = match self.current() {
            Token::Var | Token::Let | Token::Const => Some(ForInit::VarDecl(self.parse_var_declarations()?)),
            Token::Semicolon => None,
            _ => Some(ForInit::Expr(self.parse_expression()?)),
        };
        self.expect(Token::Semicolon)?;
        let test = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::Semicolon)?;
        let update = if self.check(&Token::RightParen) {
            None
        } else {
            Some(self.parse_expression()?)
        };
        self.expect(Token::RightParen)?;
        let body = Box::new(self.parse_statement()?);
        self.exit_block();
        Ok(StmtKind::For {
            init,
            test,
            update,
            body,
        })
    }

    fn parse_switch(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        self.expect(Token::LeftParen)?;
        let discriminant = self.parse_expression()?;
        self.expect(Token::RightParen)?;
        self.expect(Token::LeftBrace)?;
        self.enter_block();
        let mut cases = Vec::new();
        let mut seen_default = false;
        while !self.eat(&Token::RightBrace) {
            let start = self.current_span();
            let test = match self.advance() {
                Token::Case => Some(self.parse_expression()?),
                Token::Default => {
                    if seen_default {
                        return Err(self.invalid("More than one default clause in switch statement", start));
                    }
                    seen_default = true;
                    None
                }
                found => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "'case' or 'default'".to_string(),
                        found,
                        span: start,
                    })
                }
            };
            self.expect(Token::Colon)?;
            let mut body = Vec::new();
            while !matches!(self.current(), Token::Case | Token::Default | Token::RightBrace | Token::Eof) {
                body.push(self.parse_statement()?);
            }
            cases.push(SwitchCase {
                test,
                body,
                span: self.span_from(start),
            });
        }
        self.exit_block();
        Ok(StmtKind::Switch { discriminant, cases })
    }

    fn parse_try(&mut self) -> ParseResult<StmtKind> {
        self.advance();
        let block = self.parse_block()?;
        let handler = if self.check(&Token::Catch) {
            let start = self.current_span();
            self.advance();
            self.enter_block();
            let param = if self.eat(&Token::LeftParen) {
                let (name, span) = self.expect_identifier()?;
                self.expect(Token::RightParen)?;
                Some(self.declare(name, DeclKind::Catch, span)?)
            } else {
                None
            };
            let body = self.parse_block_body();
            self.exit_block();
            Some(CatchClause {
                param,
                body: body?,
                span: self.span_from(start),
            })
        } else {
            None
        };
        let finalizer = if self.eat(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.unexpected("'catch' or 'finally'"));
        }
        Ok(StmtKind::Try {
            block,
            handler,
            finalizer,
        })
    }

    // ========================================================================
    // Functions
    // ========================================================================

    /// `function [*] name? (params) { body }`
    fn parse_function(&mut self, declaration: bool) -> ParseResult<FunctionNode> {
        let start = self.expect(Token::Function)?;
        let kind = if self.eat(&Token::Star) {
            FunctionKind::Generator
        } else {
            FunctionKind::Normal
        };
        let (name, binding) = match self.current().clone() {
            Token::Identifier(name) => {
                let span = self.current_span();
                self.advance();
                let binding = if declaration {
                    Some(self.declare(name.clone(), DeclKind::Function, span)?)
                } else {
                    None
                };
                (Some(name), binding)
            }
            _ if declaration => return Err(self.unexpected("function name")),
            _ => (None, None),
        };

        let id = self.enter_function();
        let result = self.parse_params().and_then(|params| {
            let body = self.parse_block_body()?;
            Ok((params, body))
        });
        self.exit_function();
        let (params, body) = result?;

        Ok(FunctionNode {
            id,
            name,
            binding,
            params,
            body,
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_params(&mut self) -> ParseResult<Vec<BindingId>> {
        self.expect(Token::LeftParen)?;
        let mut params = Vec::new();
        while !self.eat(&Token::RightParen) {
            let (name, span) = self.expect_identifier()?;
            params.push(self.declare(name, DeclKind::Param, span)?);
            if !self.check(&Token::RightParen) {
                self.expect(Token::Comma)?;
            }
        }
        Ok(params)
    }

    /// True when the `(` at the cursor opens an arrow parameter list
    fn at_arrow_params(&self) -> bool {
        let mut depth = 0usize;
        for (offset, (token, _)) in self.tokens[self.pos..].iter().enumerate() {
            match token {
                Token::LeftParen => depth += 1,
                Token::RightParen => {
                    depth -= 1;
                    if depth == 0 {
                        return matches!(self.tokens.get(self.pos + offset + 1), Some((Token::Arrow, _)));
                    }
                }
                Token::Eof => return false,
                _ => {}
            }
        }
        false
    }

    fn parse_arrow(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let id = self.enter_function();
        let result = self.parse_arrow_rest();
        self.exit_function();
        let (params, body) = result?;
        let span = self.span_from(start);
        Ok(Expr::new(
            ExprKind::Function(Box::new(FunctionNode {
                id,
                name: None,
                binding: None,
                params,
                body,
                kind: FunctionKind::Arrow,
                span,
            })),
            span,
        ))
    }

    fn parse_arrow_rest(&mut self) -> ParseResult<(Vec<BindingId>, Vec<Stmt>)> {
        let params = if self.check(&Token::LeftParen) {
            self.parse_params()?
        } else {
            let (name, span) = self.expect_identifier()?;
            vec![self.declare(name, DeclKind::Param, span)?]
        };
        self.expect(Token::Arrow)?;
        let body = if self.check(&Token::LeftBrace) {
            self.parse_block_body()?
        } else {
            let value = self.parse_assignment()?;
            let span = value.span;
            vec![Stmt::new(StmtKind::Return(Some(value)), span)]
        };
        Ok((params, body))
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let first = self.parse_assignment()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut exprs = vec![first];
        while self.eat(&Token::Comma) {
            exprs.push(self.parse_assignment()?);
        }
        Ok(Expr::new(ExprKind::Sequence(exprs), self.span_from(start)))
    }

    fn parse_assignment(&mut self) -> ParseResult<Expr> {
        let arrow = match self.current() {
            Token::Identifier(_) => matches!(self.peek(), Token::Arrow),
            Token::LeftParen => self.at_arrow_params(),
            _ => false,
        };
        if arrow {
            return self.parse_arrow();
        }

        let start = self.current_span();
        let target = self.parse_conditional()?;
        let Some(op) = assign_op(self.current()) else {
            return Ok(target);
        };
        if !matches!(target.kind, ExprKind::Ident(_) | ExprKind::Member { .. }) {
            return Err(self.invalid("Invalid left-hand side in assignment", target.span));
        }
        self.advance();
        let value = self.parse_assignment()?;
        Ok(Expr::new(
            ExprKind::Assign {
                op,
                target: Box::new(target),
                value: Box::new(value),
            },
            self.span_from(start),
        ))
    }

    fn parse_conditional(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let test = self.parse_binary(1)?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.parse_assignment()?;
        self.expect(Token::Colon)?;
        let alternate = self.parse_assignment()?;
        Ok(Expr::new(
            ExprKind::Conditional {
                test: Box::new(test),
                consequent: Box::new(consequent),
                alternate: Box::new(alternate),
            },
            self.span_from(start),
        ))
    }

    fn parse_binary(&mut self, min_power: u8) -> ParseResult<Expr> {
        let start = self.current_span();
        let mut left = self.parse_unary()?;
        while let Some((power, op)) = infix_op(self.current()) {
            if power < min_power {
                break;
            }
            self.advance();
            // `**` is right-associative
            let next = if power == 12 { power } else { power + 1 };
            let right = Box::new(self.parse_binary(next)?);
            let kind = match op {
                InfixOp::Binary(op) => ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right,
                },
                InfixOp::Logical(op) => ExprKind::Logical {
                    op,
                    left: Box::new(left),
                    right,
                },
            };
            left = Expr::new(kind, self.span_from(start));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let op = match self.current() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            Token::Typeof => UnaryOp::TypeOf,
            Token::Void => UnaryOp::Void,
            Token::Delete => UnaryOp::Delete,
            Token::PlusPlus | Token::MinusMinus => {
                let op = if matches!(self.advance(), Token::PlusPlus) {
                    UpdateOp::Increment
                } else {
                    UpdateOp::Decrement
                };
                let target = self.parse_unary()?;
                return self.update(op, true, target, start);
            }
            _ => return self.parse_postfix(),
        };
        self.advance();
        let arg = Box::new(self.parse_unary()?);
        Ok(Expr::new(ExprKind::Unary { op, arg }, self.span_from(start)))
    }

    fn parse_postfix(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let expr = self.parse_call_member()?;
        let op = match self.current() {
            Token::PlusPlus => UpdateOp::Increment,
            Token::MinusMinus => UpdateOp::Decrement,
            _ => return Ok(expr),
        };
        // A line break before `++` ends the expression
        if self.current_span().line != self.previous_span().line {
            return Ok(expr);
        }
        self.advance();
        self.update(op, false, expr, start)
    }

    fn update(&self, op: UpdateOp, prefix: bool, target: Expr, start: Span) -> ParseResult<Expr> {
        if !matches!(target.kind, ExprKind::Ident(_) | ExprKind::Member { .. }) {
            return Err(self.invalid("Invalid left-hand side expression in update operation", target.span));
        }
        Ok(Expr::new(
            ExprKind::Update {
                op,
                prefix,
                target: Box::new(target),
            },
            self.span_from(start),
        ))
    }

    fn parse_call_member(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let mut expr = if self.check(&Token::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        loop {
            expr = match self.current() {
                Token::Dot | Token::LeftBracket => self.parse_member(expr, start)?,
                Token::LeftParen => {
                    let args = self.parse_arguments()?;
                    Expr::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        self.span_from(start),
                    )
                }
                _ => return Ok(expr),
            };
        }
    }

    fn parse_new(&mut self) -> ParseResult<Expr> {
        let start = self.expect(Token::New)?;
        let mut callee = if self.check(&Token::New) {
            self.parse_new()?
        } else {
            self.parse_primary()?
        };
        while matches!(self.current(), Token::Dot | Token::LeftBracket) {
            callee = self.parse_member(callee, start)?;
        }
        let args = if self.check(&Token::LeftParen) {
            self.parse_arguments()?
        } else {
            Vec::new()
        };
        Ok(Expr::new(
            ExprKind::New {
                callee: Box::new(callee),
                args,
            },
            self.span_from(start),
        ))
    }

    fn parse_member(&mut self, object: Expr, start: Span) -> ParseResult<Expr> {
        let property = if self.eat(&Token::Dot) {
            MemberProp::Named(self.parse_property_name()?)
        } else {
            self.expect(Token::LeftBracket)?;
            let key = self.parse_expression()?;
            self.expect(Token::RightBracket)?;
            MemberProp::Computed(Box::new(key))
        };
        Ok(Expr::new(
            ExprKind::Member {
                object: Box::new(object),
                property,
            },
            self.span_from(start),
        ))
    }

    fn parse_property_name(&mut self) -> ParseResult<String> {
        let token = self.current().clone();
        let name = match &token {
            Token::Identifier(name) => name.clone(),
            other => match keyword_text(other) {
                Some(text) => text.to_string(),
                None => return Err(self.unexpected("property name")),
            },
        };
        self.advance();
        Ok(name)
    }

    fn parse_arguments(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(Token::LeftParen)?;
        let mut args = Vec::new();
        while !self.eat(&Token::RightParen) {
            args.push(self.parse_assignment()?);
            if !self.check(&Token::RightParen) {
                self.expect(Token::Comma)?;
            }
        }
        Ok(args)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        let start = self.current_span();
        let kind = match self.current().clone() {
            Token::Number(n) => ExprKind::Number(n),
            Token::String(s) => ExprKind::String(s),
            Token::BigInt(digits) => ExprKind::BigInt(digits),
            Token::True => ExprKind::Bool(true),
            Token::False => ExprKind::Bool(false),
            Token::Null => ExprKind::Null,
            Token::This => ExprKind::This,
            Token::Identifier(name) => ExprKind::Ident(Ident { name, binding: None }),
            Token::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Token::RightParen)?;
                return Ok(inner);
            }
            Token::LeftBracket => return self.parse_array(),
            Token::LeftBrace => return self.parse_object(),
            Token::Function => {
                let node = self.parse_function(false)?;
                let span = node.span;
                return Ok(Expr::new(ExprKind::Function(Box::new(node)), span));
            }
            _ => return Err(self.unexpected("expression")),
        };
        self.advance();
        Ok(Expr::new(kind, start))
    }

    fn parse_array(&mut self) -> ParseResult<Expr> {
        let start = self.expect(Token::LeftBracket)?;
        let mut elements = Vec::new();
        while !self.eat(&Token::RightBracket) {
            if self.check(&Token::Comma) {
                return Err(self.invalid("Array holes are not supported", self.current_span()));
            }
            elements.push(self.parse_assignment()?);
            if !self.check(&Token::RightBracket) {
                self.expect(Token::Comma)?;
            }
        }
        Ok(Expr::new(ExprKind::Array(elements), self.span_from(start)))
    }

    fn parse_object(&mut self) -> ParseResult<Expr> {
        let start = self.expect(Token::LeftBrace)?;
        let mut properties = Vec::new();
        while !self.eat(&Token::RightBrace) {
            let key_span = self.current_span();
            let key = match self.current().clone() {
                Token::String(s) => {
                    self.advance();
                    PropKey::Named(s)
                }
                Token::Number(n) => {
                    self.advance();
                    PropKey::Named(tern_compiler::ir::js::number_to_string(n))
                }
                Token::LeftBracket => {
                    self.advance();
                    let key = self.parse_assignment()?;
                    self.expect(Token::RightBracket)?;
                    PropKey::Computed(key)
                }
                _ => PropKey::Named(self.parse_property_name()?),
            };
            let value = if self.eat(&Token::Colon) {
                self.parse_assignment()?
            } else {
                // Shorthand `{ x }`
                match &key {
                    PropKey::Named(name) if !self.check(&Token::Colon) => Expr::new(
                        ExprKind::Ident(Ident {
                            name: name.clone(),
                            binding: None,
                        }),
                        key_span,
                    ),
                    _ => return Err(self.unexpected("':'")),
                }
            };
            properties.push(Property { key, value });
            if !self.check(&Token::RightBrace) {
                self.expect(Token::Comma)?;
            }
        }
        Ok(Expr::new(ExprKind::Object(properties), self.span_from(start)))
    }
}
