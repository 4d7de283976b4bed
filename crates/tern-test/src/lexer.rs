//! Lexer for the JavaScript subset
//!
//! Tokens come from a logos-generated scanner; this module adds line and
//! column tracking and turns literal slices into values.

use logos::Logos;
use tern_ast::Span;
use thiserror::Error;

#[derive(Logos, Debug, Clone, PartialEq)]
pub enum Token {
    // Whitespace and comments (skip)
    #[regex(r"[ \t\r\n\f]+", logos::skip)]
    #[regex(r"//[^\n]*", logos::skip)]
    #[regex(r"/\*", lex_block_comment)]
    Trivia,

    // Keywords (must come before identifiers)
    #[token("var")]
    Var,
    #[token("let")]
    Let,
    #[token("const")]
    Const,
    #[token("function")]
    Function,
    #[token("return")]
    Return,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("do")]
    Do,
    #[token("for")]
    For,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("switch")]
    Switch,
    #[token("case")]
    Case,
    #[token("default")]
    Default,
    #[token("throw")]
    Throw,
    #[token("try")]
    Try,
    #[token("catch")]
    Catch,
    #[token("finally")]
    Finally,
    #[token("new")]
    New,
    #[token("this")]
    This,
    #[token("typeof")]
    Typeof,
    #[token("void")]
    Void,
    #[token("delete")]
    Delete,
    #[token("instanceof")]
    Instanceof,
    #[token("in")]
    In,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,

    #[regex(r"[a-zA-Z_$][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Identifier(String),

    #[regex(r"0[xX][0-9a-fA-F]+", |lex| parse_radix(lex.slice(), 16))]
    #[regex(r"0[bB][01]+", |lex| parse_radix(lex.slice(), 2))]
    #[regex(r"0[oO][0-7]+", |lex| parse_radix(lex.slice(), 8))]
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),

    #[regex(r"[0-9]+n", |lex| lex.slice().trim_end_matches('n').to_string())]
    BigInt(String),

    #[regex(r#""([^"\\\n]|\\.)*""#, parse_string)]
    #[regex(r"'([^'\\\n]|\\.)*'", parse_string)]
    String(String),

    // Operators (longest first)
    #[token(">>>=")]
    UShrAssign,
    #[token("===")]
    StrictEq,
    #[token("!==")]
    StrictNotEq,
    #[token(">>>")]
    UShr,
    #[token("**=")]
    ExpAssign,
    #[token("<<=")]
    ShlAssign,
    #[token(">>=")]
    ShrAssign,
    #[token("=>")]
    Arrow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("??")]
    Nullish,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,
    #[token("**")]
    StarStar,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("!")]
    Bang,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LeftParen,
    #[token(")")]
    RightParen,
    #[token("{")]
    LeftBrace,
    #[token("}")]
    RightBrace,
    #[token("[")]
    LeftBracket,
    #[token("]")]
    RightBracket,

    /// End of input; never produced by logos
    Eof,
}

fn lex_block_comment(lex: &mut logos::Lexer<Token>) -> logos::Skip {
    let remainder = lex.remainder();
    match remainder.find("*/") {
        Some(end) => lex.bump(end + 2),
        None => lex.bump(remainder.len()),
    }
    logos::Skip
}

fn parse_radix(slice: &str, radix: u32) -> Option<f64> {
    let mut value = 0.0f64;
    for c in slice[2..].chars() {
        value = value * radix as f64 + c.to_digit(radix)? as f64;
    }
    Some(value)
}

fn parse_string(lex: &mut logos::Lexer<Token>) -> Option<String> {
    let s = lex.slice();
    let inner = &s[1..s.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next()? {
            'n' => result.push('\n'),
            'r' => result.push('\r'),
            't' => result.push('\t'),
            '0' => result.push('\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                result.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                result.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            other => result.push(other),
        }
    }
    Some(result)
}

fn advance(text: &str, line: &mut u32, column: &mut u32) {
    for c in text.chars() {
        if c == '\n' {
            *line += 1;
            *column = 1;
        } else {
            *column += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("Unexpected character '{text}' at {span}")]
    UnexpectedCharacter { text: String, span: Span },
}

/// Tokenize `source`; the result always ends with [`Token::Eof`]
pub fn tokenize(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut line = 1u32;
    let mut column = 1u32;
    let mut last_end = 0usize;

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        advance(&source[last_end..range.start], &mut line, &mut column);
        let span = Span::new(range.start as u32, range.end as u32, line, column);
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => {
                return Err(LexError::UnexpectedCharacter {
                    text: lexer.slice().to_string(),
                    span,
                })
            }
        }
        advance(&source[range.start..range.end], &mut line, &mut column);
        last_end = range.end;
    }
    advance(&source[last_end..], &mut line, &mut column);
    let end = source.len() as u32;
    tokens.push((Token::Eof, Span::new(end, end, line, column)));
    Ok(tokens)
}
