//! JavaScript semantics for primitive values
//!
//! Shared by constant folding and by anything else that has to agree with
//! the interpreter on what an operator does to a primitive. Every evaluator
//! returns `None` when the operation would throw or cannot be decided at
//! compile time; callers leave such instructions alone.

use super::instr::{BinaryOp, UnaryOp};
use super::value::Literal;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};
use std::cmp::Ordering;

/// Largest BigInt exponent or shift folded at compile time
const MAX_BIGINT_FOLD_EXPONENT: u32 = 4096;

/// `Number::toString(10)`
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n < 0.0 {
        return format!("-{}", number_to_string(-n));
    }

    // Shortest round-trip digits and decimal exponent
    let sci = format!("{:e}", n);
    let (mantissa, exp) = match sci.split_once('e') {
        Some(parts) => parts,
        None => return sci,
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let exp: i32 = exp.parse().unwrap_or(0);
    let k = digits.len() as i32;
    let point = exp + 1;

    if k <= point && point <= 21 {
        let mut out = digits;
        out.extend(std::iter::repeat('0').take((point - k) as usize));
        out
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{}.{}", int, frac)
    } else if -6 < point && point <= 0 {
        format!("0.{}{}", "0".repeat((-point) as usize), digits)
    } else {
        let e = point - 1;
        let sign = if e < 0 { '-' } else { '+' };
        if k == 1 {
            format!("{}e{}{}", digits, sign, e.abs())
        } else {
            format!("{}.{}e{}{}", &digits[..1], &digits[1..], sign, e.abs())
        }
    }
}

fn is_js_whitespace(c: char) -> bool {
    c.is_whitespace() || c == '\u{feff}'
}

/// `StringToNumber`
pub fn string_to_number(s: &str) -> f64 {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return 0.0;
    }
    let radix = match s.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let body = &s[2..];
        if body.is_empty() {
            return f64::NAN;
        }
        let mut value = 0.0f64;
        for c in body.chars() {
            match c.to_digit(radix) {
                Some(d) => value = value * radix as f64 + d as f64,
                None => return f64::NAN,
            }
        }
        return value;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

/// `StringToBigInt`; `None` when the text is not a BigInt literal
pub fn string_to_bigint(s: &str) -> Option<BigInt> {
    let s = s.trim_matches(is_js_whitespace);
    if s.is_empty() {
        return Some(BigInt::zero());
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok();
    }
    None
}

/// `ToNumber`; `None` for BigInt (a TypeError) and the empty sentinel
pub fn to_number(lit: &Literal) -> Option<f64> {
    match lit {
        Literal::Undefined => Some(f64::NAN),
        Literal::Null => Some(0.0),
        Literal::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Literal::Number(n) => Some(*n),
        Literal::String(s) => Some(string_to_number(s)),
        Literal::BigInt(_) | Literal::Empty => None,
    }
}

/// `ToBoolean`
pub fn to_boolean(lit: &Literal) -> bool {
    match lit {
        Literal::Undefined | Literal::Null | Literal::Empty => false,
        Literal::Bool(b) => *b,
        Literal::Number(n) => !(*n == 0.0 || n.is_nan()),
        Literal::String(s) => !s.is_empty(),
        Literal::BigInt(b) => !b.is_zero(),
    }
}

/// `ToString`
pub fn to_js_string(lit: &Literal) -> Option<String> {
    match lit {
        Literal::Undefined => Some("undefined".to_string()),
        Literal::Null => Some("null".to_string()),
        Literal::Bool(b) => Some(b.to_string()),
        Literal::Number(n) => Some(number_to_string(*n)),
        Literal::String(s) => Some(s.clone()),
        Literal::BigInt(b) => Some(b.to_string()),
        Literal::Empty => None,
    }
}

/// `ToInt32`
pub fn to_int32(n: f64) -> i32 {
    to_uint32(n) as i32
}

/// `ToUint32`
pub fn to_uint32(n: f64) -> u32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4294967296.0);
    m as u32
}

/// `typeof` of a primitive
pub fn typeof_literal(lit: &Literal) -> &'static str {
    match lit {
        Literal::Undefined | Literal::Empty => "undefined",
        Literal::Null => "object",
        Literal::Bool(_) => "boolean",
        Literal::Number(_) => "number",
        Literal::String(_) => "string",
        Literal::BigInt(_) => "bigint",
    }
}

/// `IsStrictlyEqual`
pub fn strict_equals(a: &Literal, b: &Literal) -> bool {
    match (a, b) {
        (Literal::Undefined, Literal::Undefined)
        | (Literal::Null, Literal::Null)
        | (Literal::Empty, Literal::Empty) => true,
        (Literal::Bool(x), Literal::Bool(y)) => x == y,
        (Literal::Number(x), Literal::Number(y)) => x == y,
        (Literal::String(x), Literal::String(y)) => x == y,
        (Literal::BigInt(x), Literal::BigInt(y)) => x == y,
        _ => false,
    }
}

fn bigint_equals_number(b: &BigInt, n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && BigInt::from_f64(n).is_some_and(|m| &m == b)
}

/// `IsLooselyEqual` restricted to primitives
pub fn loose_equals(a: &Literal, b: &Literal) -> Option<bool> {
    use Literal::*;
    match (a, b) {
        (Empty, _) | (_, Empty) => None,
        (Undefined | Null, Undefined | Null) => Some(true),
        (Undefined | Null, _) | (_, Undefined | Null) => Some(false),
        (Number(x), String(s)) | (String(s), Number(x)) => Some(*x == string_to_number(s)),
        (BigInt(x), String(s)) | (String(s), BigInt(x)) => {
            Some(string_to_bigint(s).is_some_and(|y| &y == x))
        }
        (BigInt(x), Number(n)) | (Number(n), BigInt(x)) => Some(bigint_equals_number(x, *n)),
        (Bool(x), other) | (other, Bool(x)) if !matches!(other, Bool(_)) => {
            loose_equals(&Number(if *x { 1.0 } else { 0.0 }), other)
        }
        _ => Some(strict_equals(a, b)),
    }
}

/// Exact ordering of a BigInt against a Number; NaN is unordered
fn compare_bigint_number(b: &BigInt, n: f64) -> Option<Ordering> {
    if n.is_nan() {
        return None;
    }
    if n.is_infinite() {
        return Some(if n > 0.0 { Ordering::Less } else { Ordering::Greater });
    }
    let whole = BigInt::from_f64(n.trunc())?;
    Some(match b.cmp(&whole) {
        Ordering::Equal => 0.0_f64.partial_cmp(&n.fract())?,
        ordering => ordering,
    })
}

fn compare_utf16(a: &str, b: &str) -> Ordering {
    a.encode_utf16().cmp(b.encode_utf16())
}

/// `IsLessThan` ordering; the inner `None` is the "undefined" result that
/// makes every relational operator false
fn compare(a: &Literal, b: &Literal) -> Option<Option<Ordering>> {
    match (a, b) {
        (Literal::String(x), Literal::String(y)) => Some(Some(compare_utf16(x, y))),
        (Literal::BigInt(x), Literal::BigInt(y)) => Some(Some(x.cmp(y))),
        (Literal::BigInt(x), Literal::String(s)) => {
            Some(string_to_bigint(s).map(|y| x.cmp(&y)))
        }
        (Literal::String(s), Literal::BigInt(y)) => {
            Some(string_to_bigint(s).map(|x| x.cmp(y)))
        }
        (Literal::BigInt(x), other) => Some(compare_bigint_number(x, to_number(other)?)),
        (other, Literal::BigInt(y)) => {
            Some(compare_bigint_number(y, to_number(other)?).map(Ordering::reverse))
        }
        _ => {
            let x = to_number(a)?;
            let y = to_number(b)?;
            Some(x.partial_cmp(&y))
        }
    }
}

fn js_pow(base: f64, exp: f64) -> f64 {
    if exp.is_nan() || (base.abs() == 1.0 && exp.is_infinite()) {
        return f64::NAN;
    }
    base.powf(exp)
}

enum Numeric {
    Number(f64),
    BigInt(BigInt),
}

fn to_numeric(lit: &Literal) -> Option<Numeric> {
    match lit {
        Literal::BigInt(b) => Some(Numeric::BigInt(b.clone())),
        other => to_number(other).map(Numeric::Number),
    }
}

fn eval_number(op: BinaryOp, x: f64, y: f64) -> Option<f64> {
    let shift = || to_uint32(y) & 31;
    Some(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => x / y,
        BinaryOp::Mod => x % y,
        BinaryOp::Exp => js_pow(x, y),
        BinaryOp::BitAnd => (to_int32(x) & to_int32(y)) as f64,
        BinaryOp::BitOr => (to_int32(x) | to_int32(y)) as f64,
        BinaryOp::BitXor => (to_int32(x) ^ to_int32(y)) as f64,
        BinaryOp::Shl => to_int32(x).wrapping_shl(shift()) as f64,
        BinaryOp::Shr => (to_int32(x) >> shift()) as f64,
        BinaryOp::UShr => (to_uint32(x) >> shift()) as f64,
        _ => return None,
    })
}

fn eval_bigint(op: BinaryOp, x: &BigInt, y: &BigInt) -> Option<BigInt> {
    Some(match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div if !y.is_zero() => x / y,
        BinaryOp::Mod if !y.is_zero() => x % y,
        BinaryOp::Exp if !y.is_negative() => {
            let e = y.to_u32().filter(|e| *e <= MAX_BIGINT_FOLD_EXPONENT)?;
            num_traits::pow::pow(x.clone(), e as usize)
        }
        BinaryOp::BitAnd => x & y,
        BinaryOp::BitOr => x | y,
        BinaryOp::BitXor => x ^ y,
        BinaryOp::Shl | BinaryOp::Shr => {
            let amount = y.to_i64()?;
            let amount = if op == BinaryOp::Shr { -amount } else { amount };
            if amount.unsigned_abs() > MAX_BIGINT_FOLD_EXPONENT as u64 {
                return None;
            }
            if amount >= 0 {
                x << (amount as usize)
            } else {
                x >> ((-amount) as usize)
            }
        }
        _ => return None,
    })
}

/// Evaluate a binary operator on two primitives
pub fn eval_binary(op: BinaryOp, a: &Literal, b: &Literal) -> Option<Literal> {
    if matches!(a, Literal::Empty) || matches!(b, Literal::Empty) {
        return None;
    }
    match op {
        BinaryOp::StrictEq => Some(Literal::Bool(strict_equals(a, b))),
        BinaryOp::StrictNotEq => Some(Literal::Bool(!strict_equals(a, b))),
        BinaryOp::Eq => loose_equals(a, b).map(Literal::Bool),
        BinaryOp::NotEq => loose_equals(a, b).map(|r| Literal::Bool(!r)),
        BinaryOp::Lt => compare(a, b).map(|o| Literal::Bool(o == Some(Ordering::Less))),
        BinaryOp::Gt => compare(b, a).map(|o| Literal::Bool(o == Some(Ordering::Less))),
        BinaryOp::LtEq => compare(b, a)
            .map(|o| Literal::Bool(matches!(o, Some(Ordering::Greater | Ordering::Equal)))),
        BinaryOp::GtEq => compare(a, b)
            .map(|o| Literal::Bool(matches!(o, Some(Ordering::Greater | Ordering::Equal)))),
        BinaryOp::InstanceOf | BinaryOp::In => None,
        BinaryOp::Add if matches!(a, Literal::String(_)) || matches!(b, Literal::String(_)) => {
            Some(Literal::String(to_js_string(a)? + &to_js_string(b)?))
        }
        _ => match (to_numeric(a)?, to_numeric(b)?) {
            (Numeric::Number(x), Numeric::Number(y)) => eval_number(op, x, y).map(Literal::Number),
            (Numeric::BigInt(x), Numeric::BigInt(y)) => eval_bigint(op, &x, &y).map(Literal::BigInt),
            // Mixing BigInt and Number is a TypeError at run time
            _ => None,
        },
    }
}

/// Evaluate a unary operator on a primitive
pub fn eval_unary(op: UnaryOp, a: &Literal) -> Option<Literal> {
    if matches!(a, Literal::Empty) {
        return None;
    }
    match op {
        UnaryOp::Not => Some(Literal::Bool(!to_boolean(a))),
        UnaryOp::TypeOf => Some(Literal::String(typeof_literal(a).to_string())),
        UnaryOp::Void => Some(Literal::Undefined),
        UnaryOp::Plus => to_number(a).map(Literal::Number),
        UnaryOp::ToNumeric => Some(match to_numeric(a)? {
            Numeric::Number(n) => Literal::Number(n),
            Numeric::BigInt(b) => Literal::BigInt(b),
        }),
        UnaryOp::Neg => Some(match to_numeric(a)? {
            Numeric::Number(n) => Literal::Number(-n),
            Numeric::BigInt(b) => Literal::BigInt(-b),
        }),
        UnaryOp::BitNot => Some(match to_numeric(a)? {
            Numeric::Number(n) => Literal::Number(!to_int32(n) as f64),
            Numeric::BigInt(b) => Literal::BigInt(-b - 1),
        }),
        UnaryOp::Inc | UnaryOp::Dec => {
            let delta = if op == UnaryOp::Inc { 1 } else { -1 };
            Some(match to_numeric(a)? {
                Numeric::Number(n) => Literal::Number(n + delta as f64),
                Numeric::BigInt(b) => Literal::BigInt(b + delta),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> Literal {
        Literal::Number(n)
    }

    fn string(s: &str) -> Literal {
        Literal::String(s.to_string())
    }

    fn big(n: i64) -> Literal {
        Literal::BigInt(BigInt::from(n))
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(5.0), "5");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(0.000001), "0.000001");
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(123456789012.0), "123456789012");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
        assert_eq!(number_to_string(-2.5), "-2.5");
    }

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("12px").is_nan());
        assert_eq!(string_to_number(".5"), 0.5);
    }

    #[test]
    fn test_int32_conversions() {
        assert_eq!(to_int32(4294967295.0), -1);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_uint32(-1.0), 4294967295);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn test_add_semantics() {
        assert_eq!(eval_binary(BinaryOp::Add, &num(2.0), &num(3.0)), Some(num(5.0)));
        assert_eq!(eval_binary(BinaryOp::Add, &string("a"), &num(1.0)), Some(string("a1")));
        assert_eq!(eval_binary(BinaryOp::Add, &Literal::Null, &num(1.0)), Some(num(1.0)));
        assert_eq!(eval_binary(BinaryOp::Add, &big(2), &big(3)), Some(big(5)));
        assert_eq!(eval_binary(BinaryOp::Add, &big(2), &num(3.0)), None);
        assert_eq!(
            eval_binary(BinaryOp::Add, &string("x"), &big(3)),
            Some(string("x3"))
        );
    }

    #[test]
    fn test_negative_zero_and_nan() {
        let r = eval_binary(BinaryOp::Mul, &num(-1.0), &num(0.0)).unwrap();
        assert_eq!(r.as_number().map(|n| n.is_sign_negative()), Some(true));
        let r = eval_binary(BinaryOp::Div, &num(0.0), &num(0.0)).unwrap();
        assert!(r.as_number().unwrap().is_nan());
        assert_eq!(
            eval_binary(BinaryOp::StrictEq, &num(f64::NAN), &num(f64::NAN)),
            Some(Literal::Bool(false))
        );
        assert_eq!(
            eval_binary(BinaryOp::StrictEq, &num(0.0), &num(-0.0)),
            Some(Literal::Bool(true))
        );
        assert!(js_pow(1.0, f64::INFINITY).is_nan());
    }

    #[test]
    fn test_bigint_division_by_zero_not_folded() {
        assert_eq!(eval_binary(BinaryOp::Div, &big(1), &big(0)), None);
        assert_eq!(eval_binary(BinaryOp::Div, &big(-7), &big(2)), Some(big(-3)));
        assert_eq!(eval_binary(BinaryOp::Mod, &big(-7), &big(2)), Some(big(-1)));
        assert_eq!(eval_binary(BinaryOp::UShr, &big(1), &big(1)), None);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(eval_binary(BinaryOp::Shl, &num(1.0), &num(33.0)), Some(num(2.0)));
        assert_eq!(eval_binary(BinaryOp::Shr, &num(-8.0), &num(1.0)), Some(num(-4.0)));
        assert_eq!(
            eval_binary(BinaryOp::UShr, &num(-1.0), &num(0.0)),
            Some(num(4294967295.0))
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval_binary(BinaryOp::Lt, &num(1.0), &num(2.0)), Some(Literal::Bool(true)));
        assert_eq!(
            eval_binary(BinaryOp::LtEq, &num(f64::NAN), &num(2.0)),
            Some(Literal::Bool(false))
        );
        assert_eq!(
            eval_binary(BinaryOp::Lt, &string("a"), &string("b")),
            Some(Literal::Bool(true))
        );
        assert_eq!(
            eval_binary(BinaryOp::Gt, &string("10"), &num(9.0)),
            Some(Literal::Bool(true))
        );
    }

    #[test]
    fn test_bigint_number_comparisons() {
        let yes = Some(Literal::Bool(true));
        let no = Some(Literal::Bool(false));
        assert_eq!(eval_binary(BinaryOp::Gt, &big(5), &num(4.0)), yes);
        assert_eq!(eval_binary(BinaryOp::Lt, &big(1), &num(1.5)), yes);
        assert_eq!(eval_binary(BinaryOp::Lt, &num(-1.5), &big(-1)), yes);
        assert_eq!(eval_binary(BinaryOp::GtEq, &big(2), &num(2.0)), yes);
        assert_eq!(eval_binary(BinaryOp::Lt, &big(2), &num(2.0)), no);
        assert_eq!(eval_binary(BinaryOp::Gt, &big(-3), &num(-2.5)), no);
        assert_eq!(eval_binary(BinaryOp::Lt, &big(1), &num(f64::NAN)), no);
        assert_eq!(eval_binary(BinaryOp::GtEq, &big(1), &num(f64::NAN)), no);
        assert_eq!(eval_binary(BinaryOp::Lt, &big(1 << 60), &num(f64::INFINITY)), yes);
        assert_eq!(eval_binary(BinaryOp::Gt, &big(-(1 << 60)), &num(f64::NEG_INFINITY)), yes);
        assert_eq!(eval_binary(BinaryOp::Gt, &big(1), &Literal::Bool(false)), yes);
        assert_eq!(eval_binary(BinaryOp::Lt, &big(0), &Literal::Undefined), no);
    }

    #[test]
    fn test_loose_equality() {
        assert_eq!(loose_equals(&Literal::Null, &Literal::Undefined), Some(true));
        assert_eq!(loose_equals(&num(1.0), &string("1")), Some(true));
        assert_eq!(loose_equals(&Literal::Bool(true), &num(1.0)), Some(true));
        assert_eq!(loose_equals(&big(2), &num(2.0)), Some(true));
        assert_eq!(loose_equals(&Literal::Null, &num(0.0)), Some(false));
    }

    #[test]
    fn test_unary() {
        assert_eq!(eval_unary(UnaryOp::TypeOf, &Literal::Null), Some(string("object")));
        assert_eq!(eval_unary(UnaryOp::Not, &string("")), Some(Literal::Bool(true)));
        assert_eq!(eval_unary(UnaryOp::Plus, &big(1)), None);
        assert_eq!(eval_unary(UnaryOp::BitNot, &num(5.0)), Some(num(-6.0)));
        assert_eq!(eval_unary(UnaryOp::Inc, &string("4")), Some(num(5.0)));
        assert_eq!(eval_unary(UnaryOp::Neg, &big(3)), Some(big(-3)));
    }
}
