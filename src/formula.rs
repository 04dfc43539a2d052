//! Size and count formulas.
//!
//! A formula is an arithmetic expression over integer or decimal literals and pointer
//! tokens, optionally prefixed with the `=` marker:
//!
//! ```text
//! =?sizeIndicator?*4
//! =(?entry_count? - 1) * 12
//! ```
//!
//! Precedence (low to high):
//!   `+` / `-`
//!   `*` / `/` / `%`
//!   unary `-` / `+`
//!   atoms (numbers, `?pointer?`, parenthesized expressions)
//!
//! Evaluation happens in double precision and the result is truncated toward zero.
//! Pointers resolve against the current repetition scope first, then each enclosing scope,
//! then the top level. A pointer that resolves to nothing is an error, never zero.

use std::fmt;

use crate::err::{CodecError, FormulaError, Result};
use crate::store::DataStore;
use crate::store::path::{child_path, enclosing_scopes, parse_path};

pub const FORMULA_MARKER: char = '=';
pub const POINTER_DELIMITER: char = '?';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Pointer(String),
    Neg(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Pointer(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
enum Prec {
    Add = 1,   // `+`, `-`
    Mul = 2,   // `*`, `/`, `%`
    Unary = 3, // unary `-`, `+`
}

fn tokenize(source: &str, offset: usize) -> std::result::Result<Vec<Token>, FormulaError> {
    let malformed = |position: usize, message: &'static str| FormulaError::Malformed {
        expression: source.to_owned(),
        position,
        message,
    };

    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = offset;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let kind = match c {
            b' ' | b'\t' | b'\r' | b'\n' => {
                i += 1;
                continue;
            }
            b'+' => TokenKind::Plus,
            b'-' => TokenKind::Minus,
            b'*' => TokenKind::Star,
            b'/' => TokenKind::Slash,
            b'%' => TokenKind::Percent,
            b'(' => TokenKind::LParen,
            b')' => TokenKind::RParen,
            b'?' => {
                let close = source[i + 1..]
                    .find(POINTER_DELIMITER)
                    .ok_or(FormulaError::UnterminatedPointer { position: i })?;
                let name = source[i + 1..i + 1 + close].trim();
                if parse_path(name).is_err() {
                    return Err(malformed(i, "pointer does not name a field"));
                }
                i += close + 2;
                tokens.push(Token {
                    kind: TokenKind::Pointer(name.to_owned()),
                    position: start,
                });
                continue;
            }
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let number = source[start..i]
                    .parse::<f64>()
                    .map_err(|_| malformed(start, "invalid number literal"))?;
                tokens.push(Token {
                    kind: TokenKind::Number(number),
                    position: start,
                });
                continue;
            }
            _ => return Err(malformed(i, "unexpected character")),
        };
        i += 1;
        tokens.push(Token {
            kind,
            position: start,
        });
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        position: bytes.len(),
    });
    Ok(tokens)
}

struct ExprParser<'s> {
    source: &'s str,
    tokens: Vec<Token>,
    pos: usize,
}

impl ExprParser<'_> {
    fn peek(&self) -> &Token {
        // `tokenize` always terminates the stream with `Eof`.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn next(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn malformed(&self, position: usize, message: &'static str) -> FormulaError {
        FormulaError::Malformed {
            expression: self.source.to_owned(),
            position,
            message,
        }
    }

    fn parse_prec(&mut self, min_prec: Prec) -> std::result::Result<Expr, FormulaError> {
        let mut left = self.parse_prefix()?;

        loop {
            let (op, prec) = match self.peek().kind {
                TokenKind::Plus => (BinaryOp::Add, Prec::Add),
                TokenKind::Minus => (BinaryOp::Sub, Prec::Add),
                TokenKind::Star => (BinaryOp::Mul, Prec::Mul),
                TokenKind::Slash => (BinaryOp::Div, Prec::Mul),
                TokenKind::Percent => (BinaryOp::Mod, Prec::Mul),
                _ => break,
            };
            if prec < min_prec {
                break;
            }
            self.next(); // consume the operator

            // Use next-higher precedence for left-associativity
            let next_prec = match prec {
                Prec::Add => Prec::Mul,
                _ => Prec::Unary,
            };
            let right = self.parse_prec(next_prec)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> std::result::Result<Expr, FormulaError> {
        let token = self.next();
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Pointer(name) => Ok(Expr::Pointer(name)),
            TokenKind::Minus => Ok(Expr::Neg(Box::new(self.parse_prec(Prec::Unary)?))),
            TokenKind::Plus => self.parse_prec(Prec::Unary),
            TokenKind::LParen => {
                let inner = self.parse_prec(Prec::Add)?;
                let close = self.next();
                match close.kind {
                    TokenKind::RParen => Ok(inner),
                    _ => Err(self.malformed(close.position, "expected `)`")),
                }
            }
            TokenKind::Eof => Err(self.malformed(token.position, "unexpected end of expression")),
            _ => Err(self.malformed(token.position, "expected a number, a pointer or `(`")),
        }
    }
}

/// A compiled size or count formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// `true` if `text` should be read as a formula rather than a literal.
pub fn looks_like_formula(text: &str) -> bool {
    let text = text.trim_start();
    text.starts_with(FORMULA_MARKER) || text.contains(POINTER_DELIMITER)
}

impl Formula {
    pub fn parse(source: &str) -> std::result::Result<Formula, FormulaError> {
        let trimmed = source.trim_start();
        let offset = source.len() - trimmed.len()
            + usize::from(trimmed.starts_with(FORMULA_MARKER));

        let tokens = tokenize(source, offset)?;
        let mut parser = ExprParser {
            source,
            tokens,
            pos: 0,
        };

        let expr = parser.parse_prec(Prec::Add)?;
        let trailing = parser.next();
        if trailing.kind != TokenKind::Eof {
            return Err(parser.malformed(trailing.position, "unexpected trailing input"));
        }

        Ok(Formula {
            source: source.to_owned(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of every pointer token, in order of appearance.
    pub fn pointers(&self) -> Vec<&str> {
        fn collect<'e>(expr: &'e Expr, out: &mut Vec<&'e str>) {
            match expr {
                Expr::Number(_) => {}
                Expr::Pointer(name) => out.push(name),
                Expr::Neg(inner) => collect(inner, out),
                Expr::Binary(_, l, r) => {
                    collect(l, out);
                    collect(r, out);
                }
            }
        }

        let mut out = Vec::new();
        collect(&self.expr, &mut out);
        out
    }

    /// Evaluate against `store`, resolving pointers relative to `scope`.
    pub fn evaluate(&self, scope: Option<&str>, store: &DataStore) -> Result<i64> {
        self.evaluate_with(|name| resolve_pointer(name, scope, store))
            .map_err(|e| CodecError::formula(&self.source, scope, e))
    }

    fn evaluate_with(
        &self,
        mut resolve: impl FnMut(&str) -> std::result::Result<i64, FormulaError>,
    ) -> std::result::Result<i64, FormulaError> {
        let value = eval(&self.expr, &self.source, &mut resolve)?;
        if !value.is_finite() {
            return Err(FormulaError::NonFinite {
                expression: self.source.clone(),
            });
        }

        let truncated = value.trunc();
        // i64::MAX is not representable as f64; the bound below is 2^63.
        if truncated < i64::MIN as f64 || truncated >= 9_223_372_036_854_775_808.0 {
            return Err(FormulaError::OutOfRange {
                expression: self.source.clone(),
                value,
            });
        }
        Ok(truncated as i64)
    }

    /// Find the pointer value for which this formula evaluates to `target`.
    ///
    /// Only formulas with exactly one pointer combined with constants through `+ - * /` or
    /// unary minus are invertible; anything else returns `None`. A multiplication whose
    /// target is not a multiple of its constant has no integer solution.
    pub(crate) fn solve_for(&self, target: i64) -> Option<(&str, i64)> {
        solve(&self.expr, target)
    }
}

fn eval(
    expr: &Expr,
    source: &str,
    resolve: &mut impl FnMut(&str) -> std::result::Result<i64, FormulaError>,
) -> std::result::Result<f64, FormulaError> {
    Ok(match expr {
        Expr::Number(n) => *n,
        Expr::Pointer(name) => resolve(name)? as f64,
        Expr::Neg(inner) => -eval(inner, source, resolve)?,
        Expr::Binary(op, l, r) => {
            let l = eval(l, source, resolve)?;
            let r = eval(r, source, resolve)?;
            match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div | BinaryOp::Mod if r == 0.0 => {
                    return Err(FormulaError::DivisionByZero {
                        expression: source.to_owned(),
                    });
                }
                BinaryOp::Div => l / r,
                BinaryOp::Mod => l % r,
            }
        }
    })
}

/// Value of a pointer-free subexpression, if it is an integer.
fn constant(expr: &Expr) -> Option<i64> {
    match expr {
        Expr::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Some(*n as i64),
        Expr::Number(_) | Expr::Pointer(_) => None,
        Expr::Neg(inner) => constant(inner)?.checked_neg(),
        Expr::Binary(op, l, r) => {
            let (l, r) = (constant(l)?, constant(r)?);
            match op {
                BinaryOp::Add => l.checked_add(r),
                BinaryOp::Sub => l.checked_sub(r),
                BinaryOp::Mul => l.checked_mul(r),
                // Only exact quotients keep the double-precision evaluation integral.
                BinaryOp::Div if l.checked_rem(r) == Some(0) => l.checked_div(r),
                BinaryOp::Div | BinaryOp::Mod => None,
            }
        }
    }
}

fn solve(expr: &Expr, target: i64) -> Option<(&str, i64)> {
    match expr {
        Expr::Pointer(name) => Some((name.as_str(), target)),
        Expr::Number(_) => None,
        Expr::Neg(inner) => solve(inner, target.checked_neg()?),
        Expr::Binary(op, l, r) => match (constant(l), constant(r)) {
            // unknown on the left: `x op k = target`
            (None, Some(k)) => {
                let x = match op {
                    BinaryOp::Add => target.checked_sub(k)?,
                    BinaryOp::Sub => target.checked_add(k)?,
                    BinaryOp::Mul if target.checked_rem(k) == Some(0) => target.checked_div(k)?,
                    BinaryOp::Div if k != 0 => target.checked_mul(k)?,
                    _ => return None,
                };
                solve(l, x)
            }
            // unknown on the right: `k op x = target`
            (Some(k), None) => {
                let x = match op {
                    BinaryOp::Add => target.checked_sub(k)?,
                    BinaryOp::Sub => k.checked_sub(target)?,
                    BinaryOp::Mul if target.checked_rem(k) == Some(0) => target.checked_div(k)?,
                    _ => return None,
                };
                solve(r, x)
            }
            _ => None,
        },
    }
}

/// Path of the field `name` resolves to, trying the scoped candidates first.
pub(crate) fn resolve_pointer_path(
    name: &str,
    scope: Option<&str>,
    store: &DataStore,
) -> Option<String> {
    if let Some(scope) = scope {
        for enclosing in enclosing_scopes(scope) {
            let candidate = child_path(Some(enclosing), name);
            if store.get_field(&candidate).is_some() {
                return Some(candidate);
            }
        }
    }
    store.get_field(name).map(|_| name.to_owned())
}

fn resolve_pointer(
    name: &str,
    scope: Option<&str>,
    store: &DataStore,
) -> std::result::Result<i64, FormulaError> {
    let path = resolve_pointer_path(name, scope, store).ok_or_else(|| {
        FormulaError::MissingPointer {
            name: name.to_owned(),
        }
    })?;
    store
        .get_integer(&path)
        .ok_or_else(|| FormulaError::NonIntegerPointer {
            name: name.to_owned(),
        })
}

/// Compile and evaluate `formula` in one step.
pub fn evaluate(formula: &str, scope: Option<&str>, store: &DataStore) -> Result<i64> {
    Formula::parse(formula)
        .map_err(|e| CodecError::formula(formula, scope, e))?
        .evaluate(scope, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::err::CodecError;

    fn store_with(values: &[(&str, i64)]) -> DataStore {
        let mut store = DataStore::new();
        for (path, v) in values {
            store.add_integer(path, *v).unwrap();
        }
        store
    }

    #[test]
    fn test_multiplies_pointer_value() {
        let store = store_with(&[("sizeIndicator", 500)]);
        assert_eq!(evaluate("=?sizeIndicator?*4", None, &store).unwrap(), 2000);
    }

    #[test]
    fn test_missing_pointer_is_an_error_not_zero() {
        let store = store_with(&[("other", 1)]);
        let err = evaluate("=?sizeIndicator?*4", None, &store).unwrap_err();
        match err {
            CodecError::FormulaResolution { formula, source, .. } => {
                assert_eq!(formula, "=?sizeIndicator?*4");
                assert_eq!(
                    source,
                    FormulaError::MissingPointer {
                        name: "sizeIndicator".to_owned()
                    }
                );
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_non_integer_pointer_is_an_error() {
        let mut store = DataStore::new();
        store.add_text("name", "abc").unwrap();
        assert!(matches!(
            evaluate("?name?", None, &store),
            Err(CodecError::FormulaResolution {
                source: FormulaError::NonIntegerPointer { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_precedence_and_parentheses() {
        let store = store_with(&[("a", 3), ("b", 4)]);
        assert_eq!(evaluate("=?a?+?b?*2", None, &store).unwrap(), 11);
        assert_eq!(evaluate("=(?a?+?b?)*2", None, &store).unwrap(), 14);
        assert_eq!(evaluate("=-?a?+10", None, &store).unwrap(), 7);
        assert_eq!(evaluate("= 10 - 2 - 3", None, &store).unwrap(), 5);
        assert_eq!(evaluate("=17 % 5", None, &store).unwrap(), 2);
        assert_eq!(evaluate("12", None, &store).unwrap(), 12);
    }

    #[test]
    fn test_truncates_toward_zero() {
        let store = store_with(&[("n", 7), ("m", -7)]);
        assert_eq!(evaluate("=?n?/2", None, &store).unwrap(), 3);
        assert_eq!(evaluate("=?m?/2", None, &store).unwrap(), -3);
        assert_eq!(evaluate("=?n?*0.5", None, &store).unwrap(), 3);
    }

    #[test]
    fn test_malformed_expressions() {
        let store = store_with(&[("a", 1)]);
        for bad in ["=?a?*", "=(?a?", "=?a", "=?a? ?a?", "=a+1", "=", "=?a b?", "=1..2"] {
            assert!(
                matches!(
                    evaluate(bad, None, &store),
                    Err(CodecError::FormulaResolution { .. })
                ),
                "`{bad}` should fail"
            );
        }
        assert!(matches!(
            evaluate("=?a?/0", None, &store),
            Err(CodecError::FormulaResolution {
                source: FormulaError::DivisionByZero { .. },
                ..
            })
        ));
    }

    #[test]
    fn test_prefers_scoped_fields() {
        let mut store = store_with(&[("size", 100)]);
        store.add_integer("items[1].size", 5).unwrap();
        store.add_integer("items[1].parts[0].len", 2).unwrap();

        assert_eq!(evaluate("?size?", Some("items[1]"), &store).unwrap(), 5);
        assert_eq!(evaluate("?size?", Some("items[0]"), &store).unwrap(), 100);
        // Enclosing scopes are searched before the top level.
        assert_eq!(
            evaluate("=?size?+?len?", Some("items[1].parts[0]"), &store).unwrap(),
            7
        );
        assert_eq!(evaluate("?size?", None, &store).unwrap(), 100);
        // Full paths still work.
        assert_eq!(evaluate("?items[1].size?", None, &store).unwrap(), 5);
    }

    #[test]
    fn test_same_inputs_same_result() {
        let a = store_with(&[("x", 21), ("y", 2)]);
        let b = a.clone();
        let formula = Formula::parse("=?x?*?y?-1").unwrap();
        assert_eq!(
            formula.evaluate(None, &a).unwrap(),
            formula.evaluate(None, &b).unwrap()
        );
    }

    #[test]
    fn test_lists_pointers() {
        let formula = Formula::parse("=(?a? + ?b.c?) * ?a?").unwrap();
        assert_eq!(formula.pointers(), vec!["a", "b.c", "a"]);
        assert!(looks_like_formula("=4"));
        assert!(looks_like_formula("?count?"));
        assert!(!looks_like_formula("16"));
    }

    #[test]
    fn test_solves_simple_inversions() {
        let cases = [
            ("=?n?", 5, Some(5)),
            ("=?n?*4", 20, Some(5)),
            ("=?n?*4", 21, None),
            ("=4*?n?", 20, Some(5)),
            ("=?n?-1", 2, Some(3)),
            ("=?n?+1", 2, Some(1)),
            ("=10-?n?", 2, Some(8)),
            ("=?n?/2", 3, Some(6)),
            ("=(?n?+1)*2", 8, Some(3)),
            ("=-?n?", 3, Some(-3)),
            ("=?n?*?n?", 4, None),
            ("=?n?%3", 1, None),
        ];
        for (source, target, expected) in cases {
            let formula = Formula::parse(source).unwrap();
            assert_eq!(
                formula.solve_for(target).map(|(_, v)| v),
                expected,
                "solving `{source}` for {target}"
            );
            if let Some(v) = expected {
                let store = store_with(&[("n", v)]);
                assert_eq!(formula.evaluate(None, &store).unwrap(), target);
            }
        }
    }
}
