//! Arithmetic expression parser
//!
//! Precedence climbing over the C-like operator set used by `$(( ))`,
//! `(( ))`, `let` and arithmetic `for`. Operands are words, so `$x`,
//! `${a[1]}` and `$(cmd)` are accepted wherever a number is.

use super::ast::{ArithExpr, BinaryOp, UnaryOp};
use super::{DepthGuard, parse_word};
use crate::error::{Error, Result};

/// Operators ordered longest first so the scanner is greedy.
const OPERATORS: &[&str] = &[
    "<<=", ">>=", "**", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "<<", ">>",
    "<=", ">=", "==", "!=", "&&", "||", "+", "-", "*", "/", "%", "=", "<", ">", "&", "|", "^",
    "!", "?", ":", ",",
];

/// Binary levels from loosest to tightest, below the ternary.
const LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::OrArit)],
    &[("&&", BinaryOp::AndArit)],
    &[("|", BinaryOp::Or)],
    &[("^", BinaryOp::Xor)],
    &[("&", BinaryOp::And)],
    &[("==", BinaryOp::Eql), ("!=", BinaryOp::Neq)],
    &[
        ("<=", BinaryOp::Leq),
        (">=", BinaryOp::Geq),
        ("<", BinaryOp::Lss),
        (">", BinaryOp::Gtr),
    ],
    &[("<<", BinaryOp::Shl), (">>", BinaryOp::Shr)],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[
        ("*", BinaryOp::Mul),
        ("/", BinaryOp::Quo),
        ("%", BinaryOp::Rem),
    ],
];

#[derive(Debug, Clone, PartialEq)]
enum ArithToken {
    Operand(String),
    Op(&'static str),
    LeftParen,
    RightParen,
}

/// Parse an arithmetic expression such as `x += 2 * (y - 1)`.
///
/// Blank input evaluates like `0`.
pub fn parse_arithmetic(input: &str) -> Result<ArithExpr> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Ok(ArithExpr::number(0));
    }
    let mut parser = ArithParser { tokens, pos: 0 };
    let expr = parser.parse_comma()?;
    match parser.peek() {
        None => Ok(expr),
        Some(tok) => Err(arith_error(format!("unexpected token {:?}", tok))),
    }
}

fn arith_error(message: impl std::fmt::Display) -> Error {
    Error::Parse(format!("arithmetic: {}", message))
}

fn tokenize(input: &str) -> Result<Vec<ArithToken>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' {
            tokens.push(ArithToken::LeftParen);
            i += 1;
            continue;
        }
        if c == ')' {
            tokens.push(ArithToken::RightParen);
            i += 1;
            continue;
        }
        if is_operand_start(c) {
            let (operand, next) = read_operand(&chars, i)?;
            tokens.push(ArithToken::Operand(operand));
            i = next;
            continue;
        }
        let rest: String = chars[i..chars.len().min(i + 3)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(ArithToken::Op(*op));
                i += op.chars().count();
            }
            None => return Err(arith_error(format!("unsupported character {:?}", c))),
        }
    }

    Ok(tokens)
}

fn is_operand_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '"' | '\'' | '`')
}

/// Read one operand starting at `start`; returns it and the index after it.
fn read_operand(chars: &[char], start: usize) -> Result<(String, usize)> {
    let mut out = String::new();
    let mut i = start;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_ascii_alphanumeric() || c == '_' => {
                out.push(c);
                i += 1;
            }
            '$' => {
                out.push(c);
                i += 1;
                if let Some(&open @ ('(' | '{')) = chars.get(i) {
                    i = read_group(chars, i, open, &mut out)?;
                }
            }
            '[' if !out.is_empty() => {
                i = read_group(chars, i, '[', &mut out)?;
            }
            '"' | '\'' | '`' => {
                out.push(c);
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&q) if q == c => {
                            out.push(q);
                            i += 1;
                            break;
                        }
                        Some(&other) => {
                            out.push(other);
                            i += 1;
                        }
                        None => return Err(arith_error("unterminated quote")),
                    }
                }
            }
            _ => break,
        }
    }

    Ok((out, i))
}

/// Copy a bracketed group opened at `chars[start]` up to its matching close.
fn read_group(chars: &[char], start: usize, open: char, out: &mut String) -> Result<usize> {
    let close = match open {
        '(' => ')',
        '{' => '}',
        _ => ']',
    };
    let mut depth = 0usize;
    let mut i = start;
    while let Some(&c) = chars.get(i) {
        out.push(c);
        i += 1;
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Ok(i);
            }
        }
    }
    Err(arith_error(format!("unterminated {:?}", open)))
}

struct ArithParser {
    tokens: Vec<ArithToken>,
    pos: usize,
}

impl ArithParser {
    fn peek(&self) -> Option<&ArithToken> {
        self.tokens.get(self.pos)
    }

    fn peek_op(&self) -> Option<&'static str> {
        match self.peek() {
            Some(ArithToken::Op(op)) => Some(*op),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<ArithToken> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn parse_comma(&mut self) -> Result<ArithExpr> {
        let mut left = self.parse_assign()?;
        // Each operator deepens the left spine of the tree
        let mut chain = Vec::new();
        while self.peek_op() == Some(",") {
            chain.push(DepthGuard::enter()?);
            self.advance();
            let right = self.parse_assign()?;
            left = ArithExpr::binary(BinaryOp::Comma, left, right);
        }
        Ok(left)
    }

    fn parse_assign(&mut self) -> Result<ArithExpr> {
        let _depth = DepthGuard::enter()?;
        let left = self.parse_ternary()?;
        let op = match self.peek_op().and_then(assignment_op) {
            Some(op) => op,
            None => return Ok(left),
        };
        if left.variable_name().is_none() {
            return Err(arith_error(format!("cannot assign to {}", left)));
        }
        self.advance();
        // Right associative: a = b = 1
        let right = self.parse_assign()?;
        Ok(ArithExpr::binary(op, left, right))
    }

    fn parse_ternary(&mut self) -> Result<ArithExpr> {
        let _depth = DepthGuard::enter()?;
        let cond = self.parse_level(0)?;
        if self.peek_op() != Some("?") {
            return Ok(cond);
        }
        self.advance();
        let then = self.parse_assign()?;
        if self.peek_op() != Some(":") {
            return Err(arith_error("expected ':' in conditional expression"));
        }
        self.advance();
        let otherwise = self.parse_ternary()?;
        Ok(ArithExpr::binary(
            BinaryOp::Quest,
            cond,
            ArithExpr::binary(BinaryOp::Colon, then, otherwise),
        ))
    }

    fn parse_level(&mut self, level: usize) -> Result<ArithExpr> {
        let Some(ops) = LEVELS.get(level) else {
            return self.parse_pow();
        };
        let mut left = self.parse_level(level + 1)?;
        let mut chain = Vec::new();
        loop {
            let found = self
                .peek_op()
                .and_then(|tok| ops.iter().find(|(s, _)| *s == tok).map(|(_, op)| *op));
            let Some(op) = found else {
                return Ok(left);
            };
            chain.push(DepthGuard::enter()?);
            self.advance();
            let right = self.parse_level(level + 1)?;
            left = ArithExpr::binary(op, left, right);
        }
    }

    fn parse_pow(&mut self) -> Result<ArithExpr> {
        let _depth = DepthGuard::enter()?;
        let base = self.parse_unary()?;
        if self.peek_op() == Some("**") {
            self.advance();
            let exp = self.parse_pow()?;
            return Ok(ArithExpr::binary(BinaryOp::Pow, base, exp));
        }
        Ok(base)
    }

    fn parse_unary(&mut self) -> Result<ArithExpr> {
        let op = match self.peek_op() {
            Some("!") => UnaryOp::Not,
            Some("+") => UnaryOp::Plus,
            Some("-") => UnaryOp::Minus,
            Some("++") => UnaryOp::Inc,
            Some("--") => UnaryOp::Dec,
            _ => return self.parse_postfix(),
        };
        let _depth = DepthGuard::enter()?;
        self.advance();
        let operand = self.parse_unary()?;
        if matches!(op, UnaryOp::Inc | UnaryOp::Dec) && operand.variable_name().is_none() {
            return Err(arith_error(format!("{} requires a variable", op)));
        }
        Ok(ArithExpr::unary(op, false, operand))
    }

    fn parse_postfix(&mut self) -> Result<ArithExpr> {
        let mut expr = self.parse_primary()?;
        while expr.variable_name().is_some() {
            let op = match self.peek_op() {
                Some("++") => UnaryOp::Inc,
                Some("--") => UnaryOp::Dec,
                _ => break,
            };
            self.advance();
            expr = ArithExpr::unary(op, true, expr);
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ArithExpr> {
        match self.advance() {
            Some(ArithToken::LeftParen) => {
                let inner = self.parse_comma()?;
                match self.advance() {
                    Some(ArithToken::RightParen) => Ok(ArithExpr::Paren(Box::new(inner))),
                    _ => Err(arith_error("expected ')'")),
                }
            }
            Some(ArithToken::Operand(raw)) => Ok(ArithExpr::Word(parse_word(&raw)?)),
            Some(tok) => Err(arith_error(format!("unexpected token {:?}", tok))),
            None => Err(arith_error("unexpected end of expression")),
        }
    }
}

fn assignment_op(tok: &str) -> Option<BinaryOp> {
    Some(match tok {
        "=" => BinaryOp::Assgn,
        "+=" => BinaryOp::AddAssgn,
        "-=" => BinaryOp::SubAssgn,
        "*=" => BinaryOp::MulAssgn,
        "/=" => BinaryOp::QuoAssgn,
        "%=" => BinaryOp::RemAssgn,
        "&=" => BinaryOp::AndAssgn,
        "|=" => BinaryOp::OrAssgn,
        "^=" => BinaryOp::XorAssgn,
        "<<=" => BinaryOp::ShlAssgn,
        ">>=" => BinaryOp::ShrAssgn,
        _ => return None,
    })
}
