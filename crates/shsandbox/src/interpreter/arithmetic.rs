//! Arithmetic evaluator
//!
//! Evaluates [`ArithExpr`] trees over 64-bit signed integers with shell
//! semantics: operands resolve through variable indirection, anything that
//! does not parse as a decimal integer is `0`, and overflow wraps.

use crate::env::Environment;
use crate::error::{Error, Result};
use crate::parser::{ArithExpr, BinaryOp, MAX_PARSE_DEPTH, UnaryOp, Word, is_valid_name};

use super::expand::{self, Substitutions};

/// Hops allowed when resolving `a -> b -> c -> 5`; a reference cycle stops here.
const MAX_INDIRECTION: usize = 128;

/// Recursion allowed while evaluating one tree. Parsed trees stay well below
/// this; hand-built ones are cut off instead of overflowing the stack.
const MAX_EVAL_DEPTH: usize = 2 * MAX_PARSE_DEPTH;

/// Evaluate `expr`, reading and writing variables in `env`.
///
/// Command substitutions inside operands are rejected here; the engine runs
/// them before handing the tree over.
pub fn eval_arith(expr: &ArithExpr, env: &mut Environment) -> Result<i64> {
    let subs = Substitutions::default();
    eval_arith_with(expr, env, &subs)
}

/// Evaluate `expr` with the outputs of already-run command substitutions.
pub(crate) fn eval_arith_with(
    expr: &ArithExpr,
    env: &mut Environment,
    subs: &Substitutions,
) -> Result<i64> {
    let value = Evaluator {
        env,
        subs,
        depth: 0,
    }
    .eval(expr)?;
    #[cfg(feature = "logging")]
    tracing::trace!(expr = %expr, value, "arithmetic");
    Ok(value)
}

/// Parse a decimal integer the way the shell does: optional sign, base 10,
/// anything else (including the empty string) is `0`.
pub fn atoi(s: &str) -> i64 {
    s.parse().unwrap_or(0)
}

struct Evaluator<'a> {
    env: &'a mut Environment,
    subs: &'a Substitutions,
    depth: usize,
}

impl Evaluator<'_> {
    fn eval(&mut self, expr: &ArithExpr) -> Result<i64> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(Error::Arithmetic(format!(
                "expression nested too deeply (max {} levels)",
                MAX_EVAL_DEPTH
            )));
        }
        self.depth += 1;
        let value = self.eval_node(expr);
        self.depth -= 1;
        value
    }

    fn eval_node(&mut self, expr: &ArithExpr) -> Result<i64> {
        match expr {
            ArithExpr::Word(word) => self.word_value(word),
            ArithExpr::Paren(inner) => self.eval(inner),
            ArithExpr::Unary { op, post, operand } => self.unary(*op, *post, operand),
            ArithExpr::Binary { op, left, right } => self.binary(*op, left, right),
        }
    }

    fn word_value(&mut self, word: &Word) -> Result<i64> {
        let mut value = expand::expand_word_sync(word, self.env, self.subs)?;
        for _ in 0..MAX_INDIRECTION {
            match self.lookup(&value)? {
                Some(next) if !next.is_empty() && next != value => value = next,
                _ => break,
            }
        }
        Ok(atoi(&value))
    }

    /// Resolve `name` or `name[subscript]` to its value.
    fn lookup(&mut self, text: &str) -> Result<Option<String>> {
        if let Some(open) = text.find('[') {
            let name = &text[..open];
            if text.ends_with(']') && is_valid_name(name) {
                let subscript = &text[open + 1..text.len() - 1];
                return expand::element(name, subscript, self.env).map(Some);
            }
        }
        if is_valid_name(text) {
            return Ok(self.env.lookup(text));
        }
        Ok(None)
    }

    fn target<'e>(&self, expr: &'e ArithExpr, op: impl std::fmt::Display) -> Result<&'e str> {
        expr.variable_name().ok_or_else(|| {
            Error::internal(format!("'{}' applied to non-variable operand {}", op, expr))
        })
    }

    fn unary(&mut self, op: UnaryOp, post: bool, operand: &ArithExpr) -> Result<i64> {
        match op {
            UnaryOp::Inc | UnaryOp::Dec => {
                let name = self.target(operand, op)?;
                let old = atoi(&self.env.get(name));
                let new = if op == UnaryOp::Inc {
                    old.wrapping_add(1)
                } else {
                    old.wrapping_sub(1)
                };
                self.env.set(name, new.to_string());
                Ok(if post { old } else { new })
            }
            UnaryOp::Not => Ok((self.eval(operand)? == 0) as i64),
            UnaryOp::Plus => self.eval(operand),
            UnaryOp::Minus => Ok(self.eval(operand)?.wrapping_neg()),
        }
    }

    fn binary(&mut self, op: BinaryOp, left: &ArithExpr, right: &ArithExpr) -> Result<i64> {
        if op.is_assignment() {
            return self.assign(op, left, right);
        }
        match op {
            BinaryOp::Quest => {
                let ArithExpr::Binary {
                    op: BinaryOp::Colon,
                    left: then,
                    right: otherwise,
                } = right
                else {
                    return Err(Error::internal(format!(
                        "conditional without ':' branch: {}",
                        right
                    )));
                };
                if self.eval(left)? != 0 {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            BinaryOp::Colon => Err(Error::internal("':' outside of a conditional")),
            BinaryOp::Comma => {
                self.eval(left)?;
                self.eval(right)
            }
            BinaryOp::AndArit => {
                if self.eval(left)? == 0 {
                    return Ok(0);
                }
                Ok((self.eval(right)? != 0) as i64)
            }
            BinaryOp::OrArit => {
                if self.eval(left)? != 0 {
                    return Ok(1);
                }
                Ok((self.eval(right)? != 0) as i64)
            }
            _ => {
                let x = self.eval(left)?;
                let y = self.eval(right)?;
                apply(op, x, y)
            }
        }
    }

    fn assign(&mut self, op: BinaryOp, left: &ArithExpr, right: &ArithExpr) -> Result<i64> {
        let name = self.target(left, op)?;
        let old = atoi(&self.env.get(name));
        let arg = self.eval(right)?;
        let value = match op {
            BinaryOp::Assgn => arg,
            BinaryOp::AddAssgn => apply(BinaryOp::Add, old, arg)?,
            BinaryOp::SubAssgn => apply(BinaryOp::Sub, old, arg)?,
            BinaryOp::MulAssgn => apply(BinaryOp::Mul, old, arg)?,
            BinaryOp::QuoAssgn => apply(BinaryOp::Quo, old, arg)?,
            BinaryOp::RemAssgn => apply(BinaryOp::Rem, old, arg)?,
            BinaryOp::AndAssgn => apply(BinaryOp::And, old, arg)?,
            BinaryOp::OrAssgn => apply(BinaryOp::Or, old, arg)?,
            BinaryOp::XorAssgn => apply(BinaryOp::Xor, old, arg)?,
            BinaryOp::ShlAssgn => apply(BinaryOp::Shl, old, arg)?,
            BinaryOp::ShrAssgn => apply(BinaryOp::Shr, old, arg)?,
            other => return Err(Error::internal(format!("'{}' is not an assignment", other))),
        };
        self.env.set(name, value.to_string());
        Ok(value)
    }
}

/// Apply an eagerly evaluated binary operator.
fn apply(op: BinaryOp, x: i64, y: i64) -> Result<i64> {
    Ok(match op {
        BinaryOp::Add => x.wrapping_add(y),
        BinaryOp::Sub => x.wrapping_sub(y),
        BinaryOp::Mul => x.wrapping_mul(y),
        BinaryOp::Quo => {
            if y == 0 {
                return Err(division_by_zero());
            }
            x.wrapping_div(y)
        }
        BinaryOp::Rem => {
            if y == 0 {
                return Err(division_by_zero());
            }
            x.wrapping_rem(y)
        }
        BinaryOp::Pow => int_pow(x, y),
        BinaryOp::Eql => (x == y) as i64,
        BinaryOp::Neq => (x != y) as i64,
        BinaryOp::Lss => (x < y) as i64,
        BinaryOp::Gtr => (x > y) as i64,
        BinaryOp::Leq => (x <= y) as i64,
        BinaryOp::Geq => (x >= y) as i64,
        BinaryOp::And => x & y,
        BinaryOp::Or => x | y,
        BinaryOp::Xor => x ^ y,
        BinaryOp::Shl => shl(x, y),
        BinaryOp::Shr => shr(x, y),
        other => {
            return Err(Error::internal(format!(
                "'{}' is not an arithmetic operator",
                other
            )));
        }
    })
}

fn division_by_zero() -> Error {
    Error::Arithmetic("division by zero".to_string())
}

/// `x ** y` by repeated squaring. A negative exponent never enters the
/// loop, so it yields 1.
fn int_pow(mut base: i64, mut exp: i64) -> i64 {
    let mut result: i64 = 1;
    while exp > 0 {
        if exp & 1 == 1 {
            result = result.wrapping_mul(base);
        }
        exp >>= 1;
        base = base.wrapping_mul(base);
    }
    result
}

/// The shift amount is reinterpreted as unsigned, so a negative amount is huge.
fn shl(x: i64, y: i64) -> i64 {
    let amount = y as u64;
    if amount >= 64 { 0 } else { x << amount }
}

fn shr(x: i64, y: i64) -> i64 {
    let amount = y as u64;
    if amount >= 64 {
        if x < 0 { -1 } else { 0 }
    } else {
        x >> amount
    }
}
