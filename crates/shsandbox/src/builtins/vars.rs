//! Variable manipulation builtins: let, unset

use async_trait::async_trait;

use super::{Builtin, Context};
use crate::env::ElementRef;
use crate::error::Result;
use crate::interpreter::{ExecResult, eval_arith, eval_index};
use crate::parser::parse_arithmetic;

/// let builtin - evaluate each argument as an arithmetic expression.
///
/// The status is 0 when the last value is nonzero, 1 otherwise.
pub struct Let;

#[async_trait]
impl Builtin for Let {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        if ctx.args.is_empty() {
            return Ok(ExecResult::err("let: expression expected\n", 2));
        }

        let mut last = 0;
        for arg in ctx.args {
            let expr = parse_arithmetic(arg)?;
            last = eval_arith(&expr, ctx.env)?;
        }

        Ok(ExecResult::status(if last != 0 { 0 } else { 1 }))
    }
}

/// unset builtin - remove variables or single array elements (`name[sub]`)
///
/// `-v` is accepted and ignored; `-f` has nothing to act on since functions
/// are not supported.
pub struct Unset;

#[async_trait]
impl Builtin for Unset {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        for name in ctx.args {
            if name.starts_with('-') {
                continue;
            }
            match element_target(name) {
                Some((var, sub)) if ctx.env.is_associative(var) => {
                    ctx.env.unset_element(var, ElementRef::Key(sub));
                }
                Some((var, sub)) => {
                    let index = eval_index(sub, ctx.env)?;
                    ctx.env.unset_element(var, ElementRef::Index(index));
                }
                None => {
                    ctx.env.unset(name);
                }
            }
        }
        Ok(ExecResult::status(0))
    }
}

/// Split `name[sub]` into its parts.
fn element_target(arg: &str) -> Option<(&str, &str)> {
    let (name, rest) = arg.split_once('[')?;
    let sub = rest.strip_suffix(']')?;
    Some((name, sub))
}
