//! Word expansion that needs no command execution
//!
//! Literal text, parameters, `${#name}`, array elements and arithmetic are
//! expanded here. Command substitutions are run by the engine beforehand and
//! looked up in a [`Substitutions`] table by node identity.

use std::collections::HashMap;

use crate::env::Environment;
use crate::error::{Error, Result};
use crate::parser::{Script, Word, WordPart, parse_arithmetic};

use super::arithmetic::eval_arith_with;

/// Captured stdout of command substitutions, keyed by the address of their
/// `Script` node inside a tree that outlives the table.
#[derive(Debug, Default)]
pub(crate) struct Substitutions {
    outputs: HashMap<usize, String>,
}

impl Substitutions {
    fn key(script: &Script) -> usize {
        script as *const Script as usize
    }

    pub(crate) fn insert(&mut self, script: &Script, output: String) {
        self.outputs.insert(Self::key(script), output);
    }

    pub(crate) fn get(&self, script: &Script) -> Option<&str> {
        self.outputs.get(&Self::key(script)).map(String::as_str)
    }
}

/// Expand `word` to a single string.
pub(crate) fn expand_word_sync(
    word: &Word,
    env: &mut Environment,
    subs: &Substitutions,
) -> Result<String> {
    let mut out = String::new();
    for part in &word.parts {
        out.push_str(&expand_part(part, env, subs)?);
    }
    Ok(out)
}

pub(crate) fn expand_part(
    part: &WordPart,
    env: &mut Environment,
    subs: &Substitutions,
) -> Result<String> {
    Ok(match part {
        WordPart::Literal(s) => s.clone(),
        WordPart::Variable(name) => env.get(name),
        WordPart::Length(name) => env.length(name).to_string(),
        WordPart::ArrayAccess { name, index } => {
            let subscript = expand_word_sync(index, env, subs)?;
            element(name, &subscript, env)?
        }
        WordPart::ArithmeticExpansion(expr) => eval_arith_with(expr, env, subs)?.to_string(),
        WordPart::CommandSubstitution(script) => subs
            .get(script)
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Execution("command substitution is not allowed in this context".into())
            })?,
    })
}

/// `${name[subscript]}` after the subscript has been expanded.
///
/// `@` and `*` join every element with a space. Associative arrays use the
/// subscript as a key; everything else evaluates it arithmetically.
pub(crate) fn element(name: &str, subscript: &str, env: &mut Environment) -> Result<String> {
    if subscript == "@" || subscript == "*" {
        return Ok(env.values(name).join(" "));
    }
    if env.is_associative(name) {
        return Ok(env.key(name, subscript).unwrap_or_default());
    }
    let index = eval_index(subscript, env)?;
    Ok(env.index(name, index).unwrap_or_default())
}

/// Evaluate an indexed-array subscript.
pub(crate) fn eval_index(subscript: &str, env: &mut Environment) -> Result<i64> {
    let expr = parse_arithmetic(subscript)?;
    eval_arith_with(&expr, env, &Substitutions::default())
}

/// A word that expands to one field per array element (`${arr[@]}`).
pub(crate) fn array_splat(word: &Word) -> Option<&str> {
    match word.parts.as_slice() {
        [WordPart::ArrayAccess { name, index }]
            if matches!(index.as_literal().as_deref(), Some("@") | Some("*")) =>
        {
            Some(name)
        }
        _ => None,
    }
}
