//! test builtin command ([ and test)
//!
//! File operators stat the real filesystem, so every path is checked against
//! the policy for read access first.

use std::path::Path;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use super::{Builtin, Context, resolve_path};
use crate::error::{Error, Result};
use crate::interpreter::{ExecResult, Watch, atoi};
use crate::policy::{PathIntent, Policy};

/// The test builtin command.
pub struct Test;

#[async_trait]
impl Builtin for Test {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let result = evaluate_expression(ctx.args, ctx.policy, ctx.cwd, ctx.watch).await?;
        Ok(status(result))
    }
}

/// The [ builtin (alias for test, but expects ] as last arg)
pub struct Bracket;

#[async_trait]
impl Builtin for Bracket {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let Some((last, args)) = ctx.args.split_last() else {
            return Ok(ExecResult::err("[: missing ]\n", 2));
        };
        if last != "]" {
            return Ok(ExecResult::err("[: missing ]\n", 2));
        }
        let result = evaluate_expression(args, ctx.policy, ctx.cwd, ctx.watch).await?;
        Ok(status(result))
    }
}

fn status(result: bool) -> ExecResult {
    ExecResult::status(if result { 0 } else { 1 })
}

/// Evaluate a test expression
fn evaluate_expression<'a>(
    args: &'a [String],
    policy: &'a Policy,
    cwd: &'a Path,
    watch: Watch<'a>,
) -> BoxFuture<'a, Result<bool>> {
    Box::pin(async move {
        if args.is_empty() {
            return Ok(false);
        }

        // Logical operators have the lowest precedence; -o binds looser than -a
        for op in ["-o", "-a"] {
            if let Some(i) = args.iter().skip(1).position(|a| a == op).map(|i| i + 1) {
                if i + 1 < args.len() {
                    let left = evaluate_expression(&args[..i], policy, cwd, watch).await?;
                    return if op == "-o" {
                        Ok(left || evaluate_expression(&args[i + 1..], policy, cwd, watch).await?)
                    } else {
                        Ok(left && evaluate_expression(&args[i + 1..], policy, cwd, watch).await?)
                    };
                }
            }
        }

        if args[0] == "!" && args.len() > 1 {
            return Ok(!evaluate_expression(&args[1..], policy, cwd, watch).await?);
        }

        if args[0] == "(" && args.len() > 2 && args[args.len() - 1] == ")" {
            return evaluate_expression(&args[1..args.len() - 1], policy, cwd, watch).await;
        }

        match args.len() {
            // Single arg: true if non-empty string
            1 => Ok(!args[0].is_empty()),
            2 => evaluate_unary(&args[0], &args[1], policy, cwd, watch).await,
            3 => Ok(evaluate_binary(&args[0], &args[1], &args[2])),
            _ => Ok(false),
        }
    })
}

/// Evaluate a unary test expression
async fn evaluate_unary(
    op: &str,
    arg: &str,
    policy: &Policy,
    cwd: &Path,
    watch: Watch<'_>,
) -> Result<bool> {
    match op {
        "-z" => return Ok(arg.is_empty()),
        "-n" => return Ok(!arg.is_empty()),
        "-e" | "-f" | "-d" | "-s" | "-r" | "-w" | "-x" | "-L" | "-h" => {}
        _ => return Ok(false),
    }

    watch.check()?;
    let path = resolve_path(cwd, arg);
    if !policy.is_path_allowed(&path, PathIntent::Read) {
        return Err(Error::PathDenied(arg.to_string()));
    }

    let meta = if matches!(op, "-L" | "-h") {
        tokio::fs::symlink_metadata(&path).await
    } else {
        tokio::fs::metadata(&path).await
    };
    let Ok(meta) = meta else {
        return Ok(false);
    };

    Ok(match op {
        "-e" => true,
        "-f" => meta.is_file(),
        "-d" => meta.is_dir(),
        "-s" => meta.len() > 0,
        "-r" => true,
        "-w" => !meta.permissions().readonly(),
        "-x" => is_executable(&meta),
        _ => meta.file_type().is_symlink(),
    })
}

#[cfg(unix)]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(meta: &std::fs::Metadata) -> bool {
    meta.is_file()
}

/// Evaluate a binary test expression
fn evaluate_binary(left: &str, op: &str, right: &str) -> bool {
    match op {
        "=" | "==" => left == right,
        "!=" => left != right,
        "<" => left < right,
        ">" => left > right,
        "-eq" => atoi(left) == atoi(right),
        "-ne" => atoi(left) != atoi(right),
        "-lt" => atoi(left) < atoi(right),
        "-le" => atoi(left) <= atoi(right),
        "-gt" => atoi(left) > atoi(right),
        "-ge" => atoi(left) >= atoi(right),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins::testing::Harness;
    use crate::cancel::CancelReason;

    async fn check(h: &mut Harness, args: &[&str]) -> i32 {
        h.run(&Test, args).await.unwrap().exit_code
    }

    #[tokio::test]
    async fn test_string_and_integer_tests() {
        let mut h = Harness::new(Policy::new());
        assert_eq!(check(&mut h, &["abc"]).await, 0);
        assert_eq!(check(&mut h, &[""]).await, 1);
        assert_eq!(check(&mut h, &["-z", ""]).await, 0);
        assert_eq!(check(&mut h, &["a", "=", "a"]).await, 0);
        assert_eq!(check(&mut h, &["a", "!=", "a"]).await, 1);
        assert_eq!(check(&mut h, &["3", "-lt", "10"]).await, 0);
        assert_eq!(check(&mut h, &["!", "3", "-lt", "10"]).await, 1);
        assert_eq!(check(&mut h, &["1", "-eq", "1", "-a", "x", "=", "y"]).await, 1);
        assert_eq!(check(&mut h, &["1", "-eq", "2", "-o", "x", "=", "x"]).await, 0);
    }

    #[tokio::test]
    async fn test_bracket_requires_closing() {
        let mut h = Harness::new(Policy::new());
        assert_eq!(h.run(&Bracket, &["a", "]"]).await.unwrap().exit_code, 0);
        assert_eq!(h.run(&Bracket, &["a"]).await.unwrap().exit_code, 2);
    }

    #[tokio::test]
    async fn test_file_tests_under_allowed_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "data").unwrap();

        let mut h = Harness::new(Policy::new().allow_read_root(dir.path()));
        let path = file.to_string_lossy().to_string();
        assert_eq!(check(&mut h, &["-f", &path]).await, 0);
        assert_eq!(check(&mut h, &["-s", &path]).await, 0);
        assert_eq!(check(&mut h, &["-d", &path]).await, 1);
        let missing = dir.path().join("missing").to_string_lossy().to_string();
        assert_eq!(check(&mut h, &["-e", &missing]).await, 1);
    }

    #[tokio::test]
    async fn test_file_test_outside_roots_is_denied() {
        let mut h = Harness::new(Policy::new());
        let err = h.run(&Test, &["-e", "/etc/passwd"]).await.unwrap_err();
        assert!(err.to_string().contains("cannot open path"));
        assert!(err.to_string().contains("/etc/passwd"));
    }

    #[tokio::test]
    async fn test_file_test_observes_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_string_lossy().to_string();
        let mut h = Harness::new(Policy::new().allow_read_root(dir.path()));
        h.cancel.cancel();

        let err = h.run(&Test, &["-d", &path]).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled(CancelReason::Requested)));
        // String tests never touch the filesystem
        assert_eq!(check(&mut h, &["a", "=", "a"]).await, 0);
    }
}
