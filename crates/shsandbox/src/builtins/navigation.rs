//! Navigation builtins (cd, pwd)

use async_trait::async_trait;

use super::{Builtin, Context, resolve_path};
use crate::error::{Error, Result};
use crate::interpreter::ExecResult;
use crate::policy::PathIntent;

/// The cd builtin - change the sandbox working directory.
///
/// The target must be readable under the policy; checking it touches the
/// filesystem, so a denied target aborts the run like a denied redirection.
pub struct Cd;

#[async_trait]
impl Builtin for Cd {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let home = ctx.env.get("HOME");
        let target = match ctx.args.first() {
            Some(arg) => arg.as_str(),
            None if !home.is_empty() => home.as_str(),
            None => return Ok(ExecResult::err("cd: HOME not set\n", 1)),
        };

        ctx.watch.check()?;
        let new_path = resolve_path(ctx.cwd, target);
        if !ctx.policy.is_path_allowed(&new_path, PathIntent::Read) {
            return Err(Error::PathDenied(target.to_string()));
        }

        match tokio::fs::metadata(&new_path).await {
            Ok(meta) if meta.is_dir() => {
                *ctx.cwd = new_path;
                Ok(ExecResult::status(0))
            }
            Ok(_) => Ok(ExecResult::err(
                format!("cd: {}: Not a directory\n", target),
                1,
            )),
            Err(_) => Ok(ExecResult::err(
                format!("cd: {}: No such file or directory\n", target),
                1,
            )),
        }
    }
}

/// The pwd builtin - print working directory.
pub struct Pwd;

#[async_trait]
impl Builtin for Pwd {
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult> {
        let cwd = ctx.cwd.to_string_lossy();
        Ok(ExecResult::ok(format!("{}\n", cwd)))
    }
}
