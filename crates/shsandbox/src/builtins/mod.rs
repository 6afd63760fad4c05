//! Built-in shell commands
//!
//! This module provides the [`Builtin`] trait and the [`Context`] handed to
//! every builtin. Two families exist:
//!
//! - shell-state builtins (`:`, `true`, `false`, `exit`, `let`, `cd`,
//!   `unset`, `test`, `[`) only touch the run's own state and skip the
//!   command whitelist
//! - output builtins (`echo`, `pwd`) run in-process but are whitelisted like
//!   any external program

mod echo;
mod flow;
mod navigation;
mod test;
mod vars;

pub use echo::Echo;
pub use flow::{Colon, Exit, False, True};
pub use navigation::{Cd, Pwd};
pub use test::{Bracket, Test};
pub use vars::{Let, Unset};

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::env::Environment;
use crate::error::Result;
use crate::interpreter::{ExecResult, Watch};
use crate::policy::{Policy, normalize};

/// `target` made absolute against `cwd`, with `.` and `..` folded away
/// lexically. Policy checks and file opens both use the result.
pub(crate) fn resolve_path(cwd: &Path, target: &str) -> PathBuf {
    normalize(&cwd.join(target))
}

/// Execution context for builtin commands.
pub struct Context<'a> {
    /// Command arguments (not including the command name).
    pub args: &'a [String],

    /// The run's variable store.
    pub env: &'a mut Environment,

    /// Current working directory (mutable).
    ///
    /// Used by `cd` and path resolution.
    pub cwd: &'a mut PathBuf,

    /// Authorization policy; file-touching builtins check paths against it.
    pub policy: &'a Policy,

    /// Cancellation and deadline of the run; checked before touching the
    /// filesystem.
    pub(crate) watch: Watch<'a>,
}

/// Trait for implementing builtin commands.
///
/// Return [`ExecResult::ok`](crate::ExecResult::ok) for success with output,
/// or [`ExecResult::err`](crate::ExecResult::err) for a failed status. An
/// `Err` aborts the whole run, so reserve it for policy violations and
/// arithmetic faults.
#[async_trait]
pub trait Builtin: Send + Sync {
    /// Execute the builtin command.
    async fn execute(&self, ctx: Context<'_>) -> Result<ExecResult>;
}

/// Names of the shell-state builtins, exempt from the command whitelist.
const STATE_BUILTINS: &[&str] = &[":", "true", "false", "exit", "let", "cd", "unset", "test", "["];

pub(crate) fn is_state_builtin(name: &str) -> bool {
    STATE_BUILTINS.contains(&name)
}

/// Shell-state builtins keyed by name.
pub(crate) fn state_builtins() -> HashMap<&'static str, Box<dyn Builtin>> {
    let mut builtins: HashMap<&'static str, Box<dyn Builtin>> = HashMap::new();
    builtins.insert(":", Box::new(Colon));
    builtins.insert("true", Box::new(True));
    builtins.insert("false", Box::new(False));
    builtins.insert("exit", Box::new(Exit));
    builtins.insert("let", Box::new(Let));
    builtins.insert("cd", Box::new(Cd));
    builtins.insert("unset", Box::new(Unset));
    builtins.insert("test", Box::new(Test));
    builtins.insert("[", Box::new(Bracket));
    builtins
}

/// Output builtins; they run in-process once the whitelist admits them.
pub(crate) fn output_builtins() -> HashMap<&'static str, Box<dyn Builtin>> {
    let mut builtins: HashMap<&'static str, Box<dyn Builtin>> = HashMap::new();
    builtins.insert("echo", Box::new(Echo));
    builtins.insert("pwd", Box::new(Pwd));
    builtins
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    use crate::cancel::CancelHandle;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Owns everything a [`Context`] borrows.
    pub struct Harness {
        pub env: Environment,
        pub cwd: PathBuf,
        pub policy: Policy,
        pub cancel: CancelHandle,
    }

    impl Harness {
        pub fn new(policy: Policy) -> Self {
            Self {
                env: Environment::new(),
                cwd: PathBuf::from("/"),
                policy,
                cancel: CancelHandle::new(),
            }
        }

        pub async fn run(&mut self, builtin: &dyn Builtin, args: &[&str]) -> Result<ExecResult> {
            let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
            let ctx = Context {
                args: &args,
                env: &mut self.env,
                cwd: &mut self.cwd,
                policy: &self.policy,
                watch: Watch {
                    cancel: &self.cancel,
                    deadline: Instant::now() + Duration::from_secs(60),
                    timeout: Duration::from_secs(60),
                },
            };
            builtin.execute(ctx).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path() {
        let cwd = Path::new("/home/user");
        assert_eq!(resolve_path(cwd, "/tmp/f"), PathBuf::from("/tmp/f"));
        assert_eq!(resolve_path(cwd, "a/./b/../c"), PathBuf::from("/home/user/a/c"));
        assert_eq!(resolve_path(cwd, "../../../.."), PathBuf::from("/"));
    }

    #[test]
    fn test_families_do_not_overlap() {
        let state = state_builtins();
        assert_eq!(state.len(), STATE_BUILTINS.len());
        assert!(STATE_BUILTINS.iter().all(|name| state.contains_key(name)));
        for name in output_builtins().keys() {
            assert!(!state.contains_key(name), "{} is in both families", name);
        }
    }
}
