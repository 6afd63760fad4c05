//! shsandbox - Sandboxed evaluation core for POSIX shell scripts
//!
//! Runs a restricted subset of shell under an authorization [`Policy`] that
//! decides which commands may run and which paths may be opened, and returns
//! a [`Snapshot`] of the variables the script left behind. Shell arithmetic
//! (`$(( ))`, `(( ))`, `let`, arithmetic `for`) is evaluated in-process over
//! 64-bit integers.
//!
//! # Example
//!
//! ```rust
//! #[tokio::main]
//! async fn main() -> shsandbox::Result<()> {
//!     let snapshot = shsandbox::source("a=x; n=$(( 6 * 7 )); X=(a b c)").await?;
//!     assert_eq!(snapshot.scalar("a"), Some("x"));
//!     assert_eq!(snapshot.scalar("n"), Some("42"));
//!     assert_eq!(snapshot.indexed("X").map(|v| v.len()), Some(3));
//!     Ok(())
//! }
//! ```
//!
//! Anything outside the policy aborts the run:
//!
//! ```rust
//! #[tokio::main]
//! async fn main() {
//!     let err = shsandbox::source("rm -rf /").await.unwrap_err();
//!     assert_eq!(err.to_string(), "command not in whitelist: rm");
//! }
//! ```

mod builtins;
mod cancel;
mod env;
mod error;
mod interpreter;
mod limits;
mod logging_impl;
pub mod parser;
mod policy;
mod snapshot;

pub use cancel::{CancelHandle, CancelReason};
pub use env::{ElementRef, Environment, ValueKind, VarValue, Variable};
pub use error::{Error, Result};
pub use interpreter::{ControlFlow, ExecResult, atoi, eval_arith};
pub use limits::{ExecutionLimits, LimitExceeded};
pub use logging_impl::{LogConfig, format_script_for_log, sanitize_for_log};
pub use parser::{ArithExpr, BinaryOp, Script, UnaryOp, Visitor, Word, parse, parse_arithmetic};
pub use policy::{PathIntent, Policy};
pub use snapshot::Snapshot;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use interpreter::Interpreter;
use parser::SimpleCommand;

/// Parse and run `script` under [`Policy::default_pure`] and default limits.
pub async fn source(script: &str) -> Result<Snapshot> {
    Sandbox::new().source(script).await
}

/// Reusable configuration for sandboxed runs.
///
/// A `Sandbox` only holds immutable settings; every run gets a fresh
/// [`Environment`], so one sandbox may drive many concurrent runs.
pub struct Sandbox {
    policy: Arc<Policy>,
    limits: ExecutionLimits,
    vars: Vec<(String, String)>,
    inherited: HashMap<String, String>,
    cwd: PathBuf,
    search_path: Option<String>,
    log_config: LogConfig,
    cancel: CancelHandle,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    /// A sandbox with the default pure policy.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a new SandboxBuilder for customized configuration.
    pub fn builder() -> SandboxBuilder {
        SandboxBuilder::default()
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Handle that cancels runs started with [`Sandbox::run`] or
    /// [`Sandbox::source`]. Once cancelled it stays cancelled.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Parse `script` and run it.
    pub async fn source(&self, script: &str) -> Result<Snapshot> {
        #[cfg(feature = "logging")]
        tracing::info!(script = %format_script_for_log(script, &self.log_config), "source");
        let ast = parse(script)?;
        self.run(&ast).await
    }

    /// Run an already parsed script.
    pub async fn run(&self, script: &Script) -> Result<Snapshot> {
        self.run_with_cancel(script, self.cancel.clone()).await
    }

    /// Run with a caller-supplied cancellation handle.
    pub async fn run_with_cancel(&self, script: &Script, cancel: CancelHandle) -> Result<Snapshot> {
        let mut env = Environment::with_inherited(self.inherited.clone());
        for (name, value) in &self.vars {
            env.set(name, value.as_str());
        }

        let mut interpreter = Interpreter::new(
            env,
            self.cwd.clone(),
            Arc::clone(&self.policy),
            self.limits.clone(),
            cancel,
        )
        .search_path(self.search_path.clone())
        .log_config(self.log_config.clone());

        #[cfg(feature = "logging")]
        tracing::info!(commands = script.commands.len(), "run started");

        match interpreter.run(script).await {
            Ok(_result) => {
                #[cfg(feature = "logging")]
                tracing::info!(exit_code = _result.exit_code, "run finished");
                Ok(interpreter.env().snapshot())
            }
            Err(e) => {
                #[cfg(feature = "logging")]
                tracing::warn!(error = %e, "run failed");
                Err(e)
            }
        }
    }

    /// Command names in `script` the policy would reject, found without
    /// running anything. Only literal names are known statically; names built
    /// from expansions are checked when the script runs.
    pub fn audit(&self, script: &Script) -> Vec<String> {
        let mut audit = Audit {
            policy: &self.policy,
            denied: Vec::new(),
        };
        audit.visit_script(script);
        audit.denied
    }
}

struct Audit<'a> {
    policy: &'a Policy,
    denied: Vec<String>,
}

impl Visitor for Audit<'_> {
    fn visit_simple_command(&mut self, command: &SimpleCommand) {
        if let Some(name) = command.name.as_ref().and_then(Word::as_literal) {
            if !builtins::is_state_builtin(&name)
                && !self.policy.is_command_allowed(&name)
                && !self.denied.contains(&name)
            {
                self.denied.push(name);
            }
        }
        parser::visit::walk_simple_command(self, command);
    }
}

/// Builder for customized Sandbox configuration.
#[derive(Default)]
pub struct SandboxBuilder {
    policy: Option<Policy>,
    limits: ExecutionLimits,
    vars: Vec<(String, String)>,
    inherited: HashMap<String, String>,
    cwd: Option<PathBuf>,
    search_path: Option<String>,
    log_config: Option<LogConfig>,
}

impl SandboxBuilder {
    /// Set the authorization policy (default: [`Policy::default_pure`]).
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Set execution limits.
    pub fn limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bind a variable before the run; it appears in the snapshot.
    pub fn var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.push((name.into(), value.into()));
        self
    }

    /// Add a process environment entry: readable and exported to children,
    /// but only part of the snapshot if the script assigns it.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inherited.insert(key.into(), value.into());
        self
    }

    /// Set the working directory (default: `/`).
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// `PATH` used to find external programs.
    pub fn search_path(mut self, path: impl Into<String>) -> Self {
        self.search_path = Some(path.into());
        self
    }

    /// Control what run data may appear in log records.
    pub fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = Some(config);
        self
    }

    /// Build the Sandbox instance.
    pub fn build(self) -> Sandbox {
        Sandbox {
            policy: Arc::new(self.policy.unwrap_or_else(Policy::default_pure)),
            limits: self.limits,
            vars: self.vars,
            inherited: self.inherited,
            cwd: self.cwd.unwrap_or_else(|| PathBuf::from("/")),
            search_path: self.search_path,
            log_config: self.log_config.unwrap_or_default(),
            cancel: CancelHandle::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_source_scalars() {
        let snapshot = source("a=x; b=y").await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.scalar("a"), Some("x"));
        assert_eq!(snapshot.scalar("b"), Some("y"));
    }

    #[tokio::test]
    async fn test_builder_vars_and_env() {
        let sandbox = Sandbox::builder()
            .var("seed", "3")
            .env("HOME", "/home/user")
            .build();
        let snapshot = sandbox.source("n=$((seed * 2)); h=$HOME").await.unwrap();
        assert_eq!(snapshot.scalar("n"), Some("6"));
        assert_eq!(snapshot.scalar("h"), Some("/home/user"));
        assert!(snapshot.contains("seed"));
        assert!(!snapshot.contains("HOME"));
    }

    #[tokio::test]
    async fn test_runs_do_not_share_state() {
        let sandbox = Sandbox::new();
        sandbox.source("leak=1").await.unwrap();
        let snapshot = sandbox.source("other=2").await.unwrap();
        assert!(!snapshot.contains("leak"));
    }

    #[test]
    fn test_audit_lists_denied_literal_names() {
        let sandbox = Sandbox::new();
        let script = parse("echo hi; rm -f x; a=$(curl u | sort); rm y; cd /; $cmd").unwrap();
        assert_eq!(sandbox.audit(&script), vec!["rm", "curl"]);
    }

    #[tokio::test]
    async fn test_parse_errors_pass_through() {
        let err = source("if true; then").await.unwrap_err();
        assert!(matches!(err, Error::Parse(_) | Error::ParseAt { .. }));
    }
}
