//! Sandboxed execution engine
//!
//! Walks a parsed [`Script`] in document order. Every simple command passes
//! the same gate: expand its words, check cancellation, run shell-state
//! builtins directly, require the policy's whitelist for anything else, open
//! its redirections under the path rules, then run the output builtin or
//! spawn the external program.
//!
//! All state a run touches lives in one [`Interpreter`]; nothing is shared
//! with other runs except the read-only policy.

pub mod arithmetic;
mod argv;
mod expand;
mod process;
mod state;

pub use arithmetic::{atoi, eval_arith};
pub(crate) use expand::eval_index;
pub(crate) use process::Watch;
pub use state::{ControlFlow, ExecResult};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;

use crate::builtins::{self, Builtin, Context, resolve_path};
use crate::cancel::CancelHandle;
use crate::env::{Environment, ValueKind, VarValue, Variable, store_at};
use crate::error::{Error, Result};
use crate::limits::{ExecutionCounters, ExecutionLimits, LimitExceeded};
use crate::logging_impl::LogConfig;
use crate::parser::{
    ArithExpr, ArithForCommand, AssignmentValue, Assignment, Command, CommandList,
    CompoundCommand, DeclArg, DeclCommand, ForCommand, IfCommand, ListOperator, Pipeline,
    Redirect, RedirectKind, Script, SimpleCommand, WhileCommand, Word, WordPart,
};
use crate::policy::{PathIntent, Policy};

use argv::Effect;
use arithmetic::eval_arith_with;
use expand::{Substitutions, array_splat, expand_word_sync};
use process::Spawn;

/// Used when `Instant + timeout` would overflow.
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

/// How a simple command is run once its name is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Family {
    State,
    Output,
    External,
}

/// Interpreter state for one run.
pub(crate) struct Interpreter {
    env: Environment,
    cwd: PathBuf,
    policy: Arc<Policy>,
    limits: ExecutionLimits,
    counters: ExecutionCounters,
    cancel: CancelHandle,
    deadline: Instant,
    search_path: Option<String>,
    #[cfg_attr(not(feature = "logging"), allow(dead_code))]
    log_config: LogConfig,
    state_builtins: HashMap<&'static str, Box<dyn Builtin>>,
    output_builtins: HashMap<&'static str, Box<dyn Builtin>>,
    /// Stdin of the enclosing pipeline stage, consumed by the first reader
    pending_stdin: Option<String>,
    /// Status of the most recent command substitution
    subst_status: Option<i32>,
}

/// Where captured output of a redirected command ends up.
enum Sink {
    Capture,
    Discard,
    File(tokio::fs::File),
    /// Merge into the other stream (`2>&1`, `>&2`)
    Other,
}

/// Opened redirections of one command. Files close when this is dropped.
struct Redirections {
    stdin: Option<String>,
    stdout: Sink,
    stderr: Sink,
}

impl Interpreter {
    pub(crate) fn new(
        mut env: Environment,
        cwd: PathBuf,
        policy: Arc<Policy>,
        limits: ExecutionLimits,
        cancel: CancelHandle,
    ) -> Self {
        let now = Instant::now();
        let deadline = now
            .checked_add(limits.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        env.set_max_array_length(limits.max_array_length);
        Self {
            env,
            cwd,
            policy,
            limits,
            counters: ExecutionCounters::new(),
            cancel,
            deadline,
            search_path: None,
            log_config: LogConfig::default(),
            state_builtins: builtins::state_builtins(),
            output_builtins: builtins::output_builtins(),
            pending_stdin: None,
            subst_status: None,
        }
    }

    /// `PATH` handed to child processes, overriding any exported value. When
    /// unset, children get the exported `PATH` or else the host's.
    pub(crate) fn search_path(mut self, path: Option<String>) -> Self {
        self.search_path = path;
        self
    }

    pub(crate) fn log_config(mut self, config: LogConfig) -> Self {
        self.log_config = config;
        self
    }

    pub(crate) fn env(&self) -> &Environment {
        &self.env
    }

    /// Run a whole script. Output of top-level commands is returned, not
    /// written anywhere.
    pub(crate) async fn run(&mut self, script: &Script) -> Result<ExecResult> {
        let mut result = self.execute_commands(&script.commands).await?;
        if let ControlFlow::Exit(code) = result.control_flow {
            result.exit_code = code;
        }
        Ok(result)
    }

    fn check_cancelled(&self) -> Result<()> {
        Watch {
            cancel: &self.cancel,
            deadline: self.deadline,
            timeout: self.limits.timeout,
        }
        .check()
    }

    /// Execute a sequence of commands, stopping early on `exit`.
    fn execute_commands<'a>(
        &'a mut self,
        commands: &'a [Command],
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            let mut out = ExecResult::default();
            for command in commands {
                let result = self.execute_command(command, None).await?;
                if merge(&mut out, result) {
                    break;
                }
            }
            Ok(out)
        })
    }

    /// Execute a single command.
    fn execute_command<'a>(
        &'a mut self,
        command: &'a Command,
        stdin: Option<String>,
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            let result = match command {
                Command::Simple(cmd) => self.execute_simple(cmd, stdin).await?,
                Command::Pipeline(pipeline) => self.execute_pipeline(pipeline, stdin).await?,
                Command::List(list) => self.execute_list(list, stdin).await?,
                Command::Compound(compound, redirects) => {
                    self.execute_compound_with_redirects(compound, redirects, stdin)
                        .await?
                }
                Command::Declaration(decl) => self.execute_declaration(decl).await?,
                Command::Arithmetic(expr) => {
                    self.check_cancelled()?;
                    self.counters.tick_command(&self.limits)?;
                    let value = self.arith(expr).await?;
                    ExecResult::status(if value != 0 { 0 } else { 1 })
                }
            };
            self.env.set_last_status(result.exit_code);
            Ok(result)
        })
    }

    async fn execute_simple(
        &mut self,
        cmd: &SimpleCommand,
        stdin: Option<String>,
    ) -> Result<ExecResult> {
        self.check_cancelled()?;
        self.counters.tick_command(&self.limits)?;

        let mut words = Vec::with_capacity(cmd.args.len() + 1);
        words.extend(cmd.name.iter());
        words.extend(cmd.args.iter());
        let mut fields = self.expand_fields(&words).await?;

        if fields.is_empty() {
            return self.execute_assignments(cmd).await;
        }
        let name = fields.remove(0);
        let args = fields;

        let mut prefix = Vec::with_capacity(cmd.assignments.len());
        for assignment in &cmd.assignments {
            prefix.push(self.prefix_assignment(assignment).await?);
        }

        self.check_cancelled()?;
        let family = if self.state_builtins.contains_key(name.as_str()) {
            Family::State
        } else if !self.policy.is_command_allowed(&name) {
            #[cfg(feature = "logging")]
            tracing::warn!(command = %crate::logging_impl::sanitize_for_log(&name), "command not in whitelist");
            return Err(Error::NotInWhitelist(name));
        } else if self.output_builtins.contains_key(name.as_str()) {
            Family::Output
        } else {
            Family::External
        };

        if matches!(family, Family::External) {
            self.check_effects(&name, &args)?;
        }

        #[cfg(feature = "logging")]
        tracing::debug!(command = %self.log_config.format_command(&name, &args), ?family, "dispatch");

        let mut redirections = self.open_redirects(&cmd.redirects).await?;
        let stdin = redirections.stdin.take().or(stdin);

        let result = match family {
            // Builtins never read stdin
            Family::State | Family::Output => self.run_builtin(family, &name, &args, &prefix).await?,
            Family::External => self.run_external(&name, &args, &prefix, stdin).await?,
        };
        redirections.apply(result).await
    }

    /// A statement made only of assignments (and possibly redirections).
    async fn execute_assignments(&mut self, cmd: &SimpleCommand) -> Result<ExecResult> {
        self.subst_status = None;
        for assignment in &cmd.assignments {
            self.assign(assignment).await?;
        }
        let status = self.subst_status.take().unwrap_or(0);
        let redirections = self.open_redirects(&cmd.redirects).await?;
        redirections.apply(ExecResult::status(status)).await
    }

    async fn run_builtin(
        &mut self,
        family: Family,
        name: &str,
        args: &[String],
        prefix: &[(String, String)],
    ) -> Result<ExecResult> {
        let table = match family {
            Family::State => &self.state_builtins,
            _ => &self.output_builtins,
        };
        let Some(builtin) = table.get(name) else {
            return Err(Error::internal(format!("no builtin named {}", name)));
        };

        // Prefix assignments are visible to the builtin only
        let saved: Vec<(String, Option<Variable>)> = prefix
            .iter()
            .map(|(n, _)| (n.clone(), self.env.get_var(n).cloned()))
            .collect();
        for (n, v) in prefix {
            self.env.set(n, v.as_str());
        }

        let ctx = Context {
            args,
            env: &mut self.env,
            cwd: &mut self.cwd,
            policy: &self.policy,
            watch: Watch {
                cancel: &self.cancel,
                deadline: self.deadline,
                timeout: self.limits.timeout,
            },
        };
        let result = builtin.execute(ctx).await;

        for (n, old) in saved {
            self.env.restore(&n, old);
        }
        result
    }

    async fn run_external(
        &mut self,
        name: &str,
        args: &[String],
        prefix: &[(String, String)],
        stdin: Option<String>,
    ) -> Result<ExecResult> {
        let mut env: HashMap<String, String> = self.env.exported().into_iter().collect();
        env.extend(prefix.iter().cloned());
        match &self.search_path {
            Some(path) => {
                env.insert("PATH".to_string(), path.clone());
            }
            None if !env.contains_key("PATH") => {
                if let Ok(host) = std::env::var("PATH") {
                    env.insert("PATH".to_string(), host);
                }
            }
            None => {}
        }

        let stdin = stdin.or_else(|| self.pending_stdin.take());
        process::run_external(
            Spawn {
                program: name,
                args,
                env: env.into_iter().collect(),
                cwd: &self.cwd,
                stdin,
            },
            Watch {
                cancel: &self.cancel,
                deadline: self.deadline,
                timeout: self.limits.timeout,
            },
        )
        .await
    }

    async fn execute_pipeline(
        &mut self,
        pipeline: &Pipeline,
        stdin: Option<String>,
    ) -> Result<ExecResult> {
        let mut input = stdin;
        let mut stderr = String::new();
        let mut last = ExecResult::default();
        let stages = pipeline.commands.len();

        for (i, command) in pipeline.commands.iter().enumerate() {
            if i + 1 < stages {
                // Every stage but the last runs on a copy of the store
                let result = self
                    .isolated(std::slice::from_ref(command), input.take())
                    .await?;
                stderr.push_str(&result.stderr);
                input = Some(result.stdout);
            } else {
                last = self.execute_command(command, input.take()).await?;
                if stages > 1 {
                    last.control_flow = ControlFlow::None;
                }
            }
        }

        stderr.push_str(&last.stderr);
        last.stderr = stderr;
        if pipeline.negated {
            last.exit_code = if last.exit_code == 0 { 1 } else { 0 };
        }
        Ok(last)
    }

    async fn execute_list(
        &mut self,
        list: &CommandList,
        stdin: Option<String>,
    ) -> Result<ExecResult> {
        let mut out = ExecResult::default();
        let first = self.execute_command(&list.first, stdin).await?;
        if merge(&mut out, first) {
            return Ok(out);
        }

        for (op, command) in &list.rest {
            let run = match op {
                ListOperator::And => out.exit_code == 0,
                ListOperator::Or => out.exit_code != 0,
                ListOperator::Semicolon => true,
            };
            if !run {
                continue;
            }
            let result = self.execute_command(command, None).await?;
            if merge(&mut out, result) {
                break;
            }
        }
        Ok(out)
    }

    async fn execute_compound_with_redirects(
        &mut self,
        compound: &CompoundCommand,
        redirects: &[Redirect],
        stdin: Option<String>,
    ) -> Result<ExecResult> {
        let mut redirections = self.open_redirects(redirects).await?;
        let stdin = redirections.stdin.take().or(stdin);

        let outer = match stdin {
            Some(data) => std::mem::replace(&mut self.pending_stdin, Some(data)),
            None => self.pending_stdin.take(),
        };
        let result = self.execute_compound(compound).await;
        self.pending_stdin = outer;

        redirections.apply(result?).await
    }

    async fn execute_compound(&mut self, compound: &CompoundCommand) -> Result<ExecResult> {
        match compound {
            CompoundCommand::If(cmd) => self.execute_if(cmd).await,
            CompoundCommand::While(cmd) => self.execute_while(cmd, false).await,
            CompoundCommand::Until(cmd) => self.execute_while(cmd, true).await,
            CompoundCommand::For(cmd) => self.execute_for(cmd).await,
            CompoundCommand::ArithFor(cmd) => self.execute_arith_for(cmd).await,
            CompoundCommand::BraceGroup(body) => self.execute_commands(body).await,
            CompoundCommand::Subshell(body) => {
                self.counters.push_nesting(&self.limits)?;
                let result = self.isolated(body, None).await;
                self.counters.pop_nesting();
                result
            }
        }
    }

    /// Run `commands` against a copy of the store and working directory that
    /// is thrown away afterwards. `exit` ends only the copy.
    fn isolated<'a>(
        &'a mut self,
        commands: &'a [Command],
        stdin: Option<String>,
    ) -> BoxFuture<'a, Result<ExecResult>> {
        Box::pin(async move {
            let env = self.env.clone();
            let cwd = self.cwd.clone();
            let outer = std::mem::replace(&mut self.pending_stdin, stdin);

            let result = self.execute_commands(commands).await;

            self.env = env;
            self.cwd = cwd;
            self.pending_stdin = outer;

            let mut result = result?;
            if let ControlFlow::Exit(code) = result.control_flow {
                result.exit_code = code;
                result.control_flow = ControlFlow::None;
            }
            Ok(result)
        })
    }

    async fn execute_if(&mut self, cmd: &IfCommand) -> Result<ExecResult> {
        let mut out = ExecResult::default();

        let branches = std::iter::once((&cmd.condition, &cmd.then_branch))
            .chain(cmd.elif_branches.iter().map(|(c, b)| (c, b)));
        for (condition, body) in branches {
            let cond = self.execute_commands(condition).await?;
            let taken = cond.exit_code == 0;
            if merge(&mut out, cond) {
                return Ok(out);
            }
            if taken {
                let result = self.execute_commands(body).await?;
                merge(&mut out, result);
                return Ok(out);
            }
        }

        out.exit_code = 0;
        if let Some(body) = &cmd.else_branch {
            let result = self.execute_commands(body).await?;
            merge(&mut out, result);
        }
        Ok(out)
    }

    async fn execute_while(&mut self, cmd: &WhileCommand, until: bool) -> Result<ExecResult> {
        let outer = self.counters.loop_iterations;
        self.counters.reset_loop();
        let result = self.while_loop(cmd, until).await;
        self.counters.loop_iterations = outer;
        result
    }

    async fn while_loop(&mut self, cmd: &WhileCommand, until: bool) -> Result<ExecResult> {
        let mut out = ExecResult::default();
        let mut status = 0;
        loop {
            self.check_cancelled()?;
            self.counters.tick_loop(&self.limits)?;

            let cond = self.execute_commands(&cmd.condition).await?;
            let proceed = (cond.exit_code == 0) != until;
            if merge(&mut out, cond) {
                return Ok(out);
            }
            if !proceed {
                break;
            }

            let body = self.execute_commands(&cmd.body).await?;
            status = body.exit_code;
            if merge(&mut out, body) {
                return Ok(out);
            }
        }
        out.exit_code = status;
        Ok(out)
    }

    async fn execute_for(&mut self, cmd: &ForCommand) -> Result<ExecResult> {
        let words: Vec<&Word> = cmd.words.iter().collect();
        let values = self.expand_fields(&words).await?;

        let outer = self.counters.loop_iterations;
        self.counters.reset_loop();
        let result = self.for_loop(cmd, values).await;
        self.counters.loop_iterations = outer;
        result
    }

    async fn for_loop(&mut self, cmd: &ForCommand, values: Vec<String>) -> Result<ExecResult> {
        let mut out = ExecResult::default();
        for value in values {
            self.check_cancelled()?;
            self.counters.tick_loop(&self.limits)?;
            self.env.set(&cmd.variable, value);

            let body = self.execute_commands(&cmd.body).await?;
            if merge(&mut out, body) {
                break;
            }
        }
        Ok(out)
    }

    async fn execute_arith_for(&mut self, cmd: &ArithForCommand) -> Result<ExecResult> {
        let outer = self.counters.loop_iterations;
        self.counters.reset_loop();
        let result = self.arith_for_loop(cmd).await;
        self.counters.loop_iterations = outer;
        result
    }

    async fn arith_for_loop(&mut self, cmd: &ArithForCommand) -> Result<ExecResult> {
        let mut out = ExecResult::default();
        if let Some(init) = &cmd.init {
            self.arith(init).await?;
        }
        loop {
            self.check_cancelled()?;
            self.counters.tick_loop(&self.limits)?;

            if let Some(condition) = &cmd.condition {
                if self.arith(condition).await? == 0 {
                    break;
                }
            }

            let body = self.execute_commands(&cmd.body).await?;
            if merge(&mut out, body) {
                return Ok(out);
            }

            if let Some(step) = &cmd.step {
                self.arith(step).await?;
            }
        }
        Ok(out)
    }

    /// `declare`, `typeset`, `export` and `local`.
    async fn execute_declaration(&mut self, decl: &DeclCommand) -> Result<ExecResult> {
        self.check_cancelled()?;
        self.counters.tick_command(&self.limits)?;

        let mut kind = None;
        let mut export = match decl.builtin.as_str() {
            "export" => Some(true),
            _ => None,
        };

        for arg in &decl.args {
            match arg {
                DeclArg::Flag(word) => {
                    let flag = self.expand_word(word).await?;
                    let (on, letters) = match flag.strip_prefix('-') {
                        Some(rest) => (true, rest),
                        None => (false, flag.strip_prefix('+').unwrap_or(flag.as_str())),
                    };
                    for letter in letters.chars() {
                        match letter {
                            'a' if on => kind = Some(ValueKind::Indexed),
                            'A' if on => kind = Some(ValueKind::Associative),
                            'x' => export = Some(on),
                            'n' if decl.builtin == "export" => export = Some(!on),
                            _ => {}
                        }
                    }
                }
                DeclArg::Name(name) => {
                    match kind {
                        Some(kind) => self.env.declare(name, kind),
                        None if !self.env.is_set(name) => {
                            self.env.declare(name, ValueKind::Scalar)
                        }
                        None => {}
                    }
                    if let Some(on) = export {
                        self.env.set_exported(name, on);
                    }
                }
                DeclArg::Assign(assignment) => {
                    if let Some(kind) = kind {
                        if !assignment.append {
                            self.env.unset(&assignment.name);
                        }
                        self.env.declare(&assignment.name, kind);
                    }
                    self.assign(assignment).await?;
                    if let Some(on) = export {
                        self.env.set_exported(&assignment.name, on);
                    }
                }
            }
        }
        Ok(ExecResult::status(0))
    }

    /// Apply one assignment to the store.
    async fn assign(&mut self, assignment: &Assignment) -> Result<()> {
        let name = assignment.name.as_str();
        match (&assignment.index, &assignment.value) {
            (None, AssignmentValue::Scalar(word)) => {
                let value = self.expand_word(word).await?;
                #[cfg(feature = "logging")]
                tracing::debug!(name, value = %self.log_config.redact_assignment(name, &value), "assign");
                if assignment.append {
                    self.env.append(name, &value);
                } else {
                    self.env.set(name, value);
                }
            }
            (Some(index), AssignmentValue::Scalar(word)) => {
                let subscript = self.expand_word(index).await?;
                let mut value = self.expand_word(word).await?;
                if self.env.is_associative(name) {
                    if assignment.append {
                        value = self.env.key(name, &subscript).unwrap_or_default() + &value;
                    }
                    self.env.set_key(name, &subscript, value);
                } else {
                    let i = eval_index(&subscript, &mut self.env)?;
                    if assignment.append {
                        value = self.env.index(name, i).unwrap_or_default() + &value;
                    }
                    self.env.set_index(name, i, value)?;
                }
            }
            (None, AssignmentValue::Array(elements)) => {
                if self.env.is_associative(name) {
                    let mut map = match (&self.env.get_var(name), assignment.append) {
                        (Some(Variable { value: VarValue::Associative(map), .. }), true) => {
                            map.clone()
                        }
                        _ => Default::default(),
                    };
                    for element in elements {
                        let Some(key) = &element.key else {
                            return Err(Error::Execution(format!(
                                "{}: must use subscript when assigning associative array",
                                name
                            )));
                        };
                        let key = self.expand_word(key).await?;
                        let value = self.expand_word(&element.value).await?;
                        map.insert(key, value);
                    }
                    self.env.set_value(name, VarValue::Associative(map));
                } else {
                    let mut items = if assignment.append {
                        self.env.values(name)
                    } else {
                        Vec::new()
                    };
                    for element in elements {
                        if let Some(key) = &element.key {
                            let subscript = self.expand_word(key).await?;
                            let slot = usize::try_from(eval_index(&subscript, &mut self.env)?)
                                .map_err(|_| {
                                    Error::Execution(format!(
                                        "{}[{}]: bad array subscript",
                                        name, subscript
                                    ))
                                })?;
                            let value = self.expand_word(&element.value).await?;
                            store_at(&mut items, slot, value, self.limits.max_array_length)?;
                        } else if let Some(source) = array_splat(&element.value) {
                            items.extend(self.env.values(source));
                        } else {
                            items.push(self.expand_word(&element.value).await?);
                        }
                        let max = self.limits.max_array_length;
                        if items.len() > max {
                            return Err(LimitExceeded::MaxArrayLength(max).into());
                        }
                    }
                    #[cfg(feature = "logging")]
                    tracing::debug!(name, elements = items.len(), "assign array");
                    self.env.set_value(name, VarValue::Indexed(items));
                }
            }
            (Some(_), AssignmentValue::Array(_)) => {
                return Err(Error::Execution(format!(
                    "{}: cannot assign list to array member",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Expand a `NAME=value` prefix of a command.
    async fn prefix_assignment(&mut self, assignment: &Assignment) -> Result<(String, String)> {
        match (&assignment.index, &assignment.value) {
            (None, AssignmentValue::Scalar(word)) => {
                let mut value = self.expand_word(word).await?;
                if assignment.append {
                    value = self.env.get(&assignment.name) + &value;
                }
                Ok((assignment.name.clone(), value))
            }
            _ => Err(Error::Execution(format!(
                "{}: array assignment cannot prefix a command",
                assignment.name
            ))),
        }
    }

    /// Open redirections in order, checking each path against the policy.
    async fn open_redirects(&mut self, redirects: &[Redirect]) -> Result<Redirections> {
        let mut out = Redirections {
            stdin: None,
            stdout: Sink::Capture,
            stderr: Sink::Capture,
        };

        for redirect in redirects {
            let target = self.expand_word(&redirect.target).await?;
            match redirect.kind {
                RedirectKind::HereString => {
                    out.stdin = Some(format!("{}\n", target));
                }
                RedirectKind::Input => {
                    let path = self.checked_path(&target, PathIntent::Read)?;
                    out.stdin = Some(if is_null_device(&path) {
                        String::new()
                    } else {
                        tokio::fs::read_to_string(&path).await?
                    });
                }
                RedirectKind::Output | RedirectKind::Append | RedirectKind::OutputBoth => {
                    let append = redirect.kind == RedirectKind::Append;
                    let intent = if append {
                        PathIntent::Append
                    } else {
                        PathIntent::Write
                    };
                    let path = self.checked_path(&target, intent)?;
                    let sink = if is_null_device(&path) {
                        Sink::Discard
                    } else {
                        Sink::File(
                            tokio::fs::OpenOptions::new()
                                .write(true)
                                .create(true)
                                .append(append)
                                .truncate(!append)
                                .open(&path)
                                .await?,
                        )
                    };
                    match (redirect.kind, redirect.fd.unwrap_or(1)) {
                        (RedirectKind::OutputBoth, _) => {
                            out.stdout = sink;
                            out.stderr = Sink::Other;
                        }
                        (_, 2) => out.stderr = sink,
                        _ => out.stdout = sink,
                    }
                }
                RedirectKind::DupOutput => match (redirect.fd.unwrap_or(1), target.as_str()) {
                    (2, "1") => out.stderr = Sink::Other,
                    (1, "2") => out.stdout = Sink::Other,
                    (fd, t) if t == fd.to_string() => {}
                    (fd, t) => {
                        return Err(Error::Execution(format!(
                            "{}>&{}: unsupported file descriptor",
                            fd, t
                        )));
                    }
                },
            }
        }
        Ok(out)
    }

    /// Hold what a whitelisted program would write or start to the same
    /// policy as redirections and command names.
    fn check_effects(&self, name: &str, args: &[String]) -> Result<()> {
        for effect in argv::effects(name, args) {
            match effect {
                Effect::Write(target) => {
                    self.checked_path(&target, PathIntent::Write)?;
                }
                Effect::Exec(program) if self.policy.is_command_allowed(&program) => {}
                Effect::Exec(program) | Effect::Opaque(program) => {
                    #[cfg(feature = "logging")]
                    tracing::warn!(command = %crate::logging_impl::sanitize_for_log(name), via = %crate::logging_impl::sanitize_for_log(&program), "argument starts a program");
                    return Err(Error::NotInWhitelist(program));
                }
            }
        }
        Ok(())
    }

    /// Resolve `target` against the cwd and require `intent` for it. The
    /// error names the path as written.
    fn checked_path(&self, target: &str, intent: PathIntent) -> Result<PathBuf> {
        self.check_cancelled()?;
        let path = resolve_path(&self.cwd, target);
        if !self.policy.is_path_allowed(&path, intent) {
            #[cfg(feature = "logging")]
            tracing::warn!(path = %crate::logging_impl::sanitize_for_log(target), ?intent, "path denied");
            return Err(Error::PathDenied(target.to_string()));
        }
        #[cfg(feature = "logging")]
        tracing::debug!(path = %path.display(), ?intent, "open");
        Ok(path)
    }

    /// Evaluate an arithmetic expression, running its command substitutions
    /// first.
    async fn arith(&mut self, expr: &ArithExpr) -> Result<i64> {
        let mut scripts = Vec::new();
        collect_in_arith(expr, &mut scripts);
        let subs = self.run_substitutions(scripts).await?;
        eval_arith_with(expr, &mut self.env, &subs)
    }

    /// Expand a word to a single string.
    async fn expand_word(&mut self, word: &Word) -> Result<String> {
        let mut scripts = Vec::new();
        collect_in_word(word, &mut scripts);
        let subs = self.run_substitutions(scripts).await?;
        expand_word_sync(word, &mut self.env, &subs)
    }

    /// Expand words into fields. `${name[@]}` on its own yields one field per
    /// element; every other word yields exactly one field.
    async fn expand_fields(&mut self, words: &[&Word]) -> Result<Vec<String>> {
        let mut fields = Vec::with_capacity(words.len());
        for word in words {
            match array_splat(word) {
                Some(name) => fields.extend(self.env.values(name)),
                None => fields.push(self.expand_word(word).await?),
            }
        }
        Ok(fields)
    }

    /// Run each command substitution in document order and record its
    /// output.
    async fn run_substitutions(&mut self, scripts: Vec<&Script>) -> Result<Substitutions> {
        let mut subs = Substitutions::default();
        for script in scripts {
            let output = self.command_substitution(script).await?;
            subs.insert(script, output);
        }
        Ok(subs)
    }

    /// `$(...)`: run in the same store and capture stdout minus trailing
    /// newlines.
    fn command_substitution<'a>(&'a mut self, script: &'a Script) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.counters.push_nesting(&self.limits)?;
            let outer = self.pending_stdin.take();
            let result = self.execute_commands(&script.commands).await;
            self.pending_stdin = outer;
            self.counters.pop_nesting();

            let result = result?;
            let status = match result.control_flow {
                ControlFlow::Exit(code) => code,
                ControlFlow::None => result.exit_code,
            };
            self.env.set_last_status(status);
            self.subst_status = Some(status);

            let mut stdout = result.stdout;
            stdout.truncate(stdout.trim_end_matches('\n').len());
            Ok(stdout)
        })
    }
}

impl Redirections {
    /// Route a finished command's output to its targets.
    async fn apply(self, mut result: ExecResult) -> Result<ExecResult> {
        let stdout = std::mem::take(&mut result.stdout);
        let stderr = std::mem::take(&mut result.stderr);
        let mut to_stdout = String::new();
        let mut to_stderr = String::new();

        match &self.stdout {
            Sink::Other => to_stderr.push_str(&stdout),
            _ => to_stdout.push_str(&stdout),
        }
        match &self.stderr {
            Sink::Other => to_stdout.push_str(&stderr),
            _ => to_stderr.push_str(&stderr),
        }

        let (stdout_sink, stderr_sink) = match (self.stdout, self.stderr) {
            // `>&2` means stdout follows wherever stderr goes, and vice versa
            (Sink::Other, sink) => (None, Some(sink)),
            (sink, Sink::Other) => (Some(sink), None),
            (out, err) => (Some(out), Some(err)),
        };
        match (stdout_sink, stderr_sink) {
            (None, Some(sink)) => {
                to_stderr.push_str(&std::mem::take(&mut to_stdout));
                result.stderr = deliver(sink, to_stderr).await?;
            }
            (Some(sink), None) => {
                to_stdout.push_str(&std::mem::take(&mut to_stderr));
                result.stdout = deliver(sink, to_stdout).await?;
            }
            (Some(out), Some(err)) => {
                result.stdout = deliver(out, to_stdout).await?;
                result.stderr = deliver(err, to_stderr).await?;
            }
            (None, None) => {}
        }
        Ok(result)
    }
}

/// Write `data` to `sink`; whatever stays captured is returned.
async fn deliver(sink: Sink, data: String) -> Result<String> {
    match sink {
        Sink::Capture | Sink::Other => Ok(data),
        Sink::Discard => Ok(String::new()),
        Sink::File(mut file) => {
            file.write_all(data.as_bytes()).await?;
            file.flush().await?;
            Ok(String::new())
        }
    }
}

fn is_null_device(path: &std::path::Path) -> bool {
    path == std::path::Path::new("/dev/null")
}

/// Fold `next` into `acc`; true when the run should stop (`exit`).
fn merge(acc: &mut ExecResult, next: ExecResult) -> bool {
    acc.stdout.push_str(&next.stdout);
    acc.stderr.push_str(&next.stderr);
    acc.exit_code = next.exit_code;
    acc.control_flow = next.control_flow;
    matches!(next.control_flow, ControlFlow::Exit(_))
}

/// Command substitutions of `word` that the enclosing command must run.
/// Substitutions nested inside them are left to the inner run.
fn collect_in_word<'a>(word: &'a Word, out: &mut Vec<&'a Script>) {
    for part in &word.parts {
        match part {
            WordPart::CommandSubstitution(script) => out.push(script),
            WordPart::ArithmeticExpansion(expr) => collect_in_arith(expr, out),
            WordPart::ArrayAccess { index, .. } => collect_in_word(index, out),
            WordPart::Literal(_) | WordPart::Variable(_) | WordPart::Length(_) => {}
        }
    }
}

fn collect_in_arith<'a>(expr: &'a ArithExpr, out: &mut Vec<&'a Script>) {
    match expr {
        ArithExpr::Word(word) => collect_in_word(word, out),
        ArithExpr::Paren(inner) => collect_in_arith(inner, out),
        ArithExpr::Unary { operand, .. } => collect_in_arith(operand, out),
        ArithExpr::Binary { left, right, .. } => {
            collect_in_arith(left, out);
            collect_in_arith(right, out);
        }
    }
}
