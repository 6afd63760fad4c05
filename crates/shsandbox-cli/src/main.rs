//! shsandbox CLI - Run shell scripts under an authorization policy
//!
//! Usage:
//!   shsandbox -c 'a=$(( 6 * 7 ))'              # Evaluate a command string
//!   shsandbox script.sh                       # Evaluate a script file
//!   shsandbox --allow jq --read-root . s.sh   # Widen the policy
//!   shsandbox --audit script.sh               # List denied commands, run nothing
//!
//! On success the final variables are printed to stdout as JSON. Set
//! `RUST_LOG=shsandbox=debug` to see the run's log records on stderr.

use anyhow::{Context, Result, bail};
use clap::Parser;
use shsandbox::{ExecutionLimits, LogConfig, Policy, Sandbox};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// shsandbox - Sandboxed shell evaluation
#[derive(Parser, Debug)]
#[command(name = "shsandbox")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Evaluate the given command string
    #[arg(short = 'c')]
    command: Option<String>,

    /// Script file to evaluate
    #[arg(conflicts_with = "command")]
    script: Option<PathBuf>,

    /// Permit an extra command name (repeatable)
    #[arg(long = "allow", value_name = "NAME")]
    allow: Vec<String>,

    /// Start from an empty whitelist instead of the pure text utilities
    #[arg(long)]
    strict: bool,

    /// Permit every command name; path rules still apply
    #[arg(long, conflicts_with = "strict")]
    allow_all: bool,

    /// Permit reads under DIR (repeatable)
    #[arg(long = "read-root", value_name = "DIR")]
    read_roots: Vec<PathBuf>,

    /// Permit reads and writes under DIR (repeatable)
    #[arg(long = "write-root", value_name = "DIR")]
    write_roots: Vec<PathBuf>,

    /// Working directory of the script (default: current directory)
    #[arg(long, value_name = "DIR")]
    cwd: Option<PathBuf>,

    /// Bind a variable before the run (repeatable)
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Let the script read (and children inherit) the host environment
    #[arg(long)]
    inherit_env: bool,

    /// Abort the run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Maximum number of commands
    #[arg(long, value_name = "N")]
    max_commands: Option<usize>,

    /// Maximum iterations of any single loop
    #[arg(long, value_name = "N")]
    max_loop_iterations: Option<usize>,

    /// List command names the policy would deny and exit without running
    #[arg(long)]
    audit: bool,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,
}

fn parse_var(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}

fn main() -> ExitCode {
    // Respects RUST_LOG; silent by default
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("shsandbox: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("shsandbox: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    let script = read_script(&args)?;
    let sandbox = build_sandbox(&args)?;

    if args.audit {
        let ast = shsandbox::parse(&script).context("Failed to parse script")?;
        let denied = sandbox.audit(&ast);
        for name in &denied {
            println!("{}", name);
        }
        return Ok(if denied.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        });
    }

    let snapshot = sandbox
        .source(&script)
        .await
        .context("Failed to evaluate script")?;

    let json = if args.pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{}", json);
    Ok(ExitCode::SUCCESS)
}

fn read_script(args: &Args) -> Result<String> {
    if let Some(cmd) = &args.command {
        return Ok(cmd.clone());
    }
    match &args.script {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display())),
        None => bail!("no script given; use -c 'command' or a script file"),
    }
}

fn build_policy(args: &Args) -> Policy {
    let mut policy = if args.strict {
        Policy::new()
    } else {
        Policy::default_pure()
    };
    if args.allow_all {
        policy = policy.allow_all_commands();
    }
    policy = policy.allow_commands(args.allow.iter().cloned());
    for root in &args.read_roots {
        policy = policy.allow_read_root(absolute(root));
    }
    for root in &args.write_roots {
        policy = policy.allow_write_root(absolute(root));
    }
    policy
}

fn build_sandbox(args: &Args) -> Result<Sandbox> {
    let mut limits = ExecutionLimits::new();
    if let Some(secs) = args.timeout {
        limits = limits.timeout(Duration::from_secs(secs));
    }
    if let Some(n) = args.max_commands {
        limits = limits.max_commands(n);
    }
    if let Some(n) = args.max_loop_iterations {
        limits = limits.max_loop_iterations(n);
    }

    let cwd = match &args.cwd {
        Some(dir) => absolute(dir),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let mut builder = Sandbox::builder()
        .policy(build_policy(args))
        .limits(limits)
        .cwd(cwd)
        .log_config(LogConfig::new());
    for (name, value) in &args.vars {
        builder = builder.var(name, value);
    }
    if args.inherit_env {
        for (key, value) in std::env::vars() {
            builder = builder.env(key, value);
        }
    }
    Ok(builder.build())
}

/// Roots are matched against absolute paths, so anchor relative ones at the
/// current directory.
fn absolute(path: &std::path::Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
