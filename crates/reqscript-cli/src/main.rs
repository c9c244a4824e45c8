//! Command-line runner for reqscript HTTP automation scripts.
//!
//! # Usage
//!
//! ```bash
//! # Execute a script
//! reqscript checks/login.rqs
//!
//! # Pass arguments, read by the script as $ARG1, $ARG2, ... ($ARGC)
//! reqscript checks/login.rqs https://staging.example.com admin
//!
//! # Check structure and syntax without executing
//! reqscript --validate checks/login.rqs
//!
//! # Show what would run, without running it
//! reqscript --dry-run checks/login.rqs
//!
//! # Stop at the first failing statement
//! reqscript --stop-on-failure checks/smoke.rqs
//! ```
//!
//! Exit codes: `0` success, `1` assertion failure, `2` lexical, syntax, or
//! structural error, `3` semantic or control-flow error, `4` I/O error.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use reqscript_core::blocks::split_statements;
use reqscript_core::{Interpreter, ScriptError, Value};

#[derive(Parser)]
#[command(
    name = "reqscript",
    version,
    about = "Run reqscript HTTP automation scripts"
)]
struct Cli {
    /// Script file to execute
    script: PathBuf,

    /// Positional arguments exposed to the script as $ARG1, $ARG2, ...
    /// ($ARGC holds the count)
    args: Vec<String>,

    /// Show an execution summary (duration, statement count, variables)
    #[arg(short, long)]
    verbose: bool,

    /// Stop at the first failing statement instead of continuing with the
    /// next top-level statement
    #[arg(long)]
    stop_on_failure: bool,

    /// Print the statements that would execute, without running them
    #[arg(long)]
    dry_run: bool,

    /// Check structure and syntax only; nothing is executed
    #[arg(long)]
    validate: bool,
}

fn exit_code_for(error: &ScriptError) -> u8 {
    match error {
        ScriptError::Assertion { .. } => 1,
        ScriptError::Lexical { .. }
        | ScriptError::Syntax { .. }
        | ScriptError::Structural { .. } => 2,
        ScriptError::Semantic { .. } | ScriptError::ControlFlow { .. } => 3,
        ScriptError::Io(_) => 4,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> ExitCode {
    let source = match std::fs::read_to_string(&cli.script) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: cannot read {}: {}", cli.script.display(), e);
            return ExitCode::from(4);
        }
    };

    let mut interp = Interpreter::new();

    if cli.validate {
        return match interp.validate_script(&source) {
            Ok(()) => {
                println!("script is valid");
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("error: {}", e);
                ExitCode::from(exit_code_for(&e))
            }
        };
    }

    if cli.dry_run {
        if let Err(e) = interp.validate_script(&source) {
            eprintln!("error: {}", e);
            return ExitCode::from(exit_code_for(&e));
        }
        for (i, line) in source.lines().enumerate() {
            if !line.trim().is_empty() {
                println!("{:3}: {}", i + 1, line);
            }
        }
        return ExitCode::SUCCESS;
    }

    for (i, arg) in cli.args.iter().enumerate() {
        interp.set_var(format!("ARG{}", i + 1), Value::Str(arg.clone()));
    }
    interp.set_var("ARGC", Value::Num(cli.args.len() as f64));

    let units = match split_statements(&source) {
        Ok(units) => units,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(exit_code_for(&e));
        }
    };
    tracing::debug!(script = %cli.script.display(), units = units.len(), "executing");

    let started = Instant::now();
    let mut steps = 0usize;
    let mut failure: Option<u8> = None;

    for unit in units {
        let outcome = interp.parse_script(&unit).await;
        for line in interp.take_output() {
            println!("{}", line);
        }
        match outcome {
            Ok(Value::Array(results)) => steps += results.len(),
            Ok(_) => steps += 1,
            Err(e) => {
                eprintln!("error: {}", e);
                failure.get_or_insert(exit_code_for(&e));
                if cli.stop_on_failure {
                    break;
                }
            }
        }
    }

    if cli.verbose {
        eprintln!("duration: {:.2?}", started.elapsed());
        eprintln!("statements executed: {}", steps);
        let mut names: Vec<&String> = interp.vars().keys().collect();
        names.sort();
        for name in names {
            eprintln!("  ${} = {}", name, interp.vars()[name]);
        }
    }

    match failure {
        Some(code) => ExitCode::from(code),
        None => ExitCode::SUCCESS,
    }
}
