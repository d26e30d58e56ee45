//! The `marten` command-line driver.

mod args;

use anyhow::{Context, Result, bail};
use tracing_subscriber::EnvFilter;

use marten_engine::{EngineError, EngineOptions, ScriptEngine, Value};

use crate::args::CommandLine;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = CommandLine::parse(std::env::args().skip(1));
    let mut engine = ScriptEngine::new(EngineOptions {
        strict_by_default: cli.contains("strict"),
        debug_symbols: cli.contains("debug"),
        host_globals: Vec::new(),
    });

    let eval_source = cli.get("eval", "");
    let result = if !eval_source.is_empty() {
        engine.evaluate(eval_source)
    } else {
        let path = script_path(&cli)?;
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {path}"))?;
        engine.execute(&source, Some(&path))
    };

    match result {
        Ok(Value::Undefined) => Ok(()),
        Ok(value) => {
            println!("{value:?}");
            Ok(())
        }
        Err(EngineError::Script(error)) => {
            eprintln!("{}: {}", error.kind.name(), error.message);
            if !error.stack.is_empty() {
                eprintln!("{}", error.stack);
            }
            std::process::exit(1);
        }
        Err(error) => Err(error.into()),
    }
}

/// The script to run: `script:<path>`, or the first bare argument naming
/// a file.
fn script_path(cli: &CommandLine) -> Result<String> {
    let explicit = cli.get("script", "");
    if !explicit.is_empty() {
        return Ok(explicit.to_string());
    }
    for key in cli.bare_keys() {
        if key.contains('.') {
            return Ok(key.to_string());
        }
    }
    bail!("usage: marten script:<path> | marten <path.js> | marten eval:<source> [strict] [debug]");
}
