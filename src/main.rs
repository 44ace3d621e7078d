//! inline-worker - CLI

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use inline_worker::runtime::builtin::{builtin_registry, BUILTIN_AUXILIARIES, BUILTIN_TASKS};
use inline_worker::runtime::{StaticCapabilities, TokenArena};
use inline_worker::util::config::{load_config, WorkerConfig};
use inline_worker::util::logger::{self, LogLevel};
use inline_worker::{prepare_unit, NAME, VERSION};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Run built-in tasks inside isolated worker contexts
#[derive(Parser, Debug)]
#[command(name = "inline-worker")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./inline-worker.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a built-in task and print its result
    Run {
        /// Task name (see `tasks`)
        #[arg(value_name = "TASK")]
        task: String,

        /// Input data as JSON
        #[arg(short, long, value_name = "JSON")]
        data: Option<String>,

        /// Request cancellation after this many milliseconds
        #[arg(long, value_name = "MS")]
        cancel_after: Option<u64>,

        /// Give up and terminate the context after this many milliseconds
        #[arg(long, value_name = "MS")]
        timeout: Option<u64>,

        /// Auxiliary handler to inject (repeatable)
        #[arg(short, long = "inject", value_name = "NAME")]
        inject: Vec<String>,
    },

    /// List built-in tasks and auxiliaries
    Tasks,

    /// Print the effective configuration
    Config,

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init_with_level(LogLevel::from_verbosity(args.verbose));

    match args.command {
        Commands::Run {
            task,
            data,
            cancel_after,
            timeout,
            inject,
        } => {
            let config = effective_config(args.config.as_deref())?;
            run(&task, data.as_deref(), cancel_after, timeout, inject, &config)?;
        }
        Commands::Tasks => {
            println!("tasks:");
            for (name, about) in BUILTIN_TASKS {
                println!("  {:<10} {}", name, about);
            }
            println!("auxiliaries:");
            for name in BUILTIN_AUXILIARIES {
                println!("  {}", name);
            }
        }
        Commands::Config => {
            let config = effective_config(args.config.as_deref())?;
            print!("{}", config.to_toml()?);
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

fn effective_config(path: Option<&std::path::Path>) -> Result<WorkerConfig> {
    load_config(path).context("Failed to load configuration")
}

fn run(
    task: &str,
    data: Option<&str>,
    cancel_after: Option<u64>,
    timeout: Option<u64>,
    inject: Vec<String>,
    config: &WorkerConfig,
) -> Result<()> {
    let registry = builtin_registry();
    if !registry.contains_task(task) {
        bail!("Unknown task: {} (see `inline-worker tasks`)", task);
    }

    let data: Value = match data {
        Some(text) => serde_json::from_str(text).context("--data is not valid JSON")?,
        None => Value::Null,
    };

    TokenArena::install(config, &StaticCapabilities::from(config));
    let unit = prepare_unit(Arc::new(registry), task, inject, config)?;
    unit.progress(|value| eprintln!("progress: {}", value));
    unit.subscribe(|value| println!("next: {}", value));
    let outcome = unit
        .run(data)
        .with_context(|| format!("Failed to start task {}", task))?;

    if let Some(ms) = cancel_after {
        if outcome.wait_timeout(Duration::from_millis(ms)).is_none() {
            unit.cancel();
        }
    }

    let result = match timeout {
        Some(ms) => match outcome.wait_timeout(Duration::from_millis(ms)) {
            Some(result) => result,
            None => {
                unit.terminate();
                bail!("Task {} did not finish within {} ms", task, ms);
            }
        },
        None => outcome.wait(),
    };

    match result {
        Ok(Some(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
        Ok(None) => println!("undefined"),
        Err(error) => return Err(anyhow!("Task {} rejected: {}", task, error)),
    }
    Ok(())
}
