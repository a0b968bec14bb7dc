use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::fmt;

use clrbridge_core::Handle;
use clrbridge_host::{ClrBackend, HostSession, StartOptions};

#[derive(Debug, Parser)]
#[command(name = "clrbridge")]
struct Args {
    #[clap(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Probe for an engine runtime and report what a start would use.
    Doctor {
        #[clap(long, default_value = ".")]
        app_base_dir: PathBuf,

        #[clap(long)]
        package_bin_dir: Option<PathBuf>,

        #[clap(long)]
        engine_install_dir: Option<PathBuf>,

        /// Emit the report as JSON.
        #[clap(long, default_value = "false")]
        json: bool,
    },
    /// Start the engine, load code units, optionally call one static
    /// method, then shut down.
    Run {
        #[clap(long, default_value = ".")]
        app_base_dir: PathBuf,

        #[clap(long)]
        package_bin_dir: Option<PathBuf>,

        #[clap(long)]
        engine_install_dir: Option<PathBuf>,

        /// Code units to load, by path or by name. Repeatable.
        #[clap(long)]
        load: Vec<String>,

        /// Static method to invoke, written as Namespace.Type::Method.
        #[clap(long)]
        call: Option<String>,

        /// Raw 64-bit argument handles for the call. Repeatable.
        #[clap(long)]
        arg: Vec<i64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Set up tracing
    let log_level = match tracing::Level::from_str(&args.log_level) {
        Ok(level) => level,
        Err(_) => {
            eprintln!("Invalid log level: {}", args.log_level);
            std::process::exit(1);
        }
    };
    let subscriber = fmt::Subscriber::builder()
        .with_max_level(log_level)
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set global tracing subscriber");

    match args.command {
        Command::Doctor {
            app_base_dir,
            package_bin_dir,
            engine_install_dir,
            json,
        } => doctor(
            &app_base_dir,
            package_bin_dir.as_deref(),
            engine_install_dir.as_deref(),
            json,
        ),
        Command::Run {
            app_base_dir,
            package_bin_dir,
            engine_install_dir,
            load,
            call,
            arg,
        } => {
            let options = StartOptions {
                app_base_dir,
                package_bin_dir,
                engine_install_dir,
            };
            run(&options, &load, call.as_deref(), &arg)
        }
    }
}

fn doctor(
    app_base_dir: &Path,
    package_bin_dir: Option<&Path>,
    engine_install_dir: Option<&Path>,
    json: bool,
) -> Result<()> {
    let located = clrbridge_host::locate(app_base_dir, package_bin_dir, engine_install_dir)
        .context("engine probe failed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&located)?);
    } else {
        println!("engine library: {}", located.engine_library.display());
        println!("deployment:     {:?}", located.mode);
        println!("app base:       {}", located.app_base_dir.display());
        println!("trusted units:  {}", located.trusted.len());
        for entry in located.trusted.entries() {
            println!("  {}", entry.display());
        }
    }
    Ok(())
}

fn run(
    options: &StartOptions,
    load: &[String],
    call: Option<&str>,
    arg_handles: &[i64],
) -> Result<()> {
    let mut session = HostSession::new(ClrBackend::new());
    session
        .start(options)
        .context("failed to start the engine")?;

    for unit in load {
        session
            .load_code_unit(unit)
            .with_context(|| format!("failed to load {unit}"))?;
    }

    if let Some(spec) = call {
        let (type_name, method_name) = split_call_spec(spec)?;
        let args: Vec<Handle> = arg_handles.iter().copied().map(Handle::from_raw).collect();
        let results = session
            .call_static_method(type_name, method_name, &args)
            .with_context(|| format!("call to {spec} failed"))?;
        match results.split_first() {
            Some((ret, by_ref)) => {
                println!("return: {:#x}", ret.raw());
                for (i, value) in by_ref.iter().enumerate() {
                    println!("byref[{i}]: {:#x}", value.raw());
                }
            }
            None => println!("no result"),
        }
    }

    session.shutdown().context("engine shutdown failed")?;
    Ok(())
}

/// Parse a call spec of the form `Namespace.Type::Method`.
fn split_call_spec(spec: &str) -> Result<(&str, &str)> {
    spec.split_once("::")
        .filter(|(type_name, method)| !type_name.is_empty() && !method.is_empty())
        .context("call spec must look like Namespace.Type::Method")
}
