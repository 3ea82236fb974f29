//! procrun - run external commands under supervision
//!
//! The process exit code mirrors the child's return code.

mod config;
mod logging;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::debug;

use procrun_core::application::{Elevation, RunAsOutcome, RunAsService};
use procrun_core::split_command;
use procrun_infra_system::{SupervisedExecutor, TempScriptStager, UnixIdentity, UnixPlatform};

#[derive(Parser)]
#[command(name = "procrun")]
#[command(about = "Supervised external-process execution", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON file with allow_root / cwd / chroot_path
    #[arg(long, env = "PROCRUN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Permit execution while running as root
    #[arg(long, env = "PROCRUN_ALLOW_ROOT", global = true)]
    allow_root: Option<bool>,

    /// Working directory for the child
    #[arg(long, env = "PROCRUN_CWD", global = true)]
    cwd: Option<PathBuf>,

    /// Confine the child to this root directory
    #[arg(long, env = "PROCRUN_CHROOT", global = true)]
    chroot: Option<PathBuf>,

    /// Print the outcome as JSON instead of raw output
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Args)]
struct RunOptions {
    /// Kill the child after this many seconds (0 = never)
    #[arg(short, long, default_value = "0")]
    timeout: u32,

    /// Privilege elevation: "sudo" or empty
    #[arg(short, long)]
    elevation: Option<Elevation>,
}

#[derive(Subcommand)]
enum Commands {
    /// Tokenize and run a command line
    Exec {
        /// Command line, e.g. "grep -n 'two words' file.txt"
        command: String,

        /// Feed this file to the child's stdin
        #[arg(long)]
        stdin_file: Option<PathBuf>,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Run a command through /bin/sh -c
    Shell {
        command: String,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Run a script file's contents as a temporary executable
    Script {
        /// Script file
        file: PathBuf,

        /// Arguments passed to the script, tokenized like a command line
        #[arg(long, default_value = "")]
        args: String,

        #[command(flatten)]
        run: RunOptions,
    },

    /// Show how a command line is tokenized
    Split { command: String },
}

#[derive(Tabled)]
struct TokenRow {
    index: usize,
    token: String,
}

fn build_service(cli: &Cli) -> Result<RunAsService> {
    let overrides = config::Overrides {
        allow_root: cli.allow_root,
        cwd: cli.cwd.clone(),
        chroot: cli.chroot.clone(),
    };
    let config = config::load(cli.config.as_deref(), overrides)?;
    debug!(?config, "RunAs configuration loaded");

    Ok(RunAsService::new(
        Arc::new(SupervisedExecutor::new(Arc::new(UnixPlatform::new()))),
        Arc::new(UnixIdentity),
        Arc::new(TempScriptStager::new()),
        config,
    ))
}

fn print_outcome(outcome: &RunAsOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    std::io::stdout().write_all(outcome.stdout.as_bytes())?;
    std::io::stdout().flush()?;
    eprint!("{}", outcome.stderr);

    if outcome.succeeded {
        eprintln!("{}", "✓ Command succeeded".green().bold());
    } else {
        eprintln!(
            "{}",
            format!("✗ Command failed (return code {})", outcome.return_code)
                .red()
                .bold()
        );
    }
    Ok(())
}

fn print_tokens(command: &str, json: bool) -> Result<()> {
    let rows: Vec<TokenRow> = split_command(command)
        .into_iter()
        .enumerate()
        .map(|(index, token)| TokenRow { index, token })
        .collect();

    if json {
        let tokens: Vec<&str> = rows.iter().map(|r| r.token.as_str()).collect();
        println!("{}", serde_json::to_string(&tokens)?);
    } else if rows.is_empty() {
        println!("{}", "No tokens".yellow());
    } else {
        println!("{}", Table::new(rows));
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<i32> {
    let outcome = match &cli.command {
        Commands::Split { command } => {
            print_tokens(command, cli.json)?;
            return Ok(0);
        }
        Commands::Exec {
            command,
            stdin_file,
            run,
        } => {
            let input = match stdin_file {
                Some(path) => std::fs::read(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                None => Vec::new(),
            };
            build_service(&cli)?
                .execute_command_with_input(
                    command,
                    input,
                    run.timeout,
                    run.elevation.unwrap_or_default(),
                )
                .await?
        }
        Commands::Shell { command, run } => {
            build_service(&cli)?
                .execute_shell_command(command, run.timeout, run.elevation.unwrap_or_default())
                .await?
        }
        Commands::Script { file, args, run } => {
            let script = std::fs::read_to_string(file)
                .with_context(|| format!("Failed to read script {}", file.display()))?;
            build_service(&cli)?
                .execute_script(&script, args, run.timeout, run.elevation.unwrap_or_default())
                .await?
        }
    };

    print_outcome(&outcome, cli.json)?;
    Ok(outcome.return_code)
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;

    let cli = Cli::parse();
    let code = run(cli).await?;
    std::process::exit(code);
}
