//! Top-level CLI definition and dispatch.

use std::io::{self, IsTerminal, Write};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{Shell as CompletionShell, generate};
use colored::{Colorize, control};
use serde_json::Value;
use thiserror::Error;

use mresource::core::config::Config;
use mresource::core::errors::{ExitReason, MresError};
use mresource::daemon::detach::{self, DeferredRelease, ProcessLauncher};
use mresource::pool::ResourceFile;
use mresource::pool::allocator::PollPolicy;
use mresource::pool::inventory::Inventory;

/// Resource key allocator over a shared text file.
#[derive(Debug, Parser)]
#[command(
    name = "mresource",
    author,
    version,
    about = "Allocate and release resource keys through a shared, locked text file",
    long_about = None,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Print progress diagnostics on stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Disable colored output.
    #[arg(long, global = true)]
    no_color: bool,
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Reserve free keys and print them, one per line.
    Get(GetArgs),
    /// Release reserved keys, now or after a delay.
    Put(PutArgs),
    /// Create (or overwrite) a resource file holding the given free keys.
    Create(KeysArgs),
    /// Append free keys to a resource file, creating it if needed.
    Append(KeysArgs),
    /// Show every record of a resource file.
    List(ListArgs),
    /// Generate shell completions.
    Completions(CompletionsArgs),
    #[command(name = detach::RELAY_SUBCOMMAND, hide = true)]
    RelayRelease(StageArgs),
    #[command(name = detach::WORKER_SUBCOMMAND, hide = true)]
    DeferredRelease(StageArgs),
}

#[derive(Debug, Clone, Args)]
struct GetArgs {
    /// Resource file.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Give up after this many seconds per key (default: wait forever).
    #[arg(short, long, value_name = "SECONDS")]
    timeout: Option<u64>,
    /// Seconds between attempts while no key is free.
    #[arg(short, long, value_name = "SECONDS")]
    poll: Option<u64>,
    /// Number of keys to obtain.
    #[arg(short = 'n', long, default_value_t = 1, value_name = "COUNT")]
    count: usize,
}

#[derive(Debug, Clone, Args)]
struct PutArgs {
    /// Resource file.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Keys to release.
    #[arg(value_name = "KEY", required = true)]
    keys: Vec<String>,
    /// Release in the background after this many seconds.
    #[arg(short, long, default_value_t = 0, value_name = "SECONDS")]
    delay: u64,
}

#[derive(Debug, Clone, Args)]
struct KeysArgs {
    /// Resource file.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Keys to write as free records, in order.
    #[arg(value_name = "KEY", required = true)]
    keys: Vec<String>,
}

#[derive(Debug, Clone, Args)]
struct ListArgs {
    /// Resource file.
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Emit one JSON object instead of a table.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Clone, Args)]
struct CompletionsArgs {
    /// Shell to generate completion script for.
    #[arg(value_enum)]
    shell: CompletionShell,
}

/// Arguments of the internal deferred-release stages.
#[derive(Debug, Clone, Args)]
struct StageArgs {
    file: PathBuf,
    #[arg(long, value_name = "MILLISECONDS")]
    delay_ms: u64,
    #[arg(required = true)]
    keys: Vec<String>,
}

/// CLI error type with explicit exit-code mapping.
#[derive(Debug, Error)]
pub enum CliError {
    /// Failure reported by the allocator.
    #[error(transparent)]
    Mres(#[from] MresError),
    /// JSON serialization failed.
    #[error("failed to serialize output: {0}")]
    Json(#[from] serde_json::Error),
    /// Output write failed.
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    pub const fn reason(&self) -> ExitReason {
        match self {
            Self::Mres(err) => err.reason(),
            Self::Json(_) | Self::Io(_) => ExitReason::FileNotOpen,
        }
    }

    /// Process exit code contract for the CLI.
    pub const fn exit_code(&self) -> u8 {
        self.reason().code()
    }
}

/// One-line diagnostic for a failed command.
pub fn render_error(err: &CliError) -> String {
    format!(
        "mresource: {}: {}: {err}",
        "Error".red().bold(),
        err.reason().message()
    )
}

/// Dispatch CLI commands.
pub fn run(cli: &Cli) -> Result<(), CliError> {
    if cli.no_color || !io::stderr().is_terminal() {
        control::set_override(false);
    }

    if let Command::Completions(args) = &cli.command {
        let mut command = Cli::command();
        let binary_name = command.get_name().to_string();
        generate(args.shell, &mut command, binary_name, &mut io::stdout());
        return Ok(());
    }

    let mut config = Config::load()?;
    if cli.verbose {
        config.verbose = true;
    }

    match &cli.command {
        Command::Get(args) => run_get(&config, args),
        Command::Put(args) => run_put(&config, args),
        Command::Create(args) => {
            ResourceFile::with_config(&args.file, &config).create(&args.keys)?;
            Ok(())
        }
        Command::Append(args) => {
            ResourceFile::with_config(&args.file, &config).append(&args.keys)?;
            Ok(())
        }
        Command::List(args) => run_list(&config, args),
        Command::RelayRelease(args) => {
            let job = stage_job(args)?;
            launcher(&config)?.relay(&job)?;
            Ok(())
        }
        Command::DeferredRelease(args) => {
            let job = stage_job(args)?;
            let pool = ResourceFile::with_config(&job.file, &config);
            detach::run_detached_worker(&job, &pool)?.into_result()?;
            Ok(())
        }
        Command::Completions(_) => Ok(()),
    }
}

fn run_get(config: &Config, args: &GetArgs) -> Result<(), CliError> {
    let interval = args.poll.map_or(config.poll_interval, Duration::from_secs);
    let timeout = args.timeout.map(Duration::from_secs).or(config.timeout);
    let policy = PollPolicy::new(interval, timeout)?;
    let pool = ResourceFile::with_config(&args.file, config);
    obtain_into(&pool, args.count, &policy, &mut io::stdout().lock())
}

/// Print each key as soon as it is reserved. A failed write stops the run
/// so no key is reserved that nobody will be told about.
fn obtain_into(
    pool: &ResourceFile,
    count: usize,
    policy: &PollPolicy,
    out: &mut impl Write,
) -> Result<(), CliError> {
    let mut write_error = None;
    let report = pool.obtain(count, policy, |key| {
        match writeln!(out, "{key}").and_then(|()| out.flush()) {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                write_error = Some(e);
                ControlFlow::Break(())
            }
        }
    });

    if let Some(e) = write_error {
        return Err(e.into());
    }
    report.into_result()?;
    Ok(())
}

fn run_put(config: &Config, args: &PutArgs) -> Result<(), CliError> {
    let pool = ResourceFile::with_config(&args.file, config);
    let scheduler = launcher(config)?;
    pool.release(&args.keys, Duration::from_secs(args.delay), &scheduler)?;
    Ok(())
}

fn run_list(config: &Config, args: &ListArgs) -> Result<(), CliError> {
    let inventory = ResourceFile::with_config(&args.file, config).inventory()?;
    if args.json {
        let payload = serde_json::to_value(&inventory)?;
        write_json_line(&payload)?;
    } else {
        let color = io::stdout().is_terminal();
        render_inventory(&inventory, &mut io::stdout().lock(), color)?;
    }
    Ok(())
}

fn render_inventory(inventory: &Inventory, out: &mut impl Write, color: bool) -> io::Result<()> {
    for entry in &inventory.entries {
        match (entry.status, &entry.key) {
            (Some(status), Some(key)) => {
                let label = format!("{status:<9}");
                let label = match (color, status) {
                    (false, _) => label,
                    (true, "free") => label.green().to_string(),
                    (true, _) => label.yellow().to_string(),
                };
                writeln!(out, "{label}{key}")?;
            }
            _ => {
                let label = format!("{:<9}", "invalid");
                let label = if color { label.red().to_string() } else { label };
                writeln!(
                    out,
                    "{label}line {}: {}",
                    entry.line,
                    entry.problem.as_deref().unwrap_or("unreadable")
                )?;
            }
        }
    }
    writeln!(
        out,
        "{} free, {} reserved, {} malformed",
        inventory.free, inventory.reserved, inventory.malformed
    )
}

fn launcher(config: &Config) -> Result<ProcessLauncher, CliError> {
    Ok(ProcessLauncher::current()?
        .with_activity_log(config.activity_log.as_deref())
        .with_max_key_len(config.max_key_len))
}

fn stage_job(args: &StageArgs) -> Result<DeferredRelease, CliError> {
    Ok(DeferredRelease::new(
        &args.file,
        args.keys.clone(),
        Duration::from_millis(args.delay_ms),
    )?)
}

fn write_json_line(payload: &Value) -> Result<(), CliError> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer(&mut stdout, payload)?;
    writeln!(stdout)?;
    Ok(())
}
