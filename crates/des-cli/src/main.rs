mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    check::CheckSubcommand, hook::HookSubcommand, log::LogSubcommand, phase::PhaseSubcommand,
    session::SessionSubcommand, task::TaskSubcommand, validate::ValidateSubcommand,
    verify::VerifySubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "des",
    about = "Development Enforcement System: prove every TDD phase ran before work is committed",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .nwave/ or .git/)
    #[arg(long, global = true, env = "DES_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Git hook entry points
    Hook {
        #[command(subcommand)]
        subcommand: HookSubcommand,
    },

    /// Validate step completion from a step file or an execution log
    Validate {
        #[command(subcommand)]
        subcommand: ValidateSubcommand,
    },

    /// Verify a delivered feature against its roadmap
    Verify {
        #[command(subcommand)]
        subcommand: VerifySubcommand,
    },

    /// Run a single enforcement policy
    Check {
        #[command(subcommand)]
        subcommand: CheckSubcommand,
    },

    /// Decide whether a write to PATH is allowed under the current session
    Guard { path: String },

    /// Start, stop, or inspect the deliver session
    Session {
        #[command(subcommand)]
        subcommand: SessionSubcommand,
    },

    /// Start, stop, or inspect the DES-monitored task marker
    Task {
        #[command(subcommand)]
        subcommand: TaskSubcommand,
    },

    /// Inspect execution logs
    Log {
        #[command(subcommand)]
        subcommand: LogSubcommand,
    },

    /// Drive a step through its TDD phases
    Phase {
        #[command(subcommand)]
        subcommand: PhaseSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    // Logs go to stderr so hook and --json output on stdout stay clean.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    let result = match cli.command {
        Commands::Hook { subcommand } => cmd::hook::run(&root, subcommand, cli.json),
        Commands::Validate { subcommand } => cmd::validate::run(&root, subcommand, cli.json),
        Commands::Verify { subcommand } => cmd::verify::run(&root, subcommand, cli.json),
        Commands::Check { subcommand } => cmd::check::run(&root, subcommand, cli.json),
        Commands::Guard { path } => cmd::guard::run(&root, &path, cli.json),
        Commands::Session { subcommand } => cmd::session::run(&root, subcommand, cli.json),
        Commands::Task { subcommand } => cmd::task::run(&root, subcommand, cli.json),
        Commands::Log { subcommand } => cmd::log::run(&root, subcommand, cli.json),
        Commands::Phase { subcommand } => cmd::phase::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
