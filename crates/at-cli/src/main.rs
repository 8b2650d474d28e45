#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod commands;
mod context;

use clap::{Parser, Subcommand};

use commands::done::DoneOptions;
use context::CliContext;

/// auto-tundra CLI -- orchestrate AI agents on a bead board, in-process
/// against the same cache database the daemon runs against.
#[derive(Parser)]
#[command(name = "at", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan (and optionally materialize) a staged convoy from a bead, epic,
    /// or convoy target.
    Stage {
        /// Bead/epic/convoy id(s) to stage.
        target: Vec<String>,
        /// Output JSON instead of a human-readable table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Dispatch work into a rig, directly or via the deferred queue.
    Sling {
        /// Bead, epic, or convoy id to sling.
        target: String,
        /// Rig to target (falls back to the bead's own `rig` field).
        rig: Option<String>,
    },

    /// Inspect or drive the capacity scheduler's deferred queue.
    Scheduler {
        #[command(subcommand)]
        command: SchedulerCommands,
    },

    /// Ephemeral worker slot introspection and reclamation.
    Polecat {
        #[command(subcommand)]
        command: PolecatCommands,
    },

    /// Run the completion protocol for the current worker's hooked bead.
    Done {
        /// Exit status: COMPLETED, ESCALATED, or DEFERRED.
        #[arg(long)]
        status: Option<String>,
        /// Bead id to close out (defaults to the worker's hooked bead).
        #[arg(long)]
        issue: Option<String>,
        /// Override the auto-detected cleanup status.
        #[arg(long = "cleanup-status")]
        cleanup_status: Option<String>,
        /// Override the bead's priority.
        #[arg(long)]
        priority: Option<i32>,
    },

    /// Witness-side loops: the event-driven patrol reactor.
    Witness {
        #[command(subcommand)]
        command: WitnessCommands,
    },
}

#[derive(Subcommand)]
enum SchedulerCommands {
    /// List queued context beads.
    List,
    /// Summarize queue depth.
    Status,
    /// Run one dispatch pass.
    Run {
        /// Evaluate the pass without spawning anything.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
        /// Override the configured batch size for this pass.
        #[arg(long)]
        batch: Option<usize>,
    },
}

#[derive(Subcommand)]
enum PolecatCommands {
    /// List polecats on a rig.
    List { rig: String },
    /// Show one polecat's identity record.
    Status { addr: String },
    /// Report a worktree's git cleanup status.
    GitState { addr: String },
    /// Check whether a polecat is safe to reclaim.
    CheckRecovery { addr: String },
    /// Reclaim one or more polecat slots.
    Nuke {
        addr: Vec<String>,
        /// Reclaim even if the safety gate says it isn't safe.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// List polecats past the staleness threshold.
    Stale { rig: String },
    /// Reclaim every stale, safe-to-nuke polecat on a rig.
    Prune { rig: String },
    /// Remove leftover worktrees for already-nuked polecats.
    Gc { rig: String },
}

#[derive(Subcommand)]
enum WitnessCommands {
    /// Run the event-driven patrol loop for a rig until ctrl-c.
    Patrol {
        rig: String,
        /// Override the configured full-discovery interval, in seconds.
        #[arg(long)]
        interval: Option<u64>,
        /// Override the configured event-log debounce interval, in seconds.
        #[arg(long)]
        debounce: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    at_telemetry::logging::init_logging("at-cli", "warn");
    let cli = Cli::parse();
    let ctx = match CliContext::load().await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = dispatch(&ctx, cli.command).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn dispatch(ctx: &CliContext, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stage { target, json } => commands::stage::run(ctx, target, json).await,
        Commands::Sling { target, rig } => commands::sling::run(ctx, &target, rig).await,
        Commands::Scheduler { command } => match command {
            SchedulerCommands::List => commands::scheduler::list(ctx).await,
            SchedulerCommands::Status => commands::scheduler::status(ctx).await,
            SchedulerCommands::Run { dry_run, batch } => {
                commands::scheduler::run(ctx, dry_run, batch).await
            }
        },
        Commands::Polecat { command } => match command {
            PolecatCommands::List { rig } => commands::polecat::list(ctx, &rig).await,
            PolecatCommands::Status { addr } => commands::polecat::status(ctx, &addr).await,
            PolecatCommands::GitState { addr } => commands::polecat::git_state(ctx, &addr).await,
            PolecatCommands::CheckRecovery { addr } => {
                commands::polecat::check_recovery(ctx, &addr).await
            }
            PolecatCommands::Nuke { addr, force } => {
                commands::polecat::nuke(ctx, &addr, force).await
            }
            PolecatCommands::Stale { rig } => commands::polecat::stale(ctx, &rig).await,
            PolecatCommands::Prune { rig } => commands::polecat::prune(ctx, &rig).await,
            PolecatCommands::Gc { rig } => commands::polecat::gc(ctx, &rig).await,
        },
        Commands::Done {
            status,
            issue,
            cleanup_status,
            priority,
        } => {
            commands::done::run(
                ctx,
                DoneOptions {
                    status,
                    issue,
                    cleanup_status,
                    priority,
                },
            )
            .await
        }
        Commands::Witness { command } => match command {
            WitnessCommands::Patrol {
                rig,
                interval,
                debounce,
            } => commands::witness::patrol(ctx, &rig, interval, debounce).await,
        },
    }
}
