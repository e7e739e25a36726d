//! Altrinity route sync - offline route queue with connectivity-triggered flush.

mod app;
mod commands;

use std::path::PathBuf;

use altrinity_config_and_utils::{init_logging, Config, Paths};
use clap::{Parser, Subcommand};

/// Altrinity route sync command-line interface.
#[derive(Parser)]
#[command(name = "altrinity-sync")]
#[command(about = "Queue route submissions offline and deliver them when back online")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for config, store, and logs. Defaults to ~/.altrinity
    #[arg(long, global = true, env = "ALTRINITY_HOME")]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Queue a submission (JSON body for POST /routes)
    Enqueue {
        /// Inline JSON payload
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        payload: Option<String>,
        /// Read the JSON payload from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Kind tag stored with the item
        #[arg(long, default_value = route_outbox::ROUTE_KIND)]
        kind: String,
    },
    /// Try to deliver every pending submission once
    Flush,
    /// Show pending and dead-lettered counts
    Status,
    /// List dead-lettered submissions
    Failed,
    /// Move dead-lettered submissions back into the queue
    RequeueFailed,
    /// Delete dead-lettered submissions
    DiscardFailed,
    /// Store an access token issued by the identity provider
    Login {
        /// Access token (JWT)
        #[arg(long, env = "ALTRINITY_ACCESS_TOKEN")]
        token: String,
        /// Refresh token
        #[arg(long)]
        refresh_token: Option<String>,
    },
    /// Forget the stored tokens
    Logout,
    /// Show the identity in the stored token
    Whoami,
    /// Probe connectivity and flush whenever it comes back, until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    let foreground = matches!(cli.command, Commands::Watch);
    init_logging("altrinity-sync", level, &paths, foreground)?;

    let app = app::App::open(config, &paths).await?;

    match cli.command {
        Commands::Enqueue {
            payload,
            file,
            kind,
        } => {
            let payload = commands::read_payload(payload.as_deref(), file.as_deref())?;
            let item = commands::enqueue(&app, &kind, payload).await?;
            println!("Queued {} ({} pending)", item.id, app.queue.pending_count().await);
        }
        Commands::Flush => {
            let report = app.coordinator.flush().await?;
            println!("{}", commands::describe_report(&report));
        }
        Commands::Status => {
            let status = commands::status(&app).await;
            println!("Pending: {}", status.pending);
            println!("Failed:  {}", status.failed);
            println!(
                "Signed in: {}",
                if status.authenticated { "yes" } else { "no" }
            );
        }
        Commands::Failed => {
            let failed = app.queue.failed_items().await;
            if failed.is_empty() {
                println!("No failed submissions");
            }
            for item in failed {
                println!(
                    "{}  {}  attempts={}  {}",
                    item.id,
                    item.enqueued_at.to_rfc3339(),
                    item.attempts,
                    item.last_error.unwrap_or_default()
                );
            }
        }
        Commands::RequeueFailed => {
            let count = app.queue.requeue_failed().await?;
            println!("Requeued {} submission(s)", count);
        }
        Commands::DiscardFailed => {
            let count = app.queue.discard_failed().await?;
            println!("Discarded {} submission(s)", count);
        }
        Commands::Login {
            token,
            refresh_token,
        } => {
            app.auth.set_token(&token, refresh_token.as_deref())?;
            println!("{}", commands::describe_identity(&app.auth));
        }
        Commands::Logout => {
            app.auth.clear()?;
            println!("Signed out");
        }
        Commands::Whoami => {
            println!("{}", commands::describe_identity(&app.auth));
        }
        Commands::Watch => {
            commands::watch(&app).await?;
        }
    }

    Ok(())
}
