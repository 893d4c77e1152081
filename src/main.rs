//! FX Supervisor - launches, monitors and controls a long-running game server.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fx_supervisor::config::{ConfigLoader, RunnerConfig};
use fx_supervisor::console::{run_operator, ConsoleBroadcaster, HitchMonitor};
use fx_supervisor::display;
use fx_supervisor::process::{build_launch_spec, Platform};
use fx_supervisor::supervisor::{Supervisor, SupervisorError};

#[derive(Parser)]
#[command(
    name = "fx-supervisor",
    about = "Launch, monitor and control a game server process",
    version
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Supervise the server. Type `!start`, `!stop`, `!restart [reason]`,
    /// `!status`, `!children` or `!capture <command>`; anything else goes
    /// to the server console.
    Run {
        /// Start the server immediately, ignoring autostart settings.
        #[arg(long)]
        start: bool,
        /// Don't echo server output to the terminal.
        #[arg(short, long)]
        quiet: bool,
    },
    /// Print the command used to launch the server.
    Launch {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn fatal(err: &dyn std::error::Error) -> ! {
    tracing::error!("{err}");
    display::print_error(&err.to_string());
    std::process::exit(1);
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let loader = cli
        .config
        .map_or_else(ConfigLoader::new, ConfigLoader::with_path);
    let mut config = loader.load().unwrap_or_else(|e| fatal(&e));

    match cli.command {
        Commands::Launch { json } => {
            let spec =
                build_launch_spec(&Platform::current(), &config).unwrap_or_else(|e| fatal(&e));
            if json {
                match serde_json::to_string_pretty(&spec) {
                    Ok(out) => println!("{out}"),
                    Err(e) => fatal(&e),
                }
            } else {
                display::print_launch(&spec);
            }
        }
        Commands::Run { start, quiet } => {
            config.quiet |= quiet;
            run(config, start).await;
        }
    }
}

async fn run(config: RunnerConfig, start_now: bool) {
    let console = Arc::new(ConsoleBroadcaster::default());
    let monitor = Arc::new(HitchMonitor::default());
    let supervisor =
        Supervisor::new(config, console, monitor.clone()).unwrap_or_else(|e| fatal(&e));

    tracing::info!(
        command = %supervisor.launch_spec().display_command(),
        "Supervisor started"
    );

    let (fatal_tx, mut fatal_rx) = mpsc::channel::<SupervisorError>(2);

    let startup = if start_now {
        let sup = Arc::clone(&supervisor);
        Some(tokio::spawn(async move { sup.spawn().await }))
    } else if supervisor.config().autostart {
        Some(supervisor.schedule_autostart())
    } else {
        tracing::warn!("Autostart disabled; type !start to launch the server");
        None
    };

    if let Some(startup) = startup {
        let fatal_tx = fatal_tx.clone();
        tokio::spawn(async move {
            match startup.await {
                Ok(Err(e)) if e.is_fatal() => {
                    let _ = fatal_tx.send(e).await;
                }
                Ok(Err(e)) => tracing::warn!(error = %e, "Server not started"),
                Ok(Ok(())) => {}
                Err(e) => tracing::warn!(error = %e, "Startup task failed"),
            }
        });
    }

    if supervisor.config().bridge_stdin {
        let sup = Arc::clone(&supervisor);
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(e) = run_operator(stdin, sup, monitor).await {
                let _ = fatal_tx.send(e).await;
            }
        });
    }

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::warn!(error = %e, "Failed to listen for Ctrl-C");
            }
            tracing::info!("Shutting down");
            if supervisor.is_running() {
                supervisor.kill().await;
            }
        }
        Some(e) = fatal_rx.recv() => fatal(&e),
    }
}
