//! `jsfabric` host
//!
//! Launches child engine processes the way an embedding application's pool
//! would, and exposes the argument escaping and start specification for
//! inspection.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use jsfabric_core::config::{Config, load_config};
use jsfabric_core::escape_command_line_arg;
use jsfabric_host::{ProcessStartSpec, launch_members};

#[derive(Parser, Debug)]
#[command(name = "jsfabric-host")]
#[command(version, about = "jsfabric host - out-of-process JavaScript engine launcher")]
struct Args {
    /// Project directory: source of `.jsfabric/settings.json` and the
    /// default working directory of child processes
    #[arg(long, env = "JSFABRIC_PROJECT_DIR")]
    project_dir: Option<PathBuf>,

    /// Log level filter (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "JSFABRIC_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "JSFABRIC_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an argument escaped for a double-quoted command-line position
    Escape {
        /// Raw argument
        arg: String,
    },
    /// Print the command line a child would be started with
    Spec {
        #[command(flatten)]
        launch: LaunchArgs,
    },
    /// Launch child processes and keep them running until Ctrl+C
    Launch {
        #[command(flatten)]
        launch: LaunchArgs,

        /// Number of child processes (0 = one per CPU)
        #[arg(long)]
        size: Option<usize>,
    },
}

#[derive(clap::Args, Debug)]
struct LaunchArgs {
    /// File holding the bootstrap script passed to the interpreter via `-e`
    #[arg(long)]
    script: PathBuf,

    /// Interpreter executable
    #[arg(long)]
    executable: Option<PathBuf>,

    /// Port for the first child; later children count up from it
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("jsfabric_host={}", args.log_level);
    jsfabric_core::tracing_init::init_tracing(&log_filter, args.log_json);

    match args.command {
        Command::Escape { arg } => {
            print_line(&escape_command_line_arg(&arg));
            Ok(())
        }
        Command::Spec { launch } => {
            let config = resolve_config(args.project_dir.as_deref(), &launch)?;
            let script = read_script(&launch.script)?;
            let spec = ProcessStartSpec::new(&script, &config.process);
            print_line(&format!("{} {}", spec.program.display(), spec.command_line));
            Ok(())
        }
        Command::Launch { launch, size } => {
            let mut config = resolve_config(args.project_dir.as_deref(), &launch)?;
            if let Some(size) = size {
                config.pool.size = size;
            }
            let script = read_script(&launch.script)?;
            run_launch(&config, &script).await
        }
    }
}

/// Resolve settings files and environment, then apply CLI overrides.
fn resolve_config(project_dir: Option<&Path>, launch: &LaunchArgs) -> anyhow::Result<Config> {
    let mut config = load_config(project_dir)?;
    if let Some(executable) = &launch.executable {
        config.process.executable.clone_from(executable);
    }
    if let Some(port) = launch.port {
        config.process.port = port;
    }
    if config.process.working_directory.is_none() {
        config.process.working_directory = project_dir.map(Path::to_path_buf);
    }
    Ok(config)
}

fn read_script(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))
}

async fn run_launch(config: &Config, script: &str) -> anyhow::Result<()> {
    let size = config.pool.effective_size();
    info!(
        version = env!("CARGO_PKG_VERSION"),
        size,
        executable = %config.process.executable.display(),
        "Starting jsfabric-host"
    );

    let mut processes = launch_members(script, &config.process, size)?;
    for process in &mut processes {
        process.forward_output();
    }

    info!(size, "Child processes running; press Ctrl+C to stop");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C shutdown signal");
        }
        () = async {
            for process in &processes {
                process.wait_for_exit().await;
            }
        } => {
            warn!("All child processes exited");
        }
    }

    let timeout = Duration::from_secs(config.termination_timeout_secs);
    for process in &mut processes {
        process.terminate(timeout).await;
    }

    info!("Host stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
fn print_line(line: &str) {
    println!("{line}");
}
