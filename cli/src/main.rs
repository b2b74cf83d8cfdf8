//! mirror - Command-line front end for the mirroring engine.
//!
//! Queues remote folders as jobs, runs the processing loop and reports the
//! state of pending jobs.

mod logging;
mod progress;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use crossbeam_channel::bounded;
use mirror_engine::{FsRemoteStore, JobManager, MirrorConfig, RemoteStore};
use progress::CliProgress;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// mirror - Mirror remote folders to local disk
#[derive(Parser, Debug)]
#[command(name = "mirror")]
#[command(version = "0.1.0")]
#[command(about = "Mirror remote folders to local disk with resumable, verified downloads")]
struct Args {
    /// Configuration file (defaults apply if it does not exist)
    #[arg(long, value_name = "PATH", default_value = "config/mirror.toml")]
    config: PathBuf,

    /// Override the downloads directory from the configuration
    #[arg(long, value_name = "PATH")]
    downloads: Option<PathBuf>,

    /// Override the remote root directory from the configuration
    #[arg(long, value_name = "PATH")]
    remote: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Process pending jobs on a fixed tick
    Run {
        /// Run a single tick and exit
        #[arg(long)]
        once: bool,
    },

    /// Queue a remote folder for mirroring
    Add {
        /// Remote folder identifier
        folder_id: String,
    },

    /// List pending jobs
    Status,
}

fn main() {
    let args = Args::parse();

    let exit_code = match load_config(&args).and_then(|config| {
        let _guard = logging::init(&config.logging, args.verbose)?;
        info!(config = %args.config.display(), "Loaded configuration");
        run_cli(&args, &config)
    }) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

/// Read the configuration file and apply command-line overrides.
fn load_config(args: &Args) -> Result<MirrorConfig> {
    let mut config = MirrorConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    if let Some(downloads) = &args.downloads {
        config.downloads_dir = downloads.clone();
    }
    if let Some(remote) = &args.remote {
        config.remote.root = remote.clone();
    }

    Ok(config)
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args, config: &MirrorConfig) -> Result<()> {
    let store: Arc<dyn RemoteStore> = Arc::new(FsRemoteStore::new(
        &config.remote.root,
        config.transfer.checksum,
    ));
    let manager = JobManager::new(config, store).context("failed to initialize job manager")?;

    match &args.command {
        Command::Add { folder_id } => {
            let path = manager
                .create_job(folder_id)
                .with_context(|| format!("failed to create job for folder {}", folder_id))?;
            println!("Queued folder {} -> {}", folder_id, path.display());
        }

        Command::Status => {
            let statuses = manager.pending_jobs().context("failed to list pending jobs")?;
            if statuses.is_empty() {
                println!("No pending jobs");
            }
            for status in statuses {
                println!(
                    "{:<30} {:<20} {:>12}  {}",
                    status.name,
                    status.stage.to_string(),
                    CliProgress::format_bytes(status.local_bytes),
                    status.folder_id.as_deref().unwrap_or("(marker missing)")
                );
            }
        }

        Command::Run { once: true } => {
            let progress = CliProgress::new(args.verbose);
            let summary = manager.process_once(Some(&progress));
            println!(
                "Tick: {} jobs, {} promoted, {} left pending, {} skipped",
                summary.seen, summary.promoted, summary.deferred, summary.malformed
            );
            if summary.deferred > 0 || summary.malformed > 0 {
                bail!("{} job(s) not completed", summary.deferred + summary.malformed);
            }
        }

        Command::Run { once: false } => {
            let progress = CliProgress::new(args.verbose);
            // Nothing sends on this channel; the loop runs until the process is stopped.
            let (_shutdown_tx, shutdown_rx) = bounded::<()>(1);
            manager.run(&shutdown_rx, Some(&progress));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Workspace {
        _dir: TempDir,
        remote: PathBuf,
        downloads: PathBuf,
    }

    fn workspace() -> Workspace {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let remote = dir.path().join("remote");
        let photos = remote.join("Photos");
        fs::create_dir_all(&photos).expect("Failed to create remote folder");
        fs::write(photos.join("a.jpg"), vec![1u8; 100]).expect("Failed to write a.jpg");
        fs::write(photos.join("b.jpg"), vec![2u8; 200]).expect("Failed to write b.jpg");

        Workspace {
            downloads: dir.path().join("downloads"),
            remote,
            _dir: dir,
        }
    }

    fn args(ws: &Workspace, command: Command) -> Args {
        Args {
            config: ws.downloads.join("missing.toml"),
            downloads: Some(ws.downloads.clone()),
            remote: Some(ws.remote.clone()),
            verbose: false,
            command,
        }
    }

    fn config(args: &Args) -> MirrorConfig {
        let mut config = load_config(args).expect("Config should load");
        config.transfer.initial_backoff_ms = 0;
        config.transfer.max_backoff_ms = 0;
        config
    }

    #[test]
    fn test_add_then_run_once_mirrors_folder() {
        let ws = workspace();

        let add = args(&ws, Command::Add { folder_id: "Photos".into() });
        run_cli(&add, &config(&add)).expect("Add should succeed");
        assert!(ws.downloads.join("incomplete").join("Photos").is_dir());

        let run = args(&ws, Command::Run { once: true });
        run_cli(&run, &config(&run)).expect("Run should succeed");

        let completed = ws.downloads.join("completed").join("Photos");
        assert_eq!(fs::read(completed.join("a.jpg")).expect("a.jpg"), vec![1u8; 100]);
        assert_eq!(fs::read(completed.join("b.jpg")).expect("b.jpg"), vec![2u8; 200]);
        assert!(!ws.downloads.join("incomplete").join("Photos").exists());
    }

    #[test]
    fn test_add_rejects_unknown_folder() {
        let ws = workspace();
        let add = args(&ws, Command::Add { folder_id: "Videos".into() });
        assert!(run_cli(&add, &config(&add)).is_err());
    }

    #[test]
    fn test_add_twice_is_rejected() {
        let ws = workspace();
        let add = args(&ws, Command::Add { folder_id: "Photos".into() });
        run_cli(&add, &config(&add)).expect("First add should succeed");
        assert!(run_cli(&add, &config(&add)).is_err());
    }

    #[test]
    fn test_run_once_reports_pending_jobs_as_error() {
        let ws = workspace();
        let add = args(&ws, Command::Add { folder_id: "Photos".into() });
        run_cli(&add, &config(&add)).expect("Add should succeed");

        // The remote folder disappears before the tick.
        fs::remove_dir_all(ws.remote.join("Photos")).expect("Failed to remove remote folder");

        let run = args(&ws, Command::Run { once: true });
        assert!(run_cli(&run, &config(&run)).is_err());
        assert!(ws.downloads.join("incomplete").join("Photos").is_dir());
    }

    #[test]
    fn test_status_with_no_jobs() {
        let ws = workspace();
        let status = args(&ws, Command::Status);
        run_cli(&status, &config(&status)).expect("Status should succeed");
    }

    #[test]
    fn test_invalid_config_file_is_rejected() {
        let ws = workspace();
        fs::create_dir_all(&ws.downloads).expect("Failed to create downloads dir");
        let config_path = ws.downloads.join("mirror.toml");
        fs::write(&config_path, "tick_interval_secs = 0").expect("Failed to write config");

        let mut status = args(&ws, Command::Status);
        status.config = config_path;
        assert!(load_config(&status).is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["mirror", "--verbose", "run", "--once"])
            .expect("Should parse");
        assert!(args.verbose);
        assert_eq!(args.command, Command::Run { once: true });
        assert_eq!(args.config, PathBuf::from("config/mirror.toml"));

        let args = Args::try_parse_from(["mirror", "add", "folder-123"]).expect("Should parse");
        assert_eq!(args.command, Command::Add { folder_id: "folder-123".into() });

        assert!(Args::try_parse_from(["mirror", "add"]).is_err());
        assert!(Args::try_parse_from(["mirror"]).is_err());
    }
}
