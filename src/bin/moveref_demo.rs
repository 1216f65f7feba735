//! moveref demo
//!
//! Runs the move listener against the in-memory repository, moves a folder and
//! prints the queued reference-update job as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use moveref::jobs::{JobQueueConfig, QueuedJobDispatcher};
use moveref::{
    move_listener, InMemoryRepository, ListenerConfig, MemoryRepositoryConfig, MoveRefError, MoveRefResult,
    PropertyConfigResolver, SubscriptionState, CONFIG_PROPERTY,
};

/// Demo configuration
struct Args {
    /// Optional listener config file
    config: Option<PathBuf>,
    /// Source of the demo move
    from: String,
    /// Destination of the demo move
    to: String,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: None,
            from: "/content/dam/campaign".to_string(),
            to: "/content/dam/campaign-2026".to_string(),
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    parse_args_from(&args)
}

fn parse_args_from(args: &[String]) -> Args {
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--from" | "-f" => {
                if i + 1 < args.len() {
                    parsed.from = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("error: --from requires a value");
                    std::process::exit(1);
                }
            }
            "--to" | "-t" => {
                if i + 1 < args.len() {
                    parsed.to = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("error: --to requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("moveref-demo - move listener demo");
                println!();
                println!("USAGE:");
                println!("    moveref-demo [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <FILE>       Listener config (JSON)");
                println!("    -f, --from <PATH>         Folder to seed and move [default: /content/dam/campaign]");
                println!("    -t, --to <PATH>           Destination of the demo move [default: /content/dam/campaign-2026]");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    parsed
}

/// Proper ancestors of `path`, outermost first.
fn ancestors(path: &str) -> Vec<&str> {
    path.match_indices('/')
        .skip(1)
        .map(|(i, _)| &path[..i])
        .collect()
}

fn main() -> MoveRefResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moveref=debug,moveref_demo=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args();
    let cfg = match &args.config {
        Some(path) => ListenerConfig::from_path(path)?,
        None => ListenerConfig::default(),
    };

    let repo = Arc::new(InMemoryRepository::new(MemoryRepositoryConfig {
        service_identities: vec![cfg.service_identity.clone()],
        ..MemoryRepositoryConfig::default()
    }));
    repo.batch(moveref::Actor::Anonymous, |b| {
        for folder in ancestors(&args.from).into_iter().chain(ancestors(&args.to)) {
            if !b.exists(folder) {
                b.add_node(folder, "sling:Folder")?;
            }
        }
        b.add_node(&args.from, "sling:OrderedFolder")?;
        b.set_property(
            &args.from,
            CONFIG_PROPERTY,
            json!({"moveSettings": {"updateReferencesOnMove": true}}),
        )
    })?;

    let (jobs, queue) = QueuedJobDispatcher::new(JobQueueConfig::default());
    let (manager, processor) = move_listener(
        repo.clone(),
        repo.clone(),
        Arc::new(PropertyConfigResolver),
        Arc::new(jobs),
        &cfg,
    );

    if manager.start() != SubscriptionState::Active {
        warn!("listener inactive; no jobs will be queued");
    }

    info!(from = %args.from, to = %args.to, "moving folder");
    repo.move_node(&args.from, &args.to)?;
    repo.flush()?;

    match queue.recv_timeout(Duration::from_secs(1)) {
        Some(job) => {
            let text = serde_json::to_string_pretty(&job).map_err(|e| MoveRefError::internal(e.to_string()))?;
            println!("{text}");
        }
        None => println!("no job queued"),
    }

    manager.stop();
    info!(stats = ?processor.stats(), "done");
    Ok(())
}
