use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use swapshift::config::AppConfig;
use swapshift::core::{RelocationRequest, StatusBoard, StatusSnapshot, SwapEngine, Volume};
use swapshift::{adapters, config, context, db, logging};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "swapshift")]
#[command(about = "Move the macOS swap file onto another volume", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    overrides: CliOverrides,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// SIP state, volume inventory and current swap location
    Status,
    /// List candidate volumes
    Drives,
    /// Check System Integrity Protection
    CheckSip,
    /// Relocate the swap file onto the volume mounted at DESTINATION
    Relocate(RelocateArgs),
    /// Past relocation attempts
    History(HistoryArgs),
}

#[derive(Args)]
struct RelocateArgs {
    /// Mount path of the destination volume
    destination: PathBuf,
}

#[derive(Args)]
struct HistoryArgs {
    /// How many attempts to show
    #[arg(long, default_value_t = 20)]
    limit: u32,
}

#[derive(Args, Serialize)]
struct CliOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    simulation: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    verbose: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    volumes_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, global = true)]
    history_db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let json = cli.json;

    let config = config::AppConfig::new(Some(&cli.overrides))?;
    logging::init(logging::LogConfig {
        json,
        verbose: config.verbose,
    });

    match cli.command {
        Commands::Status => {
            let board = StatusBoard::new();
            let engine = build_engine(&config, &board);
            let snapshot = engine.refresh_all().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_status(&snapshot);
            }
        }
        Commands::Drives => {
            let board = StatusBoard::new();
            let engine = build_engine(&config, &board);
            let volumes = engine.refresh_drives().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&volumes)?);
            } else {
                print_volumes(&volumes);
            }
        }
        Commands::CheckSip => {
            let board = StatusBoard::new();
            let engine = build_engine(&config, &board);
            let state = engine.check_security().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else if state.checked_at.is_none() {
                println!("System Integrity Protection: state unknown (check failed)");
            } else if state.sip_enabled {
                println!("System Integrity Protection: enabled");
                println!("Relocation requires SIP to be disabled (csrutil, from recovery).");
            } else {
                println!("System Integrity Protection: disabled");
            }
        }
        Commands::Relocate(args) => {
            let db = db::init(&config.history_db).await?;
            let ctx = context::AppContext::new(config, db);
            let engine = ctx.engine();

            engine.refresh_all().await?;

            let attempt_id = Uuid::now_v7().to_string();
            db::attempts::create(
                &ctx.db,
                attempt_id.clone(),
                args.destination.display().to_string(),
            )
            .await?;

            let request = RelocationRequest::new(args.destination);
            let outcome = engine.relocate(&request).await;
            match &outcome {
                Ok(()) => {
                    db::attempts::finish(&ctx.db, attempt_id, "succeeded".into(), None).await?
                }
                Err(e) => {
                    db::attempts::finish(&ctx.db, attempt_id, "failed".into(), Some(e.to_string()))
                        .await?
                }
            }

            let snapshot = engine.snapshot().await;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print_log(&snapshot);
                print_status(&snapshot);
            }
            outcome?;
        }
        Commands::History(args) => {
            let db = db::init(&config.history_db).await?;
            let records = db::attempts::list(&db, args.limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No relocation attempts recorded.");
            } else {
                for r in records {
                    let end = r.finished_at.as_deref().unwrap_or("-");
                    let error = r.error.map(|e| format!("  ({e})")).unwrap_or_default();
                    println!(
                        "{}  {:<9}  {}  ended {}{}",
                        r.started_at, r.outcome, r.destination, end, error
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_engine(config: &AppConfig, board: &StatusBoard) -> SwapEngine {
    let runner = adapters::runner_for(config, board);
    SwapEngine::with_volumes_dir(runner, board.clone(), config.volumes_dir.clone())
}

fn print_status(snapshot: &StatusSnapshot) {
    let sip = match (snapshot.security.checked_at, snapshot.security.sip_enabled) {
        (None, _) => "unknown (assumed enabled)",
        (Some(_), true) => "enabled",
        (Some(_), false) => "disabled",
    };
    println!("SIP:       {sip}");

    match &snapshot.swap_host {
        Some(host) => println!("Swap host: {}", host.display()),
        None => println!("Swap host: unknown"),
    }

    println!();
    print_volumes(&snapshot.volumes);

    if let Some(err) = &snapshot.last_error {
        println!();
        println!("Last error: {err}");
    }
}

fn print_volumes(volumes: &[Volume]) {
    if volumes.is_empty() {
        println!("No volumes found.");
        return;
    }
    for v in volumes {
        let mut tags = Vec::new();
        if v.is_system_volume {
            tags.push("system");
        }
        if v.is_physical_external {
            tags.push("external");
        }
        if v.hosts_swap_file {
            tags.push("swap");
        }
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", tags.join(", "))
        };
        println!(
            "{:<28} {:<20} {} free of {}{}",
            v.mount_path.display(),
            v.name,
            human_gb(v.available_bytes),
            human_gb(v.total_bytes),
            tags
        );
    }
}

fn print_log(snapshot: &StatusSnapshot) {
    for entry in &snapshot.log {
        println!("{:>8}  {}", entry.kind.as_str(), entry.message);
    }
    if !snapshot.log.is_empty() {
        println!();
    }
}

fn human_gb(bytes: u64) -> String {
    format!("{:.1} GB", bytes as f64 / 1e9)
}
