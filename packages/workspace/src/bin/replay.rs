use anyhow::{bail, Context, Result};
use clap::Parser;
use quire_editor::Data;
use quire_workspace::{read_events, Replica, SessionConfig, Snapshot};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Rebuild a notebook session from its operation log
#[derive(Parser)]
#[command(name = "quire-replay")]
#[command(version)]
struct Args {
    /// Operation log to replay (defaults to the `operationLog` of the config)
    log: Option<PathBuf>,

    /// Directory containing quire.config.json
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Stop after this sequence number
    #[arg(long)]
    until: Option<u64>,

    /// Print a per-section overview instead of the full state
    #[arg(long)]
    summary: bool,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let path = match args.log {
        Some(path) => path,
        None => {
            let config = SessionConfig::load(&args.root)
                .with_context(|| format!("Failed to load config from {}", args.root.display()))?;
            match config.operation_log {
                Some(path) => path,
                None => bail!("No log given and no operationLog configured"),
            }
        }
    };

    let events = read_events(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    info!(path = %path.display(), events = events.len(), "replaying operation log");

    let mut replica = Replica::new(Snapshot::initial(Data::new()));
    for event in &events {
        if args.until.is_some_and(|until| event.sequence > until) {
            break;
        }
        replica.fold(event).with_context(|| {
            format!(
                "Failed to apply event {} ({})",
                event.sequence,
                event.operation.name()
            )
        })?;
    }

    if args.summary {
        print_summary(&replica);
    } else {
        println!("{}", serde_json::to_string_pretty(replica.data())?);
    }

    Ok(())
}

fn print_summary(replica: &Replica) {
    let data = replica.data();
    let notebook = data.notebook();

    println!("{} (sequence {})", notebook.name, replica.sequence());
    if data.is_dirty() {
        println!("  unsaved changes");
    }

    for section_id in notebook.all_section_ids() {
        let Some(section) = notebook.section(section_id) else {
            continue;
        };
        match section.parent_id {
            Some(parent_id) => {
                println!("  {} [{}] branch of {}", section.name, section_id, parent_id)
            }
            None => println!("  {} [{}]", section.name, section_id),
        }

        for cell_id in &section.cell_ids {
            let Some(info) = data.cell_info(*cell_id) else {
                continue;
            };
            let state = match (info.evaluation_status(), info.validity()) {
                (Some(status), Some(validity)) => format!("{status:?}, {validity:?}"),
                _ => "markdown".to_string(),
            };
            println!("    {} rev {} ({})", cell_id, info.revision, state.to_lowercase());
        }
    }
}
