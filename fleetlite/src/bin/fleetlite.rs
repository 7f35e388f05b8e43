//! `fleetlite` command line.

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use fleetlite::markers::{MarkerRecord, MarkerStore};
use fleetlite::{Fleet, FleetError, FleetLayout, FleetOptions, QemuController, SshExec};
use fleetlite_shared::constants::exit_codes;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "fleetlite", version, about = "Parallel VM provisioning and cluster bootstrap")]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bring up a fleet and assemble it into a cluster
    Up(UpArgs),
    /// Show marker state of an existing run directory
    Status(StatusArgs),
    /// Remove a run directory
    Clean(CleanArgs),
}

#[derive(Args, Debug)]
struct UpArgs {
    /// JSON options file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Number of VMs (index 0 is the master)
    #[arg(long, short)]
    nodes: Option<usize>,

    /// Base disk image shared by every VM
    #[arg(long)]
    base_image: Option<PathBuf>,

    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Keep the cluster running until Ctrl-C
    #[arg(long)]
    keep: bool,
}

#[derive(Args, Debug)]
struct StatusArgs {
    #[arg(long)]
    work_dir: PathBuf,

    /// Fleet size; defaults to the number of VM directories
    #[arg(long, short)]
    nodes: Option<usize>,

    /// Print marker records as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct CleanArgs {
    #[arg(long)]
    work_dir: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.cmd {
        Commands::Up(args) => cmd_up(args).await,
        Commands::Status(args) => cmd_status(args),
        Commands::Clean(args) => cmd_clean(args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            let code = e
                .downcast_ref::<FleetError>()
                .map(FleetError::exit_code)
                .unwrap_or(exit_codes::GENERAL);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn cmd_up(args: UpArgs) -> Result<()> {
    let mut options = match &args.config {
        Some(path) => FleetOptions::from_file(path)?,
        None => FleetOptions::default(),
    };
    if let Some(nodes) = args.nodes {
        options.nodes = nodes;
    }
    if let Some(base_image) = args.base_image {
        options.base_image = base_image;
    }
    if let Some(work_dir) = args.work_dir {
        options.work_dir = work_dir;
    }
    options.keep_running |= args.keep;

    options.credentials.load_keys()?;
    options.sanitize()?;

    let layout = FleetLayout::new(&options.work_dir);
    layout.prepare()?;
    fleetlite::init_logging_for(&layout)?;
    tracing::debug!(?options, "Resolved options");

    let controller = Arc::new(QemuController::new(options.hypervisor.clone()));
    let exec = Arc::new(SshExec::new(&options.credentials));
    let fleet = Fleet::new(options, controller, exec);

    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    let report = fleet.run(interrupt).await?;

    println!("cluster endpoint: {}", report.endpoint);
    println!("nodes ready:      {}", report.nodes_ready);
    println!("kubeconfig:       {}", report.kubeconfig.display());
    Ok(())
}

fn cmd_status(args: StatusArgs) -> Result<()> {
    let layout = FleetLayout::new(&args.work_dir);
    if !layout.run_dir().is_dir() {
        bail!("no run directory at {}", layout.run_dir().display());
    }
    let count = match args.nodes {
        Some(nodes) => nodes,
        None => count_vm_dirs(layout.run_dir())?,
    };

    let markers = MarkerStore::new(layout.markers_dir());
    let records = (0..count)
        .map(|index| markers.read(index))
        .collect::<Result<Vec<Option<MarkerRecord>>, _>>()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for (index, record) in records.iter().enumerate() {
        match record {
            Some(record) => {
                let detail = match (&record.step, &record.error) {
                    (Some(step), Some(error)) => format!("  step={} {}", step, error),
                    (None, Some(error)) => format!("  {}", error),
                    _ => String::new(),
                };
                println!("vm-{:<3} {:<8}{}", index, format!("{:?}", record.kind).to_lowercase(), detail);
            }
            None => println!("vm-{:<3} pending", index),
        }
    }
    println!("barrier: {:?}", markers.barrier(count));
    Ok(())
}

fn cmd_clean(args: CleanArgs) -> Result<()> {
    let layout = FleetLayout::new(&args.work_dir);
    layout
        .cleanup()
        .with_context(|| format!("failed to remove {}", layout.run_dir().display()))?;
    println!("removed {}", layout.run_dir().display());
    Ok(())
}

fn count_vm_dirs(run_dir: &Path) -> Result<usize> {
    let mut count = 0;
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() && entry.file_name().to_string_lossy().starts_with("vm-") {
            count += 1;
        }
    }
    Ok(count)
}
