use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use shadowbox::{
    DesignSnapshot, DirAssetStore, DirOrderStore, JobRegistry, JobStatus, ProductionConfig,
    ProductionError, ProductionPipeline,
};

#[derive(Parser, Debug)]
#[command(version, about = "Print layers, cut paths and sheets for shadowbox trading cards")]
struct Cli {
    /// JSON file with ProductionConfig overrides.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write JSONL stage timings here.
    #[arg(long, global = true)]
    perf_log: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Produce every card and sheet of one order.
    Order {
        order_id: String,
        /// Directory holding `<order_id>.json` records.
        #[arg(long)]
        orders: PathBuf,
        /// Local mirror of the asset bucket.
        #[arg(long)]
        assets: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// Remove the order's output directory first.
        #[arg(long, default_value_t = false)]
        clean: bool,
        /// Run on a worker and poll its status.
        #[arg(long, default_value_t = false)]
        background: bool,
    },
    /// Produce the layers and cut paths of a single design.
    Card {
        design: PathBuf,
        #[arg(long)]
        assets: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Gang designs three to a sheet.
    Batch {
        #[arg(required = true)]
        designs: Vec<PathBuf>,
        #[arg(long)]
        assets: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Print the effective configuration.
    Config,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(cli: &Cli) -> Result<ProductionConfig, ProductionError> {
    let config = match &cli.config {
        Some(path) => ProductionConfig::from_json_file(path)?,
        None => ProductionConfig::default(),
    };
    let mut config = config.with_env_overrides();
    if let Some(path) = &cli.perf_log {
        config.perf_log = Some(path.clone());
    }
    config.validate()?;
    Ok(config)
}

fn pipeline(config: ProductionConfig, assets: PathBuf) -> Result<ProductionPipeline, ProductionError> {
    ProductionPipeline::builder()
        .config(config)
        .asset_store(DirAssetStore::new(assets))
        .build()
}

fn run(cli: Cli) -> Result<ExitCode, ProductionError> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Card {
            design,
            assets,
            out,
        } => {
            let text = std::fs::read_to_string(&design)?;
            let design = DesignSnapshot::from_json_str(&text)?;
            let card = pipeline(config, assets)?.process_card(0, &design, &out)?;
            for warning in &card.warnings {
                eprintln!("warning: {warning}");
            }
            for file in &card.files {
                println!("{}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch {
            designs,
            assets,
            out,
        } => {
            let designs = designs
                .iter()
                .map(|path| {
                    let text = std::fs::read_to_string(path)?;
                    DesignSnapshot::from_json_str(&text)
                })
                .collect::<Result<Vec<_>, ProductionError>>()?;
            let batch = pipeline(config, assets)?.process_batch(&designs, &out)?;
            for file in &batch.files {
                println!("{}", file.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Order {
            order_id,
            orders,
            assets,
            out,
            clean,
            background,
        } => {
            let pipeline = Arc::new(pipeline(config, assets)?);
            let store = DirOrderStore::new(orders);
            let registry = JobRegistry::new();
            let order_dir = ProductionPipeline::order_dir(&out, &order_id)?;
            let job_id = order_id.clone();
            registry.start(&order_id, order_dir, clean, move || {
                pipeline
                    .process_order(&store, &job_id, &out)
                    .map(|output| output.files)
            })?;

            let status = if background {
                loop {
                    match registry.status(&order_id) {
                        Some(status) if status.is_finished() => break Some(status),
                        Some(status) => log::info!("order {order_id}: {status:?}"),
                        None => break None,
                    }
                    std::thread::sleep(Duration::from_millis(250));
                }
            } else {
                registry.wait(&order_id)
            };
            match status {
                Some(JobStatus::Completed { output_dir, files }) => {
                    println!("{} ({} files)", output_dir.display(), files.len());
                    Ok(ExitCode::SUCCESS)
                }
                Some(JobStatus::Failed { error }) => {
                    eprintln!("order {order_id} failed: {error}");
                    Ok(ExitCode::FAILURE)
                }
                other => {
                    eprintln!("order {order_id} ended in unexpected state {other:?}");
                    Ok(ExitCode::FAILURE)
                }
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}
