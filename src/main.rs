use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error};

use patti_slip::cli::{self, CaptureOptions};
use patti_slip::config::SlipConfig;
use patti_slip::logging::init_logging;

#[derive(Parser)]
#[command(name = "patti")]
#[command(version)]
#[command(about = "Patti note ledger slip: recompute, import and clipboard-ready export")]
struct Cli {
    /// Configuration file (TOML); PATTI_* variables apply on top
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recompute the slip from an input file and print the grid
    Compute {
        /// Input Set file (.toml or .json)
        inputs: PathBuf,

        /// Print derived cells as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fill inputs from a label/value sheet
    Import {
        /// Sheet rows (.csv or .tsv)
        sheet: PathBuf,

        /// Field delimiter; defaults to tab for .tsv files, comma otherwise
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Existing Input Set to merge into
        #[arg(long)]
        base: Option<PathBuf>,

        /// Write the merged Input Set here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Capture the slip and copy it to the clipboard, falling back as needed
    Copy {
        inputs: PathBuf,

        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Capture the slip and save it as a PNG
    Export {
        inputs: PathBuf,

        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Report clipboard and renderer capabilities
    Check,

    /// Dry-run the copy and report which mechanism worked
    Diagnose {
        inputs: Option<PathBuf>,

        #[command(flatten)]
        capture: CaptureArgs,
    },

    /// Write a default configuration file
    InitConfig {
        #[arg(default_value = "patti.toml")]
        path: PathBuf,

        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct CaptureArgs {
    /// Skip the primary renderer
    #[arg(long)]
    no_primary: bool,

    /// Write landing pages without opening a browser
    #[arg(long)]
    headless: bool,
}

impl From<CaptureArgs> for CaptureOptions {
    fn from(args: CaptureArgs) -> Self {
        CaptureOptions {
            no_primary: args.no_primary,
            headless: args.headless,
        }
    }
}

fn load_config(cli: &Cli) -> Result<SlipConfig> {
    let mut config = match &cli.config {
        Some(path) => SlipConfig::load_from_file(path)?,
        None => SlipConfig::default(),
    };
    config.apply_env();
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let _guard = init_logging(&config.logging)?;
    debug!("Loaded configuration: {:?}", config.export);

    let result = match cli.command {
        Commands::Compute { inputs, json } => cli::compute_command(inputs, json),
        Commands::Import {
            sheet,
            delimiter,
            base,
            output,
        } => {
            let is_tsv = sheet
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("tsv"))
                .unwrap_or(false);
            let delimiter = delimiter.unwrap_or(if is_tsv { '\t' } else { ',' });
            cli::import_command(sheet, delimiter, base, output)
        }
        Commands::Copy { inputs, capture } => cli::copy_command(&config, inputs, capture.into()).await,
        Commands::Export { inputs, capture } => cli::export_command(&config, inputs, capture.into()).await,
        Commands::Check => cli::check_command(&config).await,
        Commands::Diagnose { inputs, capture } => cli::diagnose_command(&config, inputs, capture.into()).await,
        Commands::InitConfig { path, force } => cli::init_config_command(path, force),
    };

    if let Err(e) = &result {
        error!("❌ {:#}", e);
    }
    result
}
