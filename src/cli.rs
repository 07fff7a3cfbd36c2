use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use crate::config::SlipConfig;
use crate::import::{read_rows, scan_and_fill};
use crate::ledger::{CellId, DerivedCells, InputSet};
use crate::platform::{native_clipboard, DesktopEnvironment, DesktopSurface, SystemCopyCommand};
use crate::publish::{ExportReport, Publisher};
use crate::raster::{BoxPainter, Rasterizer, ResvgDecoder};
use crate::recompute::recompute;
use crate::slip::{SlipSheet, GRID_COLUMNS, GRID_ROWS};

/// Options shared by the commands that capture the slip
#[derive(Debug, Clone, Default)]
pub struct CaptureOptions {
    /// Skip the box painter and go straight to the structural renderer
    pub no_primary: bool,
    /// Write landing pages without launching a browser
    pub headless: bool,
}

/// Read an Input Set from TOML, or JSON when the extension says so
pub fn load_inputs(path: &Path) -> Result<InputSet> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inputs from {:?}", path))?;

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let inputs = if is_json {
        serde_json::from_str(&content).with_context(|| format!("Invalid JSON inputs in {:?}", path))?
    } else {
        toml::from_str(&content).with_context(|| format!("Invalid TOML inputs in {:?}", path))?
    };
    Ok(inputs)
}

/// Wire the desktop capabilities into a publisher
pub fn build_publisher(config: &SlipConfig, options: &CaptureOptions) -> Publisher {
    let export = config.export.clone();
    let decoder = ResvgDecoder::new();

    let mut rasterizer = Rasterizer::new(Arc::new(decoder.clone()))
        .with_device_pixel_ratio(export.device_pixel_ratio);
    if export.use_primary_renderer && !options.no_primary {
        rasterizer = rasterizer.with_primary(Arc::new(BoxPainter::new(decoder)));
    }

    let mut surface = DesktopSurface::new(export.resolved_download_dir());
    if options.headless {
        surface = surface.headless();
    }

    let probe = Arc::new(DesktopEnvironment::new(export.user_agent.clone()));
    let copy_command = Arc::new(SystemCopyCommand::new(export.resolved_staging_dir()));

    let publisher = Publisher::new(rasterizer, probe, Arc::new(surface), export).with_copy_command(copy_command);

    match native_clipboard() {
        Some(clipboard) => publisher.with_clipboard(clipboard),
        None => publisher,
    }
}

/// Recompute and print the slip grid
pub fn compute_command(inputs_path: PathBuf, json: bool) -> Result<()> {
    let inputs = load_inputs(&inputs_path)?;
    let derived = recompute(&inputs);

    if json {
        println!("{}", serde_json::to_string_pretty(&derived)?);
        return Ok(());
    }

    print_grid(&derived);
    println!();
    println!("Balance: {}", derived.balance_text());
    Ok(())
}

/// Scan a sheet and write the recovered inputs as TOML
pub fn import_command(
    sheet_path: PathBuf,
    delimiter: char,
    base: Option<PathBuf>,
    output: Option<PathBuf>,
) -> Result<()> {
    info!("📥 Importing sheet: {:?}", sheet_path);

    if !delimiter.is_ascii() {
        return Err(anyhow!("Delimiter must be a single ASCII character"));
    }

    let file = std::fs::File::open(&sheet_path)
        .with_context(|| format!("Sheet not found: {:?}", sheet_path))?;
    let rows = read_rows(file, delimiter as u8)?;
    let assignments = scan_and_fill(&rows);

    let mut inputs = match base {
        Some(path) => load_inputs(&path)?,
        None => InputSet::new(),
    };
    assignments.apply_to(&mut inputs);

    for (field, value) in &assignments.values {
        println!("  {:<18} {}", field.to_string(), value);
    }

    let toml_text = toml::to_string_pretty(&inputs)?;
    match output {
        Some(path) => {
            std::fs::write(&path, toml_text)?;
            info!("📝 Inputs saved to: {:?}", path);
        }
        None => print!("{}", toml_text),
    }

    println!("Imported {} of {} rows", assignments.len(), rows.len());
    Ok(())
}

/// The copy action
pub async fn copy_command(config: &SlipConfig, inputs_path: PathBuf, options: CaptureOptions) -> Result<()> {
    let inputs = load_inputs(&inputs_path)?;
    let region = SlipSheet::new().render(&recompute(&inputs));
    let publisher = build_publisher(config, &options);

    let report = publisher.export(&region).await?;
    finish_export(&publisher, report).await
}

/// The Export PNG action
pub async fn export_command(config: &SlipConfig, inputs_path: PathBuf, options: CaptureOptions) -> Result<()> {
    let inputs = load_inputs(&inputs_path)?;
    let region = SlipSheet::new().render(&recompute(&inputs));
    let publisher = build_publisher(config, &options);

    let report = publisher.export_png(&region).await?;
    finish_export(&publisher, report).await
}

async fn finish_export(publisher: &Publisher, report: ExportReport) -> Result<()> {
    println!("{}", report.outcome.status_message());
    for attempt in &report.attempts {
        println!("  {:<20} {}", attempt.strategy.to_string(), attempt.result);
    }

    let waiting = publisher.pending_releases();
    if waiting > 0 {
        println!(
            "⏳ Keeping the image available for up to {}s so the page can load it",
            publisher.config().landing_grace_secs
        );
        publisher.finish_pending().await;
    }

    if report.outcome.is_success() {
        Ok(())
    } else {
        Err(anyhow!("export failed"))
    }
}

/// Print the capability status line
pub async fn check_command(config: &SlipConfig) -> Result<()> {
    let publisher = build_publisher(config, &CaptureOptions::default());
    let report = publisher.check().await;

    println!("{} {}", if report.ready { "✅" } else { "❌" }, report.status_line);
    Ok(())
}

/// Full copy dry run
pub async fn diagnose_command(config: &SlipConfig, inputs_path: Option<PathBuf>, options: CaptureOptions) -> Result<()> {
    let inputs = match inputs_path {
        Some(path) => load_inputs(&path)?,
        None => InputSet::new(),
    };
    let region = SlipSheet::new().render(&recompute(&inputs));
    let publisher = build_publisher(config, &options);

    let report = publisher.run_copy_diagnostic(&region).await?;
    println!("{}", report.status_line());
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Write a default configuration file
pub fn init_config_command(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(anyhow!("Config file already exists: {:?} (use --force)", path));
    }
    SlipConfig::default().save_to_file(&path)?;
    println!("📝 Wrote default config to {:?}", path);
    Ok(())
}

fn print_grid(derived: &DerivedCells) {
    const WIDTH: usize = 12;

    print!("{:>4}", "");
    for column in 0..GRID_COLUMNS {
        print!(" {:<width$}", (b'A' + column as u8) as char, width = WIDTH);
    }
    println!();

    for row in 1..=GRID_ROWS {
        print!("{:>4}", row);
        for column in 0..GRID_COLUMNS {
            let slot = format!("{}{}", (b'A' + column as u8) as char, row);
            let value = derived.at_slot(&slot).unwrap_or("");
            let clipped: String = value.chars().take(WIDTH).collect();
            print!(" {:<width$}", clipped, width = WIDTH);
        }
        println!();
    }

    for cell in [CellId::DiscountAmount, CellId::LegacyShortage] {
        println!("{:?}: {}", cell, derived.get(cell));
    }
}
