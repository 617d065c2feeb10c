//! Bins spike timestamps from a workbook into fixed time blocks, writes the
//! spike-count table and draws one raster plot per unit.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use log::{error, info, warn};

use spikeraster::config::RasterConfig;
use spikeraster::error::RasterError;
use spikeraster::raster;

#[derive(Parser)]
#[command(name = "raster")]
#[command(about = "Spike counts and raster plots per time block", version)]
struct Cli {
    /// Workbook with one sheet per unit and a timestamp column in seconds
    input: PathBuf,

    /// Path to YAML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Block size in milliseconds
    #[arg(long)]
    block_size: Option<f64>,

    /// Folder for the raster images
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Spreadsheet receiving the spike counts
    #[arg(long)]
    counts_file: Option<PathBuf>,

    /// Marker radius in pixels
    #[arg(long)]
    marker_size: Option<u32>,

    /// Only write the spike-count table
    #[arg(long)]
    no_plots: bool,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn raster_config(&self) -> RasterConfig {
        let mut config = match &self.config {
            Some(path) => match RasterConfig::from_yaml(path) {
                Ok(cfg) => {
                    info!("Loaded config from: {}", path.display());
                    cfg
                }
                Err(e) => {
                    warn!("Failed to load config from {}: {}, using defaults", path.display(), e);
                    RasterConfig::default()
                }
            },
            None => RasterConfig::default(),
        };

        if let Some(size) = self.block_size {
            config.block_size_ms = size;
        }
        if let Some(dir) = &self.output_dir {
            config.output_folder = dir.clone();
        }
        if let Some(file) = &self.counts_file {
            config.spike_counts_file = file.clone();
        }
        if let Some(size) = self.marker_size {
            config.marker_size = size;
        }
        if self.no_plots {
            config.render_plots = false;
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    let config = cli.raster_config();
    let start = Instant::now();

    match raster::run(&cli.input, &config) {
        Ok(report) => {
            for sheet in &report.skipped {
                println!("Skipped sheet '{}': {}", sheet.name, sheet.reason);
            }
            println!("Spike counts saved to {}:", report.counts_file.display());
            println!("{:<20} {:>8} {:>12} {:>13}", "Unit", "Block", "Spike_Count", "Total_Spikes");
            for row in &report.counts {
                println!("{:<20} {:>8} {:>12} {:>13}", row.unit, row.block, row.count, row.total);
            }
            for plot in &report.plots {
                println!("Raster plot saved as '{}'.", plot.display());
            }
            info!("Done in {:.2?}", start.elapsed());
            ExitCode::SUCCESS
        }
        Err(RasterError::EmptyDataset) => {
            println!("{}", RasterError::EmptyDataset);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
