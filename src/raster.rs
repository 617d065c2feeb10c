//! Binning and reporting pipeline: workbook in, spike-count table and raster
//! images out.

use std::path::{Path, PathBuf};

use log::info;

use crate::binning::{SpikeCount, bin_units, spike_counts};
use crate::config::RasterConfig;
use crate::error::RasterError;
use crate::plots::render_raster;
use crate::workbook::{SkippedSheet, read_unit_sheets, write_spike_counts};

/// What a report run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterReport {
    pub counts: Vec<SpikeCount>,
    pub counts_file: PathBuf,
    pub plots: Vec<PathBuf>,
    pub skipped: Vec<SkippedSheet>,
}

pub fn run(input: &Path, config: &RasterConfig) -> Result<RasterReport, RasterError> {
    let block_size = config.block_size_ms;
    if !(block_size.is_finite() && block_size > 0.0) {
        return Err(RasterError::InvalidBlockSize(block_size));
    }

    let load = read_unit_sheets(input, &config.timestamp_columns)?;
    if load.units.is_empty() {
        return Err(RasterError::EmptyDataset);
    }

    let binned = bin_units(&load.units, block_size);
    if binned.is_empty() {
        return Err(RasterError::EmptyDataset);
    }

    let counts = spike_counts(&binned);
    write_spike_counts(&config.spike_counts_file, &counts)?;
    for unit in &binned {
        info!(
            "{}: blocks {}..={}, {} spikes",
            unit.unit,
            unit.min_block().unwrap_or_default(),
            unit.max_block().unwrap_or_default(),
            unit.total()
        );
    }

    let plots = if config.render_plots {
        binned
            .iter()
            .map(|unit| render_raster(unit, &config.output_folder, block_size, config.marker_size))
            .collect::<Result<Vec<_>, _>>()?
    } else {
        Vec::new()
    };

    Ok(RasterReport {
        counts,
        counts_file: config.spike_counts_file.clone(),
        plots,
        skipped: load.skipped,
    })
}
