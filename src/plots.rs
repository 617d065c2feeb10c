//! PNG figures: one raster per unit for the block report, and one
//! waveform/template panel per sorted unit.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use plotters::prelude::*;

use crate::analyzer::UnitSummary;
use crate::binning::UnitBlocks;
use crate::error::PlotError;

const RASTER_SIZE: (u32, u32) = (1000, 600);
const DIAGNOSTIC_SIZE: (u32, u32) = (1200, 600);

/// Colour cycle for successive blocks.
const BLOCK_COLORS: &[(u8, u8, u8)] = &[
    (31, 119, 180),
    (255, 127, 14),
    (44, 160, 44),
    (214, 39, 40),
    (148, 103, 189),
    (140, 86, 75),
    (227, 119, 194),
    (127, 127, 127),
    (188, 189, 34),
    (23, 190, 207),
];

fn drawing_error<E: std::fmt::Display>(e: E) -> PlotError {
    PlotError::Drawing(e.to_string())
}

fn block_color(position: usize) -> RGBColor {
    let (r, g, b) = BLOCK_COLORS[position % BLOCK_COLORS.len()];
    RGBColor(r, g, b)
}

/// Keeps unit names usable as file names.
pub fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

pub fn raster_path(dir: &Path, unit: &str) -> PathBuf {
    dir.join(format!("raster_plot_{}.png", file_safe(unit)))
}

/// Scatter points of a raster: x is the offset inside the block, y the block index.
pub fn raster_points(unit: &UnitBlocks) -> Vec<(usize, f64, i64)> {
    unit.blocks
        .iter()
        .enumerate()
        .flat_map(|(position, block)| {
            block
                .offsets_ms
                .iter()
                .map(move |&offset| (position, offset, block.index))
        })
        .collect()
}

/// Draws every block of a unit on top of each other, one row per block.
pub fn render_raster(
    unit: &UnitBlocks,
    dir: &Path,
    block_size_ms: f64,
    marker_size: u32,
) -> Result<PathBuf, PlotError> {
    let (Some(min_block), Some(max_block)) = (unit.min_block(), unit.max_block()) else {
        return Err(PlotError::Empty(unit.unit.clone()));
    };
    fs::create_dir_all(dir)?;
    let path = raster_path(dir, &unit.unit);
    draw_raster(&path, unit, (min_block, max_block), block_size_ms, marker_size)?;
    info!("Raster plot for {} saved as '{}'.", unit.unit, path.display());
    Ok(path)
}

fn draw_raster(
    path: &Path,
    unit: &UnitBlocks,
    (min_block, max_block): (i64, i64),
    block_size_ms: f64,
    marker_size: u32,
) -> Result<(), PlotError> {
    let root = BitMapBackend::new(path, RASTER_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(drawing_error)?;

    let y_min = min_block as f64 - 0.5;
    let y_max = max_block as f64 + 0.5;
    let mut chart = ChartBuilder::on(&root)
        .caption(
            format!("Raster Plot for {} (Including Blocks with Zero Spikes)", unit.unit),
            ("sans-serif", 20),
        )
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0.0..block_size_ms, y_min..y_max)
        .map_err(drawing_error)?;

    chart
        .configure_mesh()
        .x_desc("Time (ms)")
        .y_desc("Block ID")
        .light_line_style(RGBAColor(0, 0, 0, 0.0))
        .bold_line_style(RGBAColor(0, 0, 0, 0.15))
        .draw()
        .map_err(drawing_error)?;

    chart
        .draw_series(raster_points(unit).into_iter().map(|(position, x, y)| {
            Circle::new((x, y as f64), marker_size, block_color(position).filled())
        }))
        .map_err(drawing_error)?;

    root.present().map_err(drawing_error)
}

fn value_range(values: impl Iterator<Item = f32>) -> (f64, f64) {
    let (lo, hi) = values.fold((f32::MAX, f32::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return (-1.0, 1.0);
    }
    let pad = f64::from(hi - lo).max(1e-6) * 0.05;
    (f64::from(lo) - pad, f64::from(hi) + pad)
}

/// Waveforms (left) and template (right) of one unit, channels side by side.
pub fn render_unit_diagnostics(summary: &UnitSummary, dir: &Path) -> Result<PathBuf, PlotError> {
    let times = summary.time_axis_ms();
    if times.is_empty() {
        return Err(PlotError::Empty(format!("unit {}", summary.unit_id)));
    }
    fs::create_dir_all(dir)?;
    let path = dir.join(format!("unit_{}.png", summary.unit_id));
    draw_unit_diagnostics(&path, summary, &times)?;
    info!("Diagnostics for unit {} saved as '{}'.", summary.unit_id, path.display());
    Ok(path)
}

fn draw_unit_diagnostics(path: &Path, summary: &UnitSummary, times: &[f64]) -> Result<(), PlotError> {
    let (Some(&t_first), Some(&t_last)) = (times.first(), times.last()) else {
        return Err(PlotError::Empty(format!("unit {}", summary.unit_id)));
    };
    let num_channels = summary.template.ncols();
    let span = t_last - t_first;
    // channels are laid out one after another along x
    let x_of = |ch: usize, t: f64| t + ch as f64 * (span * 1.2);
    let x_max = x_of(num_channels.saturating_sub(1), t_last);

    let root = BitMapBackend::new(path, DIAGNOSTIC_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(drawing_error)?;
    let (left, right) = root.split_horizontally(DIAGNOSTIC_SIZE.0 / 2);

    let (lo, hi) = value_range(summary.waveforms.iter().copied());
    let mut chart = ChartBuilder::on(&left)
        .caption(format!("Spike Waveforms for Unit {}", summary.unit_id), ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(t_first..x_max, lo..hi)
        .map_err(drawing_error)?;
    chart.configure_mesh().x_desc("Time (ms)").draw().map_err(drawing_error)?;
    for waveform in summary.waveforms.outer_iter() {
        for ch in 0..num_channels {
            let points = times
                .iter()
                .zip(waveform.column(ch))
                .map(|(&t, &v)| (x_of(ch, t), f64::from(v)));
            chart
                .draw_series(LineSeries::new(points, RGBAColor(70, 70, 70, 0.2)))
                .map_err(drawing_error)?;
        }
    }

    let (lo, hi) = value_range(summary.template.iter().copied());
    let mut chart = ChartBuilder::on(&right)
        .caption(format!("Spike Template for Unit {}", summary.unit_id), ("sans-serif", 18))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d(t_first..x_max, lo..hi)
        .map_err(drawing_error)?;
    chart.configure_mesh().x_desc("Time (ms)").draw().map_err(drawing_error)?;
    for ch in 0..num_channels {
        let points = times
            .iter()
            .zip(summary.template.column(ch))
            .map(|(&t, &v)| (x_of(ch, t), f64::from(v)));
        chart
            .draw_series(LineSeries::new(points, block_color(ch).stroke_width(2)))
            .map_err(drawing_error)?;
    }

    root.present().map_err(drawing_error)
}
