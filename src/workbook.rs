//! Spreadsheet input and output.
//!
//! Input workbooks hold one sheet per unit with a timestamp column in
//! seconds. Outputs are the spike-count table and the per-unit spike trains
//! exported after sorting.

use std::fs;
use std::path::Path;

use calamine::{Data, Reader, open_workbook_auto};
use log::{info, warn};
use rust_xlsxwriter::{Format, Workbook};

use crate::binning::{SpikeCount, UnitSpikes};
use crate::error::WorkbookError;
use crate::sorter::Sorting;

pub const SPIKE_TIME_FORMAT: &str = "0.000000000";
pub const SPIKE_TIME_COLUMN: &str = "Timestamp (s)";

/// A sheet left out of the analysis and why.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSheet {
    pub name: String,
    pub reason: String,
}

/// Valid units in workbook order, plus the sheets that failed validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SheetLoad {
    pub units: Vec<UnitSpikes>,
    pub skipped: Vec<SkippedSheet>,
}

fn cell_to_f64(cell: &Data) -> Option<f64> {
    match cell {
        Data::Float(v) => Some(*v),
        Data::Int(v) => Some(*v as f64),
        Data::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn header_name(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.trim().to_owned(),
        Data::Empty => String::new(),
        other => other.to_string().trim().to_owned(),
    }
}

/// Finds the timestamp column of a sheet, comparing trimmed header names.
pub fn find_timestamp_column(header: &[Data], accepted: &[String]) -> Option<usize> {
    let names: Vec<String> = header.iter().map(header_name).collect();
    accepted
        .iter()
        .find_map(|wanted| names.iter().position(|name| name == wanted.trim()))
}

/// Reads every sheet, turning timestamps from seconds into milliseconds.
///
/// Sheets without an accepted timestamp column are skipped, not fatal.
pub fn read_unit_sheets(path: &Path, timestamp_columns: &[String]) -> Result<SheetLoad, WorkbookError> {
    let read_error = |source| WorkbookError::Read {
        path: path.display().to_string(),
        source,
    };
    let mut workbook = open_workbook_auto(path).map_err(read_error)?;
    let mut load = SheetLoad::default();

    for name in workbook.sheet_names() {
        info!("Processing sheet: {name}");
        let range = workbook.worksheet_range(&name).map_err(read_error)?;
        let mut rows = range.rows();

        let column = rows
            .next()
            .and_then(|header| find_timestamp_column(header, timestamp_columns));
        let Some(column) = column else {
            warn!("Sheet '{name}' does not have the required 'Timestamp' column.");
            load.skipped.push(SkippedSheet {
                name,
                reason: format!("missing column, expected one of {timestamp_columns:?}"),
            });
            continue;
        };

        let mut timestamps_ms = Vec::new();
        let mut unreadable = 0;
        for row in rows {
            match row.get(column) {
                None | Some(Data::Empty) => {}
                Some(cell) => match cell_to_f64(cell) {
                    Some(seconds) if seconds.is_finite() => timestamps_ms.push(seconds * 1000.0),
                    _ => unreadable += 1,
                },
            }
        }
        if unreadable > 0 {
            warn!("Sheet '{name}': {unreadable} non-numeric timestamps ignored");
        }

        load.units.push(UnitSpikes {
            unit: name,
            timestamps_ms,
        });
    }

    Ok(load)
}

fn ensure_parent_dirs(path: &Path) -> Result<(), WorkbookError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Writes the `Unit, Block, Spike_Count, Total_Spikes` table.
pub fn write_spike_counts(path: &Path, counts: &[SpikeCount]) -> Result<(), WorkbookError> {
    ensure_parent_dirs(path)?;
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Spike_Counts")?;

    for (col, title) in ["Unit", "Block", "Spike_Count", "Total_Spikes"].iter().enumerate() {
        sheet.write_string(0, col as u16, *title)?;
    }
    for (i, row) in counts.iter().enumerate() {
        let r = (i + 1) as u32;
        sheet.write_string(r, 0, &row.unit)?;
        sheet.write_number(r, 1, row.block as f64)?;
        sheet.write_number(r, 2, row.count as f64)?;
        sheet.write_number(r, 3, row.total as f64)?;
    }

    workbook.save(path)?;
    info!("Spike counts saved to {}", path.display());
    Ok(())
}

/// Writes one `Unit_<id>` sheet per unit with absolute spike times in seconds.
pub fn write_spike_trains(path: &Path, sorting: &Sorting, start_time_sec: f64) -> Result<(), WorkbookError> {
    ensure_parent_dirs(path)?;
    let mut workbook = Workbook::new();
    let time_format = Format::new().set_num_format(SPIKE_TIME_FORMAT);

    for unit in &sorting.units {
        let sheet = workbook.add_worksheet();
        sheet.set_name(format!("Unit_{}", unit.id))?;
        sheet.write_string(0, 0, "Unit")?;
        sheet.write_string(0, 1, SPIKE_TIME_COLUMN)?;
        for (i, time) in sorting.spike_times(unit, start_time_sec).into_iter().enumerate() {
            let r = (i + 1) as u32;
            sheet.write_number(r, 0, f64::from(unit.id))?;
            sheet.write_number_with_format(r, 1, time, &time_format)?;
        }
    }
    if sorting.units.is_empty() {
        // a workbook needs at least one sheet
        workbook.add_worksheet().set_name("No_Units")?;
    }

    workbook.save(path)?;
    info!(
        "Spike trains of {} units saved to {}",
        sorting.units.len(),
        path.display()
    );
    Ok(())
}
