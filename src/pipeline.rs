//! One complete spike sorting run, from the raw recording directory to the
//! exported spike trains and diagnostics.

use std::path::PathBuf;

use log::info;

use crate::Recording;
use crate::analyzer::{UnitSummary, analyze};
use crate::cache::CachedRecording;
use crate::config::SortingConfig;
use crate::error::PipelineError;
use crate::openephys;
use crate::plots::render_unit_diagnostics;
use crate::preprocess::{ScaleOutcome, bandpass_filter, ensure_snr, resample, whiten};
use crate::sorter::{Sorter, Sorting};
use crate::workbook::write_spike_trains;

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct SortingReport {
    pub sorting: Sorting,
    pub start_time_sec: f64,
    pub scale: ScaleOutcome,
    pub summaries: Vec<UnitSummary>,
    pub output_path: PathBuf,
    pub plots: Vec<PathBuf>,
}

/// Filter, whiten, normalise and resample the selected channel.
pub fn preprocess(recording: &Recording, config: &SortingConfig) -> Result<(Recording, ScaleOutcome), PipelineError> {
    let filtered = bandpass_filter(recording, config.freq_min, config.freq_max)?;
    let whitened = whiten(&filtered)?;
    let (scaled, scale) = ensure_snr(&whitened, config.snr_ratio);
    // the sorter runs at a multiple of the acquisition rate, rounded down to whole hertz
    let rate = (config.resample_factor * recording.sampling_frequency).trunc();
    let resampled = resample(&scaled, rate)?;
    Ok((resampled, scale))
}

/// Sorts an already loaded recording.
pub fn sort_recording(
    mut recording: Recording,
    config: &SortingConfig,
    sorter: &dyn Sorter,
) -> Result<SortingReport, PipelineError> {
    recording.set_locations(&config.channel_locations)?;
    let selected = recording.select_channels(&[config.channel_id.as_str()])?;
    info!(
        "Sorting channel {} of {} ({} samples at {} Hz)",
        config.channel_id,
        recording.num_channels(),
        selected.num_samples(),
        selected.sampling_frequency
    );

    let (processed, scale) = preprocess(&selected, config)?;

    let cache = CachedRecording::create(&processed).map_err(PipelineError::Cache)?;
    let sorting = sorter.sort(cache.recording(), &config.parameters)?;
    let summaries = analyze(cache.recording(), &sorting);
    cache.close();

    write_spike_trains(&config.output_path, &sorting, recording.start_time_sec)?;

    let plots = match &config.plot_dir {
        Some(dir) => summaries
            .iter()
            .filter(|s| s.waveforms.shape()[0] > 0)
            .map(|s| render_unit_diagnostics(s, dir))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };

    Ok(SortingReport {
        sorting,
        start_time_sec: recording.start_time_sec,
        scale,
        summaries,
        output_path: config.output_path.clone(),
        plots,
    })
}

/// Loads the configured recording and sorts it.
pub fn run_spike_sorting(config: &SortingConfig, sorter: &dyn Sorter) -> Result<SortingReport, PipelineError> {
    info!("Reading Open Ephys recording from {}", config.recording_dir.display());
    let recording = openephys::read_recording(&config.recording_dir)?;
    sort_recording(recording, config, sorter)
}
