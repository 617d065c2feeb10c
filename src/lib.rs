#![warn(clippy::all, rust_2018_idioms)]

//! Spike sorting front-end and raster reporting for extracellular recordings.
//!
//! Two tools share this library:
//! - the `spikeraster` window collects sorting parameters, preprocesses an
//!   Open Ephys recording, sorts it and exports one spike train per unit;
//! - the `raster` command bins spike timestamps from a workbook into fixed
//!   time blocks, writes a spike-count table and draws one raster per unit.

mod app;
pub use app::SortingApp;

use ndarray::Array2;

pub mod analyzer;
pub mod binning;
pub mod cache;
pub mod channels;
pub mod config;
pub mod error;
pub mod openephys;
pub mod pipeline;
pub mod plots;
pub mod preprocess;
pub mod raster;
pub mod sorter;
pub mod workbook;

use channels::{ChannelLocation, broadcast_locations};
use error::ChannelLocationError;

/// A multi-channel recording held in memory.
#[derive(Debug, Clone)]
pub struct Recording {
    pub channel_ids: Vec<String>,
    pub sampling_frequency: f64,
    /// Time of the first sample, in seconds.
    pub start_time_sec: f64,
    /// Samples × channels.
    pub traces: Array2<f32>,
    pub locations: Vec<ChannelLocation>,
}

impl Recording {
    pub fn new(channel_ids: Vec<String>, sampling_frequency: f64, traces: Array2<f32>) -> Self {
        let locations = vec![ChannelLocation::default(); channel_ids.len()];
        Self {
            channel_ids,
            sampling_frequency,
            start_time_sec: 0.0,
            traces,
            locations,
        }
    }

    pub fn num_channels(&self) -> usize {
        self.traces.ncols()
    }

    pub fn num_samples(&self) -> usize {
        self.traces.nrows()
    }

    pub fn duration_sec(&self) -> f64 {
        self.num_samples() as f64 / self.sampling_frequency
    }

    /// Assigns electrode geometry, broadcasting a single location to all channels.
    pub fn set_locations(&mut self, locations: &[ChannelLocation]) -> Result<(), ChannelLocationError> {
        self.locations = broadcast_locations(locations, self.num_channels())?;
        Ok(())
    }

    /// Keeps only the named channels, in the order given.
    pub fn select_channels(&self, ids: &[&str]) -> Result<Self, ChannelLocationError> {
        let indices = ids
            .iter()
            .map(|id| {
                self.channel_ids
                    .iter()
                    .position(|c| c == id)
                    .ok_or_else(|| ChannelLocationError::UnknownChannel((*id).to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            channel_ids: indices.iter().map(|&i| self.channel_ids[i].clone()).collect(),
            sampling_frequency: self.sampling_frequency,
            start_time_sec: self.start_time_sec,
            traces: self.traces.select(ndarray::Axis(1), &indices),
            locations: indices.iter().map(|&i| self.locations[i]).collect(),
        })
    }

    /// Same channels and timing, new samples.
    pub fn with_traces(&self, traces: Array2<f32>) -> Self {
        Self {
            channel_ids: self.channel_ids.clone(),
            sampling_frequency: self.sampling_frequency,
            start_time_sec: self.start_time_sec,
            traces,
            locations: self.locations.clone(),
        }
    }

    pub fn channel(&self, index: usize) -> Vec<f32> {
        self.traces.column(index).to_vec()
    }
}

/// Builds a samples × channels array from per-channel vectors of equal length.
pub fn columns_to_array(columns: &[Vec<f32>]) -> Array2<f32> {
    let num_samples = columns.first().map_or(0, Vec::len);
    Array2::from_shape_fn((num_samples, columns.len()), |(t, ch)| columns[ch][t])
}
