//! Error types for loading, sorting and reporting.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading an Open Ephys recording directory.
#[derive(Error, Debug)]
pub enum OpenEphysError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording directory not found: {0}")]
    NotFound(PathBuf),

    #[error("no .continuous files in {0}")]
    NoContinuousFiles(PathBuf),

    #[error("invalid header in {path}: {reason}")]
    InvalidHeader { path: PathBuf, reason: String },

    #[error("corrupt record {record} in {path}: {reason}")]
    CorruptRecord {
        path: PathBuf,
        record: usize,
        reason: String,
    },

    #[error("channels disagree on {0}")]
    InconsistentChannels(String),
}

/// Errors raised by channel geometry parsing and assignment.
#[derive(Error, Debug, PartialEq)]
pub enum ChannelLocationError {
    #[error("Invalid format for channel locations at '{entry}'. Use 'x1,y1; x2,y2; ...'")]
    Format { entry: String },

    #[error("{locations} channel locations given for {channels} channels")]
    CountMismatch { locations: usize, channels: usize },

    #[error("channel '{0}' not found in recording")]
    UnknownChannel(String),
}

/// Errors raised by the preprocessing chain.
#[derive(Error, Debug, PartialEq)]
pub enum PreprocessError {
    #[error("invalid band {low}-{high} Hz for sampling rate {fs} Hz")]
    InvalidBand { low: f64, high: f64, fs: f64 },

    #[error("recording has {samples} samples, filter needs more than {required}")]
    TooShort { samples: usize, required: usize },

    #[error("recording has no samples")]
    EmptyRecording,

    #[error("invalid resampling rate {0} Hz")]
    InvalidRate(f64),

    #[error("whitening failed: {0}")]
    Whitening(String),
}

/// Errors raised by the spike sorter.
#[derive(Error, Debug, PartialEq)]
pub enum SortError {
    #[error("invalid sorting parameter: {0}")]
    InvalidParameter(String),

    #[error("recording has no channels")]
    NoChannels,
}

/// Errors raised while reading or writing spreadsheets.
#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read workbook '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: calamine::Error,
    },

    #[error("failed to write workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
}

/// Errors raised while rendering figures.
#[derive(Error, Debug)]
pub enum PlotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Plotting error: {0}")]
    Drawing(String),

    #[error("nothing to plot for {0}")]
    Empty(String),
}

/// Errors raised while turning user input into a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value '{value}' for {field}")]
    InvalidField { field: &'static str, value: String },

    #[error("Please select an Open Ephys file.")]
    MissingRecording,

    #[error(transparent)]
    ChannelLocations(#[from] ChannelLocationError),
}

/// Errors raised by the binning and reporting pipeline.
#[derive(Error, Debug)]
pub enum RasterError {
    #[error("No valid data found in the Excel file. Please check the input sheets.")]
    EmptyDataset,

    #[error("block size must be a positive number of milliseconds, got {0}")]
    InvalidBlockSize(f64),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),

    #[error(transparent)]
    Plot(#[from] PlotError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Any failure of a spike sorting run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    OpenEphys(#[from] OpenEphysError),

    #[error(transparent)]
    ChannelLocations(#[from] ChannelLocationError),

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Sort(#[from] SortError),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),

    #[error(transparent)]
    Plot(#[from] PlotError),

    #[error("recording cache failed: {0}")]
    Cache(#[source] std::io::Error),
}
