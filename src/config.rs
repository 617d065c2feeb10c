//! Configuration for the sorting front-end and the raster report.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::channels::{ChannelLocation, parse_channel_locations};
use crate::error::ConfigError;
use crate::sorter::SortingParameters;

/// Text fields of the sorting form, exactly as typed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingForm {
    pub recording_dir: String,
    pub snr_ratio: String,
    pub detect_sign: String,
    pub phase1_detect_threshold: String,
    pub detect_threshold: String,
    pub channel_radius: String,
    pub time_radius_msec: String,
    pub block_duration_sec: String,
    pub detect_channel_radius: String,
    pub detect_time_radius_msec: String,
    pub channel_locations: String,
    pub channel_id: String,
    pub output_path: String,
    pub plot_dir: String,
}

impl Default for SortingForm {
    fn default() -> Self {
        Self::from(&SortingConfig::default())
    }
}

impl From<&SortingConfig> for SortingForm {
    fn from(config: &SortingConfig) -> Self {
        let params = &config.parameters;
        Self {
            recording_dir: config.recording_dir.display().to_string(),
            snr_ratio: config.snr_ratio.to_string(),
            detect_sign: params.detect_sign.to_string(),
            phase1_detect_threshold: params.phase1_detect_threshold.to_string(),
            detect_threshold: params.detect_threshold.to_string(),
            channel_radius: params.phase1_detect_channel_radius.to_string(),
            time_radius_msec: params.phase1_detect_time_radius_msec.to_string(),
            block_duration_sec: params.block_duration_sec.to_string(),
            detect_channel_radius: params.detect_channel_radius.to_string(),
            detect_time_radius_msec: params.detect_time_radius_msec.to_string(),
            channel_locations: config
                .channel_locations
                .iter()
                .map(|loc| format!("{},{}", loc.x, loc.y))
                .collect::<Vec<_>>()
                .join("; "),
            channel_id: config.channel_id.clone(),
            output_path: config.output_path.display().to_string(),
            plot_dir: config
                .plot_dir
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
        }
    }
}

fn field<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidField {
        field: name,
        value: value.to_owned(),
    })
}

impl SortingForm {
    /// Validates every field and freezes them into a [`SortingConfig`].
    pub fn to_config(&self) -> Result<SortingConfig, ConfigError> {
        let recording_dir = self.recording_dir.trim();
        if recording_dir.is_empty() {
            return Err(ConfigError::MissingRecording);
        }

        let channel_locations = parse_channel_locations(&self.channel_locations)?;

        let parameters = SortingParameters {
            detect_sign: field("Detect Sign", &self.detect_sign)?,
            phase1_detect_threshold: field("Phase1 Detect Threshold", &self.phase1_detect_threshold)?,
            detect_threshold: field("Detect Threshold", &self.detect_threshold)?,
            phase1_detect_channel_radius: field("Channel Radius", &self.channel_radius)?,
            detect_channel_radius: field("Detect Channel Radius", &self.detect_channel_radius)?,
            phase1_detect_time_radius_msec: field("Time Radius (msec)", &self.time_radius_msec)?,
            detect_time_radius_msec: field("Detect Time Radius (msec)", &self.detect_time_radius_msec)?,
            block_duration_sec: field("Block Duration (sec)", &self.block_duration_sec)?,
        };
        if !matches!(parameters.detect_sign, -1..=1) {
            return Err(ConfigError::InvalidField {
                field: "Detect Sign",
                value: self.detect_sign.clone(),
            });
        }

        let channel_id = self.channel_id.trim();
        if channel_id.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "Channel",
                value: self.channel_id.clone(),
            });
        }

        let output_path = self.output_path.trim();
        if output_path.is_empty() {
            return Err(ConfigError::InvalidField {
                field: "Output File",
                value: self.output_path.clone(),
            });
        }

        let plot_dir = Some(self.plot_dir.trim())
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from);

        Ok(SortingConfig {
            recording_dir: PathBuf::from(recording_dir),
            snr_ratio: field("SNR Ratio", &self.snr_ratio)?,
            parameters,
            channel_locations,
            channel_id: channel_id.to_owned(),
            output_path: PathBuf::from(output_path),
            plot_dir,
            ..SortingConfig::default()
        })
    }
}

/// Everything one sorting run needs; built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortingConfig {
    pub recording_dir: PathBuf,
    pub snr_ratio: f64,
    pub parameters: SortingParameters,
    pub channel_locations: Vec<ChannelLocation>,
    pub channel_id: String,
    pub freq_min: f64,
    pub freq_max: f64,
    /// Resampled rate as a multiple of the original one.
    pub resample_factor: f64,
    pub output_path: PathBuf,
    pub plot_dir: Option<PathBuf>,
}

impl Default for SortingConfig {
    fn default() -> Self {
        Self {
            recording_dir: PathBuf::new(),
            snr_ratio: 3.0,
            parameters: SortingParameters::default(),
            channel_locations: vec![ChannelLocation::new(0.0, 0.0)],
            channel_id: "CH4".to_owned(),
            freq_min: 300.0,
            freq_max: 6000.0,
            resample_factor: 2.0,
            output_path: PathBuf::from("spike_data_GUI.xlsx"),
            plot_dir: Some(PathBuf::from("sorting_plots")),
        }
    }
}

/// Settings of the raster report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterConfig {
    /// Width of one time block in milliseconds.
    #[serde(default = "default_block_size_ms")]
    pub block_size_ms: f64,

    /// Folder receiving one raster image per unit.
    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,

    /// Marker radius in pixels.
    #[serde(default = "default_marker_size")]
    pub marker_size: u32,

    #[serde(default = "default_counts_file")]
    pub spike_counts_file: PathBuf,

    /// Accepted names for the timestamp column, compared after trimming.
    #[serde(default = "default_timestamp_columns")]
    pub timestamp_columns: Vec<String>,

    #[serde(default = "default_render_plots")]
    pub render_plots: bool,
}

fn default_block_size_ms() -> f64 {
    500.0
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("plots")
}

fn default_marker_size() -> u32 {
    1
}

fn default_counts_file() -> PathBuf {
    PathBuf::from("spike_counts.xlsx")
}

fn default_timestamp_columns() -> Vec<String> {
    vec!["Timestamp".to_owned(), "Timestamp (s)".to_owned()]
}

fn default_render_plots() -> bool {
    true
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            block_size_ms: default_block_size_ms(),
            output_folder: default_output_folder(),
            marker_size: default_marker_size(),
            spike_counts_file: default_counts_file(),
            timestamp_columns: default_timestamp_columns(),
            render_plots: default_render_plots(),
        }
    }
}

impl RasterConfig {
    pub fn from_yaml(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelLocationError;

    fn filled_form() -> SortingForm {
        SortingForm {
            recording_dir: "/data/session1".to_owned(),
            ..SortingForm::default()
        }
    }

    #[test]
    fn form_defaults_match_front_end_fields() {
        let form = SortingForm::default();
        assert_eq!(form.snr_ratio, "3");
        assert_eq!(form.detect_sign, "0");
        assert_eq!(form.phase1_detect_threshold, "3.5");
        assert_eq!(form.detect_threshold, "2.5");
        assert_eq!(form.channel_radius, "200");
        assert_eq!(form.time_radius_msec, "0.8");
        assert_eq!(form.block_duration_sec, "600");
        assert_eq!(form.detect_channel_radius, "30");
        assert_eq!(form.detect_time_radius_msec, "0.8");
        assert_eq!(form.channel_locations, "0,0");
        assert!(form.recording_dir.is_empty());
    }

    #[test]
    fn default_form_round_trips_into_default_config() {
        let config = filled_form().to_config().unwrap();
        let expected = SortingConfig {
            recording_dir: PathBuf::from("/data/session1"),
            ..SortingConfig::default()
        };
        assert_eq!(config, expected);
    }

    #[test]
    fn missing_recording_is_reported_first() {
        let err = SortingForm::default().to_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingRecording));
    }

    #[test]
    fn malformed_locations_fail_validation() {
        let form = SortingForm {
            channel_locations: "1,2,3".to_owned(),
            ..filled_form()
        };
        let err = form.to_config().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ChannelLocations(ChannelLocationError::Format { .. })
        ));
    }

    #[test]
    fn non_numeric_field_names_the_field() {
        let form = SortingForm {
            channel_radius: "wide".to_owned(),
            ..filled_form()
        };
        match form.to_config().unwrap_err() {
            ConfigError::InvalidField { field, value } => {
                assert_eq!(field, "Channel Radius");
                assert_eq!(value, "wide");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn detect_sign_is_limited_to_three_values() {
        let form = SortingForm {
            detect_sign: "2".to_owned(),
            ..filled_form()
        };
        assert!(form.to_config().is_err());
        let form = SortingForm {
            detect_sign: " -1 ".to_owned(),
            ..filled_form()
        };
        assert_eq!(form.to_config().unwrap().parameters.detect_sign, -1);
    }

    #[test]
    fn empty_plot_dir_disables_figures() {
        let form = SortingForm {
            plot_dir: "  ".to_owned(),
            ..filled_form()
        };
        assert_eq!(form.to_config().unwrap().plot_dir, None);
    }

    #[test]
    fn raster_yaml_fills_missing_fields() {
        let config: RasterConfig = serde_yaml::from_str("block_size_ms: 250\nrender_plots: false\n").unwrap();
        assert_eq!(config.block_size_ms, 250.0);
        assert!(!config.render_plots);
        assert_eq!(config.marker_size, 1);
        assert_eq!(config.spike_counts_file, PathBuf::from("spike_counts.xlsx"));
    }
}
