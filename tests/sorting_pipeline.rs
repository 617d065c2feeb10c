use std::fs::File;
use std::io::Read;

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;
use zip::ZipArchive;

use spikeraster::Recording;
use spikeraster::channels::ChannelLocation;
use spikeraster::config::SortingConfig;
use spikeraster::error::{ChannelLocationError, PipelineError};
use spikeraster::pipeline::{preprocess, sort_recording};
use spikeraster::preprocess::ScaleOutcome;
use spikeraster::sorter::TemplateSorter;
use spikeraster::workbook::read_unit_sheets;

const FS: f64 = 30000.0;

/// Trough samples of the spikes added to CH4, one every 20 ms.
fn planted_peaks(n: usize) -> Vec<usize> {
    let period = (0.02 * FS) as usize;
    (0..)
        .map(|i| period / 2 + i * period)
        .take_while(|peak| peak + 20 < n)
        .collect()
}

/// Uniform noise on two channels with a biphasic spike on CH4 every 20 ms.
fn synthetic_recording(seconds: f64) -> Recording {
    let n = (seconds * FS) as usize;
    let mut rng = StdRng::seed_from_u64(7);
    let mut traces = Array2::from_shape_fn((n, 2), |_| rng.gen_range(-1.0_f32..1.0));

    for peak in planted_peaks(n) {
        for k in 0..30 {
            let t = k as f32 - 10.0;
            let shape = -40.0 * (-(t * t) / 8.0).exp() + 15.0 * (-((t - 8.0) * (t - 8.0)) / 18.0).exp();
            traces[[peak - 10 + k, 1]] += shape;
        }
    }

    let mut recording = Recording::new(vec!["CH1".to_owned(), "CH4".to_owned()], FS, traces);
    recording.start_time_sec = 2.0;
    recording
}

#[test]
fn preprocessing_doubles_the_rate() {
    let recording = synthetic_recording(0.2);
    let selected = recording.select_channels(&["CH4"]).unwrap();
    let (processed, scale) = preprocess(&selected, &SortingConfig::default()).unwrap();

    assert_eq!(processed.sampling_frequency, 2.0 * FS);
    assert_eq!(processed.num_samples(), 2 * selected.num_samples());
    assert_eq!(processed.channel_ids, vec!["CH4"]);
    assert!(matches!(scale, ScaleOutcome::Scaled { .. }));
}

#[test]
fn sorted_spike_trains_are_exported_in_absolute_seconds() {
    let dir = tempdir().unwrap();
    let config = SortingConfig {
        output_path: dir.path().join("spike_data.xlsx"),
        plot_dir: None,
        ..SortingConfig::default()
    };

    let recording = synthetic_recording(0.5);
    let report = sort_recording(recording, &config, &TemplateSorter::default()).unwrap();
    assert_eq!(report.start_time_sec, 2.0);
    assert_eq!(report.summaries.len(), report.sorting.units.len());
    assert!(report.plots.is_empty());

    assert!(!report.sorting.units.is_empty());

    let accepted = vec!["Timestamp (s)".to_owned()];
    let load = read_unit_sheets(&config.output_path, &accepted).unwrap();
    assert!(load.skipped.is_empty());
    assert_eq!(load.units.len(), report.sorting.units.len());
    for (sheet, unit) in load.units.iter().zip(&report.sorting.units) {
        assert_eq!(sheet.unit, format!("Unit_{}", unit.id));
        let expected_ms: Vec<f64> = report
            .sorting
            .spike_times(unit, 2.0)
            .iter()
            .map(|s| s * 1000.0)
            .collect();
        assert_eq!(sheet.timestamps_ms.len(), expected_ms.len());
        for (ms, want) in sheet.timestamps_ms.iter().zip(&expected_ms) {
            assert!((ms - want).abs() < 1e-9, "{ms} != {want}");
            assert!((2000.0..2500.0).contains(ms), "spike at {ms} ms");
        }
    }

    let exported: Vec<f64> = load
        .units
        .iter()
        .flat_map(|u| u.timestamps_ms.iter().copied())
        .collect();
    for peak in planted_peaks((0.5 * FS) as usize) {
        let planted_ms = 2000.0 + peak as f64 * 1000.0 / FS;
        assert!(
            exported.iter().any(|ms| (ms - planted_ms).abs() <= 0.5),
            "spike planted at {planted_ms} ms was not exported"
        );
    }

    let mut archive = ZipArchive::new(File::open(&config.output_path).unwrap()).unwrap();
    let mut styles = String::new();
    archive
        .by_name("xl/styles.xml")
        .unwrap()
        .read_to_string(&mut styles)
        .unwrap();
    assert!(styles.contains(r#"formatCode="0.000000000""#), "{styles}");
}

#[test]
fn unknown_channel_stops_the_run() {
    let dir = tempdir().unwrap();
    let config = SortingConfig {
        channel_id: "CH9".to_owned(),
        output_path: dir.path().join("spike_data.xlsx"),
        plot_dir: None,
        ..SortingConfig::default()
    };

    let err = sort_recording(synthetic_recording(0.1), &config, &TemplateSorter::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ChannelLocations(ChannelLocationError::UnknownChannel(_))
    ));
    assert!(!config.output_path.exists());
}

#[test]
fn location_count_must_match_channels() {
    let dir = tempdir().unwrap();
    let config = SortingConfig {
        channel_locations: vec![
            ChannelLocation::new(0.0, 0.0),
            ChannelLocation::new(0.0, 25.0),
            ChannelLocation::new(0.0, 50.0),
        ],
        output_path: dir.path().join("spike_data.xlsx"),
        plot_dir: None,
        ..SortingConfig::default()
    };

    let err = sort_recording(synthetic_recording(0.1), &config, &TemplateSorter::default()).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::ChannelLocations(ChannelLocationError::CountMismatch { locations: 3, channels: 2 })
    ));
}
