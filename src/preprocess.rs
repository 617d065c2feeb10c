//! Signal conditioning applied before sorting: band-pass filtering,
//! whitening, gain normalisation and resampling.

use std::cmp::Ordering;

use log::{debug, info, warn};
use nalgebra::DMatrix;
use ndarray::{Array2, Axis};
use num_traits::Float;
use rayon::prelude::*;
use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use sci_rs::signal::filter::design::{
    DigitalFilter, FilterBandType, FilterOutputType, butter_dyn,
};
use sci_rs::signal::filter::sosfiltfilt_dyn;

use crate::error::PreprocessError;
use crate::{Recording, columns_to_array};

pub const FILTER_ORDER: usize = 5;
/// Converts the median absolute value of Gaussian noise to its standard deviation.
pub const MAD_SCALE: f64 = 0.6745;
const WHITENING_EPS: f64 = 1e-8;

/// Zero-phase Butterworth band-pass applied to every channel.
pub fn bandpass_filter(
    recording: &Recording,
    freq_min: f64,
    freq_max: f64,
) -> Result<Recording, PreprocessError> {
    let fs = recording.sampling_frequency;
    if !(freq_min > 0.0 && freq_min < freq_max && freq_max < fs / 2.0) {
        return Err(PreprocessError::InvalidBand {
            low: freq_min,
            high: freq_max,
            fs,
        });
    }

    let filter = butter_dyn(
        FILTER_ORDER,
        vec![freq_min, freq_max],
        Some(FilterBandType::Bandpass),
        Some(false),
        Some(FilterOutputType::Sos),
        Some(fs),
    );
    let DigitalFilter::Sos(sos) = filter else {
        return Err(PreprocessError::InvalidBand {
            low: freq_min,
            high: freq_max,
            fs,
        });
    };

    // forward-backward filtering pads both ends with an odd extension
    let required = 3 * (2 * sos.sos.len() + 1);
    let samples = recording.num_samples();
    if samples <= required {
        return Err(PreprocessError::TooShort { samples, required });
    }

    debug!(
        "Band-pass {freq_min}-{freq_max} Hz, {} sections, {} channels",
        sos.sos.len(),
        recording.num_channels()
    );

    let columns: Vec<Vec<f32>> = (0..recording.num_channels())
        .into_par_iter()
        .map(|ch| {
            let input: Vec<f64> = recording
                .traces
                .column(ch)
                .iter()
                .map(|&v| f64::from(v))
                .collect();
            let filtered: Vec<f64> = sosfiltfilt_dyn(input.iter(), &sos.sos);
            filtered.into_iter().map(|v| v as f32).collect()
        })
        .collect();

    Ok(recording.with_traces(columns_to_array(&columns)))
}

/// Global ZCA whitening: decorrelates channels and brings them to unit variance.
pub fn whiten(recording: &Recording) -> Result<Recording, PreprocessError> {
    let n = recording.num_samples();
    let c = recording.num_channels();
    if n == 0 || c == 0 {
        return Err(PreprocessError::EmptyRecording);
    }

    let traces = recording.traces.mapv(f64::from);
    let means = traces
        .mean_axis(Axis(0))
        .ok_or(PreprocessError::EmptyRecording)?;
    let centered = &traces - &means;
    let cov = centered.t().dot(&centered) / n as f64;

    let cov = DMatrix::from_fn(c, c, |i, j| cov[[i, j]]);
    let eigen = cov.symmetric_eigen();
    if eigen.eigenvalues.iter().any(|l| !l.is_finite()) {
        return Err(PreprocessError::Whitening(
            "covariance has non-finite eigenvalues".to_owned(),
        ));
    }
    let scale = DMatrix::from_diagonal(
        &eigen
            .eigenvalues
            .map(|l| 1.0 / (l.max(0.0) + WHITENING_EPS).sqrt()),
    );
    let w = &eigen.eigenvectors * scale * eigen.eigenvectors.transpose();
    let w = Array2::from_shape_fn((c, c), |(i, j)| w[(i, j)]);

    let whitened = centered.dot(&w).mapv(|v| v as f32);
    Ok(recording.with_traces(whitened))
}

/// Median of a slice; the mean of the two middle values for even lengths.
pub fn median<T: Float>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        let two = T::one() + T::one();
        Some((values[mid - 1] + values[mid]) / two)
    } else {
        Some(values[mid])
    }
}

/// Per-channel noise level, `median(|x| / 0.6745)`.
pub fn estimate_noise_levels(recording: &Recording) -> Vec<f64> {
    recording
        .traces
        .axis_iter(Axis(1))
        .map(|column| {
            let mut scaled: Vec<f64> = column
                .iter()
                .map(|&v| f64::from(v).abs() / MAD_SCALE)
                .collect();
            median(&mut scaled).unwrap_or(0.0)
        })
        .collect()
}

/// What [`ensure_snr`] did to the recording.
#[derive(Debug, Clone, PartialEq)]
pub enum ScaleOutcome {
    Scaled { gains: Vec<f64> },
    /// At least one channel had zero noise, so the recording was left untouched.
    Skipped { noise_levels: Vec<f64> },
}

/// Scales each channel by `snr_target / noise_level`.
pub fn ensure_snr(recording: &Recording, snr_target: f64) -> (Recording, ScaleOutcome) {
    let noise_levels = estimate_noise_levels(recording);
    if noise_levels.iter().any(|&level| level == 0.0) {
        warn!("Zero noise level detected. Scaling skipped.");
        return (recording.clone(), ScaleOutcome::Skipped { noise_levels });
    }

    let gains: Vec<f64> = noise_levels.iter().map(|level| snr_target / level).collect();
    info!("Channel gains for SNR {snr_target}: {gains:?}");

    let mut traces = recording.traces.clone();
    for (mut column, gain) in traces.axis_iter_mut(Axis(1)).zip(&gains) {
        column.mapv_inplace(|v| (f64::from(v) * gain) as f32);
    }
    (recording.with_traces(traces), ScaleOutcome::Scaled { gains })
}

/// Fourier-domain resampling of every channel to `new_rate` Hz.
pub fn resample(recording: &Recording, new_rate: f64) -> Result<Recording, PreprocessError> {
    if !(new_rate.is_finite() && new_rate > 0.0) {
        return Err(PreprocessError::InvalidRate(new_rate));
    }
    let n = recording.num_samples();
    if n == 0 {
        return Err(PreprocessError::EmptyRecording);
    }
    let m = ((n as f64) * new_rate / recording.sampling_frequency).round() as usize;
    if m == 0 {
        return Err(PreprocessError::InvalidRate(new_rate));
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(n);
    let inverse = planner.plan_fft_inverse(m);

    let columns: Vec<Vec<f32>> = (0..recording.num_channels())
        .into_par_iter()
        .map(|ch| {
            let mut spectrum: Vec<Complex<f64>> = recording
                .traces
                .column(ch)
                .iter()
                .map(|&v| Complex::new(f64::from(v), 0.0))
                .collect();
            forward.process(&mut spectrum);
            let mut out = resize_spectrum(&spectrum, m);
            inverse.process(&mut out);
            out.iter().map(|z| (z.re / n as f64) as f32).collect()
        })
        .collect();

    debug!(
        "Resampled {} -> {} Hz ({n} -> {m} samples)",
        recording.sampling_frequency, new_rate
    );

    let mut resampled = recording.with_traces(columns_to_array(&columns));
    resampled.sampling_frequency = new_rate;
    Ok(resampled)
}

/// Moves the spectrum of an `x.len()` signal onto `num` bins, splitting or
/// joining the Nyquist bin when the shorter length is even.
fn resize_spectrum(x: &[Complex<f64>], num: usize) -> Vec<Complex<f64>> {
    let nx = x.len();
    let n = num.min(nx);
    let nyq = n / 2 + 1;
    let mut y = vec![Complex::new(0.0, 0.0); num];

    y[..nyq.min(n)].copy_from_slice(&x[..nyq.min(n)]);
    if n > 2 {
        let tail = n - nyq;
        y[num - tail..].copy_from_slice(&x[nx - tail..]);
    }

    if n % 2 == 0 {
        match num.cmp(&nx) {
            Ordering::Less => y[n / 2] += x[nx - n / 2],
            Ordering::Greater => {
                y[n / 2] *= 0.5;
                y[num - n / 2] = y[n / 2];
            }
            Ordering::Equal => {}
        }
    }
    y
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;

    fn single(samples: Vec<f32>, fs: f64) -> Recording {
        Recording::new(vec!["CH4".to_owned()], fs, columns_to_array(&[samples]))
    }

    #[test]
    fn median_handles_even_and_odd_lengths() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median::<f64>(&mut []), None);
    }

    #[test]
    fn noise_level_is_scaled_median_absolute_value() {
        let rec = single(vec![-1.0, 2.0, -3.0, 4.0, 5.0], 1000.0);
        let noise = estimate_noise_levels(&rec);
        assert!((noise[0] - 3.0 / MAD_SCALE).abs() < 1e-9);
    }

    #[test]
    fn zero_noise_skips_scaling() {
        let columns = vec![vec![0.0, 0.0, 0.0, 1.0, 0.0], vec![1.0, -2.0, 3.0, -4.0, 5.0]];
        let rec = Recording::new(
            vec!["CH1".to_owned(), "CH2".to_owned()],
            1000.0,
            columns_to_array(&columns),
        );
        let (scaled, outcome) = ensure_snr(&rec, 3.0);
        assert!(matches!(outcome, ScaleOutcome::Skipped { .. }));
        assert_eq!(scaled.traces, rec.traces);
    }

    #[test]
    fn gain_reaches_target_snr() {
        let rec = single(vec![-2.0, 2.0, -2.0, 2.0, -2.0], 1000.0);
        let (scaled, outcome) = ensure_snr(&rec, 3.0);
        let ScaleOutcome::Scaled { gains } = outcome else {
            panic!("expected scaling");
        };
        let expected = 3.0 / (2.0 / MAD_SCALE);
        assert!((gains[0] - expected).abs() < 1e-9);
        let noise = estimate_noise_levels(&scaled);
        assert!((noise[0] - 3.0).abs() < 1e-4);
    }

    #[test]
    fn whitening_gives_unit_variance_and_zero_mean() {
        let samples: Vec<f32> = (0..1000).map(|i| 5.0 + 4.0 * ((i % 7) as f32 - 3.0)).collect();
        let rec = single(samples, 1000.0);
        let white = whiten(&rec).unwrap();
        let column = white.channel(0);
        let n = column.len() as f64;
        let mean = column.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let var = column.iter().map(|&v| (f64::from(v) - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-4);
        assert!((var - 1.0).abs() < 1e-3);
    }

    #[test]
    fn whitening_decorrelates_channels() {
        let a: Vec<f32> = (0..2000).map(|i| ((i * 37) % 101) as f32 - 50.0).collect();
        let b: Vec<f32> = a
            .iter()
            .enumerate()
            .map(|(i, v)| 0.8 * v + (((i * 13) % 17) as f32 - 8.0))
            .collect();
        let rec = Recording::new(
            vec!["CH1".to_owned(), "CH2".to_owned()],
            1000.0,
            columns_to_array(&[a, b]),
        );
        let white = whiten(&rec).unwrap();
        let x = white.traces.mapv(f64::from);
        let cov = x.t().dot(&x) / x.nrows() as f64;
        assert!((cov[[0, 0]] - 1.0).abs() < 1e-3);
        assert!((cov[[1, 1]] - 1.0).abs() < 1e-3);
        assert!(cov[[0, 1]].abs() < 1e-3);
    }

    #[test]
    fn upsampling_interpolates_a_periodic_sine() {
        let n = 64;
        let samples: Vec<f32> = (0..n)
            .map(|t| (2.0 * PI * 3.0 * t as f64 / n as f64).sin() as f32)
            .collect();
        let rec = single(samples.clone(), 1000.0);
        let up = resample(&rec, 2000.0).unwrap();
        assert_eq!(up.num_samples(), 2 * n);
        assert_eq!(up.sampling_frequency, 2000.0);
        for (t, value) in up.channel(0).iter().enumerate() {
            let expected = (2.0 * PI * 3.0 * t as f64 / (2 * n) as f64).sin();
            assert!((f64::from(*value) - expected).abs() < 1e-4, "sample {t}");
        }
        for t in 0..n {
            assert!((up.channel(0)[2 * t] - samples[t]).abs() < 1e-4);
        }
    }

    #[test]
    fn downsampling_keeps_low_frequencies() {
        let n = 128;
        let samples: Vec<f32> = (0..n)
            .map(|t| (2.0 * PI * 2.0 * t as f64 / n as f64).cos() as f32)
            .collect();
        let rec = single(samples, 1000.0);
        let down = resample(&rec, 500.0).unwrap();
        assert_eq!(down.num_samples(), n / 2);
        for (t, value) in down.channel(0).iter().enumerate() {
            let expected = (2.0 * PI * 2.0 * t as f64 / (n / 2) as f64).cos();
            assert!((f64::from(*value) - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn band_must_fit_below_nyquist() {
        let rec = single(vec![0.0; 4000], 10_000.0);
        let err = bandpass_filter(&rec, 300.0, 6000.0).unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidBand { .. }));
    }

    #[test]
    fn short_recordings_cannot_be_filtered() {
        let rec = single(vec![0.0; 10], 30_000.0);
        let err = bandpass_filter(&rec, 300.0, 6000.0).unwrap_err();
        assert!(matches!(err, PreprocessError::TooShort { .. }));
    }

    #[test]
    fn bandpass_removes_dc_offset() {
        let fs = 30_000.0;
        let samples: Vec<f32> = (0..6000)
            .map(|t| 100.0 + (2.0 * PI * 1000.0 * t as f64 / fs).sin() as f32)
            .collect();
        let rec = single(samples, fs);
        let filtered = bandpass_filter(&rec, 300.0, 6000.0).unwrap();
        let column = filtered.channel(0);
        let middle = &column[2000..4000];
        let mean = middle.iter().map(|&v| f64::from(v)).sum::<f64>() / middle.len() as f64;
        let peak = middle.iter().fold(0.0_f32, |acc, v| acc.max(v.abs()));
        assert!(mean.abs() < 0.05);
        assert!(peak > 0.8 && peak < 1.2);
    }
}
