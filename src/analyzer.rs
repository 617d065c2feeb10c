//! Per-unit waveform extraction and templates for diagnostic plots.

use ndarray::{Array2, Array3, Axis, s};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;

use crate::Recording;
use crate::sorter::Sorting;

pub const MAX_SPIKES_PER_UNIT: usize = 500;
pub const MS_BEFORE: f64 = 1.0;
pub const MS_AFTER: f64 = 2.0;
const SEED: u64 = 0;

/// Waveforms and mean template of one unit.
#[derive(Debug, Clone)]
pub struct UnitSummary {
    pub unit_id: u32,
    pub num_spikes: usize,
    /// Spikes × samples × channels.
    pub waveforms: Array3<f32>,
    /// Samples × channels.
    pub template: Array2<f32>,
    pub sampling_frequency: f64,
    /// Samples before the peak in every waveform.
    pub samples_before: usize,
}

impl UnitSummary {
    /// Time of each waveform sample relative to the peak, in milliseconds.
    pub fn time_axis_ms(&self) -> Vec<f64> {
        (0..self.template.nrows())
            .map(|i| (i as f64 - self.samples_before as f64) * 1000.0 / self.sampling_frequency)
            .collect()
    }
}

/// Up to `max` spike indices drawn without replacement, in ascending order.
pub fn random_spikes(spike_train: &[usize], max: usize, seed: u64) -> Vec<usize> {
    if spike_train.len() <= max {
        return spike_train.to_vec();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, spike_train.len(), max).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| spike_train[i]).collect()
}

/// Cuts `before + after` samples around each spike; spikes too close to
/// either edge are left out.
pub fn extract_waveforms(recording: &Recording, spikes: &[usize], before: usize, after: usize) -> Array3<f32> {
    let n = recording.num_samples();
    let kept: Vec<usize> = spikes
        .iter()
        .copied()
        .filter(|&t| t >= before && t + after <= n)
        .collect();

    let mut out = Array3::zeros((kept.len(), before + after, recording.num_channels()));
    for (mut slot, &t) in out.axis_iter_mut(Axis(0)).zip(&kept) {
        slot.assign(&recording.traces.slice(s![t - before..t + after, ..]));
    }
    out
}

/// Analyses every unit of `sorting` against the recording it came from.
pub fn analyze(recording: &Recording, sorting: &Sorting) -> Vec<UnitSummary> {
    let fs = recording.sampling_frequency;
    let before = (MS_BEFORE * fs / 1000.0).round() as usize;
    let after = (MS_AFTER * fs / 1000.0).round() as usize;

    sorting
        .units
        .iter()
        .map(|unit| {
            let spikes = random_spikes(&unit.spike_train, MAX_SPIKES_PER_UNIT, SEED);
            let waveforms = extract_waveforms(recording, &spikes, before, after);
            let template = waveforms
                .mean_axis(Axis(0))
                .unwrap_or_else(|| Array2::zeros((before + after, recording.num_channels())));
            UnitSummary {
                unit_id: unit.id,
                num_spikes: unit.spike_train.len(),
                waveforms,
                template,
                sampling_frequency: fs,
                samples_before: before,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns_to_array;
    use crate::sorter::SortedUnit;

    #[test]
    fn random_spikes_keeps_short_trains() {
        assert_eq!(random_spikes(&[3, 9, 27], 500, 0), vec![3, 9, 27]);
    }

    #[test]
    fn random_spikes_is_bounded_sorted_and_seeded() {
        let train: Vec<usize> = (0..2000).map(|i| i * 10).collect();
        let a = random_spikes(&train, 500, 7);
        let b = random_spikes(&train, 500, 7);
        assert_eq!(a.len(), 500);
        assert_eq!(a, b);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert!(a.iter().all(|t| t % 10 == 0));
    }

    #[test]
    fn waveforms_skip_edge_spikes() {
        let samples: Vec<f32> = (0..100).map(|i| i as f32).collect();
        let rec = Recording::new(vec!["CH1".to_owned()], 1000.0, columns_to_array(&[samples]));
        let waveforms = extract_waveforms(&rec, &[2, 50, 98], 5, 10);
        assert_eq!(waveforms.dim(), (1, 15, 1));
        assert_eq!(waveforms[[0, 0, 0]], 45.0);
        assert_eq!(waveforms[[0, 14, 0]], 59.0);
    }

    #[test]
    fn template_is_mean_waveform() {
        let mut samples = vec![0.0_f32; 600];
        samples[100] = -4.0;
        samples[300] = -6.0;
        let rec = Recording::new(vec!["CH1".to_owned()], 10_000.0, columns_to_array(&[samples]));
        let sorting = Sorting {
            sampling_frequency: 10_000.0,
            units: vec![SortedUnit {
                id: 1,
                spike_train: vec![100, 300],
            }],
        };
        let summaries = analyze(&rec, &sorting);
        assert_eq!(summaries.len(), 1);
        let summary = &summaries[0];
        assert_eq!(summary.samples_before, 10);
        assert_eq!(summary.template.dim(), (30, 1));
        assert_eq!(summary.template[[10, 0]], -5.0);
        assert_eq!(summary.time_axis_ms()[10], 0.0);
        assert_eq!(summary.num_spikes, 2);
    }
}
