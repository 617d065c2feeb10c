//! Spike sorting.
//!
//! [`Sorter`] is the seam between the front-end and a detection/clustering
//! routine. [`TemplateSorter`] is the built-in implementation: the recording
//! is cut into blocks; in each block a first detection pass builds waveform
//! templates and a second, more sensitive pass labels every event with its
//! closest template.

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::Recording;
use crate::error::SortError;

/// Two-phase detection and clustering parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SortingParameters {
    /// -1 for negative peaks, 1 for positive peaks, 0 for both.
    pub detect_sign: i32,
    pub phase1_detect_threshold: f64,
    pub detect_threshold: f64,
    pub phase1_detect_channel_radius: u32,
    pub detect_channel_radius: u32,
    pub phase1_detect_time_radius_msec: f64,
    pub detect_time_radius_msec: f64,
    pub block_duration_sec: u32,
}

impl Default for SortingParameters {
    fn default() -> Self {
        Self {
            detect_sign: 0,
            phase1_detect_threshold: 3.5,
            detect_threshold: 2.5,
            phase1_detect_channel_radius: 200,
            detect_channel_radius: 30,
            phase1_detect_time_radius_msec: 0.8,
            detect_time_radius_msec: 0.8,
            block_duration_sec: 600,
        }
    }
}

impl SortingParameters {
    pub fn validate(&self) -> Result<(), SortError> {
        let invalid = |msg: String| -> Result<(), SortError> { Err(SortError::InvalidParameter(msg)) };
        if !matches!(self.detect_sign, -1..=1) {
            return invalid(format!("detect_sign must be -1, 0 or 1, got {}", self.detect_sign));
        }
        if self.block_duration_sec == 0 {
            return invalid("block_duration_sec must be positive".to_owned());
        }
        for (name, value) in [
            ("phase1_detect_threshold", self.phase1_detect_threshold),
            ("detect_threshold", self.detect_threshold),
            ("phase1_detect_time_radius_msec", self.phase1_detect_time_radius_msec),
            ("detect_time_radius_msec", self.detect_time_radius_msec),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be a non-negative number, got {value}"));
            }
        }
        Ok(())
    }
}

/// One unit found by a sorter.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedUnit {
    pub id: u32,
    /// Sample indices, ascending.
    pub spike_train: Vec<usize>,
}

/// Result of a sorting run.
#[derive(Debug, Clone, PartialEq)]
pub struct Sorting {
    pub sampling_frequency: f64,
    pub units: Vec<SortedUnit>,
}

impl Sorting {
    pub fn unit_ids(&self) -> Vec<u32> {
        self.units.iter().map(|u| u.id).collect()
    }

    pub fn unit(&self, id: u32) -> Option<&SortedUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Spike times of one unit in seconds, shifted by `start_time_sec`.
    pub fn spike_times(&self, unit: &SortedUnit, start_time_sec: f64) -> Vec<f64> {
        unit.spike_train
            .iter()
            .map(|&index| index as f64 / self.sampling_frequency + start_time_sec)
            .collect()
    }
}

pub trait Sorter {
    fn sort(&self, recording: &Recording, params: &SortingParameters) -> Result<Sorting, SortError>;
}

/// A detected peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Event {
    pub sample: usize,
    pub channel: usize,
}

/// Template-matching sorter with per-block template learning.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateSorter {
    /// Snippet samples before the peak.
    pub snippet_before: usize,
    /// Snippet samples from the peak on.
    pub snippet_after: usize,
    /// Cosine similarity needed to join or merge a cluster.
    pub cluster_similarity: f64,
    /// Cosine similarity needed to label a phase-2 event.
    pub match_similarity: f64,
    /// Clusters with fewer phase-1 events are discarded.
    pub min_cluster_size: usize,
}

impl Default for TemplateSorter {
    fn default() -> Self {
        Self {
            snippet_before: 20,
            snippet_after: 20,
            cluster_similarity: 0.9,
            match_similarity: 0.7,
            min_cluster_size: 5,
        }
    }
}

#[derive(Debug, Clone)]
struct Template {
    unit_id: u32,
    sum: Vec<f64>,
    count: usize,
}

impl Template {
    fn new(unit_id: u32, snippet: Vec<f64>) -> Self {
        Self {
            unit_id,
            sum: snippet,
            count: 1,
        }
    }

    fn add(&mut self, snippet: &[f64]) {
        for (s, v) in self.sum.iter_mut().zip(snippet) {
            *s += v;
        }
        self.count += 1;
    }

    fn absorb(&mut self, other: &Self) {
        for (s, v) in self.sum.iter_mut().zip(&other.sum) {
            *s += v;
        }
        self.count += other.count;
    }

    /// Similarity of the mean shape; the scale of `sum` cancels out.
    fn similarity(&self, snippet: &[f64]) -> f64 {
        cosine_similarity(&self.sum, snippet)
    }
}

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

fn signed(value: f32, detect_sign: i32) -> f64 {
    let v = f64::from(value);
    match detect_sign {
        s if s < 0 => -v,
        0 => v.abs(),
        _ => v,
    }
}

fn msec_to_samples(msec: f64, fs: f64) -> usize {
    (msec * fs / 1000.0).round() as usize
}

/// Indices of the channels within `radius` of each channel.
fn neighbourhoods(recording: &Recording, radius: f64) -> Vec<Vec<usize>> {
    let locations = &recording.locations;
    (0..recording.num_channels())
        .map(|ch| {
            (0..recording.num_channels())
                .filter(|&other| {
                    match (locations.get(ch), locations.get(other)) {
                        (Some(a), Some(b)) => a.distance(b) <= radius,
                        _ => ch == other,
                    }
                })
                .collect()
        })
        .collect()
}

/// Peaks at or above `threshold` that dominate every sample within
/// `time_radius` samples on every channel within `channel_radius`.
///
/// Ties are resolved in favour of the earlier sample, then the lower channel.
pub fn detect_events(
    recording: &Recording,
    range: std::ops::Range<usize>,
    threshold: f64,
    detect_sign: i32,
    channel_radius: f64,
    time_radius: usize,
) -> Vec<Event> {
    let traces = &recording.traces;
    let neighbours = neighbourhoods(recording, channel_radius);
    let mut events = Vec::new();

    for t in range.clone() {
        for ch in 0..recording.num_channels() {
            let value = signed(traces[[t, ch]], detect_sign);
            if value < threshold {
                continue;
            }
            let lo = t.saturating_sub(time_radius).max(range.start);
            let hi = (t + time_radius + 1).min(range.end);
            let dominated = (lo..hi).any(|t2| {
                neighbours[ch].iter().any(|&ch2| {
                    let other = signed(traces[[t2, ch2]], detect_sign);
                    other > value || (other == value && (t2, ch2) < (t, ch))
                })
            });
            if !dominated {
                events.push(Event { sample: t, channel: ch });
            }
        }
    }
    events
}

impl TemplateSorter {
    /// All-channel snippet around an event, or `None` near the edges.
    fn snippet(&self, recording: &Recording, sample: usize) -> Option<Vec<f64>> {
        let start = sample.checked_sub(self.snippet_before)?;
        let end = sample + self.snippet_after;
        if end > recording.num_samples() {
            return None;
        }
        let mut out = Vec::with_capacity((end - start) * recording.num_channels());
        for t in start..end {
            out.extend(recording.traces.row(t).iter().map(|&v| f64::from(v)));
        }
        Some(out)
    }

    fn cluster(&self, snippets: Vec<Vec<f64>>) -> Vec<Template> {
        let mut clusters: Vec<Template> = Vec::new();
        for snippet in snippets {
            let best = best_match(&clusters, &snippet);
            match best {
                Some((index, sim)) if sim >= self.cluster_similarity => clusters[index].add(&snippet),
                _ => clusters.push(Template::new(0, snippet)),
            }
        }
        clusters.retain(|c| c.count >= self.min_cluster_size);
        clusters
    }
}

fn best_match(templates: &[Template], snippet: &[f64]) -> Option<(usize, f64)> {
    templates
        .iter()
        .enumerate()
        .map(|(i, t)| (i, t.similarity(snippet)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

impl Sorter for TemplateSorter {
    fn sort(&self, recording: &Recording, params: &SortingParameters) -> Result<Sorting, SortError> {
        params.validate()?;
        if recording.num_channels() == 0 {
            return Err(SortError::NoChannels);
        }

        let fs = recording.sampling_frequency;
        let block_len = ((f64::from(params.block_duration_sec) * fs).round() as usize).max(1);
        let phase1_radius = msec_to_samples(params.phase1_detect_time_radius_msec, fs);
        let phase2_radius = msec_to_samples(params.detect_time_radius_msec, fs);

        let mut library: Vec<Template> = Vec::new();
        let mut next_id = 1;
        let mut trains: Vec<(u32, Vec<usize>)> = Vec::new();

        let n = recording.num_samples();
        let mut block_start = 0;
        while block_start < n {
            let range = block_start..(block_start + block_len).min(n);

            let phase1 = detect_events(
                recording,
                range.clone(),
                params.phase1_detect_threshold,
                params.detect_sign,
                f64::from(params.phase1_detect_channel_radius),
                phase1_radius,
            );
            let snippets = phase1
                .iter()
                .filter_map(|e| self.snippet(recording, e.sample))
                .collect();
            let clusters = self.cluster(snippets);
            debug!(
                "Block {}..{}: {} phase-1 events, {} clusters",
                range.start,
                range.end,
                phase1.len(),
                clusters.len()
            );

            for cluster in clusters {
                match best_match(&library, &cluster.sum) {
                    Some((index, sim)) if sim >= self.cluster_similarity => library[index].absorb(&cluster),
                    _ => {
                        library.push(Template {
                            unit_id: next_id,
                            ..cluster
                        });
                        trains.push((next_id, Vec::new()));
                        next_id += 1;
                    }
                }
            }

            let phase2 = detect_events(
                recording,
                range.clone(),
                params.detect_threshold,
                params.detect_sign,
                f64::from(params.detect_channel_radius),
                phase2_radius,
            );
            for event in phase2 {
                let Some(snippet) = self.snippet(recording, event.sample) else {
                    continue;
                };
                if let Some((index, sim)) = best_match(&library, &snippet) {
                    if sim >= self.match_similarity {
                        let id = library[index].unit_id;
                        if let Some((_, train)) = trains.iter_mut().find(|(u, _)| *u == id) {
                            train.push(event.sample);
                        }
                    }
                }
            }

            block_start = range.end;
        }

        let units: Vec<SortedUnit> = trains
            .into_iter()
            .map(|(id, mut spike_train)| {
                spike_train.sort_unstable();
                spike_train.dedup();
                SortedUnit { id, spike_train }
            })
            .filter(|u| !u.spike_train.is_empty())
            .collect();

        info!(
            "Sorting found {} units ({} spikes)",
            units.len(),
            units.iter().map(|u| u.spike_train.len()).sum::<usize>()
        );

        Ok(Sorting {
            sampling_frequency: fs,
            units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::columns_to_array;

    fn shape(k: f64, sign: f64) -> f32 {
        (sign * 10.0 * (-(k / 3.0).powi(2)).exp()) as f32
    }

    /// Two interleaved spike shapes on a faintly noisy channel.
    fn synthetic() -> (Recording, Vec<usize>, Vec<usize>) {
        let n = 30_000;
        let mut samples: Vec<f32> = (0..n)
            .map(|i| 0.05 * (((i * 7919) % 23) as f32 / 11.0 - 1.0))
            .collect();
        let negative: Vec<usize> = (0..12).map(|i| 500 + i * 2400).collect();
        let positive: Vec<usize> = (0..12).map(|i| 1700 + i * 2400).collect();
        for (peaks, sign) in [(&negative, -1.0), (&positive, 1.0)] {
            for &p in peaks {
                for k in -8_i64..=8 {
                    let t = (p as i64 + k) as usize;
                    samples[t] += shape(k as f64, sign);
                }
            }
        }
        let rec = Recording::new(vec!["CH4".to_owned()], 30_000.0, columns_to_array(&[samples]));
        (rec, negative, positive)
    }

    #[test]
    fn detects_peaks_in_both_directions() {
        let (rec, negative, positive) = synthetic();
        let events = detect_events(&rec, 0..rec.num_samples(), 3.5, 0, 200.0, 24);
        let samples: Vec<usize> = events.iter().map(|e| e.sample).collect();
        let mut expected: Vec<usize> = negative.iter().chain(&positive).copied().collect();
        expected.sort_unstable();
        assert_eq!(samples, expected);
    }

    #[test]
    fn sign_restricts_detection() {
        let (rec, negative, _) = synthetic();
        let events = detect_events(&rec, 0..rec.num_samples(), 3.5, -1, 200.0, 24);
        let samples: Vec<usize> = events.iter().map(|e| e.sample).collect();
        assert_eq!(samples, negative);
    }

    #[test]
    fn time_radius_keeps_only_the_larger_peak() {
        let mut samples = vec![0.0_f32; 200];
        samples[100] = 5.0;
        samples[105] = 4.0;
        samples[150] = 4.0;
        let rec = Recording::new(vec!["CH1".to_owned()], 1000.0, columns_to_array(&[samples]));
        let events = detect_events(&rec, 0..200, 3.0, 1, 0.0, 10);
        let samples: Vec<usize> = events.iter().map(|e| e.sample).collect();
        assert_eq!(samples, vec![100, 150]);
    }

    #[test]
    fn separates_two_spike_shapes() {
        let (rec, negative, positive) = synthetic();
        let sorting = TemplateSorter::default()
            .sort(&rec, &SortingParameters::default())
            .unwrap();
        assert_eq!(sorting.unit_ids(), vec![1, 2]);
        let trains: Vec<&Vec<usize>> = sorting.units.iter().map(|u| &u.spike_train).collect();
        assert!(trains.contains(&&negative));
        assert!(trains.contains(&&positive));
        assert_eq!(sorting.sampling_frequency, 30_000.0);
    }

    #[test]
    fn templates_carry_across_blocks() {
        let (rec, _, _) = synthetic();
        let whole = TemplateSorter::default()
            .sort(&rec, &SortingParameters::default())
            .unwrap();
        let mut rec = rec;
        // at 2 Hz a 7500 s block is 15 000 samples, so the recording splits in two
        rec.sampling_frequency = 2.0;
        let params = SortingParameters {
            block_duration_sec: 7500,
            phase1_detect_time_radius_msec: 12_000.0,
            detect_time_radius_msec: 12_000.0,
            ..SortingParameters::default()
        };
        let blocked = TemplateSorter::default().sort(&rec, &params).unwrap();
        assert_eq!(blocked.units.len(), 2);
        let total = |s: &Sorting| s.units.iter().map(|u| u.spike_train.len()).sum::<usize>();
        assert_eq!(total(&blocked), total(&whole));
    }

    #[test]
    fn spike_times_add_start_offset() {
        let sorting = Sorting {
            sampling_frequency: 60_000.0,
            units: vec![SortedUnit {
                id: 1,
                spike_train: vec![0, 30_000, 60_000],
            }],
        };
        let times = sorting.spike_times(&sorting.units[0], 12.5);
        assert_eq!(times, vec![12.5, 13.0, 13.5]);
    }

    #[test]
    fn invalid_sign_is_rejected() {
        let (rec, _, _) = synthetic();
        let params = SortingParameters {
            detect_sign: 3,
            ..SortingParameters::default()
        };
        assert!(matches!(
            TemplateSorter::default().sort(&rec, &params),
            Err(SortError::InvalidParameter(_))
        ));
    }

    #[test]
    fn cosine_similarity_of_opposites_is_negative() {
        assert!((cosine_similarity(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-12);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
