//! Fixed-width time blocks and per-unit spike counts.

use log::warn;

/// Spike timestamps of one unit, in milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitSpikes {
    pub unit: String,
    pub timestamps_ms: Vec<f64>,
}

/// One block of a unit: its index and the spike offsets inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub index: i64,
    /// `timestamp mod block_size`, ascending.
    pub offsets_ms: Vec<f64>,
}

impl Block {
    pub fn count(&self) -> usize {
        self.offsets_ms.len()
    }
}

/// Every block of a unit from its first to its last observed block,
/// empty blocks included.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitBlocks {
    pub unit: String,
    pub blocks: Vec<Block>,
}

impl UnitBlocks {
    pub fn total(&self) -> usize {
        self.blocks.iter().map(Block::count).sum()
    }

    pub fn min_block(&self) -> Option<i64> {
        self.blocks.first().map(|b| b.index)
    }

    pub fn max_block(&self) -> Option<i64> {
        self.blocks.last().map(|b| b.index)
    }
}

/// Row of the spike-count table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpikeCount {
    pub unit: String,
    pub block: i64,
    pub count: usize,
    /// Spikes of the unit over all its blocks.
    pub total: usize,
}

pub fn block_index(timestamp_ms: f64, block_size_ms: f64) -> i64 {
    (timestamp_ms / block_size_ms).floor() as i64
}

/// Keeps the rows before `floor(max / size) * size + size`, the end of the
/// block holding the unit's last spike. Rows past that edge, and non-finite
/// timestamps, are dropped.
pub fn clip_to_last_block(timestamps_ms: &[f64], block_size_ms: f64) -> Vec<f64> {
    let Some(max) = timestamps_ms
        .iter()
        .copied()
        .filter(|t| t.is_finite())
        .reduce(f64::max)
    else {
        return Vec::new();
    };
    let edge = (max / block_size_ms).floor() * block_size_ms + block_size_ms;
    timestamps_ms
        .iter()
        .copied()
        .filter(|&t| t.is_finite() && t < edge)
        .collect()
}

/// Groups one unit's timestamps into dense blocks.
pub fn unit_blocks(unit: &UnitSpikes, block_size_ms: f64) -> Option<UnitBlocks> {
    let mut kept = clip_to_last_block(&unit.timestamps_ms, block_size_ms);
    if kept.is_empty() {
        return None;
    }
    kept.sort_by(f64::total_cmp);

    let first = block_index(kept[0], block_size_ms);
    let last = block_index(kept[kept.len() - 1], block_size_ms);
    let mut blocks: Vec<Block> = (first..=last)
        .map(|index| Block {
            index,
            offsets_ms: Vec::new(),
        })
        .collect();

    for t in kept {
        let index = block_index(t, block_size_ms);
        let offset = t.rem_euclid(block_size_ms);
        blocks[(index - first) as usize].offsets_ms.push(offset);
    }

    Some(UnitBlocks {
        unit: unit.unit.clone(),
        blocks,
    })
}

/// Bins every unit, ordered by unit name. Units without timestamps are
/// skipped.
pub fn bin_units(units: &[UnitSpikes], block_size_ms: f64) -> Vec<UnitBlocks> {
    let mut ordered: Vec<&UnitSpikes> = units.iter().collect();
    ordered.sort_by(|a, b| a.unit.cmp(&b.unit));

    ordered
        .into_iter()
        .filter_map(|unit| {
            let blocks = unit_blocks(unit, block_size_ms);
            if blocks.is_none() {
                warn!("Unit '{}' has no timestamps, skipped", unit.unit);
            }
            blocks
        })
        .collect()
}

/// One row per (unit, block), zero-count blocks included.
pub fn spike_counts(units: &[UnitBlocks]) -> Vec<SpikeCount> {
    units
        .iter()
        .flat_map(|unit| {
            let total = unit.total();
            unit.blocks.iter().map(move |block| SpikeCount {
                unit: unit.unit.clone(),
                block: block.index,
                count: block.count(),
                total,
            })
        })
        .collect()
}
