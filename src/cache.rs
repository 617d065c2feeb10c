//! Temporary on-disk copy of a preprocessed recording.
//!
//! The sorter reads traces from the cached file rather than from the lazy
//! preprocessing chain. The directory lives as long as the [`CachedRecording`]
//! and is removed when it is dropped, whatever happened in between.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, warn};
use ndarray::Array2;
use tempfile::TempDir;

use crate::Recording;

pub const TRACES_FILE: &str = "traces.raw";

pub struct CachedRecording {
    dir: TempDir,
    recording: Recording,
}

impl CachedRecording {
    /// Writes `recording` to a fresh temporary directory and loads it back.
    pub fn create(recording: &Recording) -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("spikeraster-cache-").tempdir()?;
        let path = dir.path().join(TRACES_FILE);

        let mut writer = BufWriter::new(File::create(&path)?);
        for value in &recording.traces {
            writer.write_f32::<LittleEndian>(*value)?;
        }
        writer.flush()?;
        drop(writer);
        debug!(
            "Cached {} x {} samples in {}",
            recording.num_samples(),
            recording.num_channels(),
            dir.path().display()
        );

        let traces = read_traces(&path, recording.num_samples(), recording.num_channels())?;
        Ok(Self {
            recording: recording.with_traces(traces),
            dir,
        })
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Removes the directory now; failures are only logged.
    pub fn close(self) -> PathBuf {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!("Could not remove cache {}: {e}", path.display());
        }
        path
    }
}

fn read_traces(path: &Path, num_samples: usize, num_channels: usize) -> std::io::Result<Array2<f32>> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut values = vec![0.0_f32; num_samples * num_channels];
    reader.read_f32_into::<LittleEndian>(&mut values)?;
    Array2::from_shape_vec((num_samples, num_channels), values)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}
