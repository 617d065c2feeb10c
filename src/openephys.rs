//! Reader for legacy Open Ephys `.continuous` recordings.
//!
//! A recording directory holds one file per channel. Each file starts with a
//! 1024 byte ASCII header followed by fixed-size records.

use std::fs::{self, File};
use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use log::{debug, info};

use crate::error::OpenEphysError;
use crate::{Recording, columns_to_array};

pub const HEADER_BYTES: usize = 1024;
pub const SAMPLES_PER_RECORD: usize = 1024;
pub const RECORD_MARKER: [u8; 10] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 255];

/// Fields of a `.continuous` header that the loader needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ContinuousHeader {
    pub sample_rate: f64,
    pub bit_volts: f64,
    pub channel: Option<String>,
}

/// One decoded channel file.
#[derive(Debug, Clone)]
pub struct ContinuousChannel {
    pub id: String,
    pub header: ContinuousHeader,
    /// Timestamp of the first record, in samples.
    pub first_timestamp: Option<i64>,
    /// Samples in microvolts.
    pub samples: Vec<f32>,
}

/// Loads every `.continuous` file in `dir` into one [`Recording`].
pub fn read_recording(dir: &Path) -> Result<Recording, OpenEphysError> {
    if !dir.try_exists()? {
        return Err(OpenEphysError::NotFound(dir.to_path_buf()));
    }

    let files = continuous_files(dir)?;
    if files.is_empty() {
        return Err(OpenEphysError::NoContinuousFiles(dir.to_path_buf()));
    }

    let channels = files
        .iter()
        .map(|path| read_continuous(path))
        .collect::<Result<Vec<_>, _>>()?;

    let sample_rate = channels[0].header.sample_rate;
    if !channels.iter().all(|c| c.header.sample_rate == sample_rate) {
        return Err(OpenEphysError::InconsistentChannels("sampling rate".to_owned()));
    }
    let num_samples = channels[0].samples.len();
    if !channels.iter().all(|c| c.samples.len() == num_samples) {
        return Err(OpenEphysError::InconsistentChannels("number of samples".to_owned()));
    }

    let start_time_sec = match channels[0].first_timestamp {
        Some(ts) => {
            let start = ts as f64 / sample_rate;
            info!("Start time of the recording: {start:.9} seconds");
            start
        }
        None => {
            info!("Start time not found. Using default 0 seconds.");
            0.0
        }
    };

    info!(
        "Loaded {} channels, {} samples at {} Hz from {}",
        channels.len(),
        num_samples,
        sample_rate,
        dir.display()
    );

    let ids = channels.iter().map(|c| c.id.clone()).collect();
    let columns: Vec<Vec<f32>> = channels.into_iter().map(|c| c.samples).collect();
    let mut recording = Recording::new(ids, sample_rate, columns_to_array(&columns));
    recording.start_time_sec = start_time_sec;
    Ok(recording)
}

/// `.continuous` files of a directory, ordered by processor then channel number.
pub fn continuous_files(dir: &Path) -> Result<Vec<PathBuf>, OpenEphysError> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "continuous"))
        .collect();
    files.sort_by_key(|path| sort_key(&file_stem(path)));
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Channel id from a file stem: `100_CH4` -> `CH4`.
pub fn channel_id(stem: &str) -> &str {
    stem.rsplit_once('_').map_or(stem, |(_, id)| id)
}

fn sort_key(stem: &str) -> (String, String, u64) {
    let (processor, id) = stem.rsplit_once('_').unwrap_or(("", stem));
    let digits: String = id.chars().skip_while(|c| !c.is_ascii_digit()).collect();
    let prefix: String = id.chars().take_while(|c| !c.is_ascii_digit()).collect();
    (processor.to_owned(), prefix, digits.parse().unwrap_or(u64::MAX))
}

/// Parses the `header.key = value;` lines of a `.continuous` header.
pub fn parse_header(path: &Path, raw: &[u8]) -> Result<ContinuousHeader, OpenEphysError> {
    let text = String::from_utf8_lossy(raw);
    let mut sample_rate = None;
    let mut bit_volts = None;
    let mut channel = None;

    for statement in text.split(';') {
        let Some((key, value)) = statement.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('\'').trim_matches('"');
        match key.trim().trim_start_matches("header.") {
            "sampleRate" => sample_rate = value.parse::<f64>().ok(),
            "bitVolts" => bit_volts = value.parse::<f64>().ok(),
            "channel" => channel = Some(value.to_owned()),
            _ => {}
        }
    }

    let invalid = |reason: &str| OpenEphysError::InvalidHeader {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    };
    let sample_rate = sample_rate
        .filter(|fs| *fs > 0.0)
        .ok_or_else(|| invalid("missing or invalid sampleRate"))?;
    let bit_volts = bit_volts.ok_or_else(|| invalid("missing or invalid bitVolts"))?;

    Ok(ContinuousHeader {
        sample_rate,
        bit_volts,
        channel,
    })
}

/// Decodes one `.continuous` file.
pub fn read_continuous(path: &Path) -> Result<ContinuousChannel, OpenEphysError> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut header_bytes = [0u8; HEADER_BYTES];
    reader.read_exact(&mut header_bytes)?;
    let header = parse_header(path, &header_bytes)?;

    let mut samples = Vec::new();
    let mut first_timestamp = None;
    let mut record = 0;
    let mut raw = [0i16; SAMPLES_PER_RECORD];
    let mut marker = [0u8; RECORD_MARKER.len()];

    loop {
        let timestamp = match reader.read_i64::<LittleEndian>() {
            Ok(ts) => ts,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e.into()),
        };
        let corrupt = |reason: String| OpenEphysError::CorruptRecord {
            path: path.to_path_buf(),
            record,
            reason,
        };

        let count = reader.read_u16::<LittleEndian>()? as usize;
        let _recording_number = reader.read_u16::<LittleEndian>()?;
        if count > SAMPLES_PER_RECORD {
            return Err(corrupt(format!("{count} samples in one record")));
        }
        reader.read_i16_into::<BigEndian>(&mut raw)?;
        reader.read_exact(&mut marker)?;
        if marker != RECORD_MARKER {
            return Err(corrupt("bad record marker".to_owned()));
        }

        first_timestamp.get_or_insert(timestamp);
        samples.extend(
            raw[..count]
                .iter()
                .map(|&v| (f64::from(v) * header.bit_volts) as f32),
        );
        record += 1;
    }

    let id = channel_id(&file_stem(path)).to_owned();
    debug!("{}: {} records, {} samples", id, record, samples.len());

    Ok(ContinuousChannel {
        id,
        header,
        first_timestamp,
        samples,
    })
}
