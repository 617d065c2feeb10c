//! Electrode geometry: parsing the `x,y; x,y` location string and assigning
//! locations to channels.

use serde::{Deserialize, Serialize};

use crate::error::ChannelLocationError;

/// Position of one recording channel on the electrode array, in micrometres.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelLocation {
    pub x: f64,
    pub y: f64,
}

impl ChannelLocation {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Parses `"x1,y1; x2,y2; ..."` into coordinate pairs.
///
/// Every entry must hold exactly two numbers.
pub fn parse_channel_locations(input: &str) -> Result<Vec<ChannelLocation>, ChannelLocationError> {
    input.split(';').map(parse_entry).collect()
}

fn parse_entry(entry: &str) -> Result<ChannelLocation, ChannelLocationError> {
    let format_error = || ChannelLocationError::Format {
        entry: entry.trim().to_owned(),
    };

    let coords = entry
        .split(',')
        .map(|part| part.trim().parse::<f64>().map_err(|_| format_error()))
        .collect::<Result<Vec<_>, _>>()?;

    match coords.as_slice() {
        [x, y] if x.is_finite() && y.is_finite() => Ok(ChannelLocation::new(*x, *y)),
        _ => Err(format_error()),
    }
}

/// Spreads parsed locations over `num_channels` channels.
///
/// A single pair applies to every channel; otherwise one pair per channel is
/// required.
pub fn broadcast_locations(
    locations: &[ChannelLocation],
    num_channels: usize,
) -> Result<Vec<ChannelLocation>, ChannelLocationError> {
    match locations {
        [single] => Ok(vec![*single; num_channels]),
        many if many.len() == num_channels => Ok(many.to_vec()),
        many => Err(ChannelLocationError::CountMismatch {
            locations: many.len(),
            channels: num_channels,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_with_whitespace() {
        let locations = parse_channel_locations(" 0,0; 10.5 , -20 ;3,4").unwrap();
        assert_eq!(
            locations,
            vec![
                ChannelLocation::new(0.0, 0.0),
                ChannelLocation::new(10.5, -20.0),
                ChannelLocation::new(3.0, 4.0),
            ]
        );
    }

    #[test]
    fn rejects_three_coordinates() {
        let err = parse_channel_locations("1,2,3").unwrap_err();
        assert_eq!(
            err,
            ChannelLocationError::Format {
                entry: "1,2,3".to_owned()
            }
        );
    }

    #[test]
    fn rejects_text_and_empty_entries() {
        assert!(parse_channel_locations("a,b").is_err());
        assert!(parse_channel_locations("").is_err());
        assert!(parse_channel_locations("0,0;").is_err());
        assert!(parse_channel_locations("5").is_err());
    }

    #[test]
    fn single_location_is_broadcast() {
        let one = [ChannelLocation::new(1.0, 2.0)];
        let all = broadcast_locations(&one, 4).unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|loc| *loc == one[0]));
    }

    #[test]
    fn per_channel_locations_must_match_count() {
        let two = [ChannelLocation::new(0.0, 0.0), ChannelLocation::new(0.0, 25.0)];
        assert_eq!(broadcast_locations(&two, 2).unwrap(), two.to_vec());
        assert_eq!(
            broadcast_locations(&two, 3).unwrap_err(),
            ChannelLocationError::CountMismatch {
                locations: 2,
                channels: 3
            }
        );
    }

    #[test]
    fn distance_is_euclidean() {
        let a = ChannelLocation::new(0.0, 0.0);
        let b = ChannelLocation::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
    }
}
