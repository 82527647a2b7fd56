//! Upper-air sounding encoder (IGRA-style fixed columns)
//!
//! Each sounding time becomes a header line followed by one line per
//! pressure level, surface first:
//!
//! ```text
//! #68263       2024 01 01 00 9999    3
//! 11 -9999  85000  1500   200 -9999    50   270    51
//! 10 -9999  70000  3000    50 -9999    80   360    77
//! ```

use super::{finite, missing, MetError, SoundingRecord};
use crate::core_types::units::{Knots, MetersPerSecond};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Geopotential height ceiling of the height column (m)
pub const MAX_HEIGHT_M: i64 = 99999;

/// Level type of the first (surface) level
const SURFACE_LEVEL: i64 = 11;
/// Level type of every other level
const UPPER_LEVEL: i64 = 10;

/// All retained levels of one sounding, pressure descending
#[derive(Debug, Clone, PartialEq)]
pub struct SoundingProfile {
    /// Sounding time
    pub timestamp: NaiveDateTime,
    /// Levels, highest pressure first, one per pressure
    pub levels: Vec<SoundingRecord>,
}

/// Group records by time, sort each group by descending pressure and keep
/// the first record of every repeated pressure level
///
/// Records without a finite pressure cannot be placed and are dropped.
#[must_use]
pub fn build_profiles(records: &[SoundingRecord]) -> Vec<SoundingProfile> {
    let mut groups: BTreeMap<NaiveDateTime, Vec<SoundingRecord>> = BTreeMap::new();
    let mut unplaced = 0usize;
    for record in records {
        if record.pressure_hpa.is_finite() {
            groups.entry(record.timestamp).or_default().push(*record);
        } else {
            unplaced += 1;
        }
    }
    if unplaced > 0 {
        warn!("Dropped {unplaced} sounding records without a pressure level");
    }

    groups
        .into_iter()
        .map(|(timestamp, mut levels)| {
            levels.sort_by(|a, b| b.pressure_hpa.total_cmp(&a.pressure_hpa));
            let before = levels.len();
            levels.dedup_by(|later, kept| later.pressure_hpa == kept.pressure_hpa);
            if levels.len() < before {
                debug!("{timestamp}: removed {} repeated pressure levels", before - levels.len());
            }
            SoundingProfile { timestamp, levels }
        })
        .collect()
}

/// Encodes sounding profiles for one upper-air station
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpperAirEncoder {
    station_id: String,
}

impl UpperAirEncoder {
    /// Encoder for `station_id`
    ///
    /// # Errors
    /// Returns [`MetError::InvalidStation`] for an empty identifier or one
    /// containing whitespace.
    pub fn new(station_id: &str) -> Result<Self, MetError> {
        if station_id.is_empty() || station_id.chars().any(char::is_whitespace) {
            return Err(MetError::InvalidStation(station_id.to_string()));
        }
        Ok(Self {
            station_id: station_id.to_string(),
        })
    }

    /// Header line of a profile
    #[must_use]
    pub fn header(&self, profile: &SoundingProfile) -> String {
        let ts = profile.timestamp;
        format!(
            "#{:<11} {:4} {:02} {:02} {:02} 9999 {:4}",
            self.station_id,
            ts.year(),
            ts.month(),
            ts.day(),
            ts.hour(),
            profile.levels.len()
        )
    }

    /// Header and level lines of one profile, newline-terminated
    #[must_use]
    pub fn encode_profile(&self, profile: &SoundingProfile) -> String {
        let mut text = self.header(profile);
        text.push('\n');
        for (i, level) in profile.levels.iter().enumerate() {
            let level_type = if i == 0 { SURFACE_LEVEL } else { UPPER_LEVEL };
            let _ = writeln!(text, "{}", encode_level(level_type, level));
        }
        text
    }

    /// Encode every sounding in `records`
    #[must_use]
    pub fn encode(&self, records: &[SoundingRecord]) -> String {
        build_profiles(records)
            .iter()
            .map(|profile| self.encode_profile(profile))
            .collect()
    }
}

/// One level line; uncomputable fields become [`missing::UPPER_AIR`]
fn encode_level(level_type: i64, level: &SoundingRecord) -> String {
    let pressure = (level.pressure_hpa * 100.0) as i64;
    let height = finite(level.height_m).map_or(missing::UPPER_AIR, |h| (h as i64).min(MAX_HEIGHT_M));
    let temperature_c = finite(level.temperature.map(|t| *t));
    let dewpoint_c = finite(level.dewpoint.map(|t| *t));

    let temperature = temperature_c.map_or(missing::UPPER_AIR, |t| (t * 10.0) as i64);
    let depression = match (temperature_c, dewpoint_c) {
        (Some(t), Some(td)) => ((t - td).max(0.0) * 10.0) as i64,
        _ => missing::UPPER_AIR,
    };

    let speed = finite(level.wind_speed.map(|k| *k))
        .map(|knots| (*MetersPerSecond::from(Knots::new(knots)) * 10.0) as i64);
    let direction = finite(level.wind_direction.map(|d| *d.normalized())).map(|d| {
        let encoded = d as i64;
        if encoded == 0 && speed.is_some_and(|s| s != 0) {
            360
        } else {
            encoded
        }
    });

    format!(
        "{:2} {:5} {:6} {:5} {:5} {:5} {:5} {:5} {:5}",
        level_type,
        missing::UPPER_AIR,
        pressure,
        height,
        temperature,
        missing::UPPER_AIR,
        depression,
        direction.unwrap_or(missing::UPPER_AIR),
        speed.unwrap_or(missing::UPPER_AIR),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::units::{Celsius, Degrees, Knots};
    use chrono::NaiveDate;

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn level(hour: u32, pressure: f64, height: f64) -> SoundingRecord {
        SoundingRecord {
            timestamp: at(hour),
            pressure_hpa: pressure,
            height_m: Some(height),
            temperature: Some(Celsius::new(20.0)),
            dewpoint: Some(Celsius::new(15.0)),
            wind_direction: Some(Degrees::new(270.0)),
            wind_speed: Some(Knots::new(10.0)),
        }
    }

    #[test]
    fn test_profiles_sorted_and_deduplicated() {
        let records = vec![
            level(0, 700.0, 3000.0),
            level(0, 850.0, 1500.0),
            level(0, 850.0, 1490.0),
            level(12, 500.0, 5600.0),
        ];
        let profiles = build_profiles(&records);
        assert_eq!(profiles.len(), 2);

        let first = &profiles[0];
        let pressures: Vec<f64> = first.levels.iter().map(|l| l.pressure_hpa).collect();
        assert_eq!(pressures, vec![850.0, 700.0]);
        assert_eq!(first.levels[0].height_m, Some(1500.0));

        let encoder = UpperAirEncoder::new("68263").unwrap();
        assert_eq!(encoder.header(first), "#68263       2024 01 01 00 9999    2");
    }

    #[test]
    fn test_level_encoding() {
        let encoder = UpperAirEncoder::new("68263").unwrap();
        let profile = SoundingProfile {
            timestamp: at(0),
            levels: vec![level(0, 850.0, 1500.0), level(0, 700.0, 3000.0)],
        };
        let text = encoder.encode_profile(&profile);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "11 -9999  85000  1500   200 -9999    50   270    51");
        assert!(lines[2].starts_with("10 -9999  70000"));
    }

    #[test]
    fn test_missing_fields_and_caps() {
        let record = SoundingRecord {
            timestamp: at(0),
            pressure_hpa: 10.0,
            height_m: Some(123_456.0),
            temperature: None,
            dewpoint: Some(Celsius::new(-40.0)),
            wind_direction: None,
            wind_speed: Some(Knots::new(f64::NAN)),
        };
        assert_eq!(
            encode_level(UPPER_LEVEL, &record),
            "10 -9999   1000 99999 -9999 -9999 -9999 -9999 -9999"
        );
    }

    #[test]
    fn test_north_wind_is_360() {
        let mut record = level(0, 850.0, 1500.0);
        record.wind_direction = Some(Degrees::new(0.2));
        assert!(encode_level(SURFACE_LEVEL, &record).ends_with("  360    51"));

        record.wind_speed = Some(Knots::new(0.0));
        assert!(encode_level(SURFACE_LEVEL, &record).ends_with("    0     0"));
    }

    #[test]
    fn test_dewpoint_depression_floored() {
        let mut record = level(0, 850.0, 1500.0);
        record.dewpoint = Some(Celsius::new(21.0));
        let line = encode_level(SURFACE_LEVEL, &record);
        let fields: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(fields[6], "0");
    }

    #[test]
    fn test_station_validation() {
        assert!(UpperAirEncoder::new("").is_err());
        assert!(UpperAirEncoder::new("A B").is_err());
    }
}
