//! Meteorological records and fixed-format encoders
//!
//! Hourly surface observations are written as free-format "onsite" records
//! and upper-air soundings as IGRA-style profiles, the two inputs of the
//! preprocessor stage. Missing values are always written as sentinels (see
//! [`missing`]) because the consumer reads by column position.

pub mod convert;
pub mod onsite;
pub mod table;
pub mod upper_air;

use crate::core_types::units::{Celsius, Degrees, Knots, MetersPerSecond};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use onsite::{encode_cloud_extract, encode_onsite, fill_hourly_gaps, fill_year};
pub use table::{
    read_reanalysis_levels, read_reanalysis_surface, read_sounding_table, read_surface_table, write_sounding_table,
    write_surface_table,
};
pub use upper_air::{build_profiles, SoundingProfile, UpperAirEncoder};

/// Sentinels written in place of missing values
pub mod missing {
    /// Onsite temperature and dewpoint (°C)
    pub const TEMPERATURE: f64 = -99.0;
    /// Onsite station pressure
    pub const PRESSURE: f64 = 99999.0;
    /// Onsite precipitation (mm)
    pub const PRECIPITATION: f64 = -9.0;
    /// Onsite wind speed (m/s)
    pub const WIND_SPEED: f64 = -9.0;
    /// Onsite wind direction (degrees)
    pub const WIND_DIRECTION: f64 = 999.0;
    /// Onsite cloud cover (tenths)
    pub const CLOUD_COVER: u8 = 99;
    /// Any upper-air field, including the unused humidity and elapsed-time columns
    pub const UPPER_AIR: i64 = -9999;
}

/// One hour of surface observations
///
/// `timestamp` marks the start of the hour (00-23). The onsite encoder
/// writes it as the hour ending, 01-24.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyMetRecord {
    /// Start of the observation hour
    pub timestamp: NaiveDateTime,
    /// Air temperature
    pub temperature: Option<Celsius>,
    /// Dewpoint temperature
    pub dewpoint: Option<Celsius>,
    /// Station pressure in tenths of millibars
    pub pressure: Option<f64>,
    /// Precipitation over the hour (mm)
    pub precipitation: Option<f64>,
    /// Wind speed
    pub wind_speed: Option<MetersPerSecond>,
    /// Direction the wind blows from
    pub wind_direction: Option<Degrees>,
    /// Total cloud cover in tenths (0-10)
    pub cloud_cover: Option<u8>,
}

impl HourlyMetRecord {
    /// Record with every observation missing
    #[must_use]
    pub fn missing(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            temperature: None,
            dewpoint: None,
            pressure: None,
            precipitation: None,
            wind_speed: None,
            wind_direction: None,
            cloud_cover: None,
        }
    }
}

/// One pressure level of an upper-air sounding
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SoundingRecord {
    /// Sounding time
    pub timestamp: NaiveDateTime,
    /// Pressure level (hPa)
    pub pressure_hpa: f64,
    /// Geopotential height (m)
    pub height_m: Option<f64>,
    /// Air temperature
    pub temperature: Option<Celsius>,
    /// Dewpoint temperature
    pub dewpoint: Option<Celsius>,
    /// Direction the wind blows from
    pub wind_direction: Option<Degrees>,
    /// Wind speed
    pub wind_speed: Option<Knots>,
}

/// Errors raised while reading or writing meteorological files
#[derive(Debug)]
pub enum MetError {
    /// File could not be read or written
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// CSV could not be parsed
    Csv {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: csv::Error,
    },
    /// A row could not be read or holds an impossible value
    InvalidRecord {
        /// File involved
        path: PathBuf,
        /// 1-based data row
        row: usize,
        /// What is wrong
        reason: String,
    },
    /// Upper-air station identifier unusable in a header
    InvalidStation(String),
    /// Input held no usable records
    Empty(PathBuf),
}

impl fmt::Display for MetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetError::Io { path, source } => write!(f, "Failed to access {}: {source}", path.display()),
            MetError::Csv { path, source } => write!(f, "Failed to parse {}: {source}", path.display()),
            MetError::InvalidRecord { path, row, reason } => {
                write!(f, "{} row {row}: {reason}", path.display())
            }
            MetError::InvalidStation(id) => write!(f, "Invalid upper-air station id '{id}'"),
            MetError::Empty(path) => write!(f, "{} contains no usable records", path.display()),
        }
    }
}

impl std::error::Error for MetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MetError::Io { source, .. } => Some(source),
            MetError::Csv { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Treat NaN and infinities as missing
pub(crate) fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}
