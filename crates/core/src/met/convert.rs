//! Reanalysis field conversions
//!
//! Gridded reanalysis products deliver wind as u/v components, temperatures
//! in Kelvin, geopotential instead of height and fractional cloud cover.
//! These helpers turn single samples into [`HourlyMetRecord`] and
//! [`SoundingRecord`] values in the units the encoders expect.

use super::{finite, HourlyMetRecord, SoundingRecord};
use crate::core_types::units::{Celsius, Degrees, Kelvin, Knots, MetersPerSecond};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Standard gravity used to turn geopotential into geopotential height (m/s²)
pub const STANDARD_GRAVITY: f64 = 9.80665;

/// Wind speed and the direction it blows from (meteorological convention)
///
/// A calm wind reports direction 0.
#[must_use]
pub fn wind_from_components(u: f64, v: f64) -> (MetersPerSecond, Degrees) {
    let speed = u.hypot(v);
    if speed == 0.0 {
        return (MetersPerSecond::new(0.0), Degrees::new(0.0));
    }
    let direction = (270.0 - v.atan2(u).to_degrees()).rem_euclid(360.0);
    (MetersPerSecond::new(speed), Degrees::new(direction))
}

/// Geopotential (m²/s²) to geopotential height (m)
#[must_use]
pub fn geopotential_height(geopotential: f64) -> f64 {
    geopotential / STANDARD_GRAVITY
}

/// Approximate dewpoint from temperature and relative humidity (%)
///
/// Uses `T - (100 - RH) / 5`, accurate within about 1 °C above 50 % RH.
#[must_use]
pub fn dewpoint_from_relative_humidity(temperature: Celsius, relative_humidity: f64) -> Celsius {
    let rh = relative_humidity.clamp(0.0, 100.0);
    Celsius::new(*temperature - (100.0 - rh) / 5.0)
}

/// Total cloud fraction (0-1) to tenths (0-10)
#[must_use]
pub fn cloud_tenths(fraction: f64) -> Option<u8> {
    fraction
        .is_finite()
        .then(|| (fraction * 10.0).round().clamp(0.0, 10.0) as u8)
}

/// Pascals to tenths of millibars
#[must_use]
pub fn pascals_to_tenths_mb(pascals: f64) -> f64 {
    pascals / 10.0
}

/// One reanalysis surface sample at the site
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSample {
    /// Start of the hour
    pub timestamp: NaiveDateTime,
    /// 2 m temperature
    pub temperature: Option<Kelvin>,
    /// 2 m dewpoint
    pub dewpoint: Option<Kelvin>,
    /// Surface pressure (Pa)
    pub surface_pressure_pa: Option<f64>,
    /// Accumulated precipitation over the hour (m)
    pub precipitation_m: Option<f64>,
    /// 10 m eastward wind (m/s)
    pub u10: Option<f64>,
    /// 10 m northward wind (m/s)
    pub v10: Option<f64>,
    /// Total cloud fraction (0-1)
    pub total_cloud: Option<f64>,
}

impl From<SurfaceSample> for HourlyMetRecord {
    fn from(sample: SurfaceSample) -> Self {
        let wind = match (finite(sample.u10), finite(sample.v10)) {
            (Some(u), Some(v)) => Some(wind_from_components(u, v)),
            _ => None,
        };
        HourlyMetRecord {
            timestamp: sample.timestamp,
            temperature: kelvin_to_celsius(sample.temperature),
            dewpoint: kelvin_to_celsius(sample.dewpoint),
            pressure: finite(sample.surface_pressure_pa).map(pascals_to_tenths_mb),
            precipitation: finite(sample.precipitation_m).map(|m| (m * 1000.0).max(0.0)),
            wind_speed: wind.map(|(speed, _)| speed),
            wind_direction: wind.map(|(_, direction)| direction),
            cloud_cover: finite(sample.total_cloud).and_then(cloud_tenths),
        }
    }
}

/// One reanalysis pressure-level sample above the site
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelSample {
    /// Sounding time
    pub timestamp: NaiveDateTime,
    /// Pressure level (hPa)
    pub pressure_hpa: f64,
    /// Geopotential (m²/s²)
    pub geopotential: Option<f64>,
    /// Air temperature
    pub temperature: Option<Kelvin>,
    /// Relative humidity (%)
    pub relative_humidity: Option<f64>,
    /// Eastward wind (m/s)
    pub u: Option<f64>,
    /// Northward wind (m/s)
    pub v: Option<f64>,
}

impl From<LevelSample> for SoundingRecord {
    fn from(sample: LevelSample) -> Self {
        let temperature = kelvin_to_celsius(sample.temperature);
        let dewpoint = temperature
            .zip(finite(sample.relative_humidity))
            .map(|(t, rh)| dewpoint_from_relative_humidity(t, rh));
        let wind = match (finite(sample.u), finite(sample.v)) {
            (Some(u), Some(v)) => Some(wind_from_components(u, v)),
            _ => None,
        };
        SoundingRecord {
            timestamp: sample.timestamp,
            pressure_hpa: sample.pressure_hpa,
            height_m: finite(sample.geopotential).map(geopotential_height),
            temperature,
            dewpoint,
            wind_direction: wind.map(|(_, direction)| direction),
            wind_speed: wind.map(|(speed, _)| Knots::from(speed)),
        }
    }
}

fn kelvin_to_celsius(value: Option<Kelvin>) -> Option<Celsius> {
    value.filter(|k| k.is_finite()).map(Celsius::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn midnight() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_wind_directions() {
        // Westerly: air moving east comes from 270
        let (speed, dir) = wind_from_components(5.0, 0.0);
        assert_relative_eq!(*speed, 5.0);
        assert_relative_eq!(*dir, 270.0);

        // Southerly: air moving north comes from 180
        let (_, dir) = wind_from_components(0.0, 3.0);
        assert_relative_eq!(*dir, 180.0, epsilon = 1e-9);

        // Northerly
        let (_, dir) = wind_from_components(0.0, -3.0);
        assert_relative_eq!(*dir, 0.0, epsilon = 1e-9);

        let (speed, dir) = wind_from_components(0.0, 0.0);
        assert_eq!((*speed, *dir), (0.0, 0.0));
    }

    #[test]
    fn test_scalar_conversions() {
        assert_relative_eq!(geopotential_height(9806.65), 1000.0, epsilon = 1e-9);
        assert_relative_eq!(*dewpoint_from_relative_humidity(Celsius::new(20.0), 50.0), 10.0);
        assert_eq!(cloud_tenths(0.44), Some(4));
        assert_eq!(cloud_tenths(1.3), Some(10));
        assert_eq!(cloud_tenths(f64::NAN), None);
        assert_relative_eq!(pascals_to_tenths_mb(101_325.0), 10_132.5);
    }

    #[test]
    fn test_surface_sample_to_record() {
        let sample = SurfaceSample {
            timestamp: midnight(),
            temperature: Some(Kelvin::new(293.15)),
            dewpoint: None,
            surface_pressure_pa: Some(83_456.0),
            precipitation_m: Some(0.0012),
            u10: Some(5.0),
            v10: None,
            total_cloud: Some(0.5),
        };
        let record = HourlyMetRecord::from(sample);
        assert_relative_eq!(*record.temperature.unwrap(), 20.0, epsilon = 1e-9);
        assert!(record.dewpoint.is_none());
        assert_relative_eq!(record.pressure.unwrap(), 8345.6, epsilon = 1e-9);
        assert_relative_eq!(record.precipitation.unwrap(), 1.2, epsilon = 1e-9);
        assert!(record.wind_speed.is_none());
        assert_eq!(record.cloud_cover, Some(5));
    }

    #[test]
    fn test_level_sample_to_record() {
        let sample = LevelSample {
            timestamp: midnight(),
            pressure_hpa: 850.0,
            geopotential: Some(14_709.975),
            temperature: Some(Kelvin::new(283.15)),
            relative_humidity: Some(80.0),
            u: Some(0.0),
            v: Some(-5.144_44),
        };
        let record = SoundingRecord::from(sample);
        assert_relative_eq!(record.height_m.unwrap(), 1500.0, epsilon = 1e-6);
        assert_relative_eq!(*record.dewpoint.unwrap(), 6.0, epsilon = 1e-9);
        assert_relative_eq!(*record.wind_speed.unwrap(), 10.0, epsilon = 1e-3);
        assert_relative_eq!(*record.wind_direction.unwrap(), 0.0, epsilon = 1e-9);
    }
}
