//! Processed meteorological tables (CSV)
//!
//! The surface table holds one row per hour with the hour written as
//! hour-ending (1-24); the sounding table holds one row per time and
//! pressure level. Reanalysis extracts use the product's short names
//! (`t2m`, `u10`, `z`, ...) and are converted on read. Blank and `NaN`
//! cells are read as missing. A row that
//! cannot be read is skipped with a warning; the hour it held is later
//! filled with sentinels by the onsite encoder.

use super::convert::{LevelSample, SurfaceSample};
use super::{finite, HourlyMetRecord, MetError, SoundingRecord};
use crate::core_types::units::{Celsius, Degrees, Kelvin, Knots, MetersPerSecond};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Format of `time` cells written by [`write_sounding_table`]
const WRITE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Accepted `time` formats of the sounding table
const TIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

#[derive(Debug, Serialize, Deserialize)]
struct SurfaceRow {
    #[serde(rename = "Year")]
    year: i32,
    #[serde(rename = "Month")]
    month: u32,
    #[serde(rename = "Day")]
    day: u32,
    #[serde(rename = "Hour")]
    hour: u32,
    #[serde(rename = "Temp_C")]
    temp_c: Option<f64>,
    #[serde(rename = "DewPt_C")]
    dewpt_c: Option<f64>,
    #[serde(rename = "Press_mb")]
    press_mb: Option<f64>,
    #[serde(rename = "Precip_mm")]
    precip_mm: Option<f64>,
    #[serde(rename = "WindSpd_ms")]
    wind_spd_ms: Option<f64>,
    #[serde(rename = "WindDir_deg")]
    wind_dir_deg: Option<f64>,
    #[serde(rename = "CloudCover")]
    cloud_cover: Option<f64>,
}

impl SurfaceRow {
    fn from_record(record: &HourlyMetRecord) -> Self {
        let ts = record.timestamp;
        Self {
            year: ts.year(),
            month: ts.month(),
            day: ts.day(),
            hour: ts.hour() + 1,
            temp_c: record.temperature.map(|t| *t),
            dewpt_c: record.dewpoint.map(|t| *t),
            press_mb: record.pressure,
            precip_mm: record.precipitation,
            wind_spd_ms: record.wind_speed.map(|s| *s),
            wind_dir_deg: record.wind_direction.map(|d| *d),
            cloud_cover: record.cloud_cover.map(f64::from),
        }
    }

    fn into_record(self) -> Result<HourlyMetRecord, String> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .ok_or_else(|| format!("invalid date {}-{}-{}", self.year, self.month, self.day))?;
        let timestamp =
            hour_ending_to_start(date, self.hour).ok_or_else(|| format!("hour {} outside 1-24", self.hour))?;

        Ok(HourlyMetRecord {
            timestamp,
            temperature: finite(self.temp_c).map(Celsius::new),
            dewpoint: finite(self.dewpt_c).map(Celsius::new),
            pressure: finite(self.press_mb),
            precipitation: finite(self.precip_mm),
            wind_speed: finite(self.wind_spd_ms).map(MetersPerSecond::new),
            wind_direction: finite(self.wind_dir_deg).map(Degrees::new),
            cloud_cover: finite(self.cloud_cover)
                .filter(|c| (0.0..=10.0).contains(c))
                .map(|c| c.round() as u8),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SoundingRow {
    time: String,
    pressure_level: f64,
    height_m: Option<f64>,
    temp_c: Option<f64>,
    dewpt_c: Option<f64>,
    wind_dir: Option<f64>,
    wind_spd_knots: Option<f64>,
}

impl SoundingRow {
    fn from_record(record: &SoundingRecord) -> Self {
        Self {
            time: record.timestamp.format(WRITE_TIME_FORMAT).to_string(),
            pressure_level: record.pressure_hpa,
            height_m: record.height_m,
            temp_c: record.temperature.map(|t| *t),
            dewpt_c: record.dewpoint.map(|t| *t),
            wind_dir: record.wind_direction.map(|d| *d),
            wind_spd_knots: record.wind_speed.map(|k| *k),
        }
    }

    fn into_record(self) -> Result<SoundingRecord, String> {
        let timestamp = parse_time(&self.time).ok_or_else(|| format!("unreadable time '{}'", self.time))?;
        if !self.pressure_level.is_finite() || self.pressure_level <= 0.0 {
            return Err(format!("invalid pressure level {}", self.pressure_level));
        }
        Ok(SoundingRecord {
            timestamp,
            pressure_hpa: self.pressure_level,
            height_m: finite(self.height_m),
            temperature: finite(self.temp_c).map(Celsius::new),
            dewpoint: finite(self.dewpt_c).map(Celsius::new),
            wind_direction: finite(self.wind_dir).map(Degrees::new),
            wind_speed: finite(self.wind_spd_knots).map(Knots::new),
        })
    }
}

/// Single-level reanalysis row
#[derive(Debug, Deserialize)]
struct ReanalysisSurfaceRow {
    time: String,
    t2m: Option<f64>,
    d2m: Option<f64>,
    sp: Option<f64>,
    tp: Option<f64>,
    u10: Option<f64>,
    v10: Option<f64>,
    tcc: Option<f64>,
}

impl ReanalysisSurfaceRow {
    fn into_record(self) -> Result<HourlyMetRecord, String> {
        let timestamp = parse_time(&self.time).ok_or_else(|| format!("unreadable time '{}'", self.time))?;
        Ok(HourlyMetRecord::from(SurfaceSample {
            timestamp,
            temperature: self.t2m.map(Kelvin::new),
            dewpoint: self.d2m.map(Kelvin::new),
            surface_pressure_pa: self.sp,
            precipitation_m: self.tp,
            u10: self.u10,
            v10: self.v10,
            total_cloud: self.tcc,
        }))
    }
}

/// Pressure-level reanalysis row
#[derive(Debug, Deserialize)]
struct ReanalysisLevelRow {
    time: String,
    pressure_level: f64,
    z: Option<f64>,
    t: Option<f64>,
    r: Option<f64>,
    u: Option<f64>,
    v: Option<f64>,
}

impl ReanalysisLevelRow {
    fn into_record(self) -> Result<SoundingRecord, String> {
        let timestamp = parse_time(&self.time).ok_or_else(|| format!("unreadable time '{}'", self.time))?;
        if !self.pressure_level.is_finite() || self.pressure_level <= 0.0 {
            return Err(format!("invalid pressure level {}", self.pressure_level));
        }
        Ok(SoundingRecord::from(LevelSample {
            timestamp,
            pressure_hpa: self.pressure_level,
            geopotential: self.z,
            temperature: self.t.map(Kelvin::new),
            relative_humidity: self.r,
            u: self.u,
            v: self.v,
        }))
    }
}

fn parse_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn open(path: &Path) -> Result<File, MetError> {
    File::open(path).map_err(|source| MetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_rows<R, T, U, F>(reader: R, label: &Path, convert: F) -> Result<Vec<U>, MetError>
where
    R: Read,
    T: for<'de> Deserialize<'de>,
    F: Fn(T) -> Result<U, String>,
{
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for (index, row) in csv_reader.deserialize::<T>().enumerate() {
        let converted = match row {
            Ok(row) => convert(row),
            Err(source) if source.is_io_error() => {
                return Err(MetError::Csv {
                    path: label.to_path_buf(),
                    source,
                })
            }
            Err(source) => Err(source.to_string()),
        };
        match converted {
            Ok(record) => out.push(record),
            Err(reason) => {
                let rejected = MetError::InvalidRecord {
                    path: label.to_path_buf(),
                    row: index + 1,
                    reason,
                };
                warn!("{rejected}; row skipped");
                skipped += 1;
            }
        }
    }
    if out.is_empty() {
        return Err(MetError::Empty(label.to_path_buf()));
    }
    debug!("Read {} rows from {} ({skipped} skipped)", out.len(), label.display());
    Ok(out)
}

/// Read a processed surface table
///
/// # Errors
/// Returns [`MetError`] if the file cannot be opened or read, or no row
/// survives. Rows with unreadable cells or an impossible date or hour are
/// skipped.
pub fn read_surface_table(path: &Path) -> Result<Vec<HourlyMetRecord>, MetError> {
    let records = read_surface_rows(open(path)?, path)?;
    info!("Loaded {} surface hours from {}", records.len(), path.display());
    Ok(records)
}

/// Read surface rows from any reader; `label` names the input in errors
///
/// # Errors
/// Same conditions as [`read_surface_table`].
pub fn read_surface_rows<R: Read>(reader: R, label: &Path) -> Result<Vec<HourlyMetRecord>, MetError> {
    read_rows(reader, label, SurfaceRow::into_record)
}

/// Read a sounding table
///
/// # Errors
/// Returns [`MetError`] if the file cannot be opened or read, or no row
/// survives. Rows with an unreadable time or unusable pressure level are
/// skipped.
pub fn read_sounding_table(path: &Path) -> Result<Vec<SoundingRecord>, MetError> {
    let records = read_sounding_rows(open(path)?, path)?;
    info!("Loaded {} sounding levels from {}", records.len(), path.display());
    Ok(records)
}

/// Read sounding rows from any reader; `label` names the input in errors
///
/// # Errors
/// Same conditions as [`read_sounding_table`].
pub fn read_sounding_rows<R: Read>(reader: R, label: &Path) -> Result<Vec<SoundingRecord>, MetError> {
    read_rows(reader, label, SoundingRow::into_record)
}

/// Read a reanalysis single-level extract (`time,t2m,d2m,sp,tp,u10,v10,tcc`)
///
/// Temperatures are Kelvin, pressure Pa, precipitation metres and cloud a
/// fraction; they are converted to the surface table's units.
///
/// # Errors
/// Same conditions as [`read_surface_table`].
pub fn read_reanalysis_surface(path: &Path) -> Result<Vec<HourlyMetRecord>, MetError> {
    let records = read_rows(open(path)?, path, ReanalysisSurfaceRow::into_record)?;
    info!("Converted {} reanalysis surface hours from {}", records.len(), path.display());
    Ok(records)
}

/// Read a reanalysis pressure-level extract (`time,pressure_level,z,t,r,u,v`)
///
/// # Errors
/// Same conditions as [`read_sounding_table`].
pub fn read_reanalysis_levels(path: &Path) -> Result<Vec<SoundingRecord>, MetError> {
    let records = read_rows(open(path)?, path, ReanalysisLevelRow::into_record)?;
    info!("Converted {} reanalysis levels from {}", records.len(), path.display());
    Ok(records)
}

/// Write records as a sounding table
///
/// # Errors
/// Returns [`MetError::Csv`] if a row cannot be written or flushed.
pub fn write_sounding_table<W: Write>(
    records: &[SoundingRecord],
    writer: W,
    label: &Path,
) -> Result<(), MetError> {
    write_rows(records.iter().map(SoundingRow::from_record), writer, label)
}

fn write_rows<T, I, W>(rows: I, writer: W, label: &Path) -> Result<(), MetError>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
    W: Write,
{
    let csv_error = |source| MetError::Csv {
        path: label.to_path_buf(),
        source,
    };
    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row).map_err(csv_error)?;
    }
    csv_writer
        .flush()
        .map_err(|e| csv_error(csv::Error::from(e)))?;
    Ok(())
}

/// Write records as a surface table, hour-ending convention
///
/// # Errors
/// Returns [`MetError::Csv`] if a row cannot be written or flushed.
pub fn write_surface_table<W: Write>(
    records: &[HourlyMetRecord],
    writer: W,
    label: &Path,
) -> Result<(), MetError> {
    write_rows(records.iter().map(SurfaceRow::from_record), writer, label)
}

/// Start of the hour that `hour_ending` (1-24) closes on `date`
#[must_use]
pub(crate) fn hour_ending_to_start(date: NaiveDate, hour_ending: u32) -> Option<NaiveDateTime> {
    if !(1..=24).contains(&hour_ending) {
        return None;
    }
    date.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight + Duration::hours(i64::from(hour_ending) - 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SURFACE: &str = "Year,Month,Day,Hour,Temp_C,DewPt_C,Press_mb,Precip_mm,WindSpd_ms,WindDir_deg,CloudCover\n\
                           2024,1,1,1,21.5,10.2,8345.0,0.0,3.2,180.0,4\n\
                           2024,1,1,24,,NaN,8340.0,0.5,1.0,90.0,\n";

    #[test]
    fn test_surface_rows() {
        let records = read_surface_rows(SURFACE.as_bytes(), Path::new("sfc.csv")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp.hour(), 0);
        assert_eq!(records[0].cloud_cover, Some(4));
        assert_eq!(records[1].timestamp.hour(), 23);
        assert_eq!(records[1].temperature, None);
        assert_eq!(records[1].dewpoint, None);
        assert_eq!(records[1].cloud_cover, None);
    }

    #[test]
    fn test_surface_table_round_trips_through_writer() {
        let records = read_surface_rows(SURFACE.as_bytes(), Path::new("sfc.csv")).unwrap();
        let mut buffer = Vec::new();
        write_surface_table(&records, &mut buffer, Path::new("out.csv")).unwrap();
        let again = read_surface_rows(buffer.as_slice(), Path::new("out.csv")).unwrap();
        assert_eq!(records, again);
    }

    #[test]
    fn test_surface_skips_hour_zero() {
        let text = "Year,Month,Day,Hour,Temp_C,DewPt_C,Press_mb,Precip_mm,WindSpd_ms,WindDir_deg,CloudCover\n\
                    2024,1,1,0,1,1,1,1,1,1,1\n\
                    2024,1,1,2,1,1,1,1,1,1,1\n";
        let records = read_surface_rows(text.as_bytes(), Path::new("sfc.csv")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].timestamp.hour(), 1);

        let only_bad = "Year,Month,Day,Hour,Temp_C,DewPt_C,Press_mb,Precip_mm,WindSpd_ms,WindDir_deg,CloudCover\n\
                        2024,1,1,0,1,1,1,1,1,1,1\n";
        assert!(matches!(
            read_surface_rows(only_bad.as_bytes(), Path::new("sfc.csv")),
            Err(MetError::Empty(_))
        ));
    }

    #[test]
    fn test_unreadable_surface_cell_becomes_missing_hour() {
        let text = "Year,Month,Day,Hour,Temp_C,DewPt_C,Press_mb,Precip_mm,WindSpd_ms,WindDir_deg,CloudCover\n\
                    2024,1,1,1,21.5,10.2,8345.0,0.0,3.2,180.0,4\n\
                    2024,1,1,2,abc,10.0,8344.0,0.0,2.1,170.0,5\n\
                    2024,1,1,3,20.5,10.0,8344.0,0.0,2.1,170.0,5\n";
        let records = read_surface_rows(text.as_bytes(), Path::new("surface_data_2024.csv")).unwrap();
        assert_eq!(records.len(), 2);

        let onsite = crate::met::encode_onsite(&records);
        let lines: Vec<&str> = onsite.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("2024  1  1  1   21.5"));
        assert_eq!(lines[1], "2024  1  1  2  -99.0  -99.0 99999.0  -9.00  -9.00  999.0 99");
        assert!(lines[2].starts_with("2024  1  1  3   20.5"));
    }

    #[test]
    fn test_bad_sounding_row_is_skipped() {
        let text = "time,pressure_level,height_m,temp_c,dewpt_c,wind_dir,wind_spd_knots\n\
                    yesterday,850,1500,20,15,270,10\n\
                    2024-01-01 00:00:00,-5,1500,20,15,270,10\n\
                    2024-01-01 00:00:00,700,3000,5,0,280,20\n";
        let records = read_sounding_rows(text.as_bytes(), Path::new("ua.csv")).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].pressure_hpa, 700.0);
    }

    #[test]
    fn test_sounding_rows() {
        let text = "time,pressure_level,height_m,temp_c,dewpt_c,wind_dir,wind_spd_knots\n\
                    2024-01-01 00:00:00,850,1500.2,20.1,15.0,270,10\n\
                    2024-01-01T12:00:00,700,,,,,\n";
        let records = read_sounding_rows(text.as_bytes(), Path::new("ua.csv")).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].pressure_hpa, 850.0);
        assert_eq!(records[1].timestamp.hour(), 12);
        assert!(records[1].height_m.is_none());
    }

    #[test]
    fn test_empty_table() {
        let text = "time,pressure_level,height_m,temp_c,dewpt_c,wind_dir,wind_spd_knots\n";
        assert!(matches!(
            read_sounding_rows(text.as_bytes(), Path::new("ua.csv")),
            Err(MetError::Empty(_))
        ));
    }

    #[test]
    fn test_sounding_table_round_trips_through_writer() {
        let text = "time,pressure_level,height_m,temp_c,dewpt_c,wind_dir,wind_spd_knots\n\
                    2024-01-01 00:00:00,850,1500.2,20.1,15.0,270,10\n\
                    2024-01-01 12:00:00,700,,,,,\n";
        let records = read_sounding_rows(text.as_bytes(), Path::new("ua.csv")).unwrap();
        let mut buffer = Vec::new();
        write_sounding_table(&records, &mut buffer, Path::new("out.csv")).unwrap();
        let written = String::from_utf8(buffer).unwrap();
        assert!(written.starts_with("time,pressure_level,height_m,temp_c,dewpt_c,wind_dir,wind_spd_knots\n"));
        assert_eq!(read_sounding_rows(written.as_bytes(), Path::new("out.csv")).unwrap(), records);
    }

    #[test]
    fn test_reanalysis_extracts_are_converted() {
        let dir = tempfile::tempdir().unwrap();
        let surface = dir.path().join("era5_surface_2024.csv");
        std::fs::write(
            &surface,
            "time,t2m,d2m,sp,tp,u10,v10,tcc\n\
             2024-01-01 00:00:00,293.15,283.15,83456.0,0.0012,0.0,-4.0,0.44\n",
        )
        .unwrap();
        let hours = read_reanalysis_surface(&surface).unwrap();
        assert_eq!(hours.len(), 1);
        let hour = &hours[0];
        assert!((*hour.temperature.unwrap() - 20.0).abs() < 1e-9);
        assert!((hour.pressure.unwrap() - 8345.6).abs() < 1e-9);
        assert!((hour.precipitation.unwrap() - 1.2).abs() < 1e-9);
        assert!((*hour.wind_speed.unwrap() - 4.0).abs() < 1e-9);
        assert!(hour.wind_direction.unwrap().abs() < 1e-9);
        assert_eq!(hour.cloud_cover, Some(4));

        let levels = dir.path().join("era5_levels_2024.csv");
        std::fs::write(
            &levels,
            "time,pressure_level,z,t,r,u,v\n\
             2024-01-01 00:00:00,850,14709.975,288.15,50,5.0,0.0\n\
             2024-01-01 00:00:00,0,1,1,1,1,1\n",
        )
        .unwrap();
        let soundings = read_reanalysis_levels(&levels).unwrap();
        assert_eq!(soundings.len(), 1);
        assert!((soundings[0].height_m.unwrap() - 1500.0).abs() < 1e-6);
        assert!((*soundings[0].dewpoint.unwrap() - 5.0).abs() < 1e-9);
        assert!((*soundings[0].wind_direction.unwrap() - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_hour_ending_conversion() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(hour_ending_to_start(date, 24).unwrap().hour(), 23);
        assert!(hour_ending_to_start(date, 0).is_none());
    }
}
