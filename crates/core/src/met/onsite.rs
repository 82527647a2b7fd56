//! Onsite surface record encoder and cloud-cover extract

use super::{finite, missing, HourlyMetRecord};
use crate::control::pathway::format_decimal;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Sort by time, drop repeated hours and insert all-missing records for
/// every absent hour between the first and last observation
#[must_use]
pub fn fill_hourly_gaps(records: &[HourlyMetRecord]) -> Vec<HourlyMetRecord> {
    let mut sorted: Vec<HourlyMetRecord> = records
        .iter()
        .map(|r| HourlyMetRecord {
            timestamp: truncate_to_hour(r.timestamp),
            ..*r
        })
        .collect();
    sorted.sort_by_key(|r| r.timestamp);

    let mut filled: Vec<HourlyMetRecord> = Vec::with_capacity(sorted.len());
    let mut gaps = 0usize;
    for record in sorted {
        if let Some(last) = filled.last() {
            if record.timestamp == last.timestamp {
                debug!("Dropping repeated surface hour {}", record.timestamp);
                continue;
            }
            let mut next = last.timestamp + Duration::hours(1);
            while next < record.timestamp {
                filled.push(HourlyMetRecord::missing(next));
                next += Duration::hours(1);
                gaps += 1;
            }
        }
        filled.push(record);
    }

    if gaps > 0 {
        warn!("Filled {gaps} missing surface hours with sentinel records");
    }
    filled
}

/// Every hour of `year`, January 1 01 through December 31 24
///
/// Records from other years are dropped. Hours before the first and after
/// the last observation are filled with all-missing records, as are gaps
/// in between.
#[must_use]
pub fn fill_year(records: &[HourlyMetRecord], year: i32) -> Vec<HourlyMetRecord> {
    let within: Vec<HourlyMetRecord> = records
        .iter()
        .filter(|r| r.timestamp.year() == year)
        .copied()
        .collect();
    if within.len() < records.len() {
        debug!("Dropped {} surface hours outside {year}", records.len() - within.len());
    }
    let observed = fill_hourly_gaps(&within);

    let first_hour = NaiveDate::from_ymd_opt(year, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    let last_hour = NaiveDate::from_ymd_opt(year, 12, 31).and_then(|d| d.and_hms_opt(23, 0, 0));
    let (Some(first_hour), Some(last_hour)) = (first_hour, last_hour) else {
        return observed;
    };

    let past_end = last_hour + Duration::hours(1);
    let lead_end = observed.first().map_or(past_end, |r| r.timestamp);
    let trail_start = observed.last().map_or(past_end, |r| r.timestamp + Duration::hours(1));

    let mut year_records = Vec::with_capacity(observed.len());
    let mut hour = first_hour;
    while hour < lead_end {
        year_records.push(HourlyMetRecord::missing(hour));
        hour += Duration::hours(1);
    }
    let observed_count = observed.len();
    year_records.extend(observed);
    let mut hour = trail_start;
    while hour <= last_hour {
        year_records.push(HourlyMetRecord::missing(hour));
        hour += Duration::hours(1);
    }

    let padded = year_records.len() - observed_count;
    if padded > 0 {
        warn!("Padded {padded} surface hours at the edges of {year} with sentinel records");
    }
    year_records
}

fn truncate_to_hour(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// Fixed-field onsite line for one hour
///
/// `YYYY MM DD HH` with the hour written as hour-ending (01-24) on the same
/// date, then temperature, dewpoint, pressure, precipitation, wind speed,
/// wind direction and cloud cover. No trailing newline.
#[must_use]
pub fn encode_record(record: &HourlyMetRecord) -> String {
    let ts = record.timestamp;
    let temperature = finite(record.temperature.map(|t| *t)).unwrap_or(missing::TEMPERATURE);
    let dewpoint = finite(record.dewpoint.map(|t| *t)).unwrap_or(missing::TEMPERATURE);
    let pressure = finite(record.pressure).unwrap_or(missing::PRESSURE);
    let precipitation = finite(record.precipitation).unwrap_or(missing::PRECIPITATION);
    let wind_speed = finite(record.wind_speed.map(|s| *s)).unwrap_or(missing::WIND_SPEED);
    let wind_direction = finite(record.wind_direction.map(|d| *d)).unwrap_or(missing::WIND_DIRECTION);
    let cloud_cover = cloud_code(record.cloud_cover);

    format!(
        "{:4} {:2} {:2} {:2} {:>6} {:>6} {:>7} {:>6} {:>6} {:>6} {:2}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour() + 1,
        format_decimal(temperature, 1),
        format_decimal(dewpoint, 1),
        format_decimal(pressure, 1),
        format_decimal(precipitation, 2),
        format_decimal(wind_speed, 2),
        format_decimal(wind_direction, 1),
        cloud_cover,
    )
}

fn cloud_code(cover: Option<u8>) -> u8 {
    match cover {
        Some(tenths) if tenths <= 10 => tenths,
        _ => missing::CLOUD_COVER,
    }
}

/// Onsite file contents: one line per hour, gaps filled, newline-terminated
#[must_use]
pub fn encode_onsite(records: &[HourlyMetRecord]) -> String {
    let mut text = String::new();
    for record in fill_hourly_gaps(records) {
        let _ = writeln!(text, "{}", encode_record(&record));
    }
    text
}

/// Surface cloud-cover extract: `YYYY MM DD HH CC` per hour and a final blank line
#[must_use]
pub fn encode_cloud_extract(records: &[HourlyMetRecord]) -> String {
    let mut text = String::new();
    for record in fill_hourly_gaps(records) {
        let ts = record.timestamp;
        let _ = writeln!(
            text,
            "{:4} {:2} {:2} {:2} {:2}",
            ts.year(),
            ts.month(),
            ts.day(),
            ts.hour() + 1,
            cloud_code(record.cloud_cover)
        );
    }
    text.push('\n');
    text
}
