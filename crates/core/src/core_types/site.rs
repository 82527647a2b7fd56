//! Site reference: the geographic origin of every run

use crate::core_types::units::Meters;
use serde::{Deserialize, Serialize};

/// Geographic site location used as the local planar origin
///
/// Immutable for the lifetime of a run. The UTM zone is derived from the
/// longitude and the hemisphere from the sign of the latitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteReference {
    /// Latitude in decimal degrees (negative = south)
    pub latitude: f64,
    /// Longitude in decimal degrees (negative = west)
    pub longitude: f64,
    /// Ground elevation in metres above sea level
    #[serde(default)]
    pub elevation: Meters,
}

impl SiteReference {
    /// Create a new site reference
    #[must_use]
    pub fn new(latitude: f64, longitude: f64, elevation: Meters) -> Self {
        Self {
            latitude,
            longitude,
            elevation,
        }
    }

    /// UTM zone number (1-60) containing this site's longitude
    #[must_use]
    pub fn utm_zone(&self) -> u8 {
        let zone = ((self.longitude + 180.0) / 6.0).floor() as i64 + 1;
        zone.clamp(1, 60) as u8
    }

    /// Whether the site lies in the southern hemisphere
    #[must_use]
    pub fn is_southern(&self) -> bool {
        self.latitude < 0.0
    }

    /// Hours to add to UTC observations to reach local standard time,
    /// sign-flipped the way the preprocessor's LOCATION card expects
    /// (sites east of Greenwich get a negative adjustment).
    #[must_use]
    pub fn default_time_adjustment(&self) -> i32 {
        -((self.longitude / 15.0).round() as i32)
    }

    /// Latitude/longitude pair formatted as `26.200S 28.050E`
    #[must_use]
    pub fn hemisphere_string(&self) -> String {
        let lat_char = if self.latitude >= 0.0 { 'N' } else { 'S' };
        let lon_char = if self.longitude >= 0.0 { 'E' } else { 'W' };
        format!(
            "{:.3}{} {:.3}{}",
            self.latitude.abs(),
            lat_char,
            self.longitude.abs(),
            lon_char
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utm_zone_johannesburg() {
        let site = SiteReference::new(-26.20, 28.05, Meters::new(1600.0));
        assert_eq!(site.utm_zone(), 35);
        assert!(site.is_southern());
        assert_eq!(site.default_time_adjustment(), -2);
    }

    #[test]
    fn test_utm_zone_edges() {
        assert_eq!(SiteReference::new(0.0, -180.0, Meters::ZERO).utm_zone(), 1);
        assert_eq!(SiteReference::new(0.0, 180.0, Meters::ZERO).utm_zone(), 60);
        assert_eq!(SiteReference::new(0.0, 0.0, Meters::ZERO).utm_zone(), 31);
    }

    #[test]
    fn test_hemisphere_string() {
        let site = SiteReference::new(-26.2, 28.05, Meters::ZERO);
        assert_eq!(site.hemisphere_string(), "26.200S 28.050E");

        let site = SiteReference::new(40.5, -105.25, Meters::ZERO);
        assert_eq!(site.hemisphere_string(), "40.500N 105.250W");
    }
}
