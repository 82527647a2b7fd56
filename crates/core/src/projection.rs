//! Geographic to local planar coordinate projection
//!
//! Emission sources arrive in WGS84 longitude/latitude. The dispersion engine
//! wants metres on a flat grid, so every coordinate is pushed through a UTM
//! transverse Mercator projection and then translated so the site itself sits
//! at `(0, 0)`.
//!
//! The projection uses the Krüger series in the third flattening `n`
//! (Karney 2011), accurate to well under a millimetre inside a UTM zone.
//!
//! # Example
//! ```
//! use plume_core::core_types::{Meters, SiteReference};
//! use plume_core::projection::{CoordinateProjector, GeoCoord};
//!
//! let site = SiteReference::new(-26.20, 28.05, Meters::new(1600.0));
//! let projector = CoordinateProjector::new(site).unwrap();
//!
//! let origin = projector.project(GeoCoord::new(28.05, -26.20)).unwrap();
//! assert!(origin.x.abs() < 1e-6 && origin.y.abs() < 1e-6);
//! ```

use crate::core_types::SiteReference;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// WGS84 semi-major axis (m)
const WGS84_A: f64 = 6378137.0;

/// WGS84 flattening
const WGS84_F: f64 = 1.0 / 298.257223563;

/// UTM central scale factor
const UTM_K0: f64 = 0.9996;

/// UTM false easting (m)
const FALSE_EASTING: f64 = 500000.0;

/// UTM false northing for the southern hemisphere (m)
const FALSE_NORTHING_SOUTH: f64 = 10000000.0;

/// Newton iterations for the inverse conformal latitude
const MAX_INVERSE_ITERATIONS: usize = 10;

/// Geographic coordinate in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoCoord {
    /// Longitude in degrees (east positive)
    pub lon: f64,
    /// Latitude in degrees (north positive)
    pub lat: f64,
}

impl GeoCoord {
    /// Create a coordinate from longitude and latitude (x, y order, like WKT)
    #[must_use]
    pub const fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

impl fmt::Display for GeoCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.lon, self.lat)
    }
}

/// Errors raised when a coordinate cannot be projected
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionError {
    /// Longitude or latitude is NaN or infinite
    NonFinite(GeoCoord),
    /// Longitude or latitude outside the valid geographic range
    OutOfRange(GeoCoord),
    /// Point is 90° or more from the zone's central meridian
    OutsideZone {
        /// Offending coordinate
        coord: GeoCoord,
        /// UTM zone of the projector
        zone: u8,
    },
    /// The series evaluation produced a non-finite planar coordinate
    Degenerate(GeoCoord),
    /// Planar coordinate could not be inverted
    InverseFailed {
        /// Easting (m)
        x: f64,
        /// Northing (m)
        y: f64,
    },
}

impl fmt::Display for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionError::NonFinite(c) => write!(f, "Non-finite coordinate {c}"),
            ProjectionError::OutOfRange(c) => {
                write!(f, "Coordinate {c} is outside longitude/latitude range")
            }
            ProjectionError::OutsideZone { coord, zone } => {
                write!(f, "Coordinate {coord} is too far from UTM zone {zone}")
            }
            ProjectionError::Degenerate(c) => write!(f, "Projection of {c} is degenerate"),
            ProjectionError::InverseFailed { x, y } => {
                write!(f, "Cannot invert planar coordinate ({x:.2}, {y:.2})")
            }
        }
    }
}

impl std::error::Error for ProjectionError {}

/// Transverse Mercator forward/inverse transform for one UTM zone
#[derive(Debug, Clone, PartialEq)]
pub struct TransverseMercator {
    zone: u8,
    southern: bool,
    /// Central meridian in radians
    central_meridian: f64,
    /// First eccentricity
    e: f64,
    /// Scaled rectifying radius `k0 * A`
    a_hat: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
}

impl TransverseMercator {
    /// Build the WGS84 UTM transform for a zone and hemisphere
    #[must_use]
    pub fn utm(zone: u8, southern: bool) -> Self {
        let f = WGS84_F;
        let n = f / (2.0 - f);
        let n2 = n * n;
        let n3 = n2 * n;

        let rectifying_radius = WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);

        let alpha = [
            n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
            13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
            61.0 * n3 / 240.0,
        ];
        let beta = [
            n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
            n2 / 48.0 + n3 / 15.0,
            17.0 * n3 / 480.0,
        ];

        let central_meridian = (f64::from(zone) * 6.0 - 183.0).to_radians();

        Self {
            zone,
            southern,
            central_meridian,
            e: (f * (2.0 - f)).sqrt(),
            a_hat: UTM_K0 * rectifying_radius,
            alpha,
            beta,
        }
    }

    /// UTM zone number
    #[must_use]
    pub fn zone(&self) -> u8 {
        self.zone
    }

    /// Whether the southern false northing is applied
    #[must_use]
    pub fn is_southern(&self) -> bool {
        self.southern
    }

    fn false_northing(&self) -> f64 {
        if self.southern {
            FALSE_NORTHING_SOUTH
        } else {
            0.0
        }
    }

    /// Tangent of the conformal latitude for a geodetic tangent `tau`
    fn conformal_tau(&self, tau: f64) -> f64 {
        let tau1 = tau.hypot(1.0);
        let sigma = (self.e * (self.e * tau / tau1).atanh()).sinh();
        tau * sigma.hypot(1.0) - sigma * tau1
    }

    /// Project a geographic coordinate to UTM easting/northing
    ///
    /// # Errors
    /// Returns [`ProjectionError`] for non-finite, out-of-range or
    /// out-of-zone input, and when the series produces a non-finite result.
    pub fn forward(&self, coord: GeoCoord) -> Result<Point2<f64>, ProjectionError> {
        if !coord.lon.is_finite() || !coord.lat.is_finite() {
            return Err(ProjectionError::NonFinite(coord));
        }
        if coord.lat.abs() > 90.0 || coord.lon.abs() > 180.0 {
            return Err(ProjectionError::OutOfRange(coord));
        }

        let lam = wrap_radians(coord.lon.to_radians() - self.central_meridian);
        if lam.abs() >= std::f64::consts::FRAC_PI_2 {
            return Err(ProjectionError::OutsideZone {
                coord,
                zone: self.zone,
            });
        }

        let tau = coord.lat.to_radians().tan();
        let tau_p = self.conformal_tau(tau);

        let xi_p = tau_p.atan2(lam.cos());
        let eta_p = (lam.sin() / tau_p.hypot(lam.cos())).asinh();

        let mut xi = xi_p;
        let mut eta = eta_p;
        for (j, a) in self.alpha.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi += a * (k * xi_p).sin() * (k * eta_p).cosh();
            eta += a * (k * xi_p).cos() * (k * eta_p).sinh();
        }

        let x = FALSE_EASTING + self.a_hat * eta;
        let y = self.false_northing() + self.a_hat * xi;

        if x.is_finite() && y.is_finite() {
            Ok(Point2::new(x, y))
        } else {
            Err(ProjectionError::Degenerate(coord))
        }
    }

    /// Invert a UTM easting/northing back to longitude/latitude
    ///
    /// # Errors
    /// Returns [`ProjectionError::InverseFailed`] when the input is non-finite
    /// or the conformal latitude iteration does not settle.
    pub fn inverse(&self, point: Point2<f64>) -> Result<GeoCoord, ProjectionError> {
        let failed = ProjectionError::InverseFailed {
            x: point.x,
            y: point.y,
        };
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(failed);
        }

        let xi = (point.y - self.false_northing()) / self.a_hat;
        let eta = (point.x - FALSE_EASTING) / self.a_hat;

        let mut xi_p = xi;
        let mut eta_p = eta;
        for (j, b) in self.beta.iter().enumerate() {
            let k = 2.0 * (j as f64 + 1.0);
            xi_p -= b * (k * xi).sin() * (k * eta).cosh();
            eta_p -= b * (k * xi).cos() * (k * eta).sinh();
        }

        let s = eta_p.sinh();
        let c = xi_p.cos();
        let tau_p = xi_p.sin() / s.hypot(c);
        let lam = s.atan2(c);

        // Newton iteration for tau given tau' (Karney 2011, eq. 19-21)
        let e2 = self.e * self.e;
        let mut tau = tau_p / (1.0 - e2);
        let mut converged = false;
        for _ in 0..MAX_INVERSE_ITERATIONS {
            let tau_i = self.conformal_tau(tau);
            let step = (tau_p - tau_i) * (1.0 + (1.0 - e2) * tau * tau)
                / ((1.0 - e2) * tau_i.hypot(1.0) * tau.hypot(1.0));
            tau += step;
            if step.abs() <= 1e-14 * tau.abs().max(1.0) {
                converged = true;
                break;
            }
        }

        if !converged || !tau.is_finite() {
            return Err(failed);
        }

        let lat = tau.atan().to_degrees();
        let lon = wrap_radians(lam + self.central_meridian).to_degrees();
        Ok(GeoCoord::new(lon, lat))
    }
}

/// Wrap an angle into `(-π, π]`
fn wrap_radians(angle: f64) -> f64 {
    use std::f64::consts::{PI, TAU};
    let wrapped = (angle + PI).rem_euclid(TAU) - PI;
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Site-centred projector
///
/// Derives the UTM zone and hemisphere once from the [`SiteReference`],
/// caches the site's own easting/northing, and returns every subsequent
/// coordinate as metres relative to it.
#[derive(Debug, Clone)]
pub struct CoordinateProjector {
    site: SiteReference,
    transform: TransverseMercator,
    origin: Point2<f64>,
}

impl CoordinateProjector {
    /// Create a projector centred on `site`
    ///
    /// # Errors
    /// Returns [`ProjectionError`] if the site coordinate itself cannot be
    /// projected.
    pub fn new(site: SiteReference) -> Result<Self, ProjectionError> {
        let transform = TransverseMercator::utm(site.utm_zone(), site.is_southern());
        let origin = transform.forward(GeoCoord::new(site.longitude, site.latitude))?;

        Ok(Self {
            site,
            transform,
            origin,
        })
    }

    /// Site this projector is centred on
    #[must_use]
    pub fn site(&self) -> &SiteReference {
        &self.site
    }

    /// Underlying UTM transform
    #[must_use]
    pub fn transform(&self) -> &TransverseMercator {
        &self.transform
    }

    /// Absolute UTM coordinate of the site
    #[must_use]
    pub fn origin(&self) -> Point2<f64> {
        self.origin
    }

    /// Project a geographic coordinate to metres relative to the site
    ///
    /// # Errors
    /// Propagates [`ProjectionError`] from the forward transform.
    pub fn project(&self, coord: GeoCoord) -> Result<Point2<f64>, ProjectionError> {
        let utm = self.transform.forward(coord)?;
        Ok(Point2::from(utm - self.origin))
    }

    /// Project every coordinate, failing on the first bad one
    ///
    /// # Errors
    /// Propagates the first [`ProjectionError`] encountered.
    pub fn project_all(&self, coords: &[GeoCoord]) -> Result<Vec<Point2<f64>>, ProjectionError> {
        coords.iter().map(|&c| self.project(c)).collect()
    }

    /// Convert a site-relative planar coordinate back to longitude/latitude
    ///
    /// # Errors
    /// Propagates [`ProjectionError`] from the inverse transform.
    pub fn unproject(&self, local: Point2<f64>) -> Result<GeoCoord, ProjectionError> {
        self.transform.inverse(local + self.origin.coords)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::Meters;
    use approx::assert_relative_eq;

    fn johannesburg() -> SiteReference {
        SiteReference::new(-26.20, 28.05, Meters::new(1600.0))
    }

    #[test]
    fn test_central_meridian_on_equator() {
        // Zone 35 central meridian is 27°E
        let north = TransverseMercator::utm(35, false);
        let p = north.forward(GeoCoord::new(27.0, 0.0)).unwrap();
        assert_relative_eq!(p.x, FALSE_EASTING, epsilon = 1e-6);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-6);

        let south = TransverseMercator::utm(35, true);
        let p = south.forward(GeoCoord::new(27.0, 0.0)).unwrap();
        assert_relative_eq!(p.y, FALSE_NORTHING_SOUTH, epsilon = 1e-6);
    }

    #[test]
    fn test_meridian_arc_one_degree() {
        // Meridian arc from equator to 1°N is 110 574.4 m, scaled by k0
        let tm = TransverseMercator::utm(31, false);
        let p = tm.forward(GeoCoord::new(3.0, 1.0)).unwrap();
        assert_relative_eq!(p.y, 110574.4 * UTM_K0, epsilon = 1.0);
        assert_relative_eq!(p.x, FALSE_EASTING, epsilon = 1e-6);
    }

    #[test]
    fn test_symmetric_about_central_meridian() {
        let tm = TransverseMercator::utm(35, true);
        let east = tm.forward(GeoCoord::new(28.5, -26.0)).unwrap();
        let west = tm.forward(GeoCoord::new(25.5, -26.0)).unwrap();
        assert_relative_eq!(east.x - FALSE_EASTING, FALSE_EASTING - west.x, epsilon = 1e-6);
        assert_relative_eq!(east.y, west.y, epsilon = 1e-6);
    }

    #[test]
    fn test_site_projects_to_origin() {
        let projector = CoordinateProjector::new(johannesburg()).unwrap();
        let p = projector.project(GeoCoord::new(28.05, -26.20)).unwrap();
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_forward_inverse_round_trip() {
        let projector = CoordinateProjector::new(johannesburg()).unwrap();
        for &(dx, dy) in &[(500.0, 300.0), (-4200.0, 3100.0), (12000.0, -8000.0)] {
            let geo = projector.unproject(Point2::new(dx, dy)).unwrap();
            let back = projector.project(geo).unwrap();
            assert_relative_eq!(back.x, dx, epsilon = 1e-4);
            assert_relative_eq!(back.y, dy, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_local_offsets_match_flat_earth_near_site() {
        // 0.001° of latitude is roughly 110.8 m at 26°S
        let projector = CoordinateProjector::new(johannesburg()).unwrap();
        let p = projector.project(GeoCoord::new(28.05, -26.199)).unwrap();
        assert!(p.y > 109.0 && p.y < 112.0, "northing offset {}", p.y);
        assert!(p.x.abs() < 2.0, "easting drift {}", p.x);
    }

    #[test]
    fn test_rejects_degenerate_input() {
        let projector = CoordinateProjector::new(johannesburg()).unwrap();
        assert!(matches!(
            projector.project(GeoCoord::new(f64::NAN, -26.0)),
            Err(ProjectionError::NonFinite(_))
        ));
        assert!(matches!(
            projector.project(GeoCoord::new(28.0, -95.0)),
            Err(ProjectionError::OutOfRange(_))
        ));
        assert!(matches!(
            projector.project(GeoCoord::new(-150.0, -26.0)),
            Err(ProjectionError::OutsideZone { zone: 35, .. })
        ));
    }

    #[test]
    fn test_projection_is_deterministic() {
        let projector = CoordinateProjector::new(johannesburg()).unwrap();
        let c = GeoCoord::new(28.0612, -26.1873);
        assert_eq!(projector.project(c).unwrap(), projector.project(c).unwrap());
    }
}
