//! Well-known-text geometry parsing for inventory rows

use crate::projection::GeoCoord;
use std::fmt;
use std::str::FromStr;
use wkt::Wkt;

/// Geometry of one inventory row in geographic coordinates
#[derive(Debug, Clone, PartialEq)]
pub enum SourceGeometry {
    /// Single location (stacks)
    Point(GeoCoord),
    /// Exterior ring of a polygon, closing vertex included as given
    Polygon(Vec<GeoCoord>),
    /// Open polyline (roads, conveyors)
    LineString(Vec<GeoCoord>),
}

impl SourceGeometry {
    /// WKT keyword for this geometry type
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceGeometry::Point(_) => "POINT",
            SourceGeometry::Polygon(_) => "POLYGON",
            SourceGeometry::LineString(_) => "LINESTRING",
        }
    }
}

/// Why a geometry string was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryError {
    /// Text is not valid WKT
    Parse(String),
    /// Valid WKT, but not POINT/POLYGON/LINESTRING
    Unsupported(&'static str),
    /// Not enough distinct vertices for the geometry type
    TooFewVertices {
        /// WKT keyword
        kind: &'static str,
        /// Vertices present
        found: usize,
        /// Minimum required
        required: usize,
    },
}

impl fmt::Display for GeometryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeometryError::Parse(msg) => write!(f, "invalid WKT: {msg}"),
            GeometryError::Unsupported(kind) => write!(f, "unsupported geometry type {kind}"),
            GeometryError::TooFewVertices {
                kind,
                found,
                required,
            } => write!(f, "{kind} needs at least {required} vertices, found {found}"),
        }
    }
}

impl std::error::Error for GeometryError {}

/// Parse a WKT string into a [`SourceGeometry`]
///
/// Accepts `POINT`, `POLYGON` (exterior ring only) and `LINESTRING`.
///
/// # Errors
/// Returns [`GeometryError`] if the text does not parse, names another
/// geometry type, or carries too few vertices.
pub fn parse_wkt(text: &str) -> Result<SourceGeometry, GeometryError> {
    let parsed = Wkt::<f64>::from_str(text.trim()).map_err(|e| GeometryError::Parse(e.to_string()))?;
    let geometry = geo_types::Geometry::<f64>::try_from(parsed)
        .map_err(|e| GeometryError::Parse(e.to_string()))?;

    match geometry {
        geo_types::Geometry::Point(p) => Ok(SourceGeometry::Point(GeoCoord::new(p.x(), p.y()))),
        geo_types::Geometry::Polygon(poly) => {
            let ring: Vec<GeoCoord> = poly
                .exterior()
                .coords()
                .map(|c| GeoCoord::new(c.x, c.y))
                .collect();
            let distinct = open_ring(&ring).len();
            if distinct < 3 {
                return Err(GeometryError::TooFewVertices {
                    kind: "POLYGON",
                    found: distinct,
                    required: 3,
                });
            }
            Ok(SourceGeometry::Polygon(ring))
        }
        geo_types::Geometry::LineString(line) => {
            let path: Vec<GeoCoord> = line.coords().map(|c| GeoCoord::new(c.x, c.y)).collect();
            if path.len() < 2 {
                return Err(GeometryError::TooFewVertices {
                    kind: "LINESTRING",
                    found: path.len(),
                    required: 2,
                });
            }
            Ok(SourceGeometry::LineString(path))
        }
        other => Err(GeometryError::Unsupported(wkt_keyword(&other))),
    }
}

fn wkt_keyword(geometry: &geo_types::Geometry<f64>) -> &'static str {
    match geometry {
        geo_types::Geometry::Point(_) => "POINT",
        geo_types::Geometry::Line(_) => "LINE",
        geo_types::Geometry::LineString(_) => "LINESTRING",
        geo_types::Geometry::Polygon(_) => "POLYGON",
        geo_types::Geometry::MultiPoint(_) => "MULTIPOINT",
        geo_types::Geometry::MultiLineString(_) => "MULTILINESTRING",
        geo_types::Geometry::MultiPolygon(_) => "MULTIPOLYGON",
        geo_types::Geometry::GeometryCollection(_) => "GEOMETRYCOLLECTION",
        geo_types::Geometry::Rect(_) => "RECT",
        geo_types::Geometry::Triangle(_) => "TRIANGLE",
    }
}

/// Ring without its duplicated closing vertex
///
/// The closing vertex is only dropped when it is identical to the first one.
#[must_use]
pub fn open_ring(ring: &[GeoCoord]) -> &[GeoCoord] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}
