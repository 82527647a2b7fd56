//! Emissions inventory: source records, geometry and CSV ingestion
//!
//! An inventory is three CSV files (point, area and line sources). Each row
//! becomes an [`EmissionSource`] carrying a WKT geometry in geographic
//! coordinates, the variant's physical parameters, and a per-pollutant rate
//! table. Sources are projected and turned into protocol cards later by
//! [`crate::control::source::SourceCompiler`].

pub mod geometry;
pub mod loader;
pub mod template;

use crate::core_types::units::{Kelvin, Meters, MetersPerSecond};
use crate::projection::GeoCoord;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use geometry::{open_ring, parse_wkt, GeometryError, SourceGeometry};
pub use loader::{Inventory, InventoryLoader};
pub use template::{write_templates, TemplateOutcome};

/// Pollutant columns every inventory template carries
pub const STANDARD_POLLUTANTS: [&str; 7] = ["SO2", "NO2", "PM10", "PM2.5", "CO", "Pb", "OTHER"];

/// Source variant, one CSV file per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceVariant {
    /// Stacks and vents
    Point,
    /// Polygonal area sources (stockpiles, tailings)
    Area,
    /// Polyline sources (haul roads)
    Line,
}

impl SourceVariant {
    /// All variants in compile order
    pub const ALL: [SourceVariant; 3] = [SourceVariant::Point, SourceVariant::Area, SourceVariant::Line];

    /// Default inventory file name for this variant
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            SourceVariant::Point => "point_sources.csv",
            SourceVariant::Area => "area_sources.csv",
            SourceVariant::Line => "line_sources.csv",
        }
    }

    /// WKT geometry keyword rows of this variant must use
    #[must_use]
    pub fn geometry_keyword(&self) -> &'static str {
        match self {
            SourceVariant::Point => "POINT",
            SourceVariant::Area => "POLYGON",
            SourceVariant::Line => "LINESTRING",
        }
    }
}

impl fmt::Display for SourceVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceVariant::Point => "point",
            SourceVariant::Area => "area",
            SourceVariant::Line => "line",
        };
        f.write_str(name)
    }
}

/// Normalized source identifier
///
/// Leading/trailing whitespace is trimmed and internal whitespace runs are
/// replaced with `_`, so `" Stack 1 "` becomes `Stack_1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceId(String);

impl SourceId {
    /// Normalize a raw identifier; `None` when nothing but whitespace remains
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.split_whitespace().collect::<Vec<_>>().join("_");
        if normalized.is_empty() {
            None
        } else {
            Some(SourceId(normalized))
        }
    }

    /// Identifier text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier of the `index`-th (1-based) segment of a line source
    #[must_use]
    pub fn segment(&self, index: usize) -> SourceId {
        SourceId(format!("{}_S{}", self.0, index))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Emission rates keyed by pollutant name (case-insensitive)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmissionRates {
    rates: FxHashMap<String, f64>,
}

impl EmissionRates {
    /// Empty rate table (every pollutant at zero)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    #[must_use]
    pub fn with(mut self, pollutant: &str, rate: f64) -> Self {
        self.set(pollutant, rate);
        self
    }

    /// Set the rate for a pollutant
    pub fn set(&mut self, pollutant: &str, rate: f64) {
        self.rates.insert(pollutant.to_uppercase(), rate);
    }

    /// Rate for a pollutant; absent pollutants emit nothing
    #[must_use]
    pub fn rate_for(&self, pollutant: &str) -> f64 {
        self.rates.get(&pollutant.to_uppercase()).copied().unwrap_or(0.0)
    }

    /// Whether this source emits `pollutant` (strictly positive rate)
    #[must_use]
    pub fn emits(&self, pollutant: &str) -> bool {
        self.rate_for(pollutant) > 0.0
    }
}

/// Point-source stack parameters
///
/// Defaults follow the inventory convention for blank cells: zero heights and
/// flows, and an ambient-like 293 K exit temperature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StackParameters {
    /// Base elevation above sea level
    pub base_elevation: Meters,
    /// Stack release height above ground
    pub release_height: Meters,
    /// Stack gas exit temperature
    pub exit_temperature: Kelvin,
    /// Stack gas exit velocity
    pub exit_velocity: MetersPerSecond,
    /// Stack inside diameter
    pub diameter: Meters,
}

impl Default for StackParameters {
    fn default() -> Self {
        Self {
            base_elevation: Meters::ZERO,
            release_height: Meters::ZERO,
            exit_temperature: Kelvin::new(293.0),
            exit_velocity: MetersPerSecond::new(0.0),
            diameter: Meters::ZERO,
        }
    }
}

/// Polygon area-source parameters (vertex count is derived from the ring)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AreaParameters {
    /// Base elevation above sea level
    pub base_elevation: Meters,
    /// Release height above ground
    pub release_height: Meters,
    /// Initial vertical dispersion (sigma-z)
    pub initial_sigma_z: Meters,
}

/// Line-source parameters; every segment inherits them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineParameters {
    /// Base elevation above sea level
    pub base_elevation: Meters,
    /// Release height above ground
    pub release_height: Meters,
    /// Line width (default 10 m)
    pub width: Meters,
    /// Initial vertical dispersion (sigma-z)
    pub initial_sigma_z: Meters,
}

impl Default for LineParameters {
    fn default() -> Self {
        Self {
            base_elevation: Meters::ZERO,
            release_height: Meters::ZERO,
            width: Meters::new(10.0),
            initial_sigma_z: Meters::ZERO,
        }
    }
}

/// Variant-specific geometry and parameters
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Stack at a single location
    Point {
        /// Stack location
        location: GeoCoord,
        /// Stack parameters
        stack: StackParameters,
    },
    /// Closed polygon
    Area {
        /// Exterior ring (closing vertex may be present)
        ring: Vec<GeoCoord>,
        /// Area parameters
        params: AreaParameters,
    },
    /// Polyline decomposed into per-segment sources
    Line {
        /// Vertices in order
        path: Vec<GeoCoord>,
        /// Line parameters
        params: LineParameters,
    },
}

/// One inventory record
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionSource {
    /// Normalized identifier
    pub id: SourceId,
    /// Geometry and physical parameters
    pub kind: SourceKind,
    /// Emission rate per pollutant (g/s, or g/s/m² for area and line)
    pub rates: EmissionRates,
}

impl EmissionSource {
    /// Point source
    #[must_use]
    pub fn point(id: SourceId, location: GeoCoord, stack: StackParameters, rates: EmissionRates) -> Self {
        Self {
            id,
            kind: SourceKind::Point { location, stack },
            rates,
        }
    }

    /// Polygon area source
    #[must_use]
    pub fn area(id: SourceId, ring: Vec<GeoCoord>, params: AreaParameters, rates: EmissionRates) -> Self {
        Self {
            id,
            kind: SourceKind::Area { ring, params },
            rates,
        }
    }

    /// Polyline source
    #[must_use]
    pub fn line(id: SourceId, path: Vec<GeoCoord>, params: LineParameters, rates: EmissionRates) -> Self {
        Self {
            id,
            kind: SourceKind::Line { path, params },
            rates,
        }
    }

    /// Which CSV variant this source belongs to
    #[must_use]
    pub fn variant(&self) -> SourceVariant {
        match self.kind {
            SourceKind::Point { .. } => SourceVariant::Point,
            SourceKind::Area { .. } => SourceVariant::Area,
            SourceKind::Line { .. } => SourceVariant::Line,
        }
    }

    /// Rate for a pollutant (zero when absent)
    #[must_use]
    pub fn rate_for(&self, pollutant: &str) -> f64 {
        self.rates.rate_for(pollutant)
    }
}

/// Locations of the three inventory CSV files; absent entries are skipped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryPaths {
    /// Point source CSV
    #[serde(default)]
    pub point: Option<PathBuf>,
    /// Area source CSV
    #[serde(default)]
    pub area: Option<PathBuf>,
    /// Line source CSV
    #[serde(default)]
    pub line: Option<PathBuf>,
}

impl InventoryPaths {
    /// Standard file names inside one inventory directory
    #[must_use]
    pub fn in_directory(dir: &std::path::Path) -> Self {
        Self {
            point: Some(dir.join(SourceVariant::Point.file_name())),
            area: Some(dir.join(SourceVariant::Area.file_name())),
            line: Some(dir.join(SourceVariant::Line.file_name())),
        }
    }

    /// Path configured for a variant
    #[must_use]
    pub fn path_for(&self, variant: SourceVariant) -> Option<&PathBuf> {
        match variant {
            SourceVariant::Point => self.point.as_ref(),
            SourceVariant::Area => self.area.as_ref(),
            SourceVariant::Line => self.line.as_ref(),
        }
    }
}

/// Why a single inventory row was rejected
#[derive(Debug, Clone, PartialEq)]
pub enum RowProblem {
    /// `source_id` blank after normalization
    EmptySourceId,
    /// Geometry cell blank
    MissingGeometry,
    /// Geometry failed to parse
    Geometry(GeometryError),
    /// Geometry type does not match the file's variant
    GeometryMismatch {
        /// Variant of the file
        expected: SourceVariant,
        /// WKT keyword found
        found: &'static str,
    },
    /// Numeric cell could not be parsed
    InvalidNumber {
        /// Column name
        column: String,
        /// Raw cell text
        value: String,
    },
    /// CSV record was malformed (wrong field count, bad quoting)
    Malformed(String),
}

impl fmt::Display for RowProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowProblem::EmptySourceId => write!(f, "source_id is empty"),
            RowProblem::MissingGeometry => write!(f, "geometry is empty"),
            RowProblem::Geometry(e) => write!(f, "{e}"),
            RowProblem::GeometryMismatch { expected, found } => write!(
                f,
                "{expected} source needs {} geometry, found {found}",
                expected.geometry_keyword()
            ),
            RowProblem::InvalidNumber { column, value } => {
                write!(f, "column '{column}' is not a number: '{value}'")
            }
            RowProblem::Malformed(msg) => write!(f, "malformed record: {msg}"),
        }
    }
}

/// Errors raised while reading inventory files
#[derive(Debug)]
pub enum InventoryError {
    /// File could not be opened or written
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// CSV header could not be read
    Csv {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: csv::Error,
    },
    /// Required column absent from the header
    MissingColumn {
        /// File involved
        path: PathBuf,
        /// Column name
        column: &'static str,
    },
    /// One row was rejected; the rest of the file is still loaded
    InvalidRow {
        /// File involved
        path: PathBuf,
        /// 1-based data row number
        row: usize,
        /// Identifier, when it could be read
        source_id: Option<String>,
        /// What went wrong
        problem: RowProblem,
    },
}

impl fmt::Display for InventoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryError::Io { path, source } => {
                write!(f, "Failed to access {}: {source}", path.display())
            }
            InventoryError::Csv { path, source } => {
                write!(f, "Failed to read CSV {}: {source}", path.display())
            }
            InventoryError::MissingColumn { path, column } => {
                write!(f, "{} has no '{column}' column", path.display())
            }
            InventoryError::InvalidRow {
                path,
                row,
                source_id,
                problem,
            } => {
                let id = source_id.as_deref().unwrap_or("?");
                write!(f, "{} row {row} (source '{id}'): {problem}", path.display())
            }
        }
    }
}

impl std::error::Error for InventoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InventoryError::Io { source, .. } => Some(source),
            InventoryError::Csv { source, .. } => Some(source),
            InventoryError::InvalidRow {
                problem: RowProblem::Geometry(e),
                ..
            } => Some(e),
            _ => None,
        }
    }
}
