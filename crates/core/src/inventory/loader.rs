//! CSV ingestion for point, area and line inventory files
//!
//! Column lookup is case-insensitive. Blank and `NaN` cells fall back to the
//! documented defaults of [`StackParameters`], [`AreaParameters`] and
//! [`LineParameters`]; blank pollutant cells mean zero emission. A bad row is
//! rejected on its own and reported with its row number and source id, the
//! rest of the file still loads.

use super::geometry::{parse_wkt, SourceGeometry};
use super::{
    AreaParameters, EmissionRates, EmissionSource, InventoryError, InventoryPaths, LineParameters,
    RowProblem, SourceId, SourceVariant, StackParameters, STANDARD_POLLUTANTS,
};
use crate::core_types::units::{Kelvin, Meters, MetersPerSecond};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};

/// Geometry column names, checked in order
const GEOMETRY_COLUMNS: [&str; 2] = ["wkt", "geometry"];

/// Sources loaded from one or more inventory files
#[derive(Debug, Default)]
pub struct Inventory {
    /// Accepted sources in file order (point, area, line)
    pub sources: Vec<EmissionSource>,
    /// Rows that were skipped, one [`InventoryError::InvalidRow`] each
    pub rejected: Vec<InventoryError>,
}

impl Inventory {
    /// Append another inventory's sources and rejections
    pub fn merge(&mut self, other: Inventory) {
        self.sources.extend(other.sources);
        self.rejected.extend(other.rejected);
    }

    /// Number of accepted sources
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no source was accepted
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Reads inventory CSV files into [`EmissionSource`] records
#[derive(Debug, Clone)]
pub struct InventoryLoader {
    pollutants: Vec<String>,
}

impl Default for InventoryLoader {
    fn default() -> Self {
        Self::new(std::iter::empty::<&str>())
    }
}

impl InventoryLoader {
    /// Create a loader recognizing the standard pollutant columns plus `extra`
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut pollutants: Vec<String> = STANDARD_POLLUTANTS.iter().map(|p| (*p).to_string()).collect();
        for name in extra {
            let name = name.as_ref().trim();
            if name.is_empty() {
                continue;
            }
            if !pollutants.iter().any(|p| p.eq_ignore_ascii_case(name)) {
                pollutants.push(name.to_string());
            }
        }
        Self { pollutants }
    }

    /// Pollutant columns this loader reads
    pub fn pollutants(&self) -> &[String] {
        &self.pollutants
    }

    /// Load every configured inventory file
    ///
    /// Files that are not configured or do not exist are skipped with a
    /// warning. A file whose header is unusable is reported in
    /// [`Inventory::rejected`] and contributes no sources.
    pub fn load(&self, paths: &InventoryPaths) -> Inventory {
        let mut inventory = Inventory::default();

        for variant in SourceVariant::ALL {
            let Some(path) = paths.path_for(variant) else {
                debug!("No {variant} inventory configured");
                continue;
            };
            if !path.exists() {
                warn!("{variant} inventory {} not found, skipping", path.display());
                continue;
            }
            match self.load_file(path, variant) {
                Ok(loaded) => inventory.merge(loaded),
                Err(e) => {
                    warn!("{e}");
                    inventory.rejected.push(e);
                }
            }
        }

        info!(
            "Loaded {} sources ({} rows rejected)",
            inventory.sources.len(),
            inventory.rejected.len()
        );
        inventory
    }

    /// Load a single inventory file of the given variant
    ///
    /// # Errors
    /// Returns [`InventoryError::Io`] if the file cannot be opened, or the
    /// header errors of [`InventoryLoader::parse_reader`].
    pub fn load_file(&self, path: &Path, variant: SourceVariant) -> Result<Inventory, InventoryError> {
        let file = File::open(path).map_err(|source| InventoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.parse_reader(file, variant, path)
    }

    /// Parse inventory rows from any reader
    ///
    /// `label` names the input in errors and log messages.
    ///
    /// # Errors
    /// Returns [`InventoryError::Csv`] if the header cannot be read and
    /// [`InventoryError::MissingColumn`] if `source_id` or the geometry
    /// column is absent. Row-level problems never fail the call.
    pub fn parse_reader<R: Read>(
        &self,
        reader: R,
        variant: SourceVariant,
        label: &Path,
    ) -> Result<Inventory, InventoryError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let headers = csv_reader
            .headers()
            .map_err(|source| InventoryError::Csv {
                path: label.to_path_buf(),
                source,
            })?
            .clone();
        let columns = ColumnIndex::new(&headers);

        let id_column = columns.get("source_id").ok_or_else(|| InventoryError::MissingColumn {
            path: label.to_path_buf(),
            column: "source_id",
        })?;
        let geometry_column = GEOMETRY_COLUMNS
            .iter()
            .find_map(|name| columns.get(name))
            .ok_or_else(|| InventoryError::MissingColumn {
                path: label.to_path_buf(),
                column: "WKT",
            })?;

        let mut inventory = Inventory::default();
        for (index, record) in csv_reader.records().enumerate() {
            let row_number = index + 1;
            let row = match record {
                Ok(record) => Row {
                    record,
                    columns: &columns,
                },
                Err(e) => {
                    inventory
                        .rejected
                        .push(reject(label, row_number, None, RowProblem::Malformed(e.to_string())));
                    continue;
                }
            };

            let raw_id = row.cell(id_column).to_string();
            match self.parse_row(&row, variant, id_column, geometry_column) {
                Ok(source) => {
                    debug!("Loaded {variant} source {}", source.id);
                    inventory.sources.push(source);
                }
                Err(problem) => {
                    let source_id = Some(raw_id).filter(|id| !id.is_empty());
                    inventory
                        .rejected
                        .push(reject(label, row_number, source_id, problem));
                }
            }
        }

        debug!(
            "{}: {} {variant} sources, {} rejected rows",
            label.display(),
            inventory.sources.len(),
            inventory.rejected.len()
        );
        Ok(inventory)
    }

    fn parse_row(
        &self,
        row: &Row<'_>,
        variant: SourceVariant,
        id_column: usize,
        geometry_column: usize,
    ) -> Result<EmissionSource, RowProblem> {
        let id = SourceId::parse(row.cell(id_column)).ok_or(RowProblem::EmptySourceId)?;

        let wkt = row.cell(geometry_column);
        if wkt.is_empty() {
            return Err(RowProblem::MissingGeometry);
        }
        let geometry = parse_wkt(wkt).map_err(RowProblem::Geometry)?;

        let mut rates = EmissionRates::new();
        for pollutant in &self.pollutants {
            let rate = row.number(&pollutant.to_ascii_lowercase())?.unwrap_or(0.0);
            if rate < 0.0 {
                return Err(RowProblem::InvalidNumber {
                    column: pollutant.clone(),
                    value: rate.to_string(),
                });
            }
            rates.set(pollutant, rate);
        }

        let source = match (variant, geometry) {
            (SourceVariant::Point, SourceGeometry::Point(location)) => {
                let defaults = StackParameters::default();
                let stack = StackParameters {
                    base_elevation: row.meters("elevation", defaults.base_elevation)?,
                    release_height: row.meters("stack_height", defaults.release_height)?,
                    exit_temperature: row
                        .number("stack_temp_k")?
                        .map_or(defaults.exit_temperature, Kelvin::new),
                    exit_velocity: row
                        .number("stack_velocity")?
                        .map_or(defaults.exit_velocity, MetersPerSecond::new),
                    diameter: row.meters("stack_diameter", defaults.diameter)?,
                };
                EmissionSource::point(id, location, stack, rates)
            }
            (SourceVariant::Area, SourceGeometry::Polygon(ring)) => {
                let defaults = AreaParameters::default();
                let params = AreaParameters {
                    base_elevation: row.meters("elevation", defaults.base_elevation)?,
                    release_height: row.meters("release_height", defaults.release_height)?,
                    initial_sigma_z: row.meters("szinit", defaults.initial_sigma_z)?,
                };
                EmissionSource::area(id, ring, params, rates)
            }
            (SourceVariant::Line, SourceGeometry::LineString(path)) => {
                let defaults = LineParameters::default();
                let params = LineParameters {
                    base_elevation: row.meters("elevation", defaults.base_elevation)?,
                    release_height: row.meters("release_height", defaults.release_height)?,
                    width: row.meters("width_m", defaults.width)?,
                    initial_sigma_z: row.meters("szinit", defaults.initial_sigma_z)?,
                };
                EmissionSource::line(id, path, params, rates)
            }
            (expected, other) => {
                return Err(RowProblem::GeometryMismatch {
                    expected,
                    found: other.type_name(),
                })
            }
        };
        Ok(source)
    }
}

fn reject(label: &Path, row: usize, source_id: Option<String>, problem: RowProblem) -> InventoryError {
    let error = InventoryError::InvalidRow {
        path: label.to_path_buf(),
        row,
        source_id,
        problem,
    };
    warn!("Skipping inventory row: {error}");
    error
}

/// Lower-cased header name to column position
struct ColumnIndex {
    positions: FxHashMap<String, usize>,
}

impl ColumnIndex {
    fn new(headers: &csv::StringRecord) -> Self {
        let mut positions = FxHashMap::default();
        for (i, name) in headers.iter().enumerate() {
            // First occurrence wins for duplicated headers
            positions.entry(name.trim().to_ascii_lowercase()).or_insert(i);
        }
        Self { positions }
    }

    fn get(&self, lower_name: &str) -> Option<usize> {
        self.positions.get(lower_name).copied()
    }
}

struct Row<'a> {
    record: csv::StringRecord,
    columns: &'a ColumnIndex,
}

impl Row<'_> {
    fn cell(&self, index: usize) -> &str {
        self.record.get(index).map_or("", str::trim)
    }

    /// Parsed numeric cell; `None` for absent columns and blank/`NaN` cells
    fn number(&self, lower_name: &str) -> Result<Option<f64>, RowProblem> {
        let Some(index) = self.columns.get(lower_name) else {
            return Ok(None);
        };
        let text = self.cell(index);
        if text.is_empty() || text.eq_ignore_ascii_case("nan") {
            return Ok(None);
        }
        match text.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(RowProblem::InvalidNumber {
                column: lower_name.to_string(),
                value: text.to_string(),
            }),
        }
    }

    fn meters(&self, lower_name: &str, default: Meters) -> Result<Meters, RowProblem> {
        Ok(self.number(lower_name)?.map_or(default, Meters::new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::SourceKind;
    use crate::projection::GeoCoord;

    fn parse(text: &str, variant: SourceVariant) -> Inventory {
        InventoryLoader::default()
            .parse_reader(text.as_bytes(), variant, Path::new("test.csv"))
            .unwrap()
    }

    #[test]
    fn test_point_row_with_defaults() {
        let inv = parse(
            "source_id,WKT,SO2,stack_height\n\
             Stack 1,\"POINT (28.05 -26.2)\",10.0,35\n",
            SourceVariant::Point,
        );
        assert_eq!(inv.sources.len(), 1);
        let source = &inv.sources[0];
        assert_eq!(source.id.as_str(), "Stack_1");
        assert_eq!(source.rate_for("so2"), 10.0);
        assert_eq!(source.rate_for("NO2"), 0.0);

        let SourceKind::Point { location, stack } = &source.kind else {
            panic!("expected point");
        };
        assert_eq!(*location, GeoCoord::new(28.05, -26.2));
        assert_eq!(*stack.release_height, 35.0);
        assert_eq!(*stack.exit_temperature, 293.0);
        assert_eq!(*stack.base_elevation, 0.0);
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let inv = parse(
            "SOURCE_ID,geometry,so2,Width_M\n\
             road,\"LINESTRING (0 0, 0.01 0)\",1.5,\n",
            SourceVariant::Line,
        );
        let SourceKind::Line { params, .. } = &inv.sources[0].kind else {
            panic!("expected line");
        };
        assert_eq!(*params.width, 10.0, "blank cell falls back to default width");
        assert_eq!(inv.sources[0].rate_for("SO2"), 1.5);
    }

    #[test]
    fn test_bad_rows_are_skipped_individually() {
        let inv = parse(
            "source_id,WKT,SO2,elevation\n\
             ok,\"POINT (0 0)\",1,10\n\
             ,\"POINT (0 0)\",1,10\n\
             badgeom,\"POINT (0\",1,10\n\
             wrongtype,\"LINESTRING (0 0, 1 1)\",1,10\n\
             badnum,\"POINT (0 0)\",abc,10\n\
             negative,\"POINT (0 0)\",-1,10\n",
            SourceVariant::Point,
        );
        assert_eq!(inv.sources.len(), 1);
        assert_eq!(inv.rejected.len(), 5);

        let InventoryError::InvalidRow { row, problem, .. } = &inv.rejected[0] else {
            panic!("expected row error");
        };
        assert_eq!(*row, 2);
        assert_eq!(*problem, RowProblem::EmptySourceId);

        assert!(matches!(
            &inv.rejected[2],
            InventoryError::InvalidRow {
                problem: RowProblem::GeometryMismatch { found: "LINESTRING", .. },
                ..
            }
        ));
        assert!(matches!(
            &inv.rejected[1],
            InventoryError::InvalidRow { source_id: Some(id), .. } if id == "badgeom"
        ));
    }

    #[test]
    fn test_nan_cells_use_defaults() {
        let inv = parse(
            "source_id,WKT,CO,release_height,szinit\n\
             pile,\"POLYGON ((0 0, 0.001 0, 0.001 0.001, 0 0))\",NaN,NaN,2.5\n",
            SourceVariant::Area,
        );
        let source = &inv.sources[0];
        assert_eq!(source.rate_for("CO"), 0.0);
        let SourceKind::Area { params, ring } = &source.kind else {
            panic!("expected area");
        };
        assert_eq!(*params.release_height, 0.0);
        assert_eq!(*params.initial_sigma_z, 2.5);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn test_missing_required_columns() {
        let err = InventoryLoader::default()
            .parse_reader("id,WKT\n".as_bytes(), SourceVariant::Point, Path::new("x.csv"))
            .unwrap_err();
        assert!(matches!(err, InventoryError::MissingColumn { column: "source_id", .. }));

        let err = InventoryLoader::default()
            .parse_reader("source_id,shape\n".as_bytes(), SourceVariant::Point, Path::new("x.csv"))
            .unwrap_err();
        assert!(matches!(err, InventoryError::MissingColumn { column: "WKT", .. }));
    }

    #[test]
    fn test_configured_pollutants_extend_standard_set() {
        let loader = InventoryLoader::new(["H2S", "so2", " "]);
        assert_eq!(loader.pollutants().len(), STANDARD_POLLUTANTS.len() + 1);

        let inv = loader
            .parse_reader(
                "source_id,WKT,h2s\nvent,\"POINT (1 1)\",0.25\n".as_bytes(),
                SourceVariant::Point,
                Path::new("x.csv"),
            )
            .unwrap();
        assert_eq!(inv.sources[0].rate_for("H2S"), 0.25);
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let inv = InventoryLoader::default().load(&InventoryPaths::in_directory(dir.path()));
        assert!(inv.is_empty());
        assert!(inv.rejected.is_empty());
    }
}
