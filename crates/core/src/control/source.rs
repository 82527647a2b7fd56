//! Source pathway compiler
//!
//! Turns inventory records into `LOCATION`/`SRCPARAM`/`AREAVERT` cards for
//! one pollutant. Sources are compiled one at a time into a scratch block and
//! only merged when every card validated, so a bad source never leaves half
//! its cards behind.

use super::pathway::{Field, Pathway, PathwayBlock, ProtocolError};
use super::DispersionEnvironment;
use crate::inventory::{open_ring, EmissionSource, SourceId, SourceKind};
use crate::projection::{CoordinateProjector, ProjectionError};
use nalgebra::Point2;
use rustc_hash::FxHashSet;
use std::fmt;
use tracing::{debug, info, warn};

/// Longest source identifier the engine keeps intact
pub const MAX_SOURCE_ID_LENGTH: usize = 12;

/// Maximum coordinate pairs on one `AREAVERT` card
pub const VERTICES_PER_CARD: usize = 4;

/// Reserved group name covering every source
pub const ALL_SOURCES_GROUP: &str = "ALL";

/// Identifier of the placeholder emitted when nothing qualifies
pub const DUMMY_SOURCE_ID: &str = "DUMMY";

/// Why one source was left out of the pathway
#[derive(Debug, Clone, PartialEq)]
pub enum CompileProblem {
    /// Geometry could not be projected
    Projection(ProjectionError),
    /// A card failed validation
    Protocol(ProtocolError),
    /// Identifier longer than [`MAX_SOURCE_ID_LENGTH`]
    IdTooLong(usize),
    /// Identifier already compiled
    DuplicateId,
    /// Geometry has too few distinct vertices
    DegenerateGeometry,
}

impl fmt::Display for CompileProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileProblem::Projection(e) => write!(f, "{e}"),
            CompileProblem::Protocol(e) => write!(f, "{e}"),
            CompileProblem::IdTooLong(len) => write!(
                f,
                "identifier is {len} characters, limit is {MAX_SOURCE_ID_LENGTH}"
            ),
            CompileProblem::DuplicateId => write!(f, "duplicate identifier"),
            CompileProblem::DegenerateGeometry => write!(f, "geometry has too few distinct vertices"),
        }
    }
}

impl From<ProjectionError> for CompileProblem {
    fn from(e: ProjectionError) -> Self {
        CompileProblem::Projection(e)
    }
}

impl From<ProtocolError> for CompileProblem {
    fn from(e: ProtocolError) -> Self {
        CompileProblem::Protocol(e)
    }
}

/// Source left out of a compiled pathway
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedSource {
    /// Identifier (the segment identifier for line segments)
    pub id: String,
    /// Reason
    pub problem: CompileProblem,
}

/// Result of compiling one pollutant's sources
#[derive(Debug, Clone)]
pub struct CompiledSources {
    /// Complete `SO` block
    pub block: PathwayBlock,
    /// Identifiers that made it into the block, in card order
    pub source_ids: Vec<SourceId>,
    /// Sources that qualified but were skipped
    pub skipped: Vec<SkippedSource>,
    /// Whether the placeholder source was emitted
    pub used_dummy: bool,
}

/// Compiles inventory sources into the `SO` pathway
#[derive(Debug, Clone, Copy)]
pub struct SourceCompiler<'a> {
    projector: &'a CoordinateProjector,
    environment: DispersionEnvironment,
}

impl<'a> SourceCompiler<'a> {
    /// Create a compiler projecting through `projector`
    #[must_use]
    pub fn new(projector: &'a CoordinateProjector, environment: DispersionEnvironment) -> Self {
        Self {
            projector,
            environment,
        }
    }

    /// Compile every source with a positive rate for `pollutant`
    ///
    /// Sources whose geometry cannot be projected or whose cards fail
    /// validation are skipped with a warning. When nothing remains a single
    /// zero-rate placeholder is emitted so the pathway is never empty. The
    /// block always ends with one `SRCGROUP ALL` card, preceded by
    /// `URBANSRC ALL` in urban runs.
    ///
    /// # Errors
    /// Returns [`ProtocolError`] only if a fixed card cannot be written.
    pub fn compile(&self, sources: &[EmissionSource], pollutant: &str) -> Result<CompiledSources, ProtocolError> {
        let mut block = PathwayBlock::new(Pathway::Source);
        let mut seen: FxHashSet<SourceId> = FxHashSet::default();
        let mut source_ids = Vec::new();
        let mut skipped = Vec::new();

        for source in sources {
            let rate = source.rate_for(pollutant);
            if rate.is_nan() || rate <= 0.0 {
                debug!("{} does not emit {pollutant}", source.id);
                continue;
            }

            let units = match self.compile_source(source, rate, &seen) {
                Ok(units) => units,
                Err(skip) => {
                    warn!("Skipping source {}: {}", skip.id, skip.problem);
                    skipped.push(skip);
                    continue;
                }
            };

            for (id, cards) in units {
                seen.insert(id.clone());
                source_ids.push(id);
                block.append(cards);
            }
        }

        let used_dummy = source_ids.is_empty();
        if used_dummy {
            warn!("No sources emit {pollutant}, adding inert placeholder source {DUMMY_SOURCE_ID}");
            write_dummy(&mut block)?;
        }

        block.card("SRCGROUP", &[Field::token(ALL_SOURCES_GROUP)])?;
        if self.environment == DispersionEnvironment::Urban {
            block.insert_before("SRCGROUP", "URBANSRC", &[Field::token(ALL_SOURCES_GROUP)])?;
        }

        info!(
            "Compiled {} sources for {pollutant} ({} skipped)",
            source_ids.len(),
            skipped.len()
        );
        Ok(CompiledSources {
            block,
            source_ids,
            skipped,
            used_dummy,
        })
    }

    /// Compile one inventory record into one or more engine sources
    fn compile_source(
        &self,
        source: &EmissionSource,
        rate: f64,
        seen: &FxHashSet<SourceId>,
    ) -> Result<Vec<(SourceId, PathwayBlock)>, SkippedSource> {
        let skip = |id: &SourceId, problem: CompileProblem| SkippedSource {
            id: id.to_string(),
            problem,
        };
        let check_id = |id: &SourceId| -> Result<(), SkippedSource> {
            let len = id.as_str().chars().count();
            if len > MAX_SOURCE_ID_LENGTH {
                return Err(skip(id, CompileProblem::IdTooLong(len)));
            }
            if seen.contains(id) {
                return Err(skip(id, CompileProblem::DuplicateId));
            }
            Ok(())
        };

        match &source.kind {
            SourceKind::Point { location, stack } => {
                check_id(&source.id)?;
                let xy = self
                    .projector
                    .project(*location)
                    .map_err(|e| skip(&source.id, e.into()))?;

                let mut cards = PathwayBlock::new(Pathway::Source);
                point_cards(&mut cards, &source.id, xy, rate, stack)
                    .map_err(|e| skip(&source.id, e.into()))?;
                Ok(vec![(source.id.clone(), cards)])
            }
            SourceKind::Area { ring, params } => {
                check_id(&source.id)?;
                let vertices = open_ring(ring);
                if vertices.len() < 3 {
                    return Err(skip(&source.id, CompileProblem::DegenerateGeometry));
                }
                let projected = self
                    .projector
                    .project_all(vertices)
                    .map_err(|e| skip(&source.id, e.into()))?;

                let mut cards = PathwayBlock::new(Pathway::Source);
                area_cards(&mut cards, &source.id, &projected, rate, params)
                    .map_err(|e| skip(&source.id, e.into()))?;
                Ok(vec![(source.id.clone(), cards)])
            }
            SourceKind::Line { path, params } => {
                if path.len() < 2 {
                    return Err(skip(&source.id, CompileProblem::DegenerateGeometry));
                }
                let projected = self
                    .projector
                    .project_all(path)
                    .map_err(|e| skip(&source.id, e.into()))?;

                let mut segments = Vec::with_capacity(projected.len() - 1);
                for (index, pair) in projected.windows(2).enumerate() {
                    let segment_id = source.id.segment(index + 1);
                    if pair[0] == pair[1] {
                        warn!("Line {} segment {segment_id} has zero length, skipping it", source.id);
                        continue;
                    }
                    check_id(&segment_id)?;

                    let mut cards = PathwayBlock::new(Pathway::Source);
                    line_cards(&mut cards, &segment_id, pair[0], pair[1], rate, params)
                        .map_err(|e| skip(&segment_id, e.into()))?;
                    segments.push((segment_id, cards));
                }
                if segments.is_empty() {
                    return Err(skip(&source.id, CompileProblem::DegenerateGeometry));
                }
                Ok(segments)
            }
        }
    }
}

fn point_cards(
    cards: &mut PathwayBlock,
    id: &SourceId,
    xy: Point2<f64>,
    rate: f64,
    stack: &crate::inventory::StackParameters,
) -> Result<(), ProtocolError> {
    cards.card(
        "LOCATION",
        &[
            Field::token(id.as_str()),
            Field::token("POINT"),
            Field::decimal(xy.x, 2),
            Field::decimal(xy.y, 2),
            Field::decimal(stack.base_elevation.value(), 1),
        ],
    )?;
    cards.card(
        "SRCPARAM",
        &[
            Field::token(id.as_str()),
            Field::non_negative(rate, 6),
            Field::non_negative(stack.release_height.value(), 2),
            Field::non_negative(*stack.exit_temperature, 2),
            Field::non_negative(*stack.exit_velocity, 2),
            Field::non_negative(stack.diameter.value(), 2),
        ],
    )?;
    Ok(())
}

fn area_cards(
    cards: &mut PathwayBlock,
    id: &SourceId,
    vertices: &[Point2<f64>],
    rate: f64,
    params: &crate::inventory::AreaParameters,
) -> Result<(), ProtocolError> {
    let first = vertices[0];
    cards.card(
        "LOCATION",
        &[
            Field::token(id.as_str()),
            Field::token("AREAPOLY"),
            Field::decimal(first.x, 2),
            Field::decimal(first.y, 2),
            Field::decimal(params.base_elevation.value(), 1),
        ],
    )?;
    cards.card(
        "SRCPARAM",
        &[
            Field::token(id.as_str()),
            Field::non_negative(rate, 6),
            Field::non_negative(params.release_height.value(), 2),
            Field::int(vertices.len() as i64),
            Field::non_negative(params.initial_sigma_z.value(), 2),
        ],
    )?;

    for chunk in vertices.chunks(VERTICES_PER_CARD) {
        let mut fields = Vec::with_capacity(1 + chunk.len() * 2);
        fields.push(Field::token(id.as_str()));
        for vertex in chunk {
            fields.push(Field::decimal(vertex.x, 2));
            fields.push(Field::decimal(vertex.y, 2));
        }
        cards.card("AREAVERT", &fields)?;
    }
    Ok(())
}

fn line_cards(
    cards: &mut PathwayBlock,
    id: &SourceId,
    start: Point2<f64>,
    end: Point2<f64>,
    rate: f64,
    params: &crate::inventory::LineParameters,
) -> Result<(), ProtocolError> {
    cards.card(
        "LOCATION",
        &[
            Field::token(id.as_str()),
            Field::token("LINE"),
            Field::decimal(start.x, 2),
            Field::decimal(start.y, 2),
            Field::decimal(end.x, 2),
            Field::decimal(end.y, 2),
            Field::decimal(params.base_elevation.value(), 1),
        ],
    )?;
    cards.card(
        "SRCPARAM",
        &[
            Field::token(id.as_str()),
            Field::non_negative(rate, 6),
            Field::non_negative(params.release_height.value(), 2),
            Field::non_negative(params.width.value(), 2),
            Field::non_negative(params.initial_sigma_z.value(), 2),
        ],
    )?;
    Ok(())
}

/// Zero-rate stack at the origin with a non-degenerate plume
fn write_dummy(block: &mut PathwayBlock) -> Result<(), ProtocolError> {
    block.card(
        "LOCATION",
        &[
            Field::token(DUMMY_SOURCE_ID),
            Field::token("POINT"),
            Field::decimal(0.0, 2),
            Field::decimal(0.0, 2),
            Field::decimal(0.0, 1),
        ],
    )?;
    block.card(
        "SRCPARAM",
        &[
            Field::token(DUMMY_SOURCE_ID),
            Field::non_negative(0.0, 6),
            Field::non_negative(10.0, 2),
            Field::non_negative(300.0, 2),
            Field::non_negative(1.0, 2),
            Field::non_negative(1.0, 2),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::units::Meters;
    use crate::core_types::SiteReference;
    use crate::inventory::{AreaParameters, EmissionRates, LineParameters, StackParameters};
    use crate::projection::GeoCoord;

    fn projector() -> CoordinateProjector {
        CoordinateProjector::new(SiteReference::new(-26.2, 28.05, Meters::new(1600.0))).unwrap()
    }

    fn id(s: &str) -> SourceId {
        SourceId::parse(s).unwrap()
    }

    fn so2(rate: f64) -> EmissionRates {
        EmissionRates::new().with("SO2", rate)
    }

    #[test]
    fn test_point_cards() {
        let projector = projector();
        let compiler = SourceCompiler::new(&projector, DispersionEnvironment::Rural);
        let sources = vec![EmissionSource::point(
            id("STK1"),
            GeoCoord::new(28.05, -26.2),
            StackParameters {
                base_elevation: Meters::new(1600.0),
                release_height: Meters::new(35.0),
                ..StackParameters::default()
            },
            so2(10.0),
        )];

        let compiled = compiler.compile(&sources, "SO2").unwrap();
        let lines = compiled.block.lines();
        assert_eq!(lines[0], "SO STARTING");
        assert_eq!(lines[1], "   LOCATION STK1 POINT 0.00 0.00 1600.0");
        assert_eq!(lines[2], "   SRCPARAM STK1 10.000000 35.00 293.00 0.00 0.00");
        assert_eq!(lines[3], "   SRCGROUP ALL");
        assert_eq!(lines[4], "SO FINISHED");
        assert!(!compiled.used_dummy);
    }

    #[test]
    fn test_area_drops_closing_vertex_and_chunks() {
        let projector = projector();
        let compiler = SourceCompiler::new(&projector, DispersionEnvironment::Rural);
        let mut ring: Vec<GeoCoord> = (0..6)
            .map(|i| {
                let angle = f64::from(i) * std::f64::consts::PI / 3.0;
                GeoCoord::new(28.05 + 0.001 * angle.cos(), -26.2 + 0.001 * angle.sin())
            })
            .collect();
        ring.push(ring[0]);

        let sources = vec![EmissionSource::area(id("PILE"), ring, AreaParameters::default(), so2(0.001))];
        let compiled = compiler.compile(&sources, "SO2").unwrap();
        let block = &compiled.block;

        let srcparam: Vec<&str> = block.cards_with("SRCPARAM").collect();
        assert_eq!(srcparam, vec!["   SRCPARAM PILE 0.001000 0.00 6 0.00"]);

        let verts: Vec<usize> = block
            .cards_with("AREAVERT")
            .map(|line| (line.split_whitespace().count() - 2) / 2)
            .collect();
        assert_eq!(verts, vec![4, 2]);
        assert!(block.cards_with("LOCATION").all(|l| l.contains("AREAPOLY")));
    }

    #[test]
    fn test_line_decomposes_per_segment() {
        let projector = projector();
        let compiler = SourceCompiler::new(&projector, DispersionEnvironment::Rural);
        let path = vec![
            GeoCoord::new(28.05, -26.2),
            GeoCoord::new(28.06, -26.2),
            GeoCoord::new(28.06, -26.21),
        ];
        let sources = vec![EmissionSource::line(id("ROAD"), path, LineParameters::default(), so2(2.0))];
        let compiled = compiler.compile(&sources, "so2").unwrap();

        let ids: Vec<&str> = compiled.source_ids.iter().map(SourceId::as_str).collect();
        assert_eq!(ids, vec!["ROAD_S1", "ROAD_S2"]);
        assert_eq!(compiled.block.count("LOCATION"), 2);
        assert!(compiled
            .block
            .cards_with("SRCPARAM")
            .all(|l| l.ends_with("2.000000 0.00 10.00 0.00")));
    }

    #[test]
    fn test_zero_and_absent_rates_fall_back_to_dummy() {
        let projector = projector();
        let compiler = SourceCompiler::new(&projector, DispersionEnvironment::Rural);
        let sources = vec![
            EmissionSource::point(id("A"), GeoCoord::new(28.05, -26.2), StackParameters::default(), so2(0.0)),
            EmissionSource::point(id("B"), GeoCoord::new(28.05, -26.2), StackParameters::default(), so2(5.0)),
        ];
        let compiled = compiler.compile(&sources, "NO2").unwrap();
        assert!(compiled.used_dummy);
        assert_eq!(
            compiled.block.cards_with("LOCATION").collect::<Vec<_>>(),
            vec!["   LOCATION DUMMY POINT 0.00 0.00 0.0"]
        );
        assert_eq!(compiled.block.count("SRCGROUP"), 1);
    }

    #[test]
    fn test_bad_sources_are_skipped() {
        let projector = projector();
        let compiler = SourceCompiler::new(&projector, DispersionEnvironment::Rural);
        let sources = vec![
            EmissionSource::point(id("OK"), GeoCoord::new(28.05, -26.2), StackParameters::default(), so2(1.0)),
            EmissionSource::point(id("OK"), GeoCoord::new(28.06, -26.2), StackParameters::default(), so2(1.0)),
            EmissionSource::point(
                id("FAR"),
                GeoCoord::new(f64::NAN, -26.2),
                StackParameters::default(),
                so2(1.0),
            ),
            EmissionSource::point(
                id("AN_IDENTIFIER_TOO_LONG"),
                GeoCoord::new(28.05, -26.2),
                StackParameters::default(),
                so2(1.0),
            ),
            EmissionSource::point(
                id("NEG"),
                GeoCoord::new(28.05, -26.2),
                StackParameters {
                    release_height: Meters::new(-3.0),
                    ..StackParameters::default()
                },
                so2(1.0),
            ),
        ];
        let compiled = compiler.compile(&sources, "SO2").unwrap();
        assert_eq!(compiled.source_ids.len(), 1);
        assert_eq!(compiled.block.count("LOCATION"), 1);
        assert_eq!(compiled.block.count("SRCPARAM"), 1);

        let problems: Vec<&CompileProblem> = compiled.skipped.iter().map(|s| &s.problem).collect();
        assert!(matches!(problems[0], CompileProblem::DuplicateId));
        assert!(matches!(problems[1], CompileProblem::Projection(_)));
        assert!(matches!(problems[2], CompileProblem::IdTooLong(22)));
        assert!(matches!(problems[3], CompileProblem::Protocol(ProtocolError::Negative { .. })));
    }

    #[test]
    fn test_urbansrc_precedes_srcgroup() {
        let projector = projector();
        let compiler = SourceCompiler::new(&projector, DispersionEnvironment::Urban);
        let compiled = compiler.compile(&[], "SO2").unwrap();
        let lines = compiled.block.lines();
        let n = lines.len();
        assert_eq!(lines[n - 3], "   URBANSRC ALL");
        assert_eq!(lines[n - 2], "   SRCGROUP ALL");
    }
}
