//! Meteorological preprocessor control file (`JOB`, `UPPERAIR`, `ONSITE`, `METPREP`)

use super::assembler::ControlFile;
use super::pathway::{Field, Pathway, PathwayBlock, ProtocolError, Stage};
use super::{profile_file_name, surface_file_name};
use crate::core_types::SiteReference;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Report file named on the `JOB` pathway
pub const REPORT_FILE_NAME: &str = "aermet.rpt";
/// Message file named on the `JOB` pathway
pub const MESSAGE_FILE_NAME: &str = "aermet.msg";

/// Variables in each onsite record, in column order
const ONSITE_VARIABLES: [&str; 11] = [
    "OSYR", "OSMO", "OSDY", "OSHR", "TT01", "DP01", "PRES", "PRCP", "WS02", "WD02", "TSKC",
];

/// Surface characteristics for one wind-direction sector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceSector {
    /// Sector start direction (degrees)
    pub start: f64,
    /// Sector end direction (degrees)
    pub end: f64,
    /// Noon-time albedo
    pub albedo: f64,
    /// Bowen ratio
    pub bowen: f64,
    /// Surface roughness length (m)
    pub roughness: f64,
}

/// Run-independent preprocessor settings
///
/// Every field has a default, so a configuration may omit any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessorSettings {
    /// Upper-air station identifier
    pub upper_air_station: String,
    /// Onsite station identifier
    pub surface_station: String,
    /// Hours from observation time to local standard time; derived from the
    /// site longitude when absent
    pub time_adjustment: Option<i32>,
    /// Onsite measurement heights (m)
    pub onsite_heights: Vec<f64>,
    /// Wind-speed threshold (m/s)
    pub wind_threshold: f64,
    /// Reference wind height (m)
    pub nws_height: f64,
    /// Surface characteristic sectors, empty for none
    pub sectors: Vec<SurfaceSector>,
}

impl Default for PreprocessorSettings {
    fn default() -> Self {
        Self {
            upper_air_station: "99999".to_string(),
            surface_station: "99999".to_string(),
            time_adjustment: None,
            onsite_heights: vec![2.0, 10.0],
            wind_threshold: 0.5,
            nws_height: 10.0,
            sectors: Vec::new(),
        }
    }
}

/// Compiles preprocessor control files for one site
#[derive(Debug, Clone, Copy)]
pub struct PreprocessorCompiler<'a> {
    settings: &'a PreprocessorSettings,
    site: &'a SiteReference,
}

impl<'a> PreprocessorCompiler<'a> {
    /// Create a compiler for `site`
    #[must_use]
    pub fn new(settings: &'a PreprocessorSettings, site: &'a SiteReference) -> Self {
        Self { settings, site }
    }

    /// Control file processing `year` from the staged input files
    ///
    /// # Errors
    /// Returns [`ProtocolError`] when a file name or station identifier is
    /// not a valid token, or a numeric setting is non-finite or negative.
    pub fn compile(&self, year: i32, upper_air_file: &str, onsite_file: &str) -> Result<ControlFile, ProtocolError> {
        info!("Compiling preprocessor control file for {year}");
        ControlFile::assemble(
            Stage::Preprocessor,
            vec![
                job_block()?,
                self.upper_air_block(year, upper_air_file)?,
                self.onsite_block(year, onsite_file)?,
                self.metprep_block(year)?,
            ],
        )
    }

    fn time_adjustment(&self) -> i32 {
        self.settings
            .time_adjustment
            .unwrap_or_else(|| self.site.default_time_adjustment())
    }

    fn location_fields(&self, station: &str) -> Vec<Field> {
        let mut fields = vec![Field::token(station)];
        fields.extend(self.site.hemisphere_string().split_whitespace().map(Field::token));
        fields.push(Field::int(i64::from(self.time_adjustment())));
        fields.push(Field::decimal(self.site.elevation.value(), 1));
        fields
    }

    fn upper_air_block(&self, year: i32, data_file: &str) -> Result<PathwayBlock, ProtocolError> {
        let mut block = PathwayBlock::new(Pathway::UpperAir);
        block.card("DATA", &[Field::token(data_file), Field::token("IGRA")])?;
        block.card("EXTRACT", &[Field::token("ua_extract.dat")])?;
        block.card("XDATES", &xdates(year))?;
        block.card("LOCATION", &self.location_fields(&self.settings.upper_air_station))?;
        block.card("QAOUT", &[Field::token("ua_qa.out")])?;
        Ok(block)
    }

    fn onsite_block(&self, year: i32, data_file: &str) -> Result<PathwayBlock, ProtocolError> {
        let mut block = PathwayBlock::new(Pathway::Onsite);
        let heights: Vec<Field> = self
            .settings
            .onsite_heights
            .iter()
            .map(|h| Field::non_negative(*h, 1))
            .collect();
        block.card("OSHEIGHTS", &heights)?;
        block.card("DATA", &[Field::token(data_file)])?;
        block.card("LOCATION", &self.location_fields(&self.settings.surface_station))?;
        block.card("XDATES", &xdates(year))?;
        block.card("QAOUT", &[Field::token("onsite_qa.out")])?;
        block.card("THRESHOLD", &[Field::non_negative(self.settings.wind_threshold, 1)])?;

        let mut read = vec![Field::int(1)];
        read.extend(ONSITE_VARIABLES.iter().map(|v| Field::token(*v)));
        block.card("READ", &read)?;
        block.card("FORMAT", &[Field::int(1), Field::token("FREE")])?;
        Ok(block)
    }

    fn metprep_block(&self, year: i32) -> Result<PathwayBlock, ProtocolError> {
        let mut block = PathwayBlock::new(Pathway::MetPrep);
        block.card("XDATES", &xdates(year))?;
        block.card("METHOD", &[Field::token("WIND_DIR"), Field::token("RANDOM")])?;
        block.card(
            "NWS_HGT",
            &[Field::token("WIND"), Field::non_negative(self.settings.nws_height, 1)],
        )?;
        block.card("OUTPUT", &[Field::token(surface_file_name(year))])?;
        block.card("PROFILE", &[Field::token(profile_file_name(year))])?;

        let sectors = &self.settings.sectors;
        if !sectors.is_empty() {
            block.card(
                "FREQ_SECT",
                &[Field::token("ANNUAL"), Field::int(sectors.len() as i64)],
            )?;
            for (i, sector) in sectors.iter().enumerate() {
                let index = Field::int(i as i64 + 1);
                block.card(
                    "SECTOR",
                    &[
                        index.clone(),
                        Field::non_negative(sector.start, 0),
                        Field::non_negative(sector.end, 0),
                    ],
                )?;
                block.card(
                    "SITE_CHAR",
                    &[
                        Field::int(1),
                        index,
                        Field::non_negative(sector.albedo, 2),
                        Field::non_negative(sector.bowen, 2),
                        Field::non_negative(sector.roughness, 2),
                    ],
                )?;
            }
        }
        Ok(block)
    }
}

fn job_block() -> Result<PathwayBlock, ProtocolError> {
    let mut block = PathwayBlock::new(Pathway::Job);
    block.card("REPORT", &[Field::token(REPORT_FILE_NAME)])?;
    block.card("MESSAGES", &[Field::token(MESSAGE_FILE_NAME)])?;
    Ok(block)
}

fn xdates(year: i32) -> [Field; 3] {
    [
        Field::token(format!("{year}/01/01")),
        Field::token("TO"),
        Field::token(format!("{year}/12/31")),
    ]
}
