//! Dispersion-engine control file
//!
//! Builds the `CO`, `ME` and `OU` pathways, pulls `SO` from
//! [`SourceCompiler`] and `RE` from [`ReceptorGrid`], and assembles the
//! five blocks into one [`ControlFile`] per year and pollutant.

use super::assembler::ControlFile;
use super::pathway::{Field, Pathway, PathwayBlock, ProtocolError, Stage};
use super::receptor::ReceptorGrid;
use super::source::{CompiledSources, SourceCompiler};
use super::{file_token, profile_file_name, surface_file_name, DispersionEnvironment, NoxMethod};
use crate::core_types::units::Meters;
use crate::inventory::EmissionSource;
use crate::projection::CoordinateProjector;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

/// Error file the engine writes next to its primary output
pub const ERROR_FILE_NAME: &str = "aermod.err";

/// Hour-based averaging periods the engine accepts
const HOURLY_PERIODS: [u8; 8] = [1, 2, 3, 4, 6, 8, 12, 24];

/// Averaging period for concentrations and plot files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PeriodRepr", into = "String")]
pub enum AveragingPeriod {
    /// Short-term average over this many hours
    Hours(u8),
    /// Calendar month
    Month,
    /// Whole modelled period
    Period,
    /// Annual average
    Annual,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PeriodRepr {
    Number(u32),
    Text(String),
}

impl TryFrom<PeriodRepr> for AveragingPeriod {
    type Error = ProtocolError;

    fn try_from(repr: PeriodRepr) -> Result<Self, Self::Error> {
        match repr {
            PeriodRepr::Number(n) => n.to_string().parse(),
            PeriodRepr::Text(text) => text.parse(),
        }
    }
}

impl From<AveragingPeriod> for String {
    fn from(period: AveragingPeriod) -> Self {
        period.keyword()
    }
}

impl FromStr for AveragingPeriod {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim().to_ascii_uppercase();
        match text.as_str() {
            "MONTH" => return Ok(AveragingPeriod::Month),
            "PERIOD" => return Ok(AveragingPeriod::Period),
            "ANNUAL" => return Ok(AveragingPeriod::Annual),
            _ => {}
        }
        let hours = text
            .strip_suffix('H')
            .unwrap_or(&text)
            .parse::<u8>()
            .map_err(|_| ProtocolError::InvalidPeriod(s.to_string()))?;
        if HOURLY_PERIODS.contains(&hours) {
            Ok(AveragingPeriod::Hours(hours))
        } else {
            Err(ProtocolError::InvalidPeriod(s.to_string()))
        }
    }
}

impl AveragingPeriod {
    /// `AVERTIME`/`PLOTFILE` keyword (`1`, `24`, `MONTH`, `PERIOD`, `ANNUAL`)
    #[must_use]
    pub fn keyword(&self) -> String {
        match self {
            AveragingPeriod::Hours(h) => h.to_string(),
            AveragingPeriod::Month => "MONTH".to_string(),
            AveragingPeriod::Period => "PERIOD".to_string(),
            AveragingPeriod::Annual => "ANNUAL".to_string(),
        }
    }

    /// Plot-file name suffix (`01H`, `24H`, `MON`, `PER`, `ANN`)
    #[must_use]
    pub fn file_suffix(&self) -> String {
        match self {
            AveragingPeriod::Hours(h) => format!("{h:02}H"),
            AveragingPeriod::Month => "MON".to_string(),
            AveragingPeriod::Period => "PER".to_string(),
            AveragingPeriod::Annual => "ANN".to_string(),
        }
    }

    /// Long-term averages carry no rank on `PLOTFILE`
    #[must_use]
    pub fn is_long_term(&self) -> bool {
        matches!(self, AveragingPeriod::Period | AveragingPeriod::Annual)
    }
}

impl fmt::Display for AveragingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.keyword())
    }
}

/// Plot-file name for one project, year, pollutant and period
///
/// Whitespace in the project name becomes `_`, so
/// `("Mine A", 2024, "SO2", 24H)` gives `Mine_A_2024_SO2_24H.PLT`.
#[must_use]
pub fn plot_file_name(project: &str, year: i32, pollutant: &str, period: AveragingPeriod) -> String {
    format!(
        "{}_{year}_{}_{}.PLT",
        file_token(project),
        file_token(pollutant),
        period.file_suffix()
    )
}

/// Run-independent dispersion settings
#[derive(Debug, Clone, PartialEq)]
pub struct DispersionSettings {
    /// Project name used in titles and file names
    pub project: String,
    /// Rural or urban coefficients
    pub environment: DispersionEnvironment,
    /// NO2 conversion option
    pub nox_method: NoxMethod,
    /// Population for `URBANOPT`
    pub urban_population: u64,
    /// Receptor grid
    pub receptor_grid: ReceptorGrid,
    /// Surface station identifier (`SURFDATA`, `SITEDATA`)
    pub surface_station: String,
    /// Upper-air station identifier (`UAIRDATA`)
    pub upper_air_station: String,
    /// Site elevation for `PROFBASE`
    pub profile_base: Meters,
}

/// Dispersion control file for one pollutant, plus compile diagnostics
#[derive(Debug, Clone)]
pub struct CompiledControl {
    /// Assembled control file
    pub control: ControlFile,
    /// Source compilation details
    pub sources: CompiledSources,
    /// Plot files the engine is asked to write, in `OU` order
    pub plot_files: Vec<String>,
}

/// Compiles complete dispersion control files
#[derive(Debug, Clone, Copy)]
pub struct DispersionCompiler<'a> {
    settings: &'a DispersionSettings,
    projector: &'a CoordinateProjector,
}

impl<'a> DispersionCompiler<'a> {
    /// Create a compiler over immutable settings and a site projector
    #[must_use]
    pub fn new(settings: &'a DispersionSettings, projector: &'a CoordinateProjector) -> Self {
        Self { settings, projector }
    }

    /// Compile the five dispersion pathways for `year` and `pollutant`
    ///
    /// # Errors
    /// Returns [`ProtocolError`] when `periods` is empty or mixes `PERIOD`
    /// with `ANNUAL`, when the receptor grid is unusable, or when any fixed
    /// card fails validation. Individual bad sources are skipped, not
    /// reported here.
    pub fn compile(
        &self,
        sources: &[EmissionSource],
        year: i32,
        pollutant: &str,
        periods: &[AveragingPeriod],
    ) -> Result<CompiledControl, ProtocolError> {
        let periods = normalize_periods(periods)?;
        info!("Compiling dispersion control file for {year} {pollutant}");

        let compiler = SourceCompiler::new(self.projector, self.settings.environment);
        let compiled_sources = compiler.compile(sources, pollutant)?;

        let (output, plot_files) = self.output_block(year, pollutant, &periods)?;
        let control = ControlFile::assemble(
            Stage::Dispersion,
            vec![
                self.control_block(year, pollutant, &periods)?,
                compiled_sources.block.clone(),
                self.settings.receptor_grid.to_block()?,
                self.meteorology_block(year)?,
                output,
            ],
        )?;
        debug!("Dispersion control file declares {} plot files", plot_files.len());
        Ok(CompiledControl {
            control,
            sources: compiled_sources,
            plot_files,
        })
    }

    /// `CO` pathway
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if a title or option fails validation.
    pub fn control_block(
        &self,
        year: i32,
        pollutant: &str,
        periods: &[AveragingPeriod],
    ) -> Result<PathwayBlock, ProtocolError> {
        let mut block = PathwayBlock::new(Pathway::Control);
        block.card(
            "TITLEONE",
            &[Field::text(format!("{} - {year} - {pollutant}", self.settings.project))],
        )?;

        let mut options = vec![Field::token("CONC"), Field::token("FLAT")];
        if pollutant.eq_ignore_ascii_case("NO2") {
            if let Some(method) = self.settings.nox_method.keyword() {
                options.push(Field::token(method));
            }
        }
        block.card("MODELOPT", &options)?;

        let averages: Vec<Field> = periods.iter().map(|p| Field::token(p.keyword())).collect();
        block.card("AVERTIME", &averages)?;
        block.card("POLLUTID", &[Field::token(pollutant)])?;
        block.card("RUNORNOT", &[Field::token("RUN")])?;
        if self.settings.environment == DispersionEnvironment::Urban {
            let population = i64::try_from(self.settings.urban_population).unwrap_or(i64::MAX);
            block.card("URBANOPT", &[Field::int(population)])?;
        }
        block.card("ERRORFIL", &[Field::token(ERROR_FILE_NAME)])?;
        Ok(block)
    }

    /// `ME` pathway
    ///
    /// # Errors
    /// Returns [`ProtocolError`] for unusable station identifiers or a
    /// non-finite profile base.
    pub fn meteorology_block(&self, year: i32) -> Result<PathwayBlock, ProtocolError> {
        let year_field = || Field::int(i64::from(year));
        let mut block = PathwayBlock::new(Pathway::Meteorology);
        block.card("SURFFILE", &[Field::token(surface_file_name(year))])?;
        block.card("PROFFILE", &[Field::token(profile_file_name(year))])?;
        block.card(
            "SURFDATA",
            &[Field::token(self.settings.surface_station.as_str()), year_field()],
        )?;
        block.card(
            "UAIRDATA",
            &[Field::token(self.settings.upper_air_station.as_str()), year_field()],
        )?;
        block.card(
            "SITEDATA",
            &[Field::token(self.settings.surface_station.as_str()), year_field()],
        )?;
        block.card(
            "PROFBASE",
            &[
                Field::decimal(self.settings.profile_base.value(), 1),
                Field::token("METERS"),
            ],
        )?;
        Ok(block)
    }

    /// `OU` pathway and the plot-file names it declares
    ///
    /// # Errors
    /// Returns [`ProtocolError`] if a plot-file name is not a valid token.
    pub fn output_block(
        &self,
        year: i32,
        pollutant: &str,
        periods: &[AveragingPeriod],
    ) -> Result<(PathwayBlock, Vec<String>), ProtocolError> {
        let mut block = PathwayBlock::new(Pathway::Output);
        block.card(
            "RECTABLE",
            &[Field::token("ALLAVE"), Field::token("FIRST-SECOND")],
        )?;

        let mut plot_files = Vec::with_capacity(periods.len());
        for period in periods {
            let name = plot_file_name(&self.settings.project, year, pollutant, *period);
            let mut fields = vec![Field::token(period.keyword()), Field::token("ALL")];
            if !period.is_long_term() {
                fields.push(Field::token("1ST"));
            }
            fields.push(Field::token(name.as_str()));
            block.card("PLOTFILE", &fields)?;
            plot_files.push(name);
        }
        Ok((block, plot_files))
    }
}

/// Drop repeated periods (first occurrence wins) and check the set is usable
fn normalize_periods(periods: &[AveragingPeriod]) -> Result<Vec<AveragingPeriod>, ProtocolError> {
    let mut unique: Vec<AveragingPeriod> = Vec::with_capacity(periods.len());
    for period in periods {
        if !unique.contains(period) {
            unique.push(*period);
        }
    }
    if unique.is_empty() {
        return Err(ProtocolError::InvalidPeriod("no averaging periods".to_string()));
    }
    if unique.contains(&AveragingPeriod::Period) && unique.contains(&AveragingPeriod::Annual) {
        return Err(ProtocolError::InvalidPeriod("PERIOD together with ANNUAL".to_string()));
    }
    Ok(unique)
}
