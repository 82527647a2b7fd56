//! Meteorological preprocessor runs and input preparation

use super::context::{RunContext, RunRecord};
use super::engine::Engine;
use super::layout::{
    cloud_extract_file_name, onsite_file_name, reanalysis_levels_name, reanalysis_surface_name, sounding_table_name,
    surface_table_name, upper_air_file_name, DataLayout,
};
use super::sandbox::{write_atomic, Sandbox};
use super::{diagnostic_tail, RunError};
use crate::control::preprocessor::MESSAGE_FILE_NAME;
use crate::control::{profile_file_name, surface_file_name, PreprocessorCompiler, PreprocessorSettings};
use crate::core_types::SiteReference;
use crate::met::{
    encode_cloud_extract, encode_onsite, fill_year, read_reanalysis_levels, read_reanalysis_surface,
    read_sounding_table, read_surface_table, write_sounding_table, write_surface_table, UpperAirEncoder,
};
use std::fs::File;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Control file written into the sandbox
pub const CONTROL_FILE_NAME: &str = "aermet.inp";
/// Combined output log of the preprocessor
pub const LOG_FILE_NAME: &str = "aermet.log";

/// Encoded inputs written by [`prepare_met_inputs`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetInputs {
    /// IGRA-style upper-air file
    pub upper_air: PathBuf,
    /// Surface cloud-cover extract
    pub cloud_extract: PathBuf,
    /// Number of soundings encoded
    pub soundings: usize,
}

/// Tables written by [`import_reanalysis`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportedTables {
    /// Surface table (`surface_data_{year}.csv`)
    pub surface: PathBuf,
    /// Sounding table (`sounding_{year}.csv`)
    pub sounding: PathBuf,
    /// Surface hours written
    pub hours: usize,
    /// Sounding levels written
    pub levels: usize,
}

/// Convert the year's reanalysis extracts into surface and sounding tables
///
/// Reads `era5_surface_{year}.csv` and `era5_levels_{year}.csv` from the
/// interim folder and writes `surface_data_{year}.csv` and
/// `sounding_{year}.csv` beside them, replacing earlier tables.
///
/// # Errors
/// Returns [`RunError::MissingInput`] if an extract is absent,
/// [`RunError::Met`] if it holds no usable rows, and [`RunError::Io`] if a
/// table cannot be written.
pub fn import_reanalysis(layout: &DataLayout, station: &str, year: i32) -> Result<ImportedTables, RunError> {
    let interim = layout.met_interim(station);
    let surface_source = interim.join(reanalysis_surface_name(year));
    let levels_source = interim.join(reanalysis_levels_name(year));
    for path in [&surface_source, &levels_source] {
        if !path.is_file() {
            return Err(RunError::MissingInput(path.clone()));
        }
    }

    let hourly = read_reanalysis_surface(&surface_source)?;
    let surface = interim.join(surface_table_name(year));
    let mut buffer = Vec::new();
    write_surface_table(&hourly, &mut buffer, &surface)?;
    write_atomic(&surface, &buffer)?;

    let levels = read_reanalysis_levels(&levels_source)?;
    let sounding = interim.join(sounding_table_name(year));
    let mut buffer = Vec::new();
    write_sounding_table(&levels, &mut buffer, &sounding)?;
    write_atomic(&sounding, &buffer)?;

    info!(
        "Imported {year} reanalysis for {station}: {} hours, {} levels",
        hourly.len(),
        levels.len()
    );
    Ok(ImportedTables {
        surface,
        sounding,
        hours: hourly.len(),
        levels: levels.len(),
    })
}

/// Encode the year's sounding and surface tables in the interim folder
///
/// Reads `sounding_{year}.csv` and `surface_data_{year}.csv` and writes
/// `upper_air_{year}.igra` and `surface_{year}.ext` next to them. The
/// extract covers every hour of the year.
///
/// # Errors
/// Returns [`RunError::MissingInput`] if a table is absent,
/// [`RunError::Met`] if it cannot be parsed or the station id is unusable,
/// and [`RunError::Io`] if an output cannot be written.
pub fn prepare_met_inputs(
    layout: &DataLayout,
    station: &str,
    upper_air_station: &str,
    year: i32,
) -> Result<MetInputs, RunError> {
    let interim = layout.met_interim(station);
    let sounding_path = interim.join(sounding_table_name(year));
    let surface_path = interim.join(surface_table_name(year));
    for path in [&sounding_path, &surface_path] {
        if !path.is_file() {
            return Err(RunError::MissingInput(path.clone()));
        }
    }

    let encoder = UpperAirEncoder::new(upper_air_station)?;
    let soundings = read_sounding_table(&sounding_path)?;
    let upper_air_text = encoder.encode(&soundings);
    let profiles = upper_air_text.lines().filter(|l| l.starts_with('#')).count();
    let upper_air = interim.join(upper_air_file_name(year));
    write_atomic(&upper_air, upper_air_text.as_bytes())?;

    let surface = read_surface_table(&surface_path)?;
    let cloud_extract = interim.join(cloud_extract_file_name(year));
    write_atomic(&cloud_extract, encode_cloud_extract(&fill_year(&surface, year)).as_bytes())?;

    info!(
        "Prepared {year} meteorology: {profiles} soundings, {} surface hours",
        surface.len()
    );
    Ok(MetInputs {
        upper_air,
        cloud_extract,
        soundings: profiles,
    })
}

/// Runs the preprocessor for one station and year at a time
pub struct PreprocessorRunner<'a> {
    settings: &'a PreprocessorSettings,
    site: &'a SiteReference,
    engine: &'a dyn Engine,
    layout: &'a DataLayout,
    station: &'a str,
}

impl<'a> PreprocessorRunner<'a> {
    /// Runner for `station`
    #[must_use]
    pub fn new(
        settings: &'a PreprocessorSettings,
        site: &'a SiteReference,
        engine: &'a dyn Engine,
        layout: &'a DataLayout,
        station: &'a str,
    ) -> Self {
        Self {
            settings,
            site,
            engine,
            layout,
            station,
        }
    }

    /// Stage inputs, run the preprocessor and relocate its outputs
    ///
    /// Success requires both the surface and the profile file. Staged
    /// inputs are removed on success and left in place on failure.
    ///
    /// # Errors
    /// Returns [`RunError`] when staging fails (missing upper-air file or
    /// surface table, invalid control card). Engine failures are reported
    /// in the returned record.
    pub fn run_year(&self, year: i32) -> Result<RunRecord, RunError> {
        let sandbox = Sandbox::create(&self.layout.preprocessor_sandbox(self.station, year))?;
        let interim = self.layout.met_interim(self.station);

        let upper_air = sandbox.stage(&interim.join(upper_air_file_name(year)))?;
        let surface_path = interim.join(surface_table_name(year));
        if !surface_path.is_file() {
            return Err(RunError::MissingInput(surface_path));
        }
        let onsite = onsite_file_name(year);
        let surface = fill_year(&read_surface_table(&surface_path)?, year);
        sandbox.write(&onsite, &encode_onsite(&surface))?;

        let control = PreprocessorCompiler::new(self.settings, self.site).compile(year, &upper_air, &onsite)?;
        let outputs = [surface_file_name(year), profile_file_name(year)];
        for name in &outputs {
            sandbox.remove(name)?;
        }
        sandbox.write(CONTROL_FILE_NAME, &control.render())?;

        let log_path = sandbox.path(LOG_FILE_NAME);
        let mut context = RunContext::staged(year, sandbox.dir(), log_path, vec![upper_air, onsite]);
        let result = self.execute(&sandbox, &mut context, &outputs);
        match result {
            Ok(()) => {
                for name in context.inputs() {
                    sandbox.remove(name)?;
                }
                info!("Preprocessed {year} for {}", self.station);
                Ok(RunRecord { context, error: None })
            }
            Err(e) => {
                error!("Preprocessor failed for {year}: {e}");
                if let Some(text) = e.diagnostic() {
                    error!("{} reported:\n{text}", self.engine.name());
                }
                if let Err(transition) = context.fail() {
                    warn!("{transition}");
                }
                Ok(RunRecord {
                    context,
                    error: Some(e),
                })
            }
        }
    }

    fn execute(&self, sandbox: &Sandbox, context: &mut RunContext, outputs: &[String]) -> Result<(), RunError> {
        let log = File::create(context.log_path()).map_err(|source| RunError::Io {
            path: context.log_path().to_path_buf(),
            source,
        })?;
        context.start()?;
        let exit_code = self
            .engine
            .invoke(sandbox.dir(), CONTROL_FILE_NAME, log)
            .map_err(|source| RunError::Io {
                path: sandbox.dir().to_path_buf(),
                source,
            })?;

        let missing: Vec<String> = outputs.iter().filter(|n| !sandbox.contains(n)).cloned().collect();
        if !missing.is_empty() {
            return Err(RunError::EngineFailed {
                engine: self.engine.name().to_string(),
                log_path: context.log_path().to_path_buf(),
                exit_code,
                missing,
                diagnostic: diagnostic_tail(&[sandbox.path(MESSAGE_FILE_NAME).as_path(), context.log_path()]),
            });
        }

        let processed = self.layout.met_processed(self.station);
        let mut relocated = Vec::with_capacity(outputs.len());
        for name in outputs {
            let dest = processed.join(name);
            sandbox.relocate(name, &dest)?;
            relocated.push(dest);
        }
        context.succeed(relocated)
    }
}
