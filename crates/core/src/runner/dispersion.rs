//! Dispersion engine runs: one sandbox per year, one run per pollutant

use super::context::{RunContext, RunRecord};
use super::engine::Engine;
use super::layout::DataLayout;
use super::sandbox::Sandbox;
use super::{diagnostic_tail, RunError};
use crate::control::dispersion::ERROR_FILE_NAME;
use crate::control::{
    file_token, profile_file_name, surface_file_name, AveragingPeriod, DispersionCompiler, DispersionSettings,
};
use crate::inventory::EmissionSource;
use crate::projection::CoordinateProjector;
use std::fs::File;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Control file written into the sandbox
pub const CONTROL_FILE_NAME: &str = "aermod.inp";
/// Primary output whose presence marks success
pub const PRIMARY_OUTPUT_NAME: &str = "aermod.out";

/// Log of one pollutant run
#[must_use]
pub fn log_file_name(pollutant: &str) -> String {
    format!("aermod_{}.log", file_token(pollutant))
}

/// Permanent name of the primary output
#[must_use]
pub fn output_file_name(year: i32, pollutant: &str) -> String {
    format!("AERMOD_{year}_{}.out", file_token(pollutant))
}

/// Runs the dispersion engine for every pollutant of a year
pub struct DispersionRunner<'a> {
    settings: &'a DispersionSettings,
    projector: &'a CoordinateProjector,
    engine: &'a dyn Engine,
    layout: &'a DataLayout,
    station: &'a str,
}

impl<'a> DispersionRunner<'a> {
    /// Runner reading meteorology from `station`'s processed folder
    #[must_use]
    pub fn new(
        settings: &'a DispersionSettings,
        projector: &'a CoordinateProjector,
        engine: &'a dyn Engine,
        layout: &'a DataLayout,
        station: &'a str,
    ) -> Self {
        Self {
            settings,
            projector,
            engine,
            layout,
            station,
        }
    }

    /// Stage the year's meteorology once and run every pollutant in turn
    ///
    /// A failing pollutant is recorded and the loop continues. The staged
    /// meteorological files are removed only when every pollutant
    /// succeeded; otherwise the sandbox is left as it is.
    ///
    /// # Errors
    /// Returns [`RunError`] only when the sandbox cannot be prepared or the
    /// processed meteorological files are missing; per-pollutant failures
    /// are reported in the returned records.
    pub fn run_year(
        &self,
        year: i32,
        sources: &[EmissionSource],
        pollutants: &[(String, Vec<AveragingPeriod>)],
    ) -> Result<Vec<RunRecord>, RunError> {
        let sandbox = Sandbox::create(&self.layout.dispersion_sandbox(&self.settings.project, year))?;
        let processed = self.layout.met_processed(self.station);
        let met_inputs = [surface_file_name(year), profile_file_name(year)]
            .iter()
            .map(|name| sandbox.stage(&processed.join(name)))
            .collect::<Result<Vec<_>, _>>()?;
        info!("Staged meteorology for {year} in {}", sandbox.dir().display());

        let mut records = Vec::with_capacity(pollutants.len());
        for (pollutant, periods) in pollutants {
            info!("Modelling {pollutant} for {year}");
            let record = self.run_pollutant(&sandbox, &met_inputs, year, sources, pollutant, periods);
            match &record.error {
                Some(e) => {
                    error!("{pollutant} {year} failed: {e}");
                    if let Some(text) = e.diagnostic() {
                        error!("{} reported:\n{text}", self.engine.name());
                    }
                }
                None => info!("{pollutant} {year} finished with {} outputs", record.context.outputs().len()),
            }
            records.push(record);
        }

        if records.iter().all(RunRecord::succeeded) {
            for name in &met_inputs {
                sandbox.remove(name)?;
            }
        } else {
            warn!("Keeping sandbox {} for inspection", sandbox.dir().display());
        }
        Ok(records)
    }

    fn run_pollutant(
        &self,
        sandbox: &Sandbox,
        met_inputs: &[String],
        year: i32,
        sources: &[EmissionSource],
        pollutant: &str,
        periods: &[AveragingPeriod],
    ) -> RunRecord {
        let log_path = sandbox.path(&log_file_name(pollutant));
        let mut context = RunContext::staged(year, sandbox.dir(), log_path, met_inputs.to_vec())
            .with_pollutant(pollutant, periods);

        match self.execute(sandbox, &mut context, sources, pollutant) {
            Ok(()) => RunRecord { context, error: None },
            Err(error) => {
                if let Err(e) = context.fail() {
                    warn!("{e}");
                }
                RunRecord {
                    context,
                    error: Some(error),
                }
            }
        }
    }

    fn execute(
        &self,
        sandbox: &Sandbox,
        context: &mut RunContext,
        sources: &[EmissionSource],
        pollutant: &str,
    ) -> Result<(), RunError> {
        let year = context.year();
        let compiler = DispersionCompiler::new(self.settings, self.projector);

        // No earlier run's results may be mistaken for this one's
        sandbox.remove(PRIMARY_OUTPUT_NAME)?;
        sandbox.remove(ERROR_FILE_NAME)?;

        let compiled = compiler.compile(sources, year, pollutant, context.periods())?;
        for plot in &compiled.plot_files {
            sandbox.remove(plot)?;
        }
        if compiled.sources.used_dummy {
            warn!("{pollutant} {year}: no sources emit, running with an inert placeholder");
        }
        sandbox.write(CONTROL_FILE_NAME, &compiled.control.render())?;

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

        if !sandbox.contains(PRIMARY_OUTPUT_NAME) {
            return Err(RunError::EngineFailed {
                engine: self.engine.name().to_string(),
                log_path: context.log_path().to_path_buf(),
                exit_code,
                missing: vec![PRIMARY_OUTPUT_NAME.to_string()],
                diagnostic: diagnostic_tail(&[sandbox.path(ERROR_FILE_NAME).as_path(), context.log_path()]),
            });
        }

        let out_dir = self.layout.model_output(&self.settings.project, year, pollutant);
        let mut outputs: Vec<PathBuf> = Vec::with_capacity(compiled.plot_files.len() + 1);
        let primary = out_dir.join(output_file_name(year, pollutant));
        sandbox.relocate(PRIMARY_OUTPUT_NAME, &primary)?;
        outputs.push(primary);

        for plot in &compiled.plot_files {
            if sandbox.contains(plot) {
                let dest = out_dir.join(plot);
                sandbox.relocate(plot, &dest)?;
                outputs.push(dest);
            } else {
                warn!("{pollutant} {year}: plot file {plot} was not written");
            }
        }
        context.succeed(outputs)
    }
}
