use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use plume_core::inventory::write_templates;
use plume_core::runner::{import_reanalysis, prepare_met_inputs};
use plume_core::{
    Config, CoordinateProjector, DispersionCompiler, DispersionRunner, ExternalEngine, Inventory, InventoryLoader,
    PreprocessorRunner,
};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Dispersion modelling pipeline driver
#[derive(Parser, Debug)]
#[command(name = "plume")]
#[command(about = "Prepare, run and harvest dispersion engine runs", long_about = None)]
struct Args {
    /// Project configuration (YAML)
    #[arg(short, long)]
    config: PathBuf,

    /// Process only this year instead of every configured year
    #[arg(short, long)]
    year: Option<i32>,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Write inventory CSV templates for the project
    SetupInventory,
    /// Convert reanalysis extracts into surface and sounding tables
    ImportReanalysis,
    /// Encode sounding and surface tables into preprocessor inputs
    PrepareMet,
    /// Run the meteorological preprocessor
    Aermet,
    /// Run the dispersion engine for every enabled pollutant
    RunModel,
    /// Print the dispersion control file without running anything
    Compile {
        /// Pollutant to compile (default: first enabled)
        #[arg(short, long)]
        pollutant: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config).with_context(|| format!("loading {}", args.config.display()))?;
    let years: Vec<i32> = match args.year {
        Some(year) => vec![year],
        None => config.project.years.clone(),
    };

    match args.action {
        Action::SetupInventory => setup_inventory(&config),
        Action::ImportReanalysis => for_each_year(&years, "import-reanalysis", |year| {
            let tables = import_reanalysis(&config.layout(), &config.project.station_name, year)?;
            info!("Wrote {} and {}", tables.surface.display(), tables.sounding.display());
            Ok(())
        }),
        Action::PrepareMet => for_each_year(&years, "prepare-met", |year| prepare_met(&config, year)),
        Action::Aermet => aermet(&config, &years),
        Action::RunModel => run_model(&config, &years),
        Action::Compile { pollutant } => compile(&config, years.first().copied(), pollutant.as_deref()),
    }
}

/// Run `step` for every year; a failing year is logged and the rest continue
fn for_each_year<F>(years: &[i32], action: &str, mut step: F) -> Result<()>
where
    F: FnMut(i32) -> Result<()>,
{
    let mut failed = 0usize;
    for &year in years {
        info!("=== {action} {year} ===");
        if let Err(e) = step(year) {
            error!("{action} {year} failed: {e:#}");
            failed += 1;
        }
    }
    if failed > 0 {
        bail!("{action}: {failed} of {} years failed", years.len());
    }
    Ok(())
}

fn setup_inventory(config: &Config) -> Result<()> {
    let dir = config.layout().inventory_dir(&config.project.name);
    let outcome = write_templates(&dir, &config.location).context("writing inventory templates")?;
    for path in &outcome.created {
        info!("Created {}", path.display());
    }
    for path in &outcome.existing {
        info!("Kept existing {}", path.display());
    }
    Ok(())
}

fn prepare_met(config: &Config, year: i32) -> Result<()> {
    let inputs = prepare_met_inputs(
        &config.layout(),
        &config.project.station_name,
        &config.preprocessor.upper_air_station,
        year,
    )?;
    info!(
        "Wrote {} and {}",
        inputs.upper_air.display(),
        inputs.cloud_extract.display()
    );
    Ok(())
}

fn aermet(config: &Config, years: &[i32]) -> Result<()> {
    let engine = ExternalEngine::locate(&config.aermet_exe())?;
    let layout = config.layout();
    let runner = PreprocessorRunner::new(
        &config.preprocessor,
        &config.location,
        &engine,
        &layout,
        &config.project.station_name,
    );
    for_each_year(years, "aermet", |year| {
        let record = runner.run_year(year)?;
        match record.error {
            Some(e) => bail!("{e:#}"),
            None => Ok(()),
        }
    })
}

fn load_inventory(config: &Config) -> Inventory {
    let loader = InventoryLoader::new(config.dispersion.pollutants.keys());
    let inventory = loader.load(&config.inventory_paths());
    for rejected in &inventory.rejected {
        warn!("{rejected}");
    }
    info!(
        "Inventory: {} sources, {} rejected",
        inventory.len(),
        inventory.rejected.len()
    );
    inventory
}

fn run_model(config: &Config, years: &[i32]) -> Result<()> {
    let engine = ExternalEngine::locate(&config.aermod_exe())?;
    let projector = CoordinateProjector::new(config.location)?;
    let inventory = load_inventory(config);
    let pollutants = config.active_pollutants();
    let settings = config.dispersion_settings();
    let layout = config.layout();
    let runner = DispersionRunner::new(
        &settings,
        &projector,
        &engine,
        &layout,
        &config.project.station_name,
    );

    for_each_year(years, "run-model", |year| {
        let records = runner.run_year(year, &inventory.sources, &pollutants)?;
        let failed = records.iter().filter(|r| !r.succeeded()).count();
        if failed > 0 {
            bail!("{failed} of {} pollutants failed", records.len());
        }
        Ok(())
    })
}

fn compile(config: &Config, year: Option<i32>, pollutant: Option<&str>) -> Result<()> {
    let Some(year) = year else {
        bail!("no year configured");
    };
    let pollutants = config.active_pollutants();
    let (name, periods) = match pollutant {
        Some(wanted) => pollutants
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .cloned()
            .with_context(|| format!("pollutant {wanted} is not enabled"))?,
        None => pollutants[0].clone(),
    };

    let projector = CoordinateProjector::new(config.location)?;
    let inventory = load_inventory(config);
    let settings = config.dispersion_settings();
    let compiled = DispersionCompiler::new(&settings, &projector).compile(&inventory.sources, year, &name, &periods)?;
    for skipped in &compiled.sources.skipped {
        warn!("Skipped source {}: {}", skipped.id, skipped.problem);
    }
    print!("{}", compiled.control.render());
    Ok(())
}
