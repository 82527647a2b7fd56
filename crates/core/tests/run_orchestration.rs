//! Sandbox lifecycle tests with in-process fake engines and, on Unix, a
//! shell-script executable

use plume_core::control::{PreprocessorSettings, ReceptorGrid};
use plume_core::core_types::units::Meters;
use plume_core::runner::{import_reanalysis, prepare_met_inputs, RunRecord};
use plume_core::{
    AveragingPeriod, CoordinateProjector, DataLayout, DispersionEnvironment, DispersionRunner, DispersionSettings,
    Engine, NoxMethod, PreprocessorRunner, RunError, RunState, SiteReference,
};
use std::cell::RefCell;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

#[ctor::ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

const STATION: &str = "Station";
const YEAR: i32 = 2024;

/// Reads the control file and writes the files a real engine would
struct FakeDispersion {
    fail_for: Option<&'static str>,
    calls: RefCell<Vec<String>>,
}

impl FakeDispersion {
    fn new(fail_for: Option<&'static str>) -> Self {
        Self {
            fail_for,
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Engine for FakeDispersion {
    fn name(&self) -> &str {
        "fake-aermod"
    }

    fn invoke(&self, sandbox: &Path, control_file: &str, mut log: File) -> io::Result<Option<i32>> {
        let control = fs::read_to_string(sandbox.join(control_file))?;
        let pollutant = control
            .lines()
            .find_map(|l| l.trim().strip_prefix("POLLUTID"))
            .map(|p| p.trim().to_string())
            .unwrap_or_default();
        writeln!(log, "fake run for {pollutant}")?;
        self.calls.borrow_mut().push(pollutant.clone());

        if self.fail_for == Some(pollutant.as_str()) {
            fs::write(sandbox.join("aermod.err"), "E01 fatal input error\n")?;
            return Ok(Some(1));
        }
        fs::write(sandbox.join("aermod.out"), format!("results {pollutant}"))?;
        for line in control.lines().filter(|l| l.trim_start().starts_with("PLOTFILE")) {
            if let Some(name) = line.split_whitespace().last() {
                fs::write(sandbox.join(name), "plot")?;
            }
        }
        Ok(Some(0))
    }
}

/// Writes the preprocessor outputs named in `writes`
struct FakePreprocessor {
    writes: Vec<String>,
}

impl Engine for FakePreprocessor {
    fn name(&self) -> &str {
        "fake-aermet"
    }

    fn invoke(&self, sandbox: &Path, control_file: &str, mut log: File) -> io::Result<Option<i32>> {
        assert!(sandbox.join(control_file).is_file());
        writeln!(log, "processing")?;
        for name in &self.writes {
            fs::write(sandbox.join(name), "met")?;
        }
        Ok(Some(0))
    }
}

fn settings() -> DispersionSettings {
    DispersionSettings {
        project: "Mine A".to_string(),
        environment: DispersionEnvironment::Rural,
        nox_method: NoxMethod::None,
        urban_population: 1_000_000,
        receptor_grid: ReceptorGrid::default(),
        surface_station: "99999".to_string(),
        upper_air_station: "68263".to_string(),
        profile_base: Meters::new(1600.0),
    }
}

fn site() -> SiteReference {
    SiteReference::new(-26.2, 28.05, Meters::new(1600.0))
}

fn write_processed_met(layout: &DataLayout) {
    let processed = layout.met_processed(STATION);
    fs::create_dir_all(&processed).unwrap();
    fs::write(processed.join("AM_2024.SFC"), "surface").unwrap();
    fs::write(processed.join("AM_2024.PFL"), "profile").unwrap();
}

fn pollutants() -> Vec<(String, Vec<AveragingPeriod>)> {
    vec![
        ("SO2".to_string(), vec![AveragingPeriod::Hours(1), AveragingPeriod::Annual]),
        ("NO2".to_string(), vec![AveragingPeriod::Hours(1)]),
    ]
}

fn run(layout: &DataLayout, engine: &dyn Engine) -> Result<Vec<RunRecord>, RunError> {
    let settings = settings();
    let projector = CoordinateProjector::new(site()).unwrap();
    DispersionRunner::new(&settings, &projector, engine, layout, STATION).run_year(YEAR, &[], &pollutants())
}

#[test]
fn test_all_pollutants_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    write_processed_met(&layout);
    let engine = FakeDispersion::new(None);

    let records = run(&layout, &engine).unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(RunRecord::succeeded));
    assert_eq!(*engine.calls.borrow(), vec!["SO2".to_string(), "NO2".to_string()]);

    let out = layout.model_output("Mine A", YEAR, "SO2");
    assert_eq!(fs::read_to_string(out.join("AERMOD_2024_SO2.out")).unwrap(), "results SO2");
    assert!(out.join("Mine_A_2024_SO2_01H.PLT").is_file());
    assert!(out.join("Mine_A_2024_SO2_ANN.PLT").is_file());
    assert_eq!(records[0].context.outputs().len(), 3);

    let sandbox = layout.dispersion_sandbox("Mine A", YEAR);
    assert!(!sandbox.join("AM_2024.SFC").exists());
    assert!(!sandbox.join("aermod.out").exists());
    assert!(sandbox.join("aermod.inp").is_file());
    assert!(fs::read_to_string(sandbox.join("aermod_NO2.log"))
        .unwrap()
        .contains("fake run for NO2"));
}

#[test]
fn test_failure_preserves_sandbox_and_continues() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    write_processed_met(&layout);
    let engine = FakeDispersion::new(Some("SO2"));

    let records = run(&layout, &engine).unwrap();
    assert_eq!(engine.calls.borrow().len(), 2);
    assert_eq!(records[0].context.state(), RunState::Failed);
    assert_eq!(records[1].context.state(), RunState::Succeeded);

    let sandbox = layout.dispersion_sandbox("Mine A", YEAR);
    match &records[0].error {
        Some(RunError::EngineFailed {
            log_path,
            exit_code,
            missing,
            diagnostic,
            ..
        }) => {
            assert_eq!(log_path, &sandbox.join("aermod_SO2.log"));
            assert!(log_path.is_file());
            assert_eq!(*exit_code, Some(1));
            assert_eq!(missing, &vec!["aermod.out".to_string()]);
            assert!(diagnostic.as_deref().unwrap_or_default().contains("E01"));
        }
        other => panic!("expected engine failure, got {other:?}"),
    }
    let rendered = format!("{:#}", records[0].error.as_ref().unwrap());
    assert!(rendered.contains("aermod_SO2.log"));
    assert!(rendered.ends_with("E01 fatal input error"));

    assert!(sandbox.join("AM_2024.SFC").is_file());
    assert!(sandbox.join("AM_2024.PFL").is_file());
    assert!(layout
        .model_output("Mine A", YEAR, "NO2")
        .join("AERMOD_2024_NO2.out")
        .is_file());
    assert!(!layout.model_output("Mine A", YEAR, "SO2").exists());
}

#[test]
fn test_stale_output_is_not_success() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    write_processed_met(&layout);
    let sandbox = layout.dispersion_sandbox("Mine A", YEAR);
    fs::create_dir_all(&sandbox).unwrap();
    fs::write(sandbox.join("aermod.out"), "old").unwrap();

    let engine = FakeDispersion::new(Some("SO2"));
    let records = run(&layout, &engine).unwrap();
    assert!(!records[0].succeeded());
}

#[test]
fn test_missing_met_aborts_year() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    let engine = FakeDispersion::new(None);
    assert!(matches!(run(&layout, &engine), Err(RunError::MissingInput(_))));
    assert!(engine.calls.borrow().is_empty());
}

const SURFACE_TABLE: &str = "Year,Month,Day,Hour,Temp_C,DewPt_C,Press_mb,Precip_mm,WindSpd_ms,WindDir_deg,CloudCover\n\
                             2024,1,1,1,21.5,10.2,8345.0,0.0,3.2,180.0,4\n\
                             2024,1,1,3,20.5,10.0,8344.0,0.0,2.1,170.0,5\n";

const SOUNDING_TABLE: &str = "time,pressure_level,height_m,temp_c,dewpt_c,wind_dir,wind_spd_knots\n\
                              2024-01-01 00:00:00,850,1500,20,15,270,10\n\
                              2024-01-01 00:00:00,700,3000,5,0,280,20\n\
                              2024-01-01 12:00:00,850,1510,22,14,260,8\n";

fn write_interim_tables(layout: &DataLayout) {
    let interim = layout.met_interim(STATION);
    fs::create_dir_all(&interim).unwrap();
    fs::write(interim.join("surface_data_2024.csv"), SURFACE_TABLE).unwrap();
    fs::write(interim.join("sounding_2024.csv"), SOUNDING_TABLE).unwrap();
}

#[test]
fn test_prepare_met_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    write_interim_tables(&layout);

    let inputs = prepare_met_inputs(&layout, STATION, "68263", YEAR).unwrap();
    assert_eq!(inputs.soundings, 2);
    let igra = fs::read_to_string(&inputs.upper_air).unwrap();
    assert!(igra.starts_with("#68263       2024 01 01 00 9999    2\n"));

    let extract = fs::read_to_string(&inputs.cloud_extract).unwrap();
    assert!(extract.starts_with("2024  1  1  1  4\n2024  1  1  2 99\n2024  1  1  3  5\n2024  1  1  4 99\n"));
    assert!(extract.ends_with("2024 12 31 24 99\n\n"));
    assert_eq!(extract.lines().filter(|l| !l.is_empty()).count(), 366 * 24);
}

#[test]
fn test_reanalysis_import_feeds_met_preparation() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    let interim = layout.met_interim(STATION);
    fs::create_dir_all(&interim).unwrap();
    fs::write(
        interim.join("era5_surface_2024.csv"),
        "time,t2m,d2m,sp,tp,u10,v10,tcc\n\
         2024-01-01 00:00:00,293.15,283.15,83450.0,0.0,3.0,4.0,0.4\n\
         2024-01-01 01:00:00,292.15,283.15,83440.0,0.0,3.0,4.0,0.5\n",
    )
    .unwrap();
    fs::write(
        interim.join("era5_levels_2024.csv"),
        "time,pressure_level,z,t,r,u,v\n\
         2024-01-01 00:00:00,850,14709.975,293.15,75,5.0,0.0\n\
         2024-01-01 00:00:00,700,29419.95,278.15,100,10.0,0.0\n",
    )
    .unwrap();

    let tables = import_reanalysis(&layout, STATION, YEAR).unwrap();
    assert_eq!((tables.hours, tables.levels), (2, 2));
    let surface = fs::read_to_string(&tables.surface).unwrap();
    assert!(surface.lines().nth(1).unwrap().starts_with("2024,1,1,1,"));

    let inputs = prepare_met_inputs(&layout, STATION, "68263", YEAR).unwrap();
    assert_eq!(inputs.soundings, 1);
    let igra = fs::read_to_string(&inputs.upper_air).unwrap();
    assert!(igra.starts_with("#68263       2024 01 01 00 9999    2\n"));
    let extract = fs::read_to_string(&inputs.cloud_extract).unwrap();
    assert!(extract.starts_with("2024  1  1  1  4\n2024  1  1  2  5\n2024  1  1  3 99\n"));
}

#[test]
fn test_reanalysis_import_requires_extracts() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    assert!(matches!(
        import_reanalysis(&layout, STATION, YEAR),
        Err(RunError::MissingInput(_))
    ));
}

#[test]
fn test_preprocessor_success_and_failure() {
    let dir = tempfile::tempdir().unwrap();
    let layout = DataLayout::new(dir.path());
    write_interim_tables(&layout);
    prepare_met_inputs(&layout, STATION, "68263", YEAR).unwrap();
    let settings = PreprocessorSettings::default();
    let site = site();
    let sandbox = layout.preprocessor_sandbox(STATION, YEAR);

    let partial = FakePreprocessor {
        writes: vec!["AM_2024.SFC".to_string()],
    };
    let record = PreprocessorRunner::new(&settings, &site, &partial, &layout, STATION)
        .run_year(YEAR)
        .unwrap();
    assert_eq!(record.context.state(), RunState::Failed);
    assert!(matches!(
        &record.error,
        Some(RunError::EngineFailed { missing, .. }) if missing == &vec!["AM_2024.PFL".to_string()]
    ));
    assert!(sandbox.join("upper_air_2024.igra").is_file());
    let onsite = fs::read_to_string(sandbox.join("onsite_2024.dat")).unwrap();
    assert_eq!(onsite.lines().count(), 366 * 24);
    assert!(onsite.lines().nth(2).unwrap().starts_with("2024  1  1  3   20.5"));

    let complete = FakePreprocessor {
        writes: vec!["AM_2024.SFC".to_string(), "AM_2024.PFL".to_string()],
    };
    let record = PreprocessorRunner::new(&settings, &site, &complete, &layout, STATION)
        .run_year(YEAR)
        .unwrap();
    assert!(record.succeeded());
    let processed = layout.met_processed(STATION);
    assert!(processed.join("AM_2024.SFC").is_file());
    assert!(processed.join("AM_2024.PFL").is_file());
    assert!(!sandbox.join("upper_air_2024.igra").exists());
    assert!(!sandbox.join("onsite_2024.dat").exists());
    assert!(sandbox.join("aermet.inp").is_file());
}

#[cfg(unix)]
mod shell_engine {
    use super::*;
    use plume_core::ExternalEngine;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("engine.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_external_engine_success() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(&dir.path().join("data"));
        write_processed_met(&layout);
        let exe = script(dir.path(), "echo \"reading $1\"\necho done >&2\necho ok > aermod.out");
        let engine = ExternalEngine::locate(&exe).unwrap();

        let records = run(&layout, &engine).unwrap();
        assert!(records.iter().all(RunRecord::succeeded));
        let log = fs::read_to_string(records[0].context.log_path()).unwrap();
        assert!(log.contains("reading aermod.inp"));
        assert!(log.contains("done"));
    }

    #[test]
    fn test_external_engine_failure_keeps_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let layout = DataLayout::new(&dir.path().join("data"));
        write_processed_met(&layout);
        let exe = script(dir.path(), "echo broken\nexit 3");
        let engine = ExternalEngine::locate(&exe).unwrap();

        let records = run(&layout, &engine).unwrap();
        assert!(records.iter().all(|r| !r.succeeded()));
        assert!(matches!(
            &records[0].error,
            Some(RunError::EngineFailed { exit_code: Some(3), diagnostic: Some(text), .. }) if text == "broken"
        ));
    }
}
