//! Pipeline configuration loaded from YAML
//!
//! A [`Config`] is read once and then passed by reference to every stage.
//! Relative paths are anchored at the directory holding the configuration
//! file, so a project folder can be moved as a whole.
//!
//! ```yaml
//! project:
//!   name: Mine A
//!   years: [2023, 2024]
//!   station_name: Johannesburg
//! location:
//!   latitude: -26.2
//!   longitude: 28.05
//!   elevation: 1600
//! paths:
//!   data_root: data
//!   aermod_exe: bin/aermod
//!   aermet_exe: bin/aermet
//! dispersion:
//!   environment: URBAN
//!   pollutants:
//!     SO2: { enabled: true, avg_times: [1, 24, ANNUAL] }
//! preprocessor:
//!   upper_air_station: "68263"
//! ```

use crate::control::{
    AveragingPeriod, DispersionEnvironment, DispersionSettings, NoxMethod, PreprocessorSettings, ReceptorGrid,
};
use crate::core_types::SiteReference;
use crate::inventory::InventoryPaths;
use crate::runner::DataLayout;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Pollutant modelled when none is enabled
pub const FALLBACK_POLLUTANT: &str = "SO2";

/// Averaging periods used when a pollutant lists none
fn default_avg_times() -> Vec<AveragingPeriod> {
    vec![AveragingPeriod::Hours(1), AveragingPeriod::Hours(24)]
}

fn default_station_name() -> String {
    "Station".to_string()
}

fn default_urban_population() -> u64 {
    1_000_000
}

/// Errors raised while loading a configuration
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io {
        /// Configuration file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// File is not valid YAML for [`Config`]
    Parse {
        /// Configuration file
        path: PathBuf,
        /// Underlying error
        source: serde_yaml::Error,
    },
    /// Values parsed but cannot be used
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "Failed to read configuration {}: {source}", path.display())
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Invalid configuration {}: {source}", path.display())
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum YearsRepr {
    One(i32),
    Many(Vec<i32>),
}

impl From<YearsRepr> for Vec<i32> {
    fn from(repr: YearsRepr) -> Self {
        match repr {
            YearsRepr::One(year) => vec![year],
            YearsRepr::Many(years) => years,
        }
    }
}

fn deserialize_years<'de, D>(deserializer: D) -> Result<Vec<i32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    YearsRepr::deserialize(deserializer).map(Vec::from)
}

/// Project identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name, used in titles and output paths
    pub name: String,
    /// Years to process; a single `year: 2024` is accepted too
    #[serde(alias = "year", deserialize_with = "deserialize_years")]
    pub years: Vec<i32>,
    /// Meteorological station folder name (default `Station`)
    #[serde(default = "default_station_name")]
    pub station_name: String,
}

/// Filesystem locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Root of the data layout (default `data`)
    pub data_root: PathBuf,
    /// Dispersion engine executable (default `aermod`)
    pub aermod_exe: PathBuf,
    /// Preprocessor executable (default `aermet`)
    pub aermet_exe: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            aermod_exe: PathBuf::from("aermod"),
            aermet_exe: PathBuf::from("aermet"),
        }
    }
}

/// Per-pollutant switch and averaging periods
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollutantConfig {
    /// Model this pollutant (default false)
    #[serde(default)]
    pub enabled: bool,
    /// Averaging periods (default 1 and 24 hours)
    #[serde(default = "default_avg_times")]
    pub avg_times: Vec<AveragingPeriod>,
}

/// Dispersion engine options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispersionConfig {
    /// Rural (default) or urban coefficients
    pub environment: DispersionEnvironment,
    /// NO2 conversion method (default none)
    pub nox_method: NoxMethod,
    /// Urban population (default 1 000 000)
    pub urban_population: u64,
    /// Receptor grid (default 5000 m range, 500 m spacing)
    pub receptor_grid: ReceptorGrid,
    /// Pollutants keyed by name
    pub pollutants: BTreeMap<String, PollutantConfig>,
}

impl Default for DispersionConfig {
    fn default() -> Self {
        Self {
            environment: DispersionEnvironment::default(),
            nox_method: NoxMethod::default(),
            urban_population: default_urban_population(),
            receptor_grid: ReceptorGrid::default(),
            pollutants: BTreeMap::new(),
        }
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Project identity
    pub project: ProjectConfig,
    /// Site origin
    pub location: SiteReference,
    /// Filesystem locations
    #[serde(default)]
    pub paths: PathsConfig,
    /// Inventory CSV files; the project inventory folder when all absent
    #[serde(default)]
    pub inventory: InventoryPaths,
    /// Dispersion options
    #[serde(default)]
    pub dispersion: DispersionConfig,
    /// Preprocessor options
    #[serde(default)]
    pub preprocessor: PreprocessorSettings,
}

impl Config {
    /// Load and validate a configuration file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read, is not valid YAML
    /// for this schema, or holds unusable values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let config = Self::from_yaml(&text, base).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        info!(
            "Loaded configuration for project '{}' ({} years)",
            config.project.name,
            config.project.years.len()
        );
        Ok(config)
    }

    /// Parse YAML text, resolving relative paths against `base_dir`
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed YAML and
    /// [`ConfigError::Invalid`] for unusable values.
    pub fn from_yaml(text: &str, base_dir: &Path) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        config.resolve_paths(base_dir);
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::Invalid("project name is empty".to_string()));
        }
        if self.project.years.is_empty() {
            return Err(ConfigError::Invalid("no years configured".to_string()));
        }
        let site = &self.location;
        if !(site.latitude.is_finite() && (-90.0..=90.0).contains(&site.latitude)) {
            return Err(ConfigError::Invalid(format!("latitude {} out of range", site.latitude)));
        }
        if !(site.longitude.is_finite() && (-180.0..=180.0).contains(&site.longitude)) {
            return Err(ConfigError::Invalid(format!("longitude {} out of range", site.longitude)));
        }
        let grid = self.dispersion.receptor_grid;
        ReceptorGrid::new(grid.range_m, grid.spacing_m).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        for (name, pollutant) in &self.dispersion.pollutants {
            if pollutant.enabled && pollutant.avg_times.is_empty() {
                return Err(ConfigError::Invalid(format!("{name} has no averaging periods")));
            }
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let anchor = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        anchor(&mut self.paths.data_root);
        anchor(&mut self.paths.aermod_exe);
        anchor(&mut self.paths.aermet_exe);
        for p in [&mut self.inventory.point, &mut self.inventory.area, &mut self.inventory.line]
            .into_iter()
            .flatten()
        {
            anchor(p);
        }
    }

    /// Data directory layout under the configured root
    #[must_use]
    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.paths.data_root)
    }

    /// Inventory files, defaulting to the project inventory folder
    #[must_use]
    pub fn inventory_paths(&self) -> InventoryPaths {
        let inv = &self.inventory;
        if inv.point.is_none() && inv.area.is_none() && inv.line.is_none() {
            InventoryPaths::in_directory(&self.layout().inventory_dir(&self.project.name))
        } else {
            inv.clone()
        }
    }

    /// Dispersion engine executable for this platform
    #[must_use]
    pub fn aermod_exe(&self) -> PathBuf {
        platform_executable(&self.paths.aermod_exe)
    }

    /// Preprocessor executable for this platform
    #[must_use]
    pub fn aermet_exe(&self) -> PathBuf {
        platform_executable(&self.paths.aermet_exe)
    }

    /// Enabled pollutants with their averaging periods, in name order
    ///
    /// Falls back to [`FALLBACK_POLLUTANT`] at 1 and 24 hours with a
    /// warning when nothing is enabled.
    #[must_use]
    pub fn active_pollutants(&self) -> Vec<(String, Vec<AveragingPeriod>)> {
        let active: Vec<(String, Vec<AveragingPeriod>)> = self
            .dispersion
            .pollutants
            .iter()
            .filter(|(_, p)| p.enabled)
            .map(|(name, p)| (name.clone(), p.avg_times.clone()))
            .collect();
        if active.is_empty() {
            warn!("No pollutants enabled, modelling {FALLBACK_POLLUTANT} at 1 and 24 hours");
            return vec![(FALLBACK_POLLUTANT.to_string(), default_avg_times())];
        }
        active
    }

    /// Settings for the dispersion compiler
    #[must_use]
    pub fn dispersion_settings(&self) -> DispersionSettings {
        DispersionSettings {
            project: self.project.name.clone(),
            environment: self.dispersion.environment,
            nox_method: self.dispersion.nox_method,
            urban_population: self.dispersion.urban_population,
            receptor_grid: self.dispersion.receptor_grid,
            surface_station: self.preprocessor.surface_station.clone(),
            upper_air_station: self.preprocessor.upper_air_station.clone(),
            profile_base: self.location.elevation,
        }
    }
}

/// Append `.exe` on Windows when the path has no such extension
#[must_use]
pub fn platform_executable(path: &Path) -> PathBuf {
    if cfg!(windows) && !path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("exe")) {
        path.with_extension("exe")
    } else {
        path.to_path_buf()
    }
}
