//! Data directory layout
//!
//! Every path the pipeline reads or writes is derived here from the data
//! root, a station folder name, the project name and the year, so re-runs
//! land on the same files and overwrite them.

use crate::control::file_token;
use std::path::{Path, PathBuf};

/// Sounding table written by the download step
#[must_use]
pub fn sounding_table_name(year: i32) -> String {
    format!("sounding_{year}.csv")
}

/// Surface table written by the download step
#[must_use]
pub fn surface_table_name(year: i32) -> String {
    format!("surface_data_{year}.csv")
}

/// Reanalysis single-level extract at the site
#[must_use]
pub fn reanalysis_surface_name(year: i32) -> String {
    format!("era5_surface_{year}.csv")
}

/// Reanalysis pressure-level extract above the site
#[must_use]
pub fn reanalysis_levels_name(year: i32) -> String {
    format!("era5_levels_{year}.csv")
}

/// Encoded upper-air file for the preprocessor
#[must_use]
pub fn upper_air_file_name(year: i32) -> String {
    format!("upper_air_{year}.igra")
}

/// Surface cloud-cover extract
#[must_use]
pub fn cloud_extract_file_name(year: i32) -> String {
    format!("surface_{year}.ext")
}

/// Onsite surface file staged in the preprocessor sandbox
#[must_use]
pub fn onsite_file_name(year: i32) -> String {
    format!("onsite_{year}.dat")
}

/// Directory layout rooted at the configured data directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Layout under `root`
    #[must_use]
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    /// Data root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `met/interim/{station}`: tables and encoded inputs before preprocessing
    #[must_use]
    pub fn met_interim(&self, station: &str) -> PathBuf {
        self.root.join("met").join("interim").join(file_token(station))
    }

    /// `met/processed/{station}`: preprocessor surface and profile files
    #[must_use]
    pub fn met_processed(&self, station: &str) -> PathBuf {
        self.root.join("met").join("processed").join(file_token(station))
    }

    /// `met/aermet_logs/{station}/{year}`: preprocessor sandbox
    #[must_use]
    pub fn preprocessor_sandbox(&self, station: &str, year: i32) -> PathBuf {
        self.root
            .join("met")
            .join("aermet_logs")
            .join(file_token(station))
            .join(year.to_string())
    }

    /// `model/run/{project}/{year}`: dispersion sandbox
    #[must_use]
    pub fn dispersion_sandbox(&self, project: &str, year: i32) -> PathBuf {
        self.root
            .join("model")
            .join("run")
            .join(file_token(project))
            .join(year.to_string())
    }

    /// `model_output/{project}/{year}/{pollutant}`: permanent results
    #[must_use]
    pub fn model_output(&self, project: &str, year: i32, pollutant: &str) -> PathBuf {
        self.root
            .join("model_output")
            .join(file_token(project))
            .join(year.to_string())
            .join(file_token(pollutant))
    }

    /// `inventory/{project}`: inventory templates
    #[must_use]
    pub fn inventory_dir(&self, project: &str) -> PathBuf {
        self.root.join("inventory").join(file_token(project))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_paths() {
        let layout = DataLayout::new(Path::new("/data"));
        assert_eq!(layout.met_interim("Jhb Intl"), PathBuf::from("/data/met/interim/Jhb_Intl"));
        assert_eq!(
            layout.preprocessor_sandbox("Jhb", 2024),
            PathBuf::from("/data/met/aermet_logs/Jhb/2024")
        );
        assert_eq!(
            layout.dispersion_sandbox("Mine A", 2024),
            PathBuf::from("/data/model/run/Mine_A/2024")
        );
        assert_eq!(
            layout.model_output("Mine A", 2024, "PM2.5"),
            PathBuf::from("/data/model_output/Mine_A/2024/PM2.5")
        );
    }

    #[test]
    fn test_file_names() {
        assert_eq!(upper_air_file_name(2024), "upper_air_2024.igra");
        assert_eq!(onsite_file_name(2024), "onsite_2024.dat");
        assert_eq!(surface_table_name(2024), "surface_data_2024.csv");
        assert_eq!(reanalysis_levels_name(2024), "era5_levels_2024.csv");
    }
}
