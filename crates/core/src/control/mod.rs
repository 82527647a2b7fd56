//! Control-file compiler
//!
//! Builds the pathway-structured text documents that configure the
//! meteorological preprocessor and the dispersion engine:
//! - [`pathway`]: card formatting and validation
//! - [`source`]: inventory records to `SO` cards
//! - [`receptor`]: receptor grid (`RE`)
//! - [`dispersion`]: `CO`, `ME`, `OU` and the full dispersion control file
//! - [`preprocessor`]: `JOB`, `UPPERAIR`, `ONSITE`, `METPREP`
//! - [`assembler`]: fixed pathway ordering and rendering

pub mod assembler;
pub mod dispersion;
pub mod pathway;
pub mod preprocessor;
pub mod receptor;
pub mod source;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use assembler::ControlFile;
pub use dispersion::{AveragingPeriod, CompiledControl, DispersionCompiler, DispersionSettings};
pub use pathway::{Field, Pathway, PathwayBlock, ProtocolError, Stage};
pub use preprocessor::{PreprocessorCompiler, PreprocessorSettings, SurfaceSector};
pub use receptor::ReceptorGrid;
pub use source::{CompiledSources, SourceCompiler};

/// Dispersion coefficients to apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DispersionEnvironment {
    /// Rural coefficients
    #[default]
    Rural,
    /// Urban coefficients (adds `URBANOPT` and `URBANSRC`)
    Urban,
}

/// NO2 conversion option appended to `MODELOPT` for NO2 runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NoxMethod {
    /// Full conversion, nothing appended
    #[default]
    None,
    /// Ozone limiting method
    Olm,
    /// Plume volume molar ratio method
    Pvmrm,
    /// Ambient ratio method 2
    Arm2,
    /// Generic reaction set method
    Grsm,
    /// Travel time reaction method
    Ttrm,
}

impl NoxMethod {
    /// `MODELOPT` keyword, `None` for [`NoxMethod::None`]
    #[must_use]
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            NoxMethod::None => None,
            NoxMethod::Olm => Some("OLM"),
            NoxMethod::Pvmrm => Some("PVMRM"),
            NoxMethod::Arm2 => Some("ARM2"),
            NoxMethod::Grsm => Some("GRSM"),
            NoxMethod::Ttrm => Some("TTRM"),
        }
    }
}

impl fmt::Display for NoxMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword().unwrap_or("NONE"))
    }
}

/// Surface file the preprocessor writes and the dispersion engine reads
#[must_use]
pub fn surface_file_name(year: i32) -> String {
    format!("AM_{year}.SFC")
}

/// Profile file the preprocessor writes and the dispersion engine reads
#[must_use]
pub fn profile_file_name(year: i32) -> String {
    format!("AM_{year}.PFL")
}

/// Replace whitespace runs with `_` so a name can be used as a file token
#[must_use]
pub fn file_token(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_met_file_names() {
        assert_eq!(surface_file_name(2024), "AM_2024.SFC");
        assert_eq!(profile_file_name(2024), "AM_2024.PFL");
    }

    #[test]
    fn test_file_token() {
        assert_eq!(file_token(" Mine  Expansion "), "Mine_Expansion");
    }

    #[test]
    fn test_environment_deserializes_uppercase() {
        let env: DispersionEnvironment = serde_yaml::from_str("URBAN").unwrap();
        assert_eq!(env, DispersionEnvironment::Urban);
        let nox: NoxMethod = serde_yaml::from_str("OLM").unwrap();
        assert_eq!(nox.keyword(), Some("OLM"));
    }
}
