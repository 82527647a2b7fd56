//! Blank inventory templates seeded with one example row per variant

use super::{InventoryError, SourceVariant, STANDARD_POLLUTANTS};
use crate::core_types::SiteReference;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Which template files were written and which already existed
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TemplateOutcome {
    /// Newly created files
    pub created: Vec<PathBuf>,
    /// Files left untouched because they already existed
    pub existing: Vec<PathBuf>,
}

/// Write `point_sources.csv`, `area_sources.csv` and `line_sources.csv`
/// into `dir`, creating the directory if needed
///
/// Each template carries the variant's physical columns, a `description`
/// column, the standard pollutant columns (all zero) and one example row
/// located at the site. Existing files are never overwritten.
///
/// # Errors
/// Returns [`InventoryError::Io`] if the directory or a file cannot be created.
pub fn write_templates(dir: &Path, site: &SiteReference) -> Result<TemplateOutcome, InventoryError> {
    fs::create_dir_all(dir).map_err(|source| InventoryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut outcome = TemplateOutcome::default();
    for variant in SourceVariant::ALL {
        let path = dir.join(variant.file_name());
        let contents = template_contents(variant, site);
        match create_new_atomic(&path, contents.as_bytes()) {
            Ok(true) => {}
            Ok(false) => {
                info!("Template {} exists, leaving it untouched", path.display());
                outcome.existing.push(path);
                continue;
            }
            Err(source) => return Err(InventoryError::Io { path, source }),
        }
        info!("Created inventory template {}", path.display());
        outcome.created.push(path);
    }
    Ok(outcome)
}

/// Publish `contents` at `path` unless a file is already there
///
/// The bytes go to a hidden `.{name}.partial` sibling first and are then
/// hard-linked into place, so a failed write never leaves a truncated
/// template under the final name. Returns `false` when `path` exists.
fn create_new_atomic(path: &Path, contents: &[u8]) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    let name = path
        .file_name()
        .map_or_else(|| "template".into(), |n| n.to_string_lossy().into_owned());
    let temp = path.with_file_name(format!(".{name}.partial"));

    let written = fs::File::create(&temp).and_then(|mut file| {
        file.write_all(contents)?;
        file.sync_all()
    });
    let published = written.and_then(|()| match fs::hard_link(&temp, path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
        // Filesystems without hard links
        Err(_) => fs::rename(&temp, path).map(|()| true),
    });
    if let Err(e) = fs::remove_file(&temp) {
        if e.kind() != ErrorKind::NotFound && published.is_ok() {
            return Err(e);
        }
    }
    published
}

fn template_contents(variant: SourceVariant, site: &SiteReference) -> String {
    let (lon, lat) = (site.longitude, site.latitude);
    let elevation = site.elevation.value();
    let pollutants = STANDARD_POLLUTANTS.join(",");
    let zeros = vec!["0.0"; STANDARD_POLLUTANTS.len()].join(",");

    match variant {
        SourceVariant::Point => format!(
            "source_id,WKT,elevation,stack_height,stack_temp_k,stack_velocity,stack_diameter,description,{pollutants}\n\
             1,\"POINT ({lon} {lat})\",{elevation:.1},10.0,300.0,4.0,0.5,Example Stack,{zeros}\n"
        ),
        SourceVariant::Area => {
            let (east, north) = (lon + 0.001, lat + 0.001);
            format!(
                "source_id,WKT,elevation,release_height,szinit,description,{pollutants}\n\
                 1,\"POLYGON (({lon} {lat}, {east} {lat}, {east} {north}, {lon} {north}, {lon} {lat}))\",{elevation:.1},2.0,1.0,Example Area,{zeros}\n"
            )
        }
        SourceVariant::Line => {
            let east = lon + 0.005;
            format!(
                "source_id,WKT,elevation,release_height,width_m,szinit,description,{pollutants}\n\
                 1,\"LINESTRING ({lon} {lat}, {east} {lat})\",{elevation:.1},1.0,10.0,2.0,Example Road,{zeros}\n"
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::units::Meters;
    use crate::inventory::{InventoryLoader, InventoryPaths};

    #[test]
    fn test_templates_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteReference::new(-26.2, 28.05, Meters::new(1600.0));

        let outcome = write_templates(dir.path(), &site).unwrap();
        assert_eq!(outcome.created.len(), 3);

        let inv = InventoryLoader::default().load(&InventoryPaths::in_directory(dir.path()));
        assert!(inv.rejected.is_empty(), "{:?}", inv.rejected);
        assert_eq!(inv.sources.len(), 3);
        assert!(inv.sources.iter().all(|s| !s.rates.emits("SO2")));
    }

    #[test]
    fn test_existing_templates_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteReference::new(0.0, 0.0, Meters::ZERO);
        let point = dir.path().join("point_sources.csv");
        fs::write(&point, "custom").unwrap();

        let outcome = write_templates(dir.path(), &site).unwrap();
        assert_eq!(outcome.existing, vec![point.clone()]);
        assert_eq!(outcome.created.len(), 2);
        assert_eq!(fs::read_to_string(point).unwrap(), "custom");
    }

    #[test]
    fn test_failed_write_leaves_no_template() {
        let dir = tempfile::tempdir().unwrap();
        let site = SiteReference::new(0.0, 0.0, Meters::ZERO);
        let point = dir.path().join("point_sources.csv");
        let blocker = dir.path().join(".point_sources.csv.partial");
        fs::create_dir(&blocker).unwrap();

        assert!(matches!(
            write_templates(dir.path(), &site),
            Err(InventoryError::Io { .. })
        ));
        assert!(!point.exists());

        fs::remove_dir(&blocker).unwrap();
        let outcome = write_templates(dir.path(), &site).unwrap();
        assert!(outcome.created.contains(&point));
        assert!(outcome.existing.is_empty());
        assert!(fs::read_to_string(&point).unwrap().starts_with("source_id,WKT"));
        assert!(!blocker.exists());
    }
}
