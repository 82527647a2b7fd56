//! Receptor pathway: a symmetric Cartesian grid centred on the site

use super::pathway::{Field, Pathway, PathwayBlock, ProtocolError};
use serde::{Deserialize, Serialize};

/// Network identifier of the generated grid
pub const GRID_NETWORK_ID: &str = "NET1";

/// Largest receptor count accepted along one axis
pub const MAX_POINTS_PER_AXIS: usize = 1001;

/// Square receptor grid spanning `-range..=range` on both axes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReceptorGrid {
    /// Half-width of the grid in metres
    #[serde(default = "default_range")]
    pub range_m: f64,
    /// Distance between neighbouring receptors in metres
    #[serde(default = "default_spacing")]
    pub spacing_m: f64,
}

fn default_range() -> f64 {
    5000.0
}

fn default_spacing() -> f64 {
    500.0
}

impl Default for ReceptorGrid {
    fn default() -> Self {
        Self {
            range_m: default_range(),
            spacing_m: default_spacing(),
        }
    }
}

impl ReceptorGrid {
    /// Validated grid
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidGrid`] unless both values are finite
    /// and positive and the grid has at most [`MAX_POINTS_PER_AXIS`]
    /// receptors per axis.
    pub fn new(range_m: f64, spacing_m: f64) -> Result<Self, ProtocolError> {
        let grid = Self { range_m, spacing_m };
        grid.validate()?;
        Ok(grid)
    }

    fn invalid(&self) -> ProtocolError {
        ProtocolError::InvalidGrid {
            range: self.range_m,
            spacing: self.spacing_m,
        }
    }

    fn validate(&self) -> Result<usize, ProtocolError> {
        let usable = |v: f64| v.is_finite() && v > 0.0;
        if !(usable(self.range_m) && usable(self.spacing_m)) {
            return Err(self.invalid());
        }
        let steps = (self.range_m * 2.0 / self.spacing_m).floor();
        if !steps.is_finite() || steps >= MAX_POINTS_PER_AXIS as f64 {
            return Err(self.invalid());
        }
        (steps as usize)
            .checked_add(1)
            .filter(|&points| points <= MAX_POINTS_PER_AXIS)
            .ok_or_else(|| self.invalid())
    }

    /// Receptors along each axis: `floor(range * 2 / spacing) + 1`
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidGrid`] for an unusable grid.
    pub fn points_per_axis(&self) -> Result<usize, ProtocolError> {
        self.validate()
    }

    /// Build the `RE` pathway
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidGrid`] for an unusable grid.
    pub fn to_block(&self) -> Result<PathwayBlock, ProtocolError> {
        let points = self.points_per_axis()?;
        let count = i64::try_from(points).map_err(|_| self.invalid())?;

        let mut block = PathwayBlock::new(Pathway::Receptor);
        block.card("ELEVUNIT", &[Field::token("METERS")])?;
        block.card("GRIDCART", &[Field::token(GRID_NETWORK_ID), Field::token("STA")])?;
        block.card(
            "GRIDCART",
            &[
                Field::token(GRID_NETWORK_ID),
                Field::token("XYINC"),
                Field::decimal(-self.range_m, 1),
                Field::int(count),
                Field::decimal(self.spacing_m, 1),
                Field::decimal(-self.range_m, 1),
                Field::int(count),
                Field::decimal(self.spacing_m, 1),
            ],
        )?;
        block.card("GRIDCART", &[Field::token(GRID_NETWORK_ID), Field::token("END")])?;
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_grid_block() {
        let block = ReceptorGrid::default().to_block().unwrap();
        assert_eq!(
            block.render(),
            "RE STARTING\n\
             \x20  ELEVUNIT METERS\n\
             \x20  GRIDCART NET1 STA\n\
             \x20  GRIDCART NET1 XYINC -5000.0 21 500.0 -5000.0 21 500.0\n\
             \x20  GRIDCART NET1 END\n\
             RE FINISHED"
        );
    }

    #[test]
    fn test_points_truncate_partial_steps() {
        assert_eq!(ReceptorGrid::new(1000.0, 300.0).unwrap().points_per_axis().unwrap(), 7);
        assert_eq!(ReceptorGrid::new(100.0, 500.0).unwrap().points_per_axis().unwrap(), 1);
    }

    #[test]
    fn test_rejects_unusable_grids() {
        assert!(ReceptorGrid::new(0.0, 500.0).is_err());
        assert!(ReceptorGrid::new(5000.0, -1.0).is_err());
        assert!(ReceptorGrid::new(f64::INFINITY, 500.0).is_err());

        let bad = ReceptorGrid {
            range_m: 5000.0,
            spacing_m: 0.0,
        };
        assert!(matches!(bad.to_block(), Err(ProtocolError::InvalidGrid { .. })));
    }

    #[test]
    fn test_rejects_oversized_grids() {
        assert!(matches!(
            ReceptorGrid::new(1e300, 1e-10),
            Err(ProtocolError::InvalidGrid { .. })
        ));
        assert!(ReceptorGrid::new(5000.0, 1.0).is_err());

        let largest = ReceptorGrid::new(500.0, 1.0).unwrap();
        assert_eq!(largest.points_per_axis().unwrap(), MAX_POINTS_PER_AXIS);

        let unchecked = ReceptorGrid {
            range_m: 1e300,
            spacing_m: 1e-10,
        };
        assert!(unchecked.points_per_axis().is_err());
    }
}
