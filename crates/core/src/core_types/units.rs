//! Semantic unit types for physical source and meteorological quantities
//!
//! Newtype wrappers keep stack temperatures in Kelvin apart from ambient
//! temperatures in Celsius, and wind speeds in knots apart from m/s. Every
//! type derefs to its inner `f64` so formatting code can work on the raw value.
//!
//! # Usage
//! ```
//! use plume_core::core_types::units::{Celsius, Kelvin, Knots, MetersPerSecond};
//!
//! let exit_temp = Kelvin::new(293.15);
//! let ambient: Celsius = exit_temp.into();
//! assert!((*ambient - 20.0).abs() < 1e-9);
//!
//! let wind: MetersPerSecond = Knots::new(10.0).into();
//! assert!((*wind - 5.14444).abs() < 1e-4);
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Deref, Sub};

/// Compare f64 values with total ordering (NaN sorts above everything)
#[inline]
fn f64_total_cmp(a: f64, b: f64) -> Ordering {
    a.total_cmp(&b)
}

// ============================================================================
// LENGTH
// ============================================================================

/// Length in metres
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Meters(f64);

impl Meters {
    /// Zero length
    pub const ZERO: Meters = Meters(0.0);

    /// Create a new length in metres
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Meters(value)
    }

    /// Raw value in metres
    #[inline]
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl Deref for Meters {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl Eq for Meters {}

impl PartialOrd for Meters {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Meters {
    fn cmp(&self, other: &Self) -> Ordering {
        f64_total_cmp(self.0, other.0)
    }
}

impl Add for Meters {
    type Output = Meters;
    fn add(self, rhs: Meters) -> Meters {
        Meters(self.0 + rhs.0)
    }
}

impl Sub for Meters {
    type Output = Meters;
    fn sub(self, rhs: Meters) -> Meters {
        Meters(self.0 - rhs.0)
    }
}

impl fmt::Display for Meters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} m", self.0)
    }
}

// ============================================================================
// TEMPERATURE
// ============================================================================

/// Celsius to Kelvin conversion offset (0°C = 273.15 K)
const CELSIUS_KELVIN_OFFSET: f64 = 273.15;

/// Temperature in degrees Celsius
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Celsius(f64);

impl Celsius {
    /// Water freezing point
    pub const FREEZING: Celsius = Celsius(0.0);

    /// Create a new Celsius temperature
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Celsius(value)
    }

    /// Convert to Kelvin
    #[inline]
    #[must_use]
    pub fn to_kelvin(self) -> Kelvin {
        Kelvin(self.0 + CELSIUS_KELVIN_OFFSET)
    }
}

impl Deref for Celsius {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl From<Kelvin> for Celsius {
    fn from(k: Kelvin) -> Self {
        k.to_celsius()
    }
}

impl fmt::Display for Celsius {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°C", self.0)
    }
}

/// Absolute temperature in Kelvin
///
/// Stack exit temperatures are carried in Kelvin because that is what the
/// dispersion engine reads from the point-source parameter card.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kelvin(f64);

impl Kelvin {
    /// Create a new Kelvin temperature
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Kelvin(value)
    }

    /// Convert to Celsius
    #[inline]
    #[must_use]
    pub fn to_celsius(self) -> Celsius {
        Celsius(self.0 - CELSIUS_KELVIN_OFFSET)
    }
}

impl Deref for Kelvin {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl From<Celsius> for Kelvin {
    fn from(c: Celsius) -> Self {
        c.to_kelvin()
    }
}

impl fmt::Display for Kelvin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} K", self.0)
    }
}

// ============================================================================
// SPEED
// ============================================================================

/// Metres per second in one knot
const MPS_PER_KNOT: f64 = 0.514444;

/// Speed in metres per second
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct MetersPerSecond(f64);

impl MetersPerSecond {
    /// Create a new speed in m/s
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        MetersPerSecond(value)
    }

    /// Convert to knots
    #[inline]
    #[must_use]
    pub fn to_knots(self) -> Knots {
        Knots(self.0 / MPS_PER_KNOT)
    }
}

impl Deref for MetersPerSecond {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl From<Knots> for MetersPerSecond {
    fn from(k: Knots) -> Self {
        MetersPerSecond(k.0 * MPS_PER_KNOT)
    }
}

impl fmt::Display for MetersPerSecond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} m/s", self.0)
    }
}

/// Speed in knots (upper-air tables carry wind in knots)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Knots(f64);

impl Knots {
    /// Create a new speed in knots
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Knots(value)
    }
}

impl Deref for Knots {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl From<MetersPerSecond> for Knots {
    fn from(v: MetersPerSecond) -> Self {
        v.to_knots()
    }
}

impl fmt::Display for Knots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1} kt", self.0)
    }
}

// ============================================================================
// ANGLE
// ============================================================================

/// Angle in degrees (meteorological wind direction: direction wind blows FROM,
/// clockwise from north)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Degrees(f64);

impl Degrees {
    /// Create a new angle in degrees
    #[inline]
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Degrees(value)
    }

    /// Wrap into the `[0, 360)` range
    #[inline]
    #[must_use]
    pub fn normalized(self) -> Self {
        Degrees(self.0.rem_euclid(360.0))
    }

    /// Convert to radians
    #[inline]
    #[must_use]
    pub fn to_radians(self) -> f64 {
        self.0.to_radians()
    }
}

impl Deref for Degrees {
    type Target = f64;
    #[inline]
    fn deref(&self) -> &f64 {
        &self.0
    }
}

impl fmt::Display for Degrees {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}°", self.0)
    }
}
