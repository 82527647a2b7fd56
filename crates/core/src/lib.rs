//! Plume Core Library
//!
//! Prepares, executes and harvests runs of an external atmospheric
//! dispersion engine and its meteorological preprocessor.
//!
//! ## Pipeline
//!
//! - Emission inventories (point, area and line CSV files with WKT geometry)
//!   are projected into a local UTM plane centred on the site
//! - Sources, receptors, meteorology and outputs are compiled into the
//!   engine's pathway/card control-file format
//! - Hourly surface observations and upper-air soundings are encoded into
//!   the fixed-column files the preprocessor reads
//! - Each run is staged into a sandbox, executed, and judged by the files it
//!   leaves behind

// Core types and utilities
pub mod core_types;

// Geometry and inputs
pub mod inventory;
pub mod projection;

// Control-file compiler and meteorological encoders
pub mod control;
pub mod met;

// Configuration and execution
pub mod config;
pub mod runner;

// Re-export core types
pub use core_types::units::{Celsius, Degrees, Kelvin, Knots, Meters, MetersPerSecond};
pub use core_types::SiteReference;

// Re-export pipeline types
pub use config::{Config, ConfigError};
pub use control::{
    AveragingPeriod, ControlFile, DispersionCompiler, DispersionEnvironment, DispersionSettings, NoxMethod,
    PathwayBlock, PreprocessorCompiler, PreprocessorSettings, ProtocolError, ReceptorGrid, SourceCompiler,
};
pub use inventory::{EmissionSource, Inventory, InventoryError, InventoryLoader, InventoryPaths, SourceId};
pub use met::{HourlyMetRecord, MetError, SoundingRecord, UpperAirEncoder};
pub use projection::{CoordinateProjector, GeoCoord, ProjectionError};
pub use runner::{DataLayout, DispersionRunner, Engine, ExternalEngine, PreprocessorRunner, RunError, RunState};
