//! Core types and utilities

pub mod site;
pub mod units;

pub use site::SiteReference;
pub use units::*;
