//! Data structures for probe data.
//!
//! This module contains the measurement record delivered to listeners and
//! the catalogue of sensors it can carry.

pub mod measurement;
pub mod sensor;

pub use measurement::MeasurementRecord;
pub use sensor::SensorKind;
