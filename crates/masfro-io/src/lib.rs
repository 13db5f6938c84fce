//! # masfro-io: Road Network and Reference Data Import
//!
//! CSV importers that construct [`masfro_core::RoadNetwork`] graphs and
//! evacuation center tables from on-disk data. Importers never abort on a bad
//! record: malformed rows are dropped and reported through
//! [`masfro_core::ImportDiagnostics`] so a partially dirty export still yields
//! a usable network.

pub mod importers;

pub use importers::{load_evacuation_centers, load_road_network};
