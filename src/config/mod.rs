// src/config/mod.rs

//! Configuration loading and validation for loaddag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Parse durations and logical dates (`values.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate settings and build the DAG (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;
pub mod values;

pub use loader::{load_and_validate, load_from_path};
pub use model::{ConfigFile, CredentialsSection, RawConfigFile, RunSettings, WarehouseSettings};
pub use values::{parse_duration, parse_logical_date};
