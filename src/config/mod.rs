// src/config/mod.rs

//! Configuration discovery.
//!
//! A task's configuration is an executable script on disk. Probing it (see
//! [`loader`]) runs the script with the dump marker set, which makes it
//! print its declared options as a single line of JSON. [`model`] holds the
//! serde model for that line and the resolved form the workspace consumes.

pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{Declaration, TaskConfig};
