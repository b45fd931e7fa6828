//! Configuration for the execution service
//!
//! Settings come from a YAML file whose sections mirror the components:
//! `execution`, `sandbox`, `admission`, `languages` and `logging`. A few
//! operational switches can be overridden from the environment.

pub mod loader;
pub mod types;

pub use loader::*;
pub use types::*;


use crate::errors::SandrunError;
use std::path::Path;

/// Load a configuration from a YAML file
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<SandrunConfig, SandrunError> {
    ConfigLoader::from_file(path).await
}
