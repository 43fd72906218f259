//! Small helpers shared by DAG-generation tooling around the orchestrator.

mod config_files;
mod schema_type;

pub use config_files::{DEFAULT_CONFIG_PATTERN, find_config_files, glob_to_regex};
pub use schema_type::parsed_schema_type;
