//! Local services: host inspection and script persistence.

pub mod script_store;
pub mod system_info;

pub use script_store::{extract_scripts, NewScript, ScriptStore};
pub use system_info::describe_host;
