/// Runtime configuration snapshot and its JSON file source
pub mod source;

pub use source::{Config, ConfigSource, JsonConfigFile, DEFAULT_VHOST_DIR};
