use std::fs;
use std::path::Path;

use super::parser;
use super::Config;
use crate::error::ConfigError;

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    parser::parse_config(&content, &base_dir)
}
