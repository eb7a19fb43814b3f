//! TOML configuration loader.
//!
//! The real configuration source is the router's UCI store, explicitly out
//! of scope (`spec.md` §1: "the configuration loader... supplies a frozen
//! configuration struct"). This is a development stand-in that produces the
//! identical `Config` shape from a TOML file, so the orchestrator never
//! needs to know which loader fed it.

use std::path::Path;

use uplinkd_types::config::ConfigError;
use uplinkd_types::Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("failed to read {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: String, source: Box<toml::de::Error> },
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

pub fn load(path: &Path) -> Result<Config, ConfigLoadError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigLoadError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config: Config = toml::from_str(&text).map_err(|source| ConfigLoadError::Parse {
        path: path.display().to_string(),
        source: Box::new(source),
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load(Path::new("/nonexistent/uplinkd.toml")).unwrap_err();
        assert!(matches!(err, ConfigLoadError::Io { .. }));
    }

    #[test]
    fn empty_document_loads_defaults() {
        let dir = std::env::temp_dir().join(format!("uplinkd-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.toml");
        std::fs::write(&path, "").unwrap();
        let config = load(&path).unwrap();
        assert!(config.members.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
