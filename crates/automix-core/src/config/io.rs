//! YAML configuration files

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Load a YAML configuration file
///
/// A missing file gives the defaults. An unreadable or unparsable file is
/// logged and also gives the defaults, so a broken config never stops a mix.
/// Types using `#[serde(default)]` accept partial files.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    if !path.exists() {
        log::info!("load_config: {:?} not found, using defaults", path);
        return T::default();
    }

    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            log::warn!("load_config: cannot read {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };
    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("load_config: loaded {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("load_config: invalid config {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write a configuration as YAML, creating parent directories
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
    }
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config to YAML")?;
    std::fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    log::info!("save_config: wrote {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Settings {
        tempo: f64,
        label: String,
    }

    impl Default for Settings {
        fn default() -> Self {
            Self { tempo: 87.5, label: "mix".to_string() }
        }
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let settings: Settings = load_config(Path::new("/nonexistent/automix/config.yaml"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        let settings = Settings { tempo: 174.0, label: "dnb".to_string() };

        save_config(&settings, &path).unwrap();
        let loaded: Settings = load_config(&path);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_and_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        std::fs::write(&path, "tempo: 120.0\n").unwrap();
        let partial: Settings = load_config(&path);
        assert_eq!(partial.tempo, 120.0);
        assert_eq!(partial.label, "mix");

        std::fs::write(&path, "tempo: [not a number\n").unwrap();
        let broken: Settings = load_config(&path);
        assert_eq!(broken, Settings::default());
    }
}
