//! Configuration management for hostwarden services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables: `HOSTWARDEN_<SECTION>__<KEY>`, e.g.
//!    `HOSTWARDEN_DISCOVER__POLL_INTERVAL_SECS=30`
//! 2. Config file (`hostwarden.toml` by default)
//! 3. Defaults

use serde::de::DeserializeOwned;

use crate::error::WardenError;

/// Default config file prefix (`hostwarden.toml`, `hostwarden.yaml`, ...).
pub const DEFAULT_FILE_PREFIX: &str = "hostwarden";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HOSTWARDEN";

/// Build the layered configuration for the given file prefix.
pub fn load(file_prefix: &str) -> Result<config::Config, WardenError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(cfg)
}

/// Deserialize one `[section]` of the configuration.
///
/// A missing section yields `T::default()`; a present but malformed
/// section is an error.
pub fn section<T>(cfg: &config::Config, name: &str) -> Result<T, WardenError>
where
    T: DeserializeOwned + Default,
{
    match cfg.get::<T>(name) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => Ok(T::default()),
        Err(e) => Err(WardenError::Config(format!("[{name}]: {e}"))),
    }
}

/// Load a single section straight from a file prefix.
pub fn load_section<T>(file_prefix: &str, name: &str) -> Result<T, WardenError>
where
    T: DeserializeOwned + Default,
{
    let cfg = load(file_prefix)?;
    section(&cfg, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default = "default_interval")]
        interval_secs: u64,
        #[serde(default)]
        name: String,
    }

    fn default_interval() -> u64 {
        15
    }

    impl Default for Sample {
        fn default() -> Self {
            Self {
                interval_secs: default_interval(),
                name: String::new(),
            }
        }
    }

    #[test]
    fn missing_file_and_section_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");
        let sample: Sample = load_section(prefix.to_str().unwrap(), "sample").unwrap();
        assert_eq!(sample, Sample::default());
    }

    #[test]
    fn section_is_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hw.toml");
        std::fs::write(&path, "[sample]\ninterval_secs = 60\nname = \"lab\"\n").unwrap();

        let prefix = dir.path().join("hw");
        let sample: Sample = load_section(prefix.to_str().unwrap(), "sample").unwrap();
        assert_eq!(sample.interval_secs, 60);
        assert_eq!(sample.name, "lab");
    }

    #[test]
    fn environment_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hw.toml"), "[envsample]\ninterval_secs = 60\n").unwrap();

        std::env::set_var("HOSTWARDEN_ENVSAMPLE__INTERVAL_SECS", "90");
        std::env::set_var("HOSTWARDEN__ENVSAMPLE__NAME", "ignored");
        let prefix = dir.path().join("hw");
        let sample: Result<Sample, _> = load_section(prefix.to_str().unwrap(), "envsample");
        std::env::remove_var("HOSTWARDEN_ENVSAMPLE__INTERVAL_SECS");
        std::env::remove_var("HOSTWARDEN__ENVSAMPLE__NAME");

        let sample = sample.unwrap();
        assert_eq!(sample.interval_secs, 90);
        assert_eq!(sample.name, "");
    }
}
