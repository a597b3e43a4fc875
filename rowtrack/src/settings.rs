use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct EngineSettings {
    pub tracking: TrackingSettings,
    pub hydration: HydrationSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrackingSettings {
    /// When off, every row produces a fresh untracked instance.
    pub enabled: bool,
    /// Sweep released handles after this many creations per type, 0 disables the sweep.
    pub prune_every: usize,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self { enabled: true, prune_every: 1024 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HydrationSettings {
    /// Fall back to ASCII case-insensitive matching when no column has the exact field name.
    pub case_insensitive_columns: bool,
}

impl Default for HydrationSettings {
    fn default() -> Self {
        Self { case_insensitive_columns: true }
    }
}

impl EngineSettings {
    /// Loads `path` (any format the config crate recognizes by extension), overridden by `ROWTRACK__*` env vars.
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(true))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Config::builder().add_source(File::from_str(source, FileFormat::Toml)).build()?.try_deserialize()
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder().add_source(Self::environment()).build()?.try_deserialize()
    }

    fn environment() -> Environment {
        Environment::with_prefix("ROWTRACK").prefix_separator("__").try_parsing(true).separator("__")
    }
}

#[cfg(test)]
mod settings_tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let settings = EngineSettings::from_toml("[tracking]\nprune_every = 16\n").unwrap();
        assert!(settings.tracking.enabled);
        assert_eq!(settings.tracking.prune_every, 16);
        assert!(settings.hydration.case_insensitive_columns);
    }

    #[test]
    fn every_knob_can_be_set() {
        let settings = EngineSettings::from_toml(
            "[tracking]\nenabled = false\nprune_every = 0\n\n[hydration]\ncase_insensitive_columns = false\n",
        )
        .unwrap();
        assert!(!settings.tracking.enabled);
        assert_eq!(settings.tracking.prune_every, 0);
        assert!(!settings.hydration.case_insensitive_columns);
    }

    #[test]
    fn wrong_types_are_reported() {
        assert!(EngineSettings::from_toml("[tracking]\nprune_every = \"often\"\n").is_err());
    }
}
