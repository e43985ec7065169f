use std::path::PathBuf;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::engine::VOLUMES_DIR;

pub const CONFIG_FILE: &str = "swapshift.toml";
pub const ENV_PREFIX: &str = "SWAPSHIFT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Answer every command from a canned script instead of the host.
    pub simulation: bool,
    pub verbose: bool,
    /// Directory scanned for mounted volumes.
    pub volumes_dir: PathBuf,
    /// Relocation history database.
    pub history_db: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            simulation: false,
            verbose: false,
            volumes_dir: PathBuf::from(VOLUMES_DIR),
            history_db: PathBuf::from("swapshift.db"),
        }
    }
}

impl AppConfig {
    /// Layered load: defaults, then the config file, then `SWAPSHIFT_*`
    /// environment variables, then whatever CLI flags were actually set.
    /// CLI args must serialize only their set fields, so unset flags fall
    /// through to the lower layers.
    pub fn new<A: Serialize>(args: Option<&A>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(args) = args {
            figment = figment.merge(Serialized::defaults(args));
        }

        figment.extract().context("Invalid configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Overrides {
        #[serde(skip_serializing_if = "Option::is_none")]
        simulation: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        history_db: Option<String>,
    }

    #[test]
    fn defaults_point_at_the_standard_mount_table() {
        let config = AppConfig::default();
        assert_eq!(config.volumes_dir, PathBuf::from("/Volumes"));
        assert!(!config.simulation);
    }

    #[test]
    fn set_flags_override_and_unset_flags_fall_through() {
        let overrides = Overrides {
            simulation: Some(true),
            history_db: None,
        };
        let config = AppConfig::new(Some(&overrides)).unwrap();
        assert!(config.simulation);
        assert_eq!(config.history_db, PathBuf::from("swapshift.db"));
    }
}
