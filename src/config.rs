//! Server settings: YAML file, then command-line / environment overrides.

use crate::error::Result;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub listen: SocketAddr,
    pub database: PathBuf,
    pub seed_csv: PathBuf,
    /// Holds `mocks.json` and `mock_data/`.
    pub mocks_dir: PathBuf,
    pub request_log_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            database: PathBuf::from("data.db"),
            seed_csv: PathBuf::from("fixtures/fake_users.csv"),
            mocks_dir: PathBuf::from("."),
            request_log_capacity: 1000,
        }
    }
}

/// Values given on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<SocketAddr>,
    pub database: Option<PathBuf>,
    pub seed_csv: Option<PathBuf>,
    pub mocks_dir: Option<PathBuf>,
}

impl Settings {
    pub fn from_yaml(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn load(path: Option<&Path>, overrides: Overrides) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_yaml(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };
        settings.apply(overrides);
        Ok(settings)
    }

    fn apply(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(database) = overrides.database {
            self.database = database;
        }
        if let Some(seed_csv) = overrides.seed_csv {
            self.seed_csv = seed_csv;
        }
        if let Some(mocks_dir) = overrides.mocks_dir {
            self.mocks_dir = mocks_dir;
        }
    }
}
