use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

/// Environment variable overriding `drm_root`
pub const DRM_ROOT_ENV: &str = "AMDOVC_DRM_ROOT";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the `cardN` DRM entries
    pub drm_root: PathBuf,
    /// Where default performance level baselines are kept
    pub state_dir: Option<PathBuf>,
    /// Print the safety notice before applying parameters
    pub show_notice: bool,
    /// Verbose reports and debug logging without `--verbose`
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            drm_root: PathBuf::from("/sys/class/drm"),
            state_dir: None,
            show_notice: true,
            verbose: false,
        }
    }
}

impl Config {
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        if let Some(root) = std::env::var_os(DRM_ROOT_ENV) {
            config.drm_root = PathBuf::from(root);
        }
        config
    }

    /// Read a config file, falling back to defaults when it is missing or invalid
    pub fn load_from(path: &std::path::Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => warn!("Failed to parse config {}: {e}", path.display()),
                },
                Err(e) => warn!("Failed to read config {}: {e}", path.display()),
            }
        }
        Self::default()
    }

    /// Baseline directory, the project data dir unless configured
    pub fn state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("amdovc_state"))
    }

    fn config_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "amdovc", "amdovc")
}
