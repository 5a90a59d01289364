//! Default performance level baselines
//!
//! amdgpu exposes only the current Overdrive table, so the table seen the first
//! time an adapter is encountered is kept on disk and served as its default.

use crate::backend::PerformanceLevel;
use crate::{OvcError, OvcResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub pci_slot: String,
    pub captured_at: DateTime<Utc>,
    pub levels: Vec<PerformanceLevel>,
}

#[derive(Debug, Clone)]
pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, pci_slot: &str) -> PathBuf {
        let key: String = pci_slot
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("baseline-{key}.toml"))
    }

    pub fn load(&self, pci_slot: &str) -> OvcResult<Option<Baseline>> {
        let path = self.path(pci_slot);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        toml::from_str(&content).map(Some).map_err(|e| {
            OvcError::Config(format!("Invalid baseline {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, baseline: &Baseline) -> OvcResult<()> {
        fs::create_dir_all(&self.dir)?;
        let content = toml::to_string_pretty(baseline)
            .map_err(|e| OvcError::Config(format!("Failed to serialize baseline: {}", e)))?;
        fs::write(self.path(&baseline.pci_slot), content)?;
        Ok(())
    }

    /// Stored default table, capturing `current` when none matches its shape
    ///
    /// Storage problems are logged and the current table is returned, so a
    /// read-only state directory never blocks a run.
    pub fn defaults_for(&self, pci_slot: &str, current: &[PerformanceLevel]) -> Vec<PerformanceLevel> {
        match self.load(pci_slot) {
            Ok(Some(baseline)) if baseline.levels.len() == current.len() => {
                return baseline.levels;
            }
            Ok(Some(_)) => warn!("Baseline for {pci_slot} has a different level count, recapturing"),
            Ok(None) => {}
            Err(e) => warn!("Failed to load baseline for {pci_slot}: {e}"),
        }

        let baseline = Baseline {
            pci_slot: pci_slot.to_string(),
            captured_at: Utc::now(),
            levels: current.to_vec(),
        };
        match self.save(&baseline) {
            Ok(()) => info!("Captured default performance levels for {pci_slot}"),
            Err(e) => warn!("Failed to store baseline for {pci_slot}: {e}"),
        }
        baseline.levels
    }
}
