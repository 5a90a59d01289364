//! Driver session
//!
//! One session is opened per invocation. It owns the backend and the list of
//! active adapters, which defines the user-visible adapter index space, and
//! releases the backend when dropped.

use crate::backend::{AdapterHandle, SharedBackend};
use crate::{OvcError, OvcResult};
use tracing::debug;

pub struct OverdriveSession {
    backend: SharedBackend,
    active: Vec<AdapterHandle>,
}

impl OverdriveSession {
    /// Enumerate the active adapters and take ownership of the backend
    pub fn open(backend: SharedBackend) -> OvcResult<Self> {
        let active = backend.active_adapters()?;
        debug!(count = active.len(), "Overdrive session opened");
        Ok(Self { backend, active })
    }

    pub fn backend(&self) -> &SharedBackend {
        &self.backend
    }

    /// Number of active adapters; valid user indices are `0..active_count()`
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn active_adapters(&self) -> &[AdapterHandle] {
        &self.active
    }

    /// Driver handle for a user-visible adapter index
    pub fn handle(&self, index: usize) -> OvcResult<AdapterHandle> {
        self.active
            .get(index)
            .copied()
            .ok_or(OvcError::AdapterOutOfRange(index))
    }
}

impl Drop for OverdriveSession {
    fn drop(&mut self) {
        self.backend.release();
        debug!("Overdrive session released");
    }
}
