//! Parameter validation
//!
//! Every request of a batch is checked against one capability snapshot before
//! anything is written. All problems are collected so the user sees them at
//! once; a single failure rejects the whole batch.

use crate::backend::{AdapterCapability, AdapterHandle, OdRange, PerformanceLevel};
use crate::param::{FieldKind, ParamRequest, ParamValue, SubIndex};
use crate::session::OverdriveSession;
use crate::{OvcError, OvcResult};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Allowed power control range in percent.
///
/// This is a safety policy, narrower than what most hardware reports, and it
/// is enforced regardless of the adapter's own bounds.
pub const POWER_CONTROL_POLICY: (f64, f64) = (-50.0, 20.0);

/// Allowed fan speed range in percent
pub const FAN_SPEED_RANGE: (f64, f64) = (0.0, 100.0);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Some adapter indices out of range in '{token}'")]
    AdapterOutOfRange { token: String, index: usize },
    #[error("Thermal Control Index is not 0 in '{token}'")]
    ThermalIndexNotZero { token: String },
    #[error("Performance level out of range in '{token}' for adapter {adapter}")]
    LevelOutOfRange { token: String, adapter: usize },
    #[error("{field} value out of range in '{token}' (allowed {min} - {max})")]
    ValueOutOfRange {
        token: String,
        field: FieldKind,
        adapter: Option<usize>,
        min: f64,
        max: f64,
    },
}

impl ValidationError {
    pub fn token(&self) -> &str {
        match self {
            ValidationError::AdapterOutOfRange { token, .. }
            | ValidationError::ThermalIndexNotZero { token }
            | ValidationError::LevelOutOfRange { token, .. }
            | ValidationError::ValueOutOfRange { token, .. } => token,
        }
    }
}

/// Every problem found in a rejected batch
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for error in &self.errors {
            writeln!(f, "{error}")?;
        }
        write!(f, "No settings applied: {} error(s) in parameters", self.errors.len())
    }
}

impl std::error::Error for ValidationReport {}

/// Capability and level tables of one active adapter
#[derive(Debug, Clone)]
pub struct AdapterSnapshot {
    pub handle: AdapterHandle,
    pub capability: AdapterCapability,
    pub levels: Vec<PerformanceLevel>,
    pub default_levels: Vec<PerformanceLevel>,
}

impl AdapterSnapshot {
    pub fn level_count(&self) -> usize {
        self.capability.level_count
    }

    /// Reported range for a clock or voltage field
    pub fn range(&self, field: FieldKind) -> Option<OdRange> {
        match field {
            FieldKind::CoreClock => Some(self.capability.engine_clock),
            FieldKind::MemoryClock => Some(self.capability.memory_clock),
            FieldKind::VddcVoltage => Some(self.capability.vddc),
            FieldKind::FanSpeed | FieldKind::PowerControl => None,
        }
    }
}

/// State of every active adapter, taken once before validation
#[derive(Debug, Clone)]
pub struct CapabilitySnapshot {
    pub adapters: Vec<AdapterSnapshot>,
}

impl CapabilitySnapshot {
    /// Query every active adapter of the session up front
    pub fn capture(session: &OverdriveSession) -> OvcResult<Self> {
        let backend = session.backend();
        let mut adapters = Vec::with_capacity(session.active_count());
        for &handle in session.active_adapters() {
            let capability = backend.capability(handle)?;
            let levels = backend.performance_levels(handle, false)?;
            let default_levels = backend.performance_levels(handle, true)?;
            if levels.len() != capability.level_count
                || default_levels.len() != capability.level_count
            {
                return Err(OvcError::Backend(format!(
                    "Adapter {} reported {} performance levels but returned {} current and {} default",
                    handle.0,
                    capability.level_count,
                    levels.len(),
                    default_levels.len()
                )));
            }
            debug!(
                adapter = handle.0,
                levels = capability.level_count,
                "Captured adapter capability"
            );
            adapters.push(AdapterSnapshot {
                handle,
                capability,
                levels,
                default_levels,
            });
        }
        Ok(Self { adapters })
    }

    pub fn active_count(&self) -> usize {
        self.adapters.len()
    }
}

/// Requests that passed validation together with the snapshot they were checked against
#[derive(Debug, Clone)]
pub struct ValidatedBatch {
    snapshot: CapabilitySnapshot,
    requests: Vec<ParamRequest>,
}

impl ValidatedBatch {
    pub fn snapshot(&self) -> &CapabilitySnapshot {
        &self.snapshot
    }

    pub fn requests(&self) -> &[ParamRequest] {
        &self.requests
    }

    pub fn into_parts(self) -> (CapabilitySnapshot, Vec<ParamRequest>) {
        (self.snapshot, self.requests)
    }
}

/// Validate a whole batch of requests
pub fn validate(
    snapshot: CapabilitySnapshot,
    requests: Vec<ParamRequest>,
) -> Result<ValidatedBatch, ValidationReport> {
    let errors = check_requests(&snapshot, &requests);
    if errors.is_empty() {
        Ok(ValidatedBatch { snapshot, requests })
    } else {
        Err(ValidationReport { errors })
    }
}

fn check_requests(snapshot: &CapabilitySnapshot, requests: &[ParamRequest]) -> Vec<ValidationError> {
    let active_count = snapshot.active_count();
    let mut errors = Vec::new();

    for request in requests {
        if let Some(index) = request.adapters.first_out_of_range(active_count) {
            errors.push(ValidationError::AdapterOutOfRange {
                token: request.text.clone(),
                index,
            });
        }
    }

    for field in [FieldKind::FanSpeed, FieldKind::PowerControl] {
        for request in requests.iter().filter(|r| r.field == field) {
            check_thermal(request, &mut errors);
        }
    }

    for request in requests.iter().filter(|r| !r.field.is_thermal()) {
        for index in request.adapters.iter(active_count) {
            // already reported above
            let Some(adapter) = snapshot.adapters.get(index) else {
                continue;
            };
            check_level(request, index, adapter, &mut errors);
        }
    }

    errors
}

fn check_thermal(request: &ParamRequest, errors: &mut Vec<ValidationError>) {
    if request.sub_index != SubIndex::Index(0) {
        errors.push(ValidationError::ThermalIndexNotZero {
            token: request.text.clone(),
        });
    }
    let (min, max) = match request.field {
        FieldKind::PowerControl => POWER_CONTROL_POLICY,
        _ => FAN_SPEED_RANGE,
    };
    if let ParamValue::Value(value) = request.value {
        if value < min || value > max {
            errors.push(ValidationError::ValueOutOfRange {
                token: request.text.clone(),
                field: request.field,
                adapter: None,
                min,
                max,
            });
        }
    }
}

fn check_level(
    request: &ParamRequest,
    index: usize,
    adapter: &AdapterSnapshot,
    errors: &mut Vec<ValidationError>,
) {
    if request.sub_index.resolve(adapter.level_count()).is_none() {
        errors.push(ValidationError::LevelOutOfRange {
            token: request.text.clone(),
            adapter: index,
        });
        return;
    }

    let (ParamValue::Value(value), Some(range)) = (request.value, adapter.range(request.field))
    else {
        return;
    };
    let min = request.field.from_raw(range.min);
    let max = request.field.from_raw(range.max);
    if value < min || value > max {
        errors.push(ValidationError::ValueOutOfRange {
            token: request.text.clone(),
            field: request.field,
            adapter: Some(index),
            min,
            max,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::param::parse_param;

    fn snapshot(count: usize) -> CapabilitySnapshot {
        let levels = vec![
            PerformanceLevel { engine_clock: 30000, memory_clock: 15000, vddc: 800 },
            PerformanceLevel { engine_clock: 110000, memory_clock: 125000, vddc: 1150 },
        ];
        let adapters = (0..count)
            .map(|i| AdapterSnapshot {
                handle: AdapterHandle(i as u32),
                capability: AdapterCapability {
                    level_count: levels.len(),
                    engine_clock: OdRange { min: 30000, max: 150000, step: 100 },
                    memory_clock: OdRange { min: 15000, max: 200000, step: 100 },
                    vddc: OdRange { min: 750, max: 1200, step: 1 },
                },
                levels: levels.clone(),
                default_levels: levels.clone(),
            })
            .collect();
        CapabilitySnapshot { adapters }
    }

    fn run(count: usize, tokens: &[&str]) -> Result<ValidatedBatch, ValidationReport> {
        let requests = tokens.iter().map(|t| parse_param(t).unwrap()).collect();
        validate(snapshot(count), requests)
    }

    #[test]
    fn test_valid_batch() {
        let batch = run(
            2,
            &["coreclk:1=900", "memclk:all:0=150", "vcore::0=0.81", "fanspeed=50", "pwrctrl=-50"],
        )
        .unwrap();
        assert_eq!(batch.requests().len(), 5);
        assert_eq!(batch.snapshot().active_count(), 2);
    }

    #[test]
    fn test_adapter_out_of_range() {
        let report = run(2, &["coreclk:1-3=900"]).unwrap_err();
        assert_eq!(
            report.errors,
            vec![ValidationError::AdapterOutOfRange {
                token: "coreclk:1-3=900".to_string(),
                index: 2
            }]
        );
    }

    #[test]
    fn test_thermal_index_must_be_zero() {
        let report = run(1, &["fanspeed:0:1=50"]).unwrap_err();
        assert!(matches!(
            report.errors[0],
            ValidationError::ThermalIndexNotZero { .. }
        ));
    }

    #[test]
    fn test_power_control_policy_clamp() {
        let report = run(1, &["pwrctrl=25"]).unwrap_err();
        assert!(matches!(
            report.errors[0],
            ValidationError::ValueOutOfRange { field: FieldKind::PowerControl, .. }
        ));
        assert!(run(1, &["pwrctrl=20", "pwrctrl=-50", "pwrctrl=default"]).is_ok());
        assert!(run(1, &["pwrctrl=-50.5"]).is_err());
    }

    #[test]
    fn test_fan_speed_range() {
        assert!(run(1, &["fanspeed=100", "fanspeed=0"]).is_ok());
        assert!(run(1, &["fanspeed=100.1"]).is_err());
        assert!(run(1, &["fanspeed=-1"]).is_err());
    }

    #[test]
    fn test_level_and_value_ranges() {
        let report = run(2, &["coreclk:all:2=900"]).unwrap_err();
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| matches!(e, ValidationError::LevelOutOfRange { .. })));

        assert!(run(1, &["coreclk=1500", "coreclk=300"]).is_ok());
        assert!(run(1, &["coreclk=1500.01"]).is_err());
        assert!(run(1, &["memclk=2000.5"]).is_err());
        assert!(run(1, &["vcore=1.2", "vcore=0.75"]).is_ok());
        assert!(run(1, &["vcore=1.201"]).is_err());
        assert!(run(1, &["vcore:0:-1=1.0"]).is_err());
        assert!(run(1, &["coreclk=default", "vcore:0:1=default"]).is_ok());
    }

    #[test]
    fn test_collects_every_failure() {
        let report = run(
            1,
            &["coreclk:5=900", "fanspeed:0:2=150", "vcore=2.0", "memclk=1000"],
        )
        .unwrap_err();
        let tokens: Vec<&str> = report.errors.iter().map(|e| e.token()).collect();
        assert_eq!(tokens, vec!["coreclk:5=900", "fanspeed:0:2=150", "fanspeed:0:2=150", "vcore=2.0"]);
        assert!(report.to_string().contains("4 error(s)"));
    }

    #[test]
    fn test_no_adapters() {
        let report = run(0, &["fanspeed=50"]).unwrap_err();
        assert!(matches!(report.errors[0], ValidationError::AdapterOutOfRange { index: 0, .. }));
        assert!(run(0, &["coreclk:all=900"]).is_ok());
    }
}
