//! Applying validated parameters
//!
//! Requests are merged into one [`MutationPlan`] per active adapter. Fan speed and
//! power control keep the last request per adapter; clock and voltage requests
//! edit a copy of the adapter's level table, which is written back whole.

use crate::backend::PerformanceLevel;
use crate::param::{FieldKind, ParamRequest, ParamValue, SubIndex};
use crate::session::OverdriveSession;
use crate::validation::{CapabilitySnapshot, ValidatedBatch};
use crate::OvcResult;
use std::fmt;
use tracing::{debug, info, warn};

/// Pending changes for one active adapter
#[derive(Debug, Clone, PartialEq)]
pub struct MutationPlan {
    pub fan_speed: Option<ParamValue>,
    pub power_control: Option<ParamValue>,
    pub levels: Vec<PerformanceLevel>,
    pub changed: bool,
}

/// Human-readable description of one requested change
#[derive(Debug, Clone, PartialEq)]
pub struct Announcement {
    pub field: FieldKind,
    pub adapter: usize,
    /// Thermal controller for fan/power, performance level otherwise
    pub slot: i64,
    pub value: ParamValue,
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Setting {} to ", self.field)?;
        match (self.value, self.field) {
            (ParamValue::Default, _) => write!(f, "default")?,
            (ParamValue::Value(v), FieldKind::PowerControl) => write!(f, "{v:+}%")?,
            (ParamValue::Value(v), field) if field.is_thermal() => write!(f, "{v}%")?,
            (ParamValue::Value(v), field) => write!(f, "{v} {}", field.unit())?,
        }
        if self.field.is_thermal() {
            write!(f, " for adapter {} at thermal controller {}", self.adapter, self.slot)
        } else {
            write!(f, " for adapter {} at performance level {}", self.adapter, self.slot)
        }
    }
}

/// Merged mutations for every active adapter of a validated batch
#[derive(Debug, Clone)]
pub struct ApplyPlan {
    plans: Vec<MutationPlan>,
    announcements: Vec<Announcement>,
    warnings: Vec<String>,
}

impl ApplyPlan {
    /// Merge the requests of a validated batch
    pub fn build(batch: ValidatedBatch) -> Self {
        let (snapshot, requests) = batch.into_parts();
        let announcements = announce(&snapshot, &requests);

        let mut plans: Vec<MutationPlan> = snapshot
            .adapters
            .iter()
            .map(|a| MutationPlan {
                fan_speed: None,
                power_control: None,
                levels: a.levels.clone(),
                changed: false,
            })
            .collect();
        let active_count = plans.len();

        for request in requests.iter().filter(|r| r.field.is_thermal()) {
            for index in request.adapters.iter(active_count) {
                let plan = &mut plans[index];
                match request.field {
                    FieldKind::FanSpeed => plan.fan_speed = Some(request.value),
                    _ => plan.power_control = Some(request.value),
                }
            }
        }

        let mut warnings = Vec::new();
        for request in requests.iter().filter(|r| !r.field.is_thermal()) {
            for index in request.adapters.iter(active_count) {
                let adapter = &snapshot.adapters[index];
                let Some(level) = request.sub_index.resolve(adapter.level_count()) else {
                    continue;
                };
                let plan = &mut plans[index];
                let default = &adapter.default_levels[level];
                let target = &mut plan.levels[level];
                match (request.field, request.value) {
                    (FieldKind::CoreClock, ParamValue::Default) => {
                        target.engine_clock = default.engine_clock
                    }
                    (FieldKind::CoreClock, ParamValue::Value(v)) => {
                        target.engine_clock = FieldKind::CoreClock.to_raw(v)
                    }
                    (FieldKind::MemoryClock, ParamValue::Default) => {
                        target.memory_clock = default.memory_clock
                    }
                    (FieldKind::MemoryClock, ParamValue::Value(v)) => {
                        target.memory_clock = FieldKind::MemoryClock.to_raw(v)
                    }
                    (FieldKind::VddcVoltage, ParamValue::Default) => target.vddc = default.vddc,
                    (FieldKind::VddcVoltage, ParamValue::Value(_)) if target.vddc == 0 => {
                        warn!(adapter = index, level, "Vddc not supported at this level");
                        warnings.push(format!("Voltage for adapter {index} is not set!"));
                    }
                    (FieldKind::VddcVoltage, ParamValue::Value(v)) => {
                        target.vddc = FieldKind::VddcVoltage.to_raw(v)
                    }
                    _ => {}
                }
                plan.changed = true;
            }
        }

        Self {
            plans,
            announcements,
            warnings,
        }
    }

    /// One line per request and adapter: fan speed, then power control, then clocks and voltage
    pub fn announcements(&self) -> &[Announcement] {
        &self.announcements
    }

    /// Non-fatal problems found while merging
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn plans(&self) -> &[MutationPlan] {
        &self.plans
    }

    /// Issue every write: fan speeds, power controls, then one level table per changed adapter
    ///
    /// A driver failure stops immediately; writes already issued are not rolled back.
    pub fn execute(&self, session: &OverdriveSession) -> OvcResult<()> {
        let backend = session.backend();

        for (index, plan) in self.plans.iter().enumerate() {
            let Some(value) = plan.fan_speed else { continue };
            let handle = session.handle(index)?;
            match value {
                ParamValue::Value(v) => {
                    backend.set_fan_speed(handle, 0, FieldKind::FanSpeed.to_raw(v))?
                }
                ParamValue::Default => backend.set_fan_speed_to_default(handle, 0)?,
            }
            debug!(adapter = index, "Fan speed written");
        }

        for (index, plan) in self.plans.iter().enumerate() {
            let Some(value) = plan.power_control else { continue };
            let handle = session.handle(index)?;
            let percent = match value {
                ParamValue::Value(v) => FieldKind::PowerControl.to_raw(v),
                ParamValue::Default => backend.power_control(handle)?.1,
            };
            backend.set_power_control(handle, percent)?;
            debug!(adapter = index, percent, "Power control written");
        }

        for (index, plan) in self.plans.iter().enumerate().filter(|(_, p)| p.changed) {
            let handle = session.handle(index)?;
            backend.set_performance_levels(handle, &plan.levels)?;
            debug!(adapter = index, levels = plan.levels.len(), "Performance levels written");
        }

        info!(adapters = self.plans.len(), "Overdrive parameters applied");
        Ok(())
    }
}

fn announce(snapshot: &CapabilitySnapshot, requests: &[ParamRequest]) -> Vec<Announcement> {
    let active_count = snapshot.active_count();
    let mut announcements = Vec::new();
    for field in [FieldKind::FanSpeed, FieldKind::PowerControl] {
        for request in requests.iter().filter(|r| r.field == field) {
            let slot = match request.sub_index {
                SubIndex::Index(i) => i,
                SubIndex::LastLevel => 0,
            };
            announcements.extend(request.adapters.iter(active_count).map(|adapter| {
                Announcement {
                    field,
                    adapter,
                    slot,
                    value: request.value,
                }
            }));
        }
    }
    for request in requests.iter().filter(|r| !r.field.is_thermal()) {
        for adapter in request.adapters.iter(active_count) {
            let level_count = snapshot.adapters[adapter].level_count();
            let Some(level) = request.sub_index.resolve(level_count) else {
                continue;
            };
            announcements.push(Announcement {
                field: request.field,
                adapter,
                slot: level as i64,
                value: request.value,
            });
        }
    }
    announcements
}
