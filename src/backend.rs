//! Overdrive Backend Abstraction
//!
//! Provides a trait-based abstraction over the driver interface for testability.
//! The real implementation lives in `sysfs_backend`; the mock implementation
//! returns configurable data and records every mutation in call order.

use crate::{OvcError, OvcResult};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Driver-side identifier of an active adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdapterHandle(pub u32);

/// One performance level in raw driver units
///
/// Clocks are in 1/100 MHz, Vddc in mV.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerformanceLevel {
    pub engine_clock: i32,
    pub memory_clock: i32,
    pub vddc: i32,
}

/// Supported range of a single Overdrive setting, raw units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OdRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

/// Overdrive capabilities reported for one adapter
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterCapability {
    pub level_count: usize,
    pub engine_clock: OdRange,
    pub memory_clock: OdRange,
    pub vddc: OdRange,
}

/// Static adapter description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor_id: u32,
    pub bus: u32,
    pub device: u32,
    pub function: u32,
}

/// Current activity snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Activity {
    pub engine_clock: i32,
    pub memory_clock: i32,
    pub vddc: i32,
    pub activity_percent: i32,
    pub current_level: i32,
    pub bus_speed: i32,
    pub bus_lanes: i32,
}

/// Fan limits for a thermal controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanSpeedInfo {
    pub min_percent: i32,
    pub max_percent: i32,
    pub min_rpm: i32,
    pub max_rpm: i32,
}

/// Hardware-reported power control range in percent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerControlInfo {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

/// Driver operations the parser, validator and orchestrator depend on
pub trait OverdriveBackend {
    /// Active adapters in addressing order
    fn active_adapters(&self) -> OvcResult<Vec<AdapterHandle>>;

    /// Level count and Overdrive ranges
    fn capability(&self, adapter: AdapterHandle) -> OvcResult<AdapterCapability>;

    /// Current (or default) performance level table
    fn performance_levels(
        &self,
        adapter: AdapterHandle,
        default: bool,
    ) -> OvcResult<Vec<PerformanceLevel>>;

    /// Replace the whole performance level table
    fn set_performance_levels(
        &self,
        adapter: AdapterHandle,
        levels: &[PerformanceLevel],
    ) -> OvcResult<()>;

    fn set_fan_speed(&self, adapter: AdapterHandle, thermal: u32, percent: i32) -> OvcResult<()>;

    /// Hand the fan back to automatic control
    fn set_fan_speed_to_default(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<()>;

    /// Power control `(current, default)` in percent
    fn power_control(&self, adapter: AdapterHandle) -> OvcResult<(i32, i32)>;

    fn set_power_control(&self, adapter: AdapterHandle, percent: i32) -> OvcResult<()>;

    // =========================================================================
    // Report queries
    // =========================================================================

    fn adapter_info(&self, adapter: AdapterHandle) -> OvcResult<AdapterInfo>;

    fn current_activity(&self, adapter: AdapterHandle) -> OvcResult<Activity>;

    /// Temperature in millidegrees Celsius
    fn temperature(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<i32>;

    /// Fan speed in percent
    fn fan_speed(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<i32>;

    fn fan_speed_info(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<FanSpeedInfo>;

    fn power_control_info(&self, adapter: AdapterHandle) -> OvcResult<PowerControlInfo>;

    /// Release driver resources; called once when the session ends
    fn release(&self) {}
}

/// Shared backend type
pub type SharedBackend = Arc<dyn OverdriveBackend>;

/// Mutation recorded by [`MockOverdriveBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    SetFanSpeed { adapter: AdapterHandle, percent: i32 },
    SetFanSpeedToDefault { adapter: AdapterHandle },
    SetPowerControl { adapter: AdapterHandle, percent: i32 },
    SetPerformanceLevels { adapter: AdapterHandle, levels: Vec<PerformanceLevel> },
}

/// Mock backend for testing
#[derive(Debug, Default)]
pub struct MockOverdriveBackend {
    pub adapters: Vec<MockAdapter>,
    calls: Mutex<Vec<MockCall>>,
    released: Mutex<bool>,
    fail_writes: bool,
}

#[derive(Debug, Clone)]
pub struct MockAdapter {
    pub handle: AdapterHandle,
    /// Inactive adapters are hidden from `active_adapters`
    pub active: bool,
    pub info: AdapterInfo,
    pub capability: AdapterCapability,
    pub levels: Vec<PerformanceLevel>,
    pub default_levels: Vec<PerformanceLevel>,
    pub power_control: (i32, i32),
    pub power_control_info: PowerControlInfo,
    pub activity: Activity,
    pub temperature: i32,
    pub fan_speed: i32,
    pub fan_speed_info: FanSpeedInfo,
}

impl Default for MockAdapter {
    fn default() -> Self {
        let levels = vec![
            PerformanceLevel { engine_clock: 30000, memory_clock: 15000, vddc: 800 },
            PerformanceLevel { engine_clock: 60000, memory_clock: 125000, vddc: 950 },
            PerformanceLevel { engine_clock: 110000, memory_clock: 125000, vddc: 1150 },
        ];
        Self {
            handle: AdapterHandle(0),
            active: true,
            info: AdapterInfo {
                name: "Mock Radeon RX 480".to_string(),
                vendor_id: 0x1002,
                bus: 1,
                device: 0,
                function: 0,
            },
            capability: AdapterCapability {
                level_count: levels.len(),
                engine_clock: OdRange { min: 30000, max: 150000, step: 100 },
                memory_clock: OdRange { min: 15000, max: 200000, step: 100 },
                vddc: OdRange { min: 750, max: 1200, step: 1 },
            },
            default_levels: levels.clone(),
            levels,
            power_control: (0, 0),
            power_control_info: PowerControlInfo { min: -50, max: 50, step: 1 },
            activity: Activity {
                engine_clock: 110000,
                memory_clock: 125000,
                vddc: 1150,
                activity_percent: 97,
                current_level: 2,
                bus_speed: 8000,
                bus_lanes: 16,
            },
            temperature: 64000,
            fan_speed: 45,
            fan_speed_info: FanSpeedInfo {
                min_percent: 0,
                max_percent: 100,
                min_rpm: 0,
                max_rpm: 3200,
            },
        }
    }
}

impl MockOverdriveBackend {
    /// Create a mock with a single default adapter
    pub fn single_adapter() -> Self {
        Self::multi_adapter(1)
    }

    /// Create a mock with several active adapters
    pub fn multi_adapter(count: u32) -> Self {
        let adapters = (0..count)
            .map(|i| MockAdapter {
                handle: AdapterHandle(i),
                info: AdapterInfo {
                    name: format!("Mock Radeon {}", i),
                    vendor_id: 0x1002,
                    bus: i + 1,
                    device: 0,
                    function: 0,
                },
                temperature: 60000 + i as i32 * 2000,
                ..MockAdapter::default()
            })
            .collect();
        Self {
            adapters,
            ..Self::default()
        }
    }

    /// Create a mock from explicit adapters, active or not
    pub fn with_adapters(adapters: Vec<MockAdapter>) -> Self {
        Self {
            adapters,
            ..Self::default()
        }
    }

    /// Make every mutating call fail
    pub fn failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Mutations issued so far, in call order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn is_released(&self) -> bool {
        self.released.lock().map(|r| *r).unwrap_or(false)
    }

    fn get_adapter(&self, adapter: AdapterHandle) -> OvcResult<&MockAdapter> {
        self.adapters
            .iter()
            .find(|a| a.handle == adapter)
            .ok_or_else(|| OvcError::Backend(format!("No adapter with handle {}", adapter.0)))
    }

    fn record(&self, adapter: AdapterHandle, call: MockCall) -> OvcResult<()> {
        self.get_adapter(adapter)?;
        if self.fail_writes {
            return Err(OvcError::Backend("Mock write failure".to_string()));
        }
        self.calls
            .lock()
            .map_err(|_| OvcError::Backend("Lock poisoned".to_string()))?
            .push(call);
        Ok(())
    }
}

impl OverdriveBackend for MockOverdriveBackend {
    fn active_adapters(&self) -> OvcResult<Vec<AdapterHandle>> {
        Ok(self
            .adapters
            .iter()
            .filter(|a| a.active)
            .map(|a| a.handle)
            .collect())
    }

    fn capability(&self, adapter: AdapterHandle) -> OvcResult<AdapterCapability> {
        Ok(self.get_adapter(adapter)?.capability.clone())
    }

    fn performance_levels(
        &self,
        adapter: AdapterHandle,
        default: bool,
    ) -> OvcResult<Vec<PerformanceLevel>> {
        let a = self.get_adapter(adapter)?;
        Ok(if default {
            a.default_levels.clone()
        } else {
            a.levels.clone()
        })
    }

    fn set_performance_levels(
        &self,
        adapter: AdapterHandle,
        levels: &[PerformanceLevel],
    ) -> OvcResult<()> {
        self.record(
            adapter,
            MockCall::SetPerformanceLevels {
                adapter,
                levels: levels.to_vec(),
            },
        )
    }

    fn set_fan_speed(&self, adapter: AdapterHandle, _thermal: u32, percent: i32) -> OvcResult<()> {
        self.record(adapter, MockCall::SetFanSpeed { adapter, percent })
    }

    fn set_fan_speed_to_default(&self, adapter: AdapterHandle, _thermal: u32) -> OvcResult<()> {
        self.record(adapter, MockCall::SetFanSpeedToDefault { adapter })
    }

    fn power_control(&self, adapter: AdapterHandle) -> OvcResult<(i32, i32)> {
        Ok(self.get_adapter(adapter)?.power_control)
    }

    fn set_power_control(&self, adapter: AdapterHandle, percent: i32) -> OvcResult<()> {
        self.record(adapter, MockCall::SetPowerControl { adapter, percent })
    }

    fn adapter_info(&self, adapter: AdapterHandle) -> OvcResult<AdapterInfo> {
        Ok(self.get_adapter(adapter)?.info.clone())
    }

    fn current_activity(&self, adapter: AdapterHandle) -> OvcResult<Activity> {
        Ok(self.get_adapter(adapter)?.activity)
    }

    fn temperature(&self, adapter: AdapterHandle, _thermal: u32) -> OvcResult<i32> {
        Ok(self.get_adapter(adapter)?.temperature)
    }

    fn fan_speed(&self, adapter: AdapterHandle, _thermal: u32) -> OvcResult<i32> {
        Ok(self.get_adapter(adapter)?.fan_speed)
    }

    fn fan_speed_info(&self, adapter: AdapterHandle, _thermal: u32) -> OvcResult<FanSpeedInfo> {
        Ok(self.get_adapter(adapter)?.fan_speed_info)
    }

    fn power_control_info(&self, adapter: AdapterHandle) -> OvcResult<PowerControlInfo> {
        Ok(self.get_adapter(adapter)?.power_control_info)
    }

    fn release(&self) {
        if let Ok(mut released) = self.released.lock() {
            *released = true;
        }
    }
}
