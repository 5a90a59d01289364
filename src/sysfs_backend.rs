//! amdgpu sysfs backend
//!
//! Talks to the Linux amdgpu driver through `/sys/class/drm/cardN/device`:
//! `pp_od_clk_voltage` for the Overdrive tables, hwmon for fan, power cap and
//! temperature, and the `pp_dpm_*` files for current activity.

use crate::backend::{
    Activity, AdapterCapability, AdapterHandle, AdapterInfo, FanSpeedInfo, OdRange,
    OverdriveBackend, PerformanceLevel, PowerControlInfo,
};
use crate::baseline::BaselineStore;
use crate::{OvcError, OvcResult};
use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, warn};

const AMD_VENDOR_ID: u32 = 0x1002;
const OD_FILE: &str = "pp_od_clk_voltage";

static CARD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^card(\d+)$").unwrap());
static OD_LEVEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(\d+):\s*(\d+)\s*MHz(?:\s+(\d+)\s*mV)?").unwrap()
});
static OD_RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(SCLK|MCLK|VDDC):\s*(\d+)\s*(?:MHz|mV)\s+(\d+)\s*(?:MHz|mV)").unwrap()
});
static DPM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*(\d+):\s*(\d+)\s*MHz\s*(\*)?").unwrap());

/// Parsed `pp_od_clk_voltage` contents; clocks in MHz, voltages in mV
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OdTable {
    pub sclk: Vec<(i32, i32)>,
    pub mclk: Vec<(i32, i32)>,
    pub sclk_range: Option<(i32, i32)>,
    pub mclk_range: Option<(i32, i32)>,
    pub vddc_range: Option<(i32, i32)>,
}

impl OdTable {
    pub fn parse(text: &str) -> OvcResult<Self> {
        #[derive(PartialEq)]
        enum Section {
            None,
            Sclk,
            Mclk,
            Range,
        }

        let mut table = OdTable::default();
        let mut section = Section::None;
        for line in text.lines() {
            let trimmed = line.trim();
            match trimmed {
                "OD_SCLK:" => section = Section::Sclk,
                "OD_MCLK:" => section = Section::Mclk,
                "OD_RANGE:" => section = Section::Range,
                _ if trimmed.starts_with("OD_") => section = Section::None,
                _ => {}
            }

            match section {
                Section::Sclk | Section::Mclk => {
                    if let Some(caps) = OD_LEVEL_RE.captures(trimmed) {
                        let clock = od_number(&caps[2])?;
                        let mv = match caps.get(3) {
                            Some(m) => od_number(m.as_str())?,
                            None => 0,
                        };
                        if section == Section::Sclk {
                            table.sclk.push((clock, mv));
                        } else {
                            table.mclk.push((clock, mv));
                        }
                    }
                }
                Section::Range => {
                    if let Some(caps) = OD_RANGE_RE.captures(trimmed) {
                        let range = (od_number(&caps[2])?, od_number(&caps[3])?);
                        match caps[1].to_ascii_uppercase().as_str() {
                            "SCLK" => table.sclk_range = Some(range),
                            "MCLK" => table.mclk_range = Some(range),
                            _ => table.vddc_range = Some(range),
                        }
                    }
                }
                Section::None => {}
            }
        }

        if table.sclk.is_empty() {
            return Err(OvcError::Backend(
                "No OD_SCLK levels in pp_od_clk_voltage".to_string(),
            ));
        }
        Ok(table)
    }

    /// Memory table entry backing performance level `level`
    fn mclk_index(&self, level: usize) -> Option<usize> {
        if self.mclk.is_empty() {
            None
        } else {
            Some(level.min(self.mclk.len() - 1))
        }
    }

    /// One level per engine clock entry, paired with the matching memory entry
    pub fn levels(&self) -> Vec<PerformanceLevel> {
        self.sclk
            .iter()
            .enumerate()
            .map(|(i, &(sclk, mv))| PerformanceLevel {
                engine_clock: sclk * 100,
                memory_clock: self.mclk_index(i).map(|j| self.mclk[j].0 * 100).unwrap_or(0),
                vddc: mv,
            })
            .collect()
    }

    pub fn capability(&self) -> OvcResult<AdapterCapability> {
        let (Some(sclk), Some(vddc)) = (self.sclk_range, self.vddc_range) else {
            return Err(OvcError::Backend(
                "OD_RANGE missing, Overdrive is disabled (check amdgpu.ppfeaturemask)".to_string(),
            ));
        };
        let mclk = self.mclk_range.unwrap_or((0, 0));
        Ok(AdapterCapability {
            level_count: self.sclk.len(),
            engine_clock: OdRange { min: sclk.0 * 100, max: sclk.1 * 100, step: 100 },
            memory_clock: OdRange { min: mclk.0 * 100, max: mclk.1 * 100, step: 100 },
            vddc: OdRange { min: vddc.0, max: vddc.1, step: 1 },
        })
    }

    /// Driver commands turning this table into `levels`, without the final commit
    ///
    /// Only entries whose value changes are written. A memory entry shared by
    /// several levels takes the value of the last level that changed it.
    pub fn commands(&self, levels: &[PerformanceLevel]) -> Vec<String> {
        let mut commands = Vec::new();

        for (i, (&(sclk, mv), level)) in self.sclk.iter().zip(levels).enumerate() {
            let clock = raw_to_mhz(level.engine_clock);
            if clock != sclk || level.vddc != mv {
                commands.push(format!("s {} {} {}", i, clock, level.vddc));
            }
        }

        for (j, &(mclk, mv)) in self.mclk.iter().enumerate() {
            let updated = levels
                .iter()
                .enumerate()
                .filter(|(i, _)| self.mclk_index(*i) == Some(j))
                .map(|(_, level)| raw_to_mhz(level.memory_clock))
                .filter(|&clock| clock != mclk)
                .last();
            if let Some(clock) = updated {
                commands.push(format!("m {} {} {}", j, clock, mv));
            }
        }

        commands
    }
}

/// One MHz or mV figure of the OD table; must still fit once scaled to raw clock units
fn od_number(text: &str) -> OvcResult<i32> {
    text.parse::<i32>()
        .ok()
        .filter(|&v| v <= i32::MAX / 100)
        .ok_or_else(|| {
            OvcError::Backend(format!("Invalid value '{}' in {}", text, OD_FILE))
        })
}

fn raw_to_mhz(raw: i32) -> i32 {
    (raw as f64 / 100.0).round() as i32
}

#[derive(Debug, Clone)]
struct Card {
    index: u32,
    device: PathBuf,
    hwmon: Option<PathBuf>,
    active: bool,
}

/// Real backend over the amdgpu sysfs interface
pub struct SysfsBackend {
    cards: Vec<Card>,
    baselines: BaselineStore,
}

impl SysfsBackend {
    /// Discover AMD cards under `drm_root`
    pub fn new(drm_root: &Path, baselines: BaselineStore) -> OvcResult<Self> {
        let entries = fs::read_dir(drm_root).map_err(|e| {
            OvcError::BackendUnavailable(format!("Cannot read {}: {}", drm_root.display(), e))
        })?;

        let mut cards = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(index) = CARD_RE
                .captures(&name)
                .and_then(|caps| caps[1].parse::<u32>().ok())
            else {
                continue;
            };

            let device = entry.path().join("device");
            let vendor = read_trimmed(&device.join("vendor"))
                .ok()
                .and_then(|v| u32::from_str_radix(v.trim_start_matches("0x"), 16).ok());
            if vendor != Some(AMD_VENDOR_ID) {
                debug!("Skipping {name}: not an AMD adapter");
                continue;
            }

            let active = read_trimmed(&device.join("enable"))
                .map(|v| v != "0")
                .unwrap_or(true);
            let hwmon = find_hwmon(&device);
            debug!(card = index, active, "Found AMD adapter");
            cards.push(Card {
                index,
                device,
                hwmon,
                active,
            });
        }
        cards.sort_by_key(|c| c.index);

        Ok(Self { cards, baselines })
    }

    fn card(&self, adapter: AdapterHandle) -> OvcResult<&Card> {
        self.cards
            .iter()
            .find(|c| c.index == adapter.0)
            .ok_or_else(|| OvcError::Backend(format!("No AMD adapter card{}", adapter.0)))
    }

    fn hwmon(&self, adapter: AdapterHandle) -> OvcResult<&Path> {
        self.card(adapter)?.hwmon.as_deref().ok_or_else(|| {
            OvcError::Backend(format!("No hwmon interface for card{}", adapter.0))
        })
    }

    fn od_table(&self, adapter: AdapterHandle) -> OvcResult<OdTable> {
        let path = self.card(adapter)?.device.join(OD_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            OvcError::Backend(format!(
                "Overdrive not available for card{} ({}): {}",
                adapter.0,
                path.display(),
                e
            ))
        })?;
        OdTable::parse(&text)
    }

    fn pci_slot(&self, adapter: AdapterHandle) -> OvcResult<String> {
        let uevent = read_trimmed(&self.card(adapter)?.device.join("uevent"))?;
        uevent
            .lines()
            .find_map(|line| line.strip_prefix("PCI_SLOT_NAME="))
            .map(str::to_string)
            .ok_or_else(|| OvcError::Backend(format!("No PCI slot for card{}", adapter.0)))
    }

    /// Power cap values in microwatts: (current, default, min, max)
    fn power_caps(&self, adapter: AdapterHandle) -> OvcResult<(i64, i64, Option<i64>, Option<i64>)> {
        let hwmon = self.hwmon(adapter)?;
        let current = read_number(&hwmon.join("power1_cap"))?;
        let default: i64 = read_number(&hwmon.join("power1_cap_default"))?;
        if default <= 0 {
            return Err(OvcError::Backend(format!(
                "Invalid default power cap for card{}",
                adapter.0
            )));
        }
        let min = read_number(&hwmon.join("power1_cap_min")).ok();
        let max = read_number(&hwmon.join("power1_cap_max")).ok();
        Ok((current, default, min, max))
    }

    fn check_thermal(thermal: u32) -> OvcResult<()> {
        if thermal != 0 {
            return Err(OvcError::Backend(format!(
                "Thermal controller {thermal} is not supported"
            )));
        }
        Ok(())
    }
}

impl OverdriveBackend for SysfsBackend {
    fn active_adapters(&self) -> OvcResult<Vec<AdapterHandle>> {
        Ok(self
            .cards
            .iter()
            .filter(|c| c.active)
            .map(|c| AdapterHandle(c.index))
            .collect())
    }

    fn capability(&self, adapter: AdapterHandle) -> OvcResult<AdapterCapability> {
        self.od_table(adapter)?.capability()
    }

    fn performance_levels(
        &self,
        adapter: AdapterHandle,
        default: bool,
    ) -> OvcResult<Vec<PerformanceLevel>> {
        let current = self.od_table(adapter)?.levels();
        if !default {
            return Ok(current);
        }
        let slot = self.pci_slot(adapter)?;
        Ok(self.baselines.defaults_for(&slot, &current))
    }

    fn set_performance_levels(
        &self,
        adapter: AdapterHandle,
        levels: &[PerformanceLevel],
    ) -> OvcResult<()> {
        let table = self.od_table(adapter)?;
        if levels.len() != table.sclk.len() {
            return Err(OvcError::Backend(format!(
                "card{} has {} performance levels, got {}",
                adapter.0,
                table.sclk.len(),
                levels.len()
            )));
        }
        let commands = table.commands(levels);
        if commands.is_empty() {
            debug!(card = adapter.0, "Performance levels unchanged");
            return Ok(());
        }

        let path = self.card(adapter)?.device.join(OD_FILE);
        for command in &commands {
            debug!(card = adapter.0, command = command.as_str(), "Writing Overdrive entry");
            write_value(&path, command)?;
        }
        write_value(&path, "c")
    }

    fn set_fan_speed(&self, adapter: AdapterHandle, thermal: u32, percent: i32) -> OvcResult<()> {
        Self::check_thermal(thermal)?;
        let hwmon = self.hwmon(adapter)?;
        let pwm = (percent.clamp(0, 100) as f64 * 255.0 / 100.0).round() as i32;
        write_value(&hwmon.join("pwm1_enable"), "1")?;
        write_value(&hwmon.join("pwm1"), &pwm.to_string())
    }

    fn set_fan_speed_to_default(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<()> {
        Self::check_thermal(thermal)?;
        write_value(&self.hwmon(adapter)?.join("pwm1_enable"), "2")
    }

    fn power_control(&self, adapter: AdapterHandle) -> OvcResult<(i32, i32)> {
        let (current, default, _, _) = self.power_caps(adapter)?;
        Ok((cap_to_percent(current, default), 0))
    }

    fn set_power_control(&self, adapter: AdapterHandle, percent: i32) -> OvcResult<()> {
        let (_, default, _, _) = self.power_caps(adapter)?;
        let cap = default + default * percent as i64 / 100;
        write_value(&self.hwmon(adapter)?.join("power1_cap"), &cap.to_string())
    }

    fn adapter_info(&self, adapter: AdapterHandle) -> OvcResult<AdapterInfo> {
        let device = &self.card(adapter)?.device;
        let vendor_id = read_hex(&device.join("vendor")).unwrap_or(AMD_VENDOR_ID);
        let name = read_trimmed(&device.join("product_name"))
            .ok()
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| {
                let device_id = read_hex(&device.join("device")).unwrap_or(0);
                format!("AMD GPU [{:04x}:{:04x}]", vendor_id, device_id)
            });

        let (bus, dev, function) = self
            .pci_slot(adapter)
            .ok()
            .and_then(|slot| parse_pci_slot(&slot))
            .unwrap_or((0, 0, 0));

        Ok(AdapterInfo {
            name,
            vendor_id,
            bus,
            device: dev,
            function,
        })
    }

    fn current_activity(&self, adapter: AdapterHandle) -> OvcResult<Activity> {
        let card = self.card(adapter)?;
        let device = &card.device;
        let (engine_mhz, current_level) = read_dpm(&device.join("pp_dpm_sclk")).unwrap_or((0, 0));
        let (memory_mhz, _) = read_dpm(&device.join("pp_dpm_mclk")).unwrap_or((0, 0));
        let vddc = card
            .hwmon
            .as_ref()
            .and_then(|h| read_number(&h.join("in0_input")).ok())
            .unwrap_or(0);
        let bus_speed = read_trimmed(&device.join("current_link_speed"))
            .ok()
            .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse::<f64>().ok()))
            .map(|gt| (gt * 1000.0).round() as i32)
            .unwrap_or(0);

        Ok(Activity {
            engine_clock: engine_mhz * 100,
            memory_clock: memory_mhz * 100,
            vddc,
            activity_percent: read_number(&device.join("gpu_busy_percent")).unwrap_or(0),
            current_level,
            bus_speed,
            bus_lanes: read_number(&device.join("current_link_width")).unwrap_or(0),
        })
    }

    fn temperature(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<i32> {
        Self::check_thermal(thermal)?;
        read_number(&self.hwmon(adapter)?.join("temp1_input"))
    }

    fn fan_speed(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<i32> {
        Self::check_thermal(thermal)?;
        let pwm: i32 = read_number(&self.hwmon(adapter)?.join("pwm1"))?;
        Ok(pwm_to_percent(pwm))
    }

    fn fan_speed_info(&self, adapter: AdapterHandle, thermal: u32) -> OvcResult<FanSpeedInfo> {
        Self::check_thermal(thermal)?;
        let hwmon = self.hwmon(adapter)?;
        let read = |file: &str, fallback: i32| read_number(&hwmon.join(file)).unwrap_or(fallback);
        Ok(FanSpeedInfo {
            min_percent: pwm_to_percent(read("pwm1_min", 0)),
            max_percent: pwm_to_percent(read("pwm1_max", 255)),
            min_rpm: read("fan1_min", 0),
            max_rpm: read("fan1_max", 0),
        })
    }

    fn power_control_info(&self, adapter: AdapterHandle) -> OvcResult<PowerControlInfo> {
        let (_, default, min, max) = self.power_caps(adapter)?;
        Ok(PowerControlInfo {
            min: min.map(|m| cap_to_percent(m, default)).unwrap_or(0),
            max: max.map(|m| cap_to_percent(m, default)).unwrap_or(0),
            step: 1,
        })
    }
}

fn cap_to_percent(cap: i64, default: i64) -> i32 {
    ((cap - default) as f64 * 100.0 / default as f64).round() as i32
}

fn pwm_to_percent(pwm: i32) -> i32 {
    (pwm as f64 * 100.0 / 255.0).round() as i32
}

fn parse_pci_slot(slot: &str) -> Option<(u32, u32, u32)> {
    // domain:bus:device.function
    let mut parts = slot.rsplitn(3, ':');
    let dev_fn = parts.next()?;
    let bus = u32::from_str_radix(parts.next()?, 16).ok()?;
    let (dev, function) = dev_fn.split_once('.')?;
    Some((
        bus,
        u32::from_str_radix(dev, 16).ok()?,
        u32::from_str_radix(function, 16).ok()?,
    ))
}

/// Current clock in MHz and level index from a `pp_dpm_*` file
fn read_dpm(path: &Path) -> OvcResult<(i32, i32)> {
    let text = read_trimmed(path)?;
    text.lines()
        .filter_map(|line| DPM_RE.captures(line))
        .find(|caps| caps.get(3).is_some())
        .and_then(|caps| Some((caps[2].parse().ok()?, caps[1].parse().ok()?)))
        .ok_or_else(|| OvcError::Backend(format!("No current level in {}", path.display())))
}

fn find_hwmon(device: &Path) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(device.join("hwmon"))
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("hwmon"))
        })
        .collect();
    entries.sort();
    entries.into_iter().next()
}

fn read_trimmed(path: &Path) -> OvcResult<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| OvcError::Backend(format!("Failed to read {}: {}", path.display(), e)))
}

fn read_number<T: FromStr>(path: &Path) -> OvcResult<T> {
    let text = read_trimmed(path)?;
    text.parse()
        .map_err(|_| OvcError::Backend(format!("Invalid value '{}' in {}", text, path.display())))
}

fn read_hex(path: &Path) -> OvcResult<u32> {
    let text = read_trimmed(path)?;
    u32::from_str_radix(text.trim_start_matches("0x"), 16)
        .map_err(|_| OvcError::Backend(format!("Invalid value '{}' in {}", text, path.display())))
}

fn write_value(path: &Path, value: &str) -> OvcResult<()> {
    fs::write(path, value).map_err(|e| {
        if e.kind() == ErrorKind::PermissionDenied {
            if !nix::unistd::Uid::effective().is_root() {
                warn!("Writing Overdrive settings requires root privileges");
            }
            OvcError::PermissionDenied(path.display().to_string())
        } else {
            OvcError::Backend(format!("Failed to write '{}' to {}: {}", value, path.display(), e))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLARIS_OD: &str = "OD_SCLK:
0:        300MHz        750mV
1:        600MHz        769mV
2:        900MHz        887mV
3:       1145MHz       1100mV
OD_MCLK:
0:        300MHz        750mV
1:       2000MHz        800mV
OD_RANGE:
SCLK:     300MHz       2000MHz
MCLK:     300MHz       2250MHz
VDDC:     750mV        1150mV
";

    #[test]
    fn test_parse_od_table() {
        let table = OdTable::parse(POLARIS_OD).unwrap();
        assert_eq!(table.sclk.len(), 4);
        assert_eq!(table.sclk[3], (1145, 1100));
        assert_eq!(table.mclk, vec![(300, 750), (2000, 800)]);
        assert_eq!(table.sclk_range, Some((300, 2000)));
        assert_eq!(table.mclk_range, Some((300, 2250)));
        assert_eq!(table.vddc_range, Some((750, 1150)));
    }

    #[test]
    fn test_levels_pair_memory_entries() {
        let table = OdTable::parse(POLARIS_OD).unwrap();
        let levels = table.levels();
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[0], PerformanceLevel { engine_clock: 30000, memory_clock: 30000, vddc: 750 });
        assert_eq!(levels[1].memory_clock, 200000);
        assert_eq!(levels[3], PerformanceLevel { engine_clock: 114500, memory_clock: 200000, vddc: 1100 });

        let cap = table.capability().unwrap();
        assert_eq!(cap.level_count, 4);
        assert_eq!(cap.engine_clock, OdRange { min: 30000, max: 200000, step: 100 });
        assert_eq!(cap.vddc, OdRange { min: 750, max: 1150, step: 1 });
    }

    #[test]
    fn test_commands_only_for_changes() {
        let table = OdTable::parse(POLARIS_OD).unwrap();
        let mut levels = table.levels();
        assert!(table.commands(&levels).is_empty());

        levels[3].engine_clock = 120000;
        levels[2].vddc = 900;
        levels[3].memory_clock = 210000;
        assert_eq!(
            table.commands(&levels),
            vec!["s 2 900 900", "s 3 1200 1100", "m 1 2100 800"]
        );
    }

    #[test]
    fn test_missing_range_means_disabled() {
        let table = OdTable::parse("OD_SCLK:\n0: 300MHz 750mV\n").unwrap();
        assert!(table.capability().is_err());
        assert!(OdTable::parse("OD_RANGE:\nSCLK: 300MHz 2000MHz\n").is_err());
    }

    #[test]
    fn test_overflowing_od_values_are_errors() {
        let huge_clock = POLARIS_OD.replace("1145MHz", "99999999999MHz");
        assert!(matches!(OdTable::parse(&huge_clock), Err(OvcError::Backend(_))));

        let huge_range = POLARIS_OD.replace(
            "SCLK:     300MHz       2000MHz",
            "SCLK:     300MHz       30000000MHz",
        );
        assert!(matches!(OdTable::parse(&huge_range), Err(OvcError::Backend(_))));

        let huge_voltage = POLARIS_OD.replace("887mV", "4294967296mV");
        assert!(matches!(OdTable::parse(&huge_voltage), Err(OvcError::Backend(_))));
    }

    #[test]
    fn test_helpers() {
        assert_eq!(parse_pci_slot("0000:03:00.0"), Some((3, 0, 0)));
        assert_eq!(parse_pci_slot("0000:0a:1f.1"), Some((10, 31, 1)));
        assert_eq!(parse_pci_slot("bogus"), None);
        assert_eq!(pwm_to_percent(255), 100);
        assert_eq!(pwm_to_percent(128), 50);
        assert_eq!(cap_to_percent(180_000_000, 150_000_000), 20);
        assert_eq!(cap_to_percent(75_000_000, 150_000_000), -50);
    }
}
