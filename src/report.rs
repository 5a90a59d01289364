//! Adapter reports printed when no parameters are given

use crate::adapters::AdapterSelector;
use crate::backend::{AdapterHandle, PerformanceLevel};
use crate::session::OverdriveSession;
use crate::OvcResult;
use console::style;
use std::fmt::Write;

fn mhz(raw: i32) -> f64 {
    raw as f64 / 100.0
}

fn volts(raw: i32) -> f64 {
    raw as f64 / 1000.0
}

/// Safety banner shown before any setting is applied
pub fn notice() -> String {
    format!(
        "{}\n{}",
        style("WARNING: setting AMD Overdrive parameters!").red().bold(),
        style("Overclocking and raising voltages may damage your hardware. Use at your own risk.")
            .yellow()
    )
}

/// One short block per selected adapter
pub fn short_report(session: &OverdriveSession, selector: &AdapterSelector) -> OvcResult<String> {
    let mut out = String::new();
    for index in selector.iter(session.active_count()) {
        short_adapter(&mut out, session, index, session.handle(index)?)?;
    }
    Ok(out)
}

/// Full dump per selected adapter, including default levels
pub fn verbose_report(session: &OverdriveSession, selector: &AdapterSelector) -> OvcResult<String> {
    let mut out = String::new();
    for index in selector.iter(session.active_count()) {
        verbose_adapter(&mut out, session, index, session.handle(index)?)?;
    }
    Ok(out)
}

fn short_adapter(
    out: &mut String,
    session: &OverdriveSession,
    index: usize,
    handle: AdapterHandle,
) -> OvcResult<()> {
    let backend = session.backend();
    let info = backend.adapter_info(handle)?;
    let activity = backend.current_activity(handle)?;
    let (power, _) = backend.power_control(handle)?;
    let temperature = backend.temperature(handle, 0)?;
    let fan = backend.fan_speed(handle, 0)?;
    let cap = backend.capability(handle)?;
    let levels = backend.performance_levels(handle, false)?;

    let _ = writeln!(out, "{} {}", style(format!("Adapter {index}:")).cyan().bold(), info.name);
    let _ = writeln!(
        out,
        "  Core: {} MHz, Mem: {} MHz, Vddc: {} V, Load: {}%, Temp: {} C, Fan: {}%, PwrCtrl: {:+}%",
        mhz(activity.engine_clock),
        mhz(activity.memory_clock),
        volts(activity.vddc),
        activity.activity_percent,
        temperature as f64 / 1000.0,
        fan,
        power
    );
    let _ = writeln!(
        out,
        "  Max Ranges: Core: {} - {} MHz, Mem: {} - {} MHz, Vddc: {} - {} V",
        mhz(cap.engine_clock.min),
        mhz(cap.engine_clock.max),
        mhz(cap.memory_clock.min),
        mhz(cap.memory_clock.max),
        volts(cap.vddc.min),
        volts(cap.vddc.max)
    );
    if let (Some(first), Some(last)) = (levels.first(), levels.last()) {
        let _ = writeln!(
            out,
            "  PerfLevels: Core: {} - {} MHz, Mem: {} - {} MHz, Vddc: {} - {} V",
            mhz(first.engine_clock),
            mhz(last.engine_clock),
            mhz(first.memory_clock),
            mhz(last.memory_clock),
            volts(first.vddc),
            volts(last.vddc)
        );
    }
    Ok(())
}

fn level_table(out: &mut String, title: &str, levels: &[PerformanceLevel]) {
    let _ = writeln!(out, "  {}: {}", title, levels.len());
    for (j, level) in levels.iter().enumerate() {
        let _ = writeln!(out, "    Performance Level: {j}");
        let _ = writeln!(out, "      CoreClock: {} MHz", mhz(level.engine_clock));
        let _ = writeln!(out, "      MemClock: {} MHz", mhz(level.memory_clock));
        let _ = writeln!(out, "      Voltage: {} V", volts(level.vddc));
    }
}

fn verbose_adapter(
    out: &mut String,
    session: &OverdriveSession,
    index: usize,
    handle: AdapterHandle,
) -> OvcResult<()> {
    let backend = session.backend();
    let info = backend.adapter_info(handle)?;
    let _ = writeln!(out, "{} {}", style(format!("Adapter {index}:")).cyan().bold(), info.name);
    let _ = writeln!(out, "  Device Topology: {}:{}:{}", info.bus, info.device, info.function);
    let _ = writeln!(out, "  Vendor ID: {}", info.vendor_id);

    let activity = backend.current_activity(handle)?;
    let _ = writeln!(out, "  Current CoreClock: {} MHz", mhz(activity.engine_clock));
    let _ = writeln!(out, "  Current MemoryClock: {} MHz", mhz(activity.memory_clock));
    let _ = writeln!(out, "  Current Voltage: {} V", volts(activity.vddc));
    let _ = writeln!(out, "  GPU Load: {}%", activity.activity_percent);
    let _ = writeln!(out, "  Current PerfLevel: {}", activity.current_level);
    let _ = writeln!(out, "  Current BusSpeed: {}", activity.bus_speed);
    let _ = writeln!(out, "  Current BusLanes: {}", activity.bus_lanes);

    let temperature = backend.temperature(handle, 0)?;
    let _ = writeln!(out, "  Temperature: {} C", temperature as f64 / 1000.0);

    let fan = backend.fan_speed_info(handle, 0)?;
    let _ = writeln!(out, "  FanSpeed Min: {}%", fan.min_percent);
    let _ = writeln!(out, "  FanSpeed Max: {}%", fan.max_percent);
    let _ = writeln!(out, "  FanSpeed MinRPM: {} RPM", fan.min_rpm);
    let _ = writeln!(out, "  FanSpeed MaxRPM: {} RPM", fan.max_rpm);
    let _ = writeln!(out, "  Current FanSpeed: {}%", backend.fan_speed(handle, 0)?);

    let power_info = backend.power_control_info(handle)?;
    let (power, _) = backend.power_control(handle)?;
    let _ = writeln!(out, "  PowerControl Min: {:+}%", power_info.min);
    let _ = writeln!(out, "  PowerControl Max: {:+}%", power_info.max);
    let _ = writeln!(out, "  Current PowerControl: {:+}%", power);

    let cap = backend.capability(handle)?;
    let _ = writeln!(
        out,
        "  CoreClock: {} - {} MHz, step: {} MHz",
        mhz(cap.engine_clock.min),
        mhz(cap.engine_clock.max),
        mhz(cap.engine_clock.step)
    );
    let _ = writeln!(
        out,
        "  MemClock: {} - {} MHz, step: {} MHz",
        mhz(cap.memory_clock.min),
        mhz(cap.memory_clock.max),
        mhz(cap.memory_clock.step)
    );
    let _ = writeln!(
        out,
        "  Voltage: {} - {} V, step: {} V",
        volts(cap.vddc.min),
        volts(cap.vddc.max),
        volts(cap.vddc.step)
    );

    level_table(out, "Performance levels", &backend.performance_levels(handle, false)?);
    level_table(
        out,
        "Default Performance levels",
        &backend.performance_levels(handle, true)?,
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockOverdriveBackend;
    use std::sync::Arc;

    fn plain(text: &str) -> String {
        console::strip_ansi_codes(text).to_string()
    }

    #[test]
    fn test_short_report() {
        let session = OverdriveSession::open(Arc::new(MockOverdriveBackend::single_adapter())).unwrap();
        let report = plain(&short_report(&session, &AdapterSelector::All).unwrap());
        assert!(report.contains("Adapter 0: Mock Radeon 0"));
        assert!(report.contains(
            "Core: 1100 MHz, Mem: 1250 MHz, Vddc: 1.15 V, Load: 97%, Temp: 60 C, Fan: 45%, PwrCtrl: +0%"
        ));
        assert!(report.contains("Max Ranges: Core: 300 - 1500 MHz, Mem: 150 - 2000 MHz, Vddc: 0.75 - 1.2 V"));
        assert!(report.contains("PerfLevels: Core: 300 - 1100 MHz, Mem: 150 - 1250 MHz, Vddc: 0.8 - 1.15 V"));
    }

    #[test]
    fn test_report_follows_selection() {
        let session = OverdriveSession::open(Arc::new(MockOverdriveBackend::multi_adapter(3))).unwrap();
        let report = plain(&short_report(&session, &"0,2".parse().unwrap()).unwrap());
        assert!(report.contains("Adapter 0:"));
        assert!(!report.contains("Adapter 1:"));
        assert!(report.contains("Adapter 2: Mock Radeon 2"));
    }

    #[test]
    fn test_verbose_report() {
        let session = OverdriveSession::open(Arc::new(MockOverdriveBackend::single_adapter())).unwrap();
        let report = plain(&verbose_report(&session, &AdapterSelector::default()).unwrap());
        assert!(report.contains("Device Topology: 1:0:0"));
        assert!(report.contains("Vendor ID: 4098"));
        assert!(report.contains("PowerControl Min: -50%"));
        assert!(report.contains("PowerControl Max: +50%"));
        assert!(report.contains("CoreClock: 300 - 1500 MHz, step: 1 MHz"));
        assert!(report.contains("Voltage: 0.75 - 1.2 V, step: 0.001 V"));
        assert!(report.contains("  Performance levels: 3"));
        assert!(report.contains("  Default Performance levels: 3"));
        assert!(report.contains("      CoreClock: 1100 MHz"));
    }
}
