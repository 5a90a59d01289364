//! Deterministic tests using the mock backend
//!
//! These tests drive the whole parse, validate and apply pipeline without AMD
//! hardware.

use amdovc::apply::ApplyPlan;
use amdovc::backend::{
    AdapterHandle, MockAdapter, MockCall, MockOverdriveBackend, PerformanceLevel,
};
use amdovc::validation::{CapabilitySnapshot, ValidationError, validate};
use amdovc::{OverdriveSession, parse_params};
use std::sync::Arc;

/// Run a batch against the mock, returning the validation errors if it was rejected
fn apply(mock: &Arc<MockOverdriveBackend>, params: &[&str]) -> Result<ApplyPlan, Vec<ValidationError>> {
    let requests = parse_params(params).expect("parameters should parse");
    let session = OverdriveSession::open(mock.clone()).unwrap();
    let snapshot = CapabilitySnapshot::capture(&session).unwrap();
    let batch = validate(snapshot, requests).map_err(|report| report.errors)?;
    let plan = ApplyPlan::build(batch);
    plan.execute(&session).unwrap();
    Ok(plan)
}

fn default_levels() -> Vec<PerformanceLevel> {
    MockAdapter::default().levels
}

// ============================================================================
// Batch atomicity
// ============================================================================

#[test]
fn test_one_invalid_request_blocks_the_batch() {
    let mock = Arc::new(MockOverdriveBackend::single_adapter());
    let errors = apply(&mock, &["fanspeed=50", "coreclk:0=900", "memclk:0=5000"]).unwrap_err();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].token(), "memclk:0=5000");
    assert!(mock.calls().is_empty());
}

#[test]
fn test_all_errors_are_reported() {
    let mock = Arc::new(MockOverdriveBackend::multi_adapter(2));
    let errors = apply(
        &mock,
        &["coreclk:5=900", "fanspeed:0:1=50", "coreclk:0:7=900", "pwrctrl=25"],
    )
    .unwrap_err();

    assert_eq!(errors.len(), 4);
    assert!(matches!(errors[0], ValidationError::AdapterOutOfRange { index: 5, .. }));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::ThermalIndexNotZero { .. })));
    assert!(errors.iter().any(|e| matches!(e, ValidationError::LevelOutOfRange { adapter: 0, .. })));
    assert!(errors.iter().any(|e| e.token() == "pwrctrl=25"));
    assert!(mock.calls().is_empty());
}

// ============================================================================
// Merging
// ============================================================================

#[test]
fn test_last_fan_request_wins() {
    let mock = Arc::new(MockOverdriveBackend::single_adapter());
    let plan = apply(&mock, &["fanspeed=40", "fanspeed=70"]).unwrap();

    assert_eq!(plan.announcements().len(), 2);
    assert_eq!(
        mock.calls(),
        vec![MockCall::SetFanSpeed { adapter: AdapterHandle(0), percent: 70 }]
    );
}

#[test]
fn test_fan_speed_for_all_adapters() {
    let mock = Arc::new(MockOverdriveBackend::multi_adapter(3));
    apply(&mock, &["fanspeed:all=55.4"]).unwrap();

    let calls = mock.calls();
    assert_eq!(calls.len(), 3);
    for (i, call) in calls.iter().enumerate() {
        assert_eq!(
            *call,
            MockCall::SetFanSpeed { adapter: AdapterHandle(i as u32), percent: 55 }
        );
    }
}

#[test]
fn test_level_edits_share_one_table_write() {
    let mock = Arc::new(MockOverdriveBackend::single_adapter());
    apply(&mock, &["coreclk=1200", "vcore::0=0.81", "memclk:0:1=1300"]).unwrap();

    let mut expected = default_levels();
    expected[2].engine_clock = 120000;
    expected[0].vddc = 810;
    expected[1].memory_clock = 130000;
    assert_eq!(
        mock.calls(),
        vec![MockCall::SetPerformanceLevels { adapter: AdapterHandle(0), levels: expected }]
    );
}

#[test]
fn test_default_restores_default_levels() {
    let mut adapter = MockAdapter::default();
    adapter.levels[2].engine_clock = 125000;
    adapter.levels[2].vddc = 1180;
    let mock = Arc::new(MockOverdriveBackend::with_adapters(vec![adapter]));

    apply(&mock, &["coreclk=default"]).unwrap();

    let mut expected = default_levels();
    expected[2].vddc = 1180;
    assert_eq!(
        mock.calls(),
        vec![MockCall::SetPerformanceLevels { adapter: AdapterHandle(0), levels: expected }]
    );
}

#[test]
fn test_voltage_on_unsupported_level_warns() {
    let mut adapter = MockAdapter::default();
    adapter.levels[2].vddc = 0;
    let mock = Arc::new(MockOverdriveBackend::with_adapters(vec![adapter]));

    let plan = apply(&mock, &["vcore=1.1"]).unwrap();

    assert_eq!(plan.warnings(), ["Voltage for adapter 0 is not set!".to_string()]);
    match &mock.calls()[..] {
        [MockCall::SetPerformanceLevels { levels, .. }] => assert_eq!(levels[2].vddc, 0),
        calls => panic!("unexpected calls: {calls:?}"),
    }
}

// ============================================================================
// Power control
// ============================================================================

#[test]
fn test_power_policy_is_narrower_than_hardware() {
    let mock = Arc::new(MockOverdriveBackend::single_adapter());
    assert!(apply(&mock, &["pwrctrl=25"]).is_err());
    assert!(apply(&mock, &["pwrctrl=-51"]).is_err());
    assert!(mock.calls().is_empty());

    apply(&mock, &["pwrctrl=20"]).unwrap();
    assert_eq!(
        mock.calls(),
        vec![MockCall::SetPowerControl { adapter: AdapterHandle(0), percent: 20 }]
    );
}

#[test]
fn test_power_default_uses_driver_default() {
    let adapter = MockAdapter {
        power_control: (15, 2),
        ..MockAdapter::default()
    };
    let mock = Arc::new(MockOverdriveBackend::with_adapters(vec![adapter]));

    apply(&mock, &["powercontrol=default"]).unwrap();
    assert_eq!(
        mock.calls(),
        vec![MockCall::SetPowerControl { adapter: AdapterHandle(0), percent: 2 }]
    );
}

// ============================================================================
// Ordering and sessions
// ============================================================================

#[test]
fn test_write_order_is_fan_power_levels() {
    let mock = Arc::new(MockOverdriveBackend::multi_adapter(2));
    let plan = apply(
        &mock,
        &["coreclk:1=900", "pwrctrl:0=-10", "fanspeed:1=default"],
    )
    .unwrap();

    let announced: Vec<String> = plan.announcements().iter().map(|a| a.to_string()).collect();
    assert_eq!(
        announced,
        vec![
            "Setting fanspeed to default for adapter 1 at thermal controller 0",
            "Setting powercontrol to -10% for adapter 0 at thermal controller 0",
            "Setting core clock to 900 MHz for adapter 1 at performance level 2",
        ]
    );

    let mut levels = default_levels();
    levels[2].engine_clock = 90000;
    assert_eq!(
        mock.calls(),
        vec![
            MockCall::SetFanSpeedToDefault { adapter: AdapterHandle(1) },
            MockCall::SetPowerControl { adapter: AdapterHandle(0), percent: -10 },
            MockCall::SetPerformanceLevels { adapter: AdapterHandle(1), levels },
        ]
    );
}

#[test]
fn test_inactive_adapters_are_skipped_in_indexing() {
    let mock = Arc::new(MockOverdriveBackend::with_adapters(vec![
        MockAdapter { handle: AdapterHandle(0), active: false, ..MockAdapter::default() },
        MockAdapter { handle: AdapterHandle(3), ..MockAdapter::default() },
    ]));
    apply(&mock, &["fanspeed:0=30"]).unwrap();
    assert_eq!(
        mock.calls(),
        vec![MockCall::SetFanSpeed { adapter: AdapterHandle(3), percent: 30 }]
    );
}

#[test]
fn test_driver_failure_is_propagated_and_session_released() {
    let mock = Arc::new(MockOverdriveBackend::single_adapter().failing_writes());
    {
        let session = OverdriveSession::open(mock.clone()).unwrap();
        let snapshot = CapabilitySnapshot::capture(&session).unwrap();
        let batch = validate(snapshot, parse_params(["fanspeed=50"]).unwrap()).unwrap();
        assert!(ApplyPlan::build(batch).execute(&session).is_err());
    }
    assert!(mock.is_released());
}
