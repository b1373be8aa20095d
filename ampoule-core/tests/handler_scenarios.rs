//! End-to-end handler scenarios against the simulated link

use ampoule_core::deck::{Placeable, Point2D, Point3D, Rack, ResourceStore, Vial, WellId};
use ampoule_core::safety::BedBounds;
use ampoule_core::sim::SimulatedLink;
use ampoule_core::{
    DeviceBackend, DeviceIds, Error, FaultKind, HandlerBed, HandlerConfig, LiquidHandler,
    SessionState,
};
use ampoule_protocol::{Axis, DeviceKind};
use proptest::prelude::*;

/// 16 x 4 rack anchored at the back edge of the bed
///
/// Heights: travel 125, access 101, transfer 63.
fn back_rack(y_spacing: f64) -> Rack {
    let mut rack = Rack::new(
        Point2D::new(8.0, 248.0),
        Point2D::new(18.0, y_spacing),
        16,
        4,
        60.0,
        120.0,
    );
    for address in ["A1", "B1"] {
        let well: WellId = address.parse().unwrap();
        rack.place_vial(well, Vial::new(40.0, 2.0, 38.0, 12.0, 12.0).unwrap())
            .unwrap();
    }
    rack
}

fn connect(bed: HandlerBed) -> (LiquidHandler<SimulatedLink>, SimulatedLink) {
    let sim = SimulatedLink::new(DeviceIds::default());
    let backend = DeviceBackend::new(sim.clone(), DeviceIds::default());
    let mut handler = LiquidHandler::new(backend, bed, HandlerConfig::default()).unwrap();
    handler.home_arm().unwrap();
    sim.log().clear();
    (handler, sim)
}

fn bed_with(rack: Rack) -> HandlerBed {
    let mut bed = HandlerBed::new(BedBounds::default());
    bed.insert_rack("pos_1_rack", rack);
    bed
}

fn slot(well: &str) -> Placeable {
    Placeable::named("pos_1_rack", well)
}

#[test_log::test]
fn test_move_to_back_row_reaches_travel_then_access() {
    let (mut handler, sim) = connect(bed_with(back_rack(-12.8)));
    handler.move_to(&slot("A1"), false).unwrap();
    assert_eq!(
        sim.log().buffered(),
        vec!["Z125:25", "X8:50/248:50", "Z101:25"]
    );
    assert_eq!(sim.arm_position(), Point3D::new(8.0, 248.0, 101.0));
    assert_eq!(handler.state(), SessionState::Ready);
}

#[test_log::test]
fn test_misconfigured_spacing_is_out_of_bounds() {
    let (mut handler, sim) = connect(bed_with(back_rack(12.8)));
    // A1 is still on the bed
    handler.move_to(&slot("A1"), false).unwrap();
    sim.log().clear();

    match handler.move_to(&slot("B1"), false).unwrap_err() {
        Error::OutOfBounds { axis, value, max, .. } => {
            assert_eq!(axis, Axis::Y);
            assert!((value - 260.8).abs() < 1e-9);
            assert_eq!(max, 249.0);
        }
        other => panic!("expected OutOfBounds, got {other:?}"),
    }
    assert!(sim.log().is_empty());
    assert_eq!(handler.state(), SessionState::Ready);
}

#[test]
fn test_prime_in_three_chunks() {
    let (mut handler, sim) = connect(bed_with(back_rack(-12.8)));
    handler.prime(2500.0, Some(1000.0), None).unwrap();
    let draws: Vec<_> = sim
        .log()
        .buffered()
        .into_iter()
        .filter(|c| c.starts_with("PR:"))
        .collect();
    assert_eq!(draws, ["PR:1000:5", "PR:1000:5", "PR:500:5"]);
}

#[test]
fn test_unknown_chain_operation_sends_nothing() {
    let (mut handler, sim) = connect(bed_with(back_rack(-12.8)));
    let chain = r#"[
        {"op": "move_to", "location": {"kind": "named", "rack": "pos_1_rack", "well": "A1"}},
        {"op": "levitate"}
    ]"#;
    assert!(matches!(
        handler.run_chain_json(chain),
        Err(Error::ChainValidation { index: 1, .. })
    ));
    assert!(sim.log().is_empty());
}

#[test]
fn test_missing_descriptors_are_not_found() {
    let (mut handler, sim) = connect(bed_with(back_rack(-12.8)));
    assert!(matches!(
        handler.move_to(&Placeable::named("pos_2_rack", "A1"), false),
        Err(Error::ResourceNotFound(_))
    ));
    // C1 lies inside the grid but holds no vial
    assert!(matches!(
        handler.aspirate(10.0, &slot("C1"), None),
        Err(Error::ResourceNotFound(_))
    ));
    assert!(sim.log().is_empty());
}

#[test_log::test]
fn test_reservoir_volume_persists() {
    let dir = tempfile::tempdir().unwrap();
    HandlerBed::new(BedBounds::default())
        .save(dir.path(), "deck")
        .unwrap();
    let store = ResourceStore::open(dir.path().join("resources_cfg.json")).unwrap();
    store
        .set("system_fluid_volume_mL", serde_json::json!(250.0))
        .unwrap();
    store.set("operator", serde_json::json!("bench 3")).unwrap();
    drop(store);

    let (mut handler, _sim) = connect(HandlerBed::load(dir.path()).unwrap());
    handler.aspirate_from_reservoir(50.0, None).unwrap();
    handler.aspirate_from_reservoir(50.0, None).unwrap();
    drop(handler);

    let reopened = HandlerBed::load(dir.path()).unwrap();
    let left = reopened.system_fluid_ml().unwrap();
    assert!((left - 249.9).abs() < 1e-9, "left {left}");
    assert_eq!(
        reopened.resources().get("operator"),
        Some(serde_json::json!("bench 3"))
    );
}

#[test_log::test]
fn test_fault_recovery_by_homing() {
    let (mut handler, sim) = connect(bed_with(back_rack(-12.8)));
    sim.inject_fault(DeviceKind::Arm, 30);
    match handler.move_to(&slot("A1"), false).unwrap_err() {
        Error::Device {
            device,
            code,
            description,
        } => {
            assert_eq!(device, DeviceKind::Arm);
            assert_eq!(code, 30);
            assert_eq!(description, "Z Axis stall");
        }
        other => panic!("expected a device fault, got {other:?}"),
    }
    assert_eq!(handler.state(), SessionState::Faulted(FaultKind::Device));
    assert!(matches!(
        handler.aspirate(10.0, &slot("A1"), None),
        Err(Error::NotReady { .. })
    ));

    handler.home_arm().unwrap();
    assert_eq!(handler.state(), SessionState::Homed);
    handler.move_to(&slot("A1"), false).unwrap();
    assert_eq!(sim.error_code(DeviceKind::Arm), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_aspirate_dispense_round_trip(volume in 0.01f64..=1000.0) {
        let (mut handler, sim) = connect(bed_with(back_rack(-12.8)));
        let before = handler.tracker().content_ul;
        handler.aspirate(volume, &slot("A1"), None).unwrap();
        handler.dispense(volume, &slot("B1"), None).unwrap();
        prop_assert!((handler.tracker().content_ul - before).abs() < 1e-9);
        prop_assert!(sim.syringe_volume().abs() < 1e-6);
    }
}
