//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use ec_controller::flow::{Component, Sensor, Topology};
use ec_controller::sct::Model;

/// Absolute tolerance for comparing setpoints.
pub const TOL: f64 = 1e-5;

/// Sensor with chargers and PVs named `<id>-c<i>` and `<id>-p<i>`.
pub fn sensor(id: &str, limit: f64, chargers: &[f64], pvs: &[f64]) -> Sensor {
    let mut s = Sensor::new(id, limit);
    for (i, demand) in chargers.iter().enumerate() {
        s.add_charger(Component::new(format!("{id}-c{i}"), *demand));
    }
    for (i, demand) in pvs.iter().enumerate() {
        s.add_pv(Component::new(format!("{id}-p{i}"), *demand));
    }
    s
}

/// Same as [`sensor`] with child sensors attached.
pub fn parent(id: &str, limit: f64, chargers: &[f64], pvs: &[f64], children: Vec<Sensor>) -> Sensor {
    let mut s = sensor(id, limit, chargers, pvs);
    for child in children {
        s.add_child(child);
    }
    s
}

/// Unlimited community root over `children`.
pub fn community(children: Vec<Sensor>) -> Sensor {
    parent("root", f64::INFINITY, &[], &[], children)
}

/// Asserts every setpoint of sensor `id`, chargers then PVs, in order.
pub fn assert_set_points(root: &Sensor, id: &str, chargers: &[f64], pvs: &[f64]) {
    let s = root
        .find(id)
        .unwrap_or_else(|| panic!("sensor {id} missing"));
    let got_chargers: Vec<f64> = s.chargers.iter().map(|c| c.set_point).collect();
    let got_pvs: Vec<f64> = s.pvs.iter().map(|p| p.set_point).collect();
    assert_eq!(got_chargers.len(), chargers.len(), "charger count of {id}");
    assert_eq!(got_pvs.len(), pvs.len(), "pv count of {id}");
    for (got, want) in got_chargers.iter().zip(chargers) {
        assert!(
            (got - want).abs() < TOL,
            "{id} chargers: got {got_chargers:?}, expected {chargers:?}"
        );
    }
    for (got, want) in got_pvs.iter().zip(pvs) {
        assert!(
            (got - want).abs() < TOL,
            "{id} pvs: got {got_pvs:?}, expected {pvs:?}"
        );
    }
}

/// Net consumption of a subtree from its setpoints.
pub fn subtree_net(sensor: &Sensor) -> f64 {
    sensor
        .iter()
        .map(|s| {
            s.chargers.iter().map(|c| c.set_point).sum::<f64>()
                - s.pvs.iter().map(|p| p.set_point).sum::<f64>()
        })
        .sum()
}

/// Checks bounds on every setpoint, every limit, and the root balance.
pub fn assert_invariants(root: &Sensor) {
    for s in root.iter() {
        for c in s.chargers.iter().chain(&s.pvs) {
            assert!(
                c.set_point >= -TOL && c.set_point <= c.demand + TOL,
                "{} setpoint {} outside 0..={}",
                c.id,
                c.set_point,
                c.demand
            );
        }
        if s.id != root.id {
            let net = subtree_net(s);
            assert!(
                net.abs() <= s.limit + TOL,
                "{} carries {net} over limit {}",
                s.id,
                s.limit
            );
            assert!(
                (net - s.flow()).abs() <= TOL,
                "{} flow {} disagrees with setpoints {net}",
                s.id,
                s.flow()
            );
        }
    }
    let balance = subtree_net(root);
    assert!(balance.abs() < TOL, "community unbalanced by {balance}");
}

/// Runs a full round on a fresh tree.
pub fn allocate(mut root: Sensor) -> Sensor {
    root.reset();
    root.set_set_points();
    root
}

/// Small community through the topology API: one PV sensor and one
/// charger sensor, both limited.
pub fn two_sensor_topology() -> Topology {
    let mut t = Topology::new();
    t.add_sensor("solar", 3.0);
    t.add_sensor("parking", 10.0);
    t.add_pv("pv1", "solar");
    t.add_pv("pv2", "solar");
    t.add_charger("ev1", "parking");
    t.add_charger("ev2", "parking");
    t
}

/// Parses an automaton, panicking on malformed XML.
pub fn model(xml: &str) -> Model {
    Model::from_xml_str(xml).expect("test automaton should parse")
}
