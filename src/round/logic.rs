//! Business rules a round can run to turn demands into setpoints.

use tracing::debug;

use super::automata;
use crate::flow::{ComponentKind, Sensor, Topology};

/// One way of computing setpoints over the community.
pub trait AllocationLogic: Send {
    /// Controllable event this logic is bound to.
    fn event_name(&self) -> &'static str;

    /// Automaton sequencing a round around [`AllocationLogic::event_name`].
    fn round_sequence(&self) -> &'static str;

    /// Overwrites every setpoint in `topology` from its current demands.
    fn allocate(&mut self, topology: &mut Topology);
}

/// Limit-aware allocation over the sensor tree.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hierarchical;

impl AllocationLogic for Hierarchical {
    fn event_name(&self) -> &'static str {
        "calculateSetPoints"
    }

    fn round_sequence(&self) -> &'static str {
        automata::ROUND_SEQUENCE
    }

    fn allocate(&mut self, topology: &mut Topology) {
        topology.allocate();
    }
}

/// Ignores sensor limits: PVs run at full demand and their total production
/// is split evenly over all chargers, each capped at its own demand.
#[derive(Debug, Default, Clone, Copy)]
pub struct EqualAllocation;

impl AllocationLogic for EqualAllocation {
    fn event_name(&self) -> &'static str {
        "calculateEqualAllocationSetPoints"
    }

    fn round_sequence(&self) -> &'static str {
        automata::EQUAL_ALLOCATION
    }

    fn allocate(&mut self, topology: &mut Topology) {
        topology.reset();
        let root = topology.root_mut();

        let production: f64 = root
            .iter()
            .flat_map(|s| s.components(ComponentKind::Pv))
            .map(|p| p.demand)
            .sum();
        let chargers = root
            .iter()
            .map(|s| s.components(ComponentKind::Charger).len())
            .sum::<usize>();
        let share = if chargers > 0 {
            production / chargers as f64
        } else {
            0.0
        };
        debug!(production, chargers, share, "equal allocation");

        assign(root, share);
    }
}

fn assign(sensor: &mut Sensor, share: f64) {
    for pv in &mut sensor.pvs {
        pv.set_point = pv.demand;
    }
    for charger in &mut sensor.chargers {
        charger.set_point = share.min(charger.demand);
    }
    for child in &mut sensor.child_sensors {
        assign(child, share);
    }
}

/// Builds the logic named by `controller.algorithm`.
pub fn from_name(name: &str) -> Option<Box<dyn AllocationLogic>> {
    match name {
        "hierarchical" => Some(Box::new(Hierarchical)),
        "equal" => Some(Box::new(EqualAllocation)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn community() -> Topology {
        let mut t = Topology::new();
        t.add_sensor("a", 1.0);
        t.add_pv("pv1", "a");
        t.add_pv("pv2", "b");
        t.add_charger("c1", "a");
        t.add_charger("c2", "b");
        t.add_charger("c3", "b");
        t.set_demand("pv1", 4.0);
        t.set_demand("pv2", 2.0);
        t.set_demand("c1", 5.0);
        t.set_demand("c2", 1.0);
        t.set_demand("c3", 5.0);
        t
    }

    fn set_point(t: &Topology, id: &str) -> f64 {
        t.set_points()
            .into_iter()
            .find(|r| r.component_id == id)
            .map(|r| r.set_point)
            .expect("component exists")
    }

    #[test]
    fn equal_split_is_capped_by_demand() {
        let mut t = community();
        EqualAllocation.allocate(&mut t);
        assert_eq!(set_point(&t, "pv1"), 4.0);
        assert_eq!(set_point(&t, "pv2"), 2.0);
        assert_eq!(set_point(&t, "c1"), 2.0);
        assert_eq!(set_point(&t, "c2"), 1.0);
        assert_eq!(set_point(&t, "c3"), 2.0);
    }

    #[test]
    fn equal_without_chargers_leaves_pvs_at_demand() {
        let mut t = Topology::new();
        t.add_pv("pv1", "a");
        t.set_demand("pv1", 3.0);
        EqualAllocation.allocate(&mut t);
        assert_eq!(set_point(&t, "pv1"), 3.0);
    }

    #[test]
    fn hierarchical_respects_limits() {
        let mut t = community();
        Hierarchical.allocate(&mut t);
        let a = t.sensor("a").expect("a");
        assert!(a.flow().abs() <= 1.0 + 1e-9);
    }

    #[test]
    fn from_name_matches_event_names() {
        let names: Vec<_> = ["hierarchical", "equal"]
            .iter()
            .filter_map(|n| from_name(n))
            .map(|l| l.event_name())
            .collect();
        assert_eq!(
            names,
            vec!["calculateSetPoints", "calculateEqualAllocationSetPoints"]
        );
        assert!(from_name("greedy").is_none());
    }

    #[test]
    fn round_sequence_declares_the_event() {
        for logic in [from_name("hierarchical"), from_name("equal")].into_iter().flatten() {
            assert!(logic.round_sequence().contains(logic.event_name()));
        }
    }
}
