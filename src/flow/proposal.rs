use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::component::ComponentKind;
use super::sensor::Sensor;
use super::topology::Topology;

const EPSILON: f64 = 1e-9;

/// What a sensor would carry if the grid operator imposed no limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowProposal {
    /// Net flow through the sensor, consumption positive.
    pub flow: f64,
    /// Components driving that flow: active chargers below a consuming
    /// sensor, active PVs below a producing one.
    pub number_of_nodes: usize,
}

impl FlowProposal {
    fn for_sensor(sensor: &Sensor) -> Self {
        let flow = sensor.flow();
        let kind = if flow > EPSILON {
            Some(ComponentKind::Charger)
        } else if flow < -EPSILON {
            Some(ComponentKind::Pv)
        } else {
            None
        };
        let number_of_nodes = kind.map_or(0, |kind| {
            sensor
                .iter()
                .flat_map(|s| s.components(kind))
                .filter(|c| c.set_point > EPSILON)
                .count()
        });
        Self {
            flow,
            number_of_nodes,
        }
    }
}

impl Topology {
    /// Runs an unconstrained round on a copy of the tree and reports the
    /// resulting flow per sensor. The tree itself, including its limits and
    /// setpoints, is left untouched.
    pub fn flow_proposals(&self) -> BTreeMap<String, FlowProposal> {
        let mut unconstrained = self.clone();
        unconstrained.set_all_sensor_limits(f64::INFINITY);
        unconstrained.allocate();
        unconstrained
            .root()
            .iter()
            .skip(1)
            .map(|s| (s.id.clone(), FlowProposal::for_sensor(s)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proposals_ignore_limits() {
        let mut t = Topology::new();
        t.add_sensor("a", 1.0);
        t.add_sensor("b", 1.0);
        t.add_charger("c1", "a");
        t.add_pv("p1", "b");
        t.add_pv("p2", "b");
        t.set_demand("c1", 4.0);
        t.set_demand("p1", 3.0);
        t.set_demand("p2", 3.0);

        let proposals = t.flow_proposals();
        let a = proposals["a"];
        let b = proposals["b"];
        assert!((a.flow - 4.0).abs() < 1e-9);
        assert_eq!(a.number_of_nodes, 1);
        assert!((b.flow + 4.0).abs() < 1e-9);
        assert_eq!(b.number_of_nodes, 2);

        assert_eq!(t.sensor("a").map(|s| s.limit), Some(1.0));
        assert!(t.set_points().iter().all(|r| r.set_point == 0.0));
    }

    #[test]
    fn idle_sensor_reports_no_nodes() {
        let mut t = Topology::new();
        t.add_charger("c1", "a");
        let proposals = t.flow_proposals();
        assert_eq!(proposals["a"].flow, 0.0);
        assert_eq!(proposals["a"].number_of_nodes, 0);
        assert!(!proposals.contains_key("root"));
    }

    #[test]
    fn serializes_camel_case() {
        let p = FlowProposal {
            flow: 1.5,
            number_of_nodes: 2,
        };
        let json = serde_json::to_string(&p).expect("serializes");
        assert_eq!(json, r#"{"flow":1.5,"numberOfNodes":2}"#);
    }
}
