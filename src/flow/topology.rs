//! Sensor tree construction and round entry points.

use std::collections::HashMap;

use serde::Serialize;
use tracing::warn;

use super::component::{Component, ComponentKind};
use super::sensor::Sensor;
use crate::config::ControllerConfig;

/// Id of the virtual sensor every top-level sensor hangs off.
pub const ROOT_ID: &str = "root";

/// Setpoint of one component after a round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentSetPoint {
    pub sensor_id: String,
    pub component_id: String,
    pub kind: ComponentKind,
    pub demand: f64,
    pub set_point: f64,
}

/// The community's sensor tree under a virtual, unlimited root.
///
/// The root has no upstream connection: production and consumption are
/// only ever balanced inside the community.
#[derive(Debug, Clone)]
pub struct Topology {
    root: Sensor,
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

impl Topology {
    pub fn new() -> Self {
        Self {
            root: Sensor::unlimited(ROOT_ID),
        }
    }

    pub fn root(&self) -> &Sensor {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Sensor {
        &mut self.root
    }

    /// Looks up a sensor by id.
    pub fn sensor(&self, id: &str) -> Option<&Sensor> {
        self.root.find(id)
    }

    /// Adds a top-level sensor, or updates the limit of an existing one.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is negative or NaN.
    pub fn add_sensor(&mut self, id: &str, limit: f64) {
        assert!(is_valid_limit(limit), "sensor limit must be non-negative");
        match self.root.find_mut(id) {
            Some(sensor) => sensor.limit = limit,
            None => self.root.add_child(Sensor::new(id, limit)),
        }
    }

    fn sensor_or_insert(&mut self, id: &str) -> &mut Sensor {
        if self.root.find(id).is_none() {
            self.root.add_child(Sensor::unlimited(id));
        }
        self.root
            .find_mut(id)
            .expect("sensor was inserted above")
    }

    /// Attaches a PV with zero demand, creating an unlimited top-level
    /// sensor if `sensor_id` is unknown.
    pub fn add_pv(&mut self, pv_id: &str, sensor_id: &str) {
        self.sensor_or_insert(sensor_id)
            .add_pv(Component::new(pv_id, 0.0));
    }

    /// Attaches a charger with zero demand, creating an unlimited top-level
    /// sensor if `sensor_id` is unknown.
    pub fn add_charger(&mut self, charger_id: &str, sensor_id: &str) {
        self.sensor_or_insert(sensor_id)
            .add_charger(Component::new(charger_id, 0.0));
    }

    /// Removes a PV or charger. Returns `false` if no component has that id.
    pub fn remove_node(&mut self, id: &str) -> bool {
        fn remove(sensor: &mut Sensor, id: &str) -> bool {
            for list in [&mut sensor.pvs, &mut sensor.chargers] {
                if let Some(pos) = list.iter().position(|c| c.id == id) {
                    list.remove(pos);
                    return true;
                }
            }
            sensor.child_sensors.iter_mut().any(|c| remove(c, id))
        }
        remove(&mut self.root, id)
    }

    /// Rearranges sensors according to a `parent -> children` map.
    ///
    /// Sensors named in the map but unknown so far are created unlimited.
    /// Sensors without a parent become children of the root. A sensor
    /// claimed by a second parent, or caught in a cycle, is attached to the
    /// root instead.
    pub fn build(&mut self, links: &HashMap<String, Vec<String>>) {
        let mut pool: HashMap<String, Sensor> = HashMap::new();
        for child in std::mem::take(&mut self.root.child_sensors) {
            detach(child, &mut pool);
        }
        for (parent, children) in links {
            for id in std::iter::once(parent).chain(children) {
                pool.entry(id.clone())
                    .or_insert_with(|| Sensor::unlimited(id.as_str()));
            }
        }

        let claimed: std::collections::HashSet<&str> =
            links.values().flatten().map(String::as_str).collect();
        let mut tops: Vec<String> = pool
            .keys()
            .filter(|id| !claimed.contains(id.as_str()))
            .cloned()
            .collect();
        tops.sort_unstable();

        for id in tops {
            if let Some(sensor) = attach(&id, links, &mut pool) {
                self.root.add_child(sensor);
            }
        }

        let mut leftover: Vec<String> = pool.keys().cloned().collect();
        leftover.sort_unstable();
        for id in leftover {
            if let Some(sensor) = attach(&id, links, &mut pool) {
                warn!(sensor = %id, "sensor is part of a cycle, attaching it to the root");
                self.root.add_child(sensor);
            }
        }
    }

    /// Sets one sensor's limit. Returns `false` for unknown sensors, the
    /// root, and negative or NaN limits.
    pub fn set_sensor_limit(&mut self, id: &str, limit: f64) -> bool {
        if !is_valid_limit(limit) {
            return false;
        }
        match self.root.find_mut(id) {
            Some(sensor) if sensor.id != ROOT_ID => {
                sensor.limit = limit;
                true
            }
            _ => false,
        }
    }

    /// Sets the limit of every sensor below the root. Negative or NaN
    /// limits are ignored.
    pub fn set_all_sensor_limits(&mut self, limit: f64) {
        if !is_valid_limit(limit) {
            warn!(limit, "invalid sensor limit ignored");
            return;
        }
        for child in &mut self.root.child_sensors {
            child.set_all_limits(limit);
        }
    }

    /// Applies a limit update from the grid operator.
    ///
    /// Sensors missing from `limits` are closed (limit 0), and so are
    /// sensors whose limit is negative or NaN. Returns the ids in `limits`
    /// that were rejected: unknown sensors and invalid limits.
    pub fn apply_sensor_limits(&mut self, limits: &HashMap<String, f64>) -> Vec<String> {
        self.set_all_sensor_limits(0.0);
        let mut rejected: Vec<String> = limits
            .iter()
            .filter(|(id, limit)| !self.set_sensor_limit(id, **limit))
            .map(|(id, _)| id.clone())
            .collect();
        rejected.sort_unstable();
        rejected
    }

    /// Sets the demand of a PV or charger. Returns `false` for unknown ids.
    ///
    /// Negative demands are stored as zero.
    pub fn set_demand(&mut self, id: &str, demand: f64) -> bool {
        match self.root.component_mut(id) {
            Some(component) => {
                component.demand = demand.max(0.0);
                true
            }
            None => false,
        }
    }

    /// Clears the previous round's state.
    pub fn reset(&mut self) {
        self.root.reset();
    }

    /// Computes setpoints from the current demands and limits.
    pub fn set_set_points(&mut self) {
        self.root.set_set_points();
    }

    /// Resets and runs one allocation round.
    pub fn allocate(&mut self) {
        self.reset();
        self.set_set_points();
    }

    /// Every component's setpoint, PVs before chargers, in tree order.
    pub fn set_points(&self) -> Vec<ComponentSetPoint> {
        let mut rows = Vec::new();
        for sensor in self.root.iter() {
            for kind in [ComponentKind::Pv, ComponentKind::Charger] {
                rows.extend(sensor.components(kind).iter().map(|c| ComponentSetPoint {
                    sensor_id: sensor.id.clone(),
                    component_id: c.id.clone(),
                    kind,
                    demand: c.demand,
                    set_point: c.set_point,
                }));
            }
        }
        rows
    }

    /// Ids of all components of one kind.
    pub fn component_ids(&self, kind: ComponentKind) -> Vec<String> {
        self.root
            .iter()
            .flat_map(|s| s.components(kind).iter().map(|c| c.id.clone()))
            .collect()
    }
}

impl Topology {
    /// Builds the sensor tree and attaches every configured component with
    /// zero demand. Assumes the configuration passed validation.
    pub fn from_config(config: &ControllerConfig) -> Self {
        let mut topology = Self::new();
        let mut links: HashMap<String, Vec<String>> = HashMap::new();
        for s in &config.sensors {
            topology.add_sensor(&s.id, s.limit.unwrap_or(f64::INFINITY));
            if let Some(parent) = &s.parent {
                links.entry(parent.clone()).or_default().push(s.id.clone());
            }
        }
        topology.build(&links);
        for pv in &config.pvs {
            topology.add_pv(&pv.id, &pv.sensor);
        }
        for charger in &config.chargers {
            topology.add_charger(&charger.id, &charger.sensor);
        }
        topology
    }
}

fn is_valid_limit(limit: f64) -> bool {
    limit >= 0.0
}

fn detach(mut sensor: Sensor, pool: &mut HashMap<String, Sensor>) {
    for child in std::mem::take(&mut sensor.child_sensors) {
        detach(child, pool);
    }
    pool.insert(sensor.id.clone(), sensor);
}

fn attach(
    id: &str,
    links: &HashMap<String, Vec<String>>,
    pool: &mut HashMap<String, Sensor>,
) -> Option<Sensor> {
    let mut sensor = pool.remove(id)?;
    for child_id in links.get(id).into_iter().flatten() {
        match attach(child_id, links, pool) {
            Some(child) => sensor.add_child(child),
            None => warn!(parent = %id, child = %child_id, "sensor already attached elsewhere"),
        }
    }
    Some(sensor)
}
