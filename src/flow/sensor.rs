//! Sensor tree and the hierarchical flow allocation.
//!
//! A round runs in two passes over the tree:
//!
//! 1. [`Sensor::calculate_maximum_flow`] walks bottom-up and records, for
//!    every sensor, the net demand of its subtree clamped to its limit.
//! 2. The root and every pinned sensor then distribute power inside their
//!    *region*: the part of the subtree that is not itself pinned. The root
//!    exchanges nothing upstream, a pinned sensor exchanges exactly its
//!    maximum flow.
//!
//! Inside a region that is short on production, every PV runs at full
//! demand and the production pool is water-filled over the chargers.
//! Sensors that are saturated on the producing side are pinned at their
//! limit and settle their own region afterwards. A region with surplus
//! production works the other way around.
//!
//! All bookkeeping fields are per-round scratch state mutated in place
//! while recursing. A tree must not be allocated from two threads at once.

use tracing::debug;

use super::component::{Component, ComponentKind};

/// Amounts below this are treated as zero.
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Balance {
    /// Demand exceeds what the region may obtain.
    Overconsumption,
    /// Production exceeds what the region may get rid of.
    Overproduction,
}

/// A node bounding the net power flow through one point of the grid.
#[derive(Debug, Clone)]
pub struct Sensor {
    pub id: String,
    /// Cap on `|flow|`, `f64::INFINITY` when unconstrained.
    pub limit: f64,
    pub child_sensors: Vec<Sensor>,
    pub pvs: Vec<Component>,
    pub chargers: Vec<Component>,
    maximum_flow: f64,
    net_demand: f64,
    flow: f64,
    num_global_pvs: usize,
    num_global_chargers: usize,
    ignore_during_distribution: bool,
}

impl Sensor {
    /// Creates an empty sensor.
    ///
    /// # Panics
    ///
    /// Panics if `limit` is negative or NaN.
    pub fn new(id: impl Into<String>, limit: f64) -> Self {
        assert!(limit >= 0.0, "sensor limit must be non-negative");
        Self {
            id: id.into(),
            limit,
            child_sensors: Vec::new(),
            pvs: Vec::new(),
            chargers: Vec::new(),
            maximum_flow: 0.0,
            net_demand: 0.0,
            flow: 0.0,
            num_global_pvs: 0,
            num_global_chargers: 0,
            ignore_during_distribution: false,
        }
    }

    /// Creates a sensor without a limit.
    pub fn unlimited(id: impl Into<String>) -> Self {
        Self::new(id, f64::INFINITY)
    }

    pub fn add_child(&mut self, child: Sensor) {
        self.child_sensors.push(child);
    }

    pub fn add_pv(&mut self, pv: Component) {
        self.pvs.push(pv);
    }

    pub fn add_charger(&mut self, charger: Component) {
        self.chargers.push(charger);
    }

    /// Signed net flow committed in the last round, consumption positive.
    pub fn flow(&self) -> f64 {
        self.flow
    }

    /// Achievable net flow of the subtree, clamped to the limit.
    pub fn maximum_flow(&self) -> f64 {
        self.maximum_flow
    }

    /// Whether the last round pinned this sensor at its maximum flow.
    pub fn is_pinned(&self) -> bool {
        self.ignore_during_distribution
    }

    pub fn num_global_pvs(&self) -> usize {
        self.num_global_pvs
    }

    pub fn num_global_chargers(&self) -> usize {
        self.num_global_chargers
    }

    pub fn components(&self, kind: ComponentKind) -> &[Component] {
        match kind {
            ComponentKind::Pv => &self.pvs,
            ComponentKind::Charger => &self.chargers,
        }
    }

    fn components_mut(&mut self, kind: ComponentKind) -> &mut [Component] {
        match kind {
            ComponentKind::Pv => &mut self.pvs,
            ComponentKind::Charger => &mut self.chargers,
        }
    }

    /// Depth-first iterator over this sensor and all descendants.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// Finds a sensor in this subtree by id.
    pub fn find(&self, id: &str) -> Option<&Sensor> {
        self.iter().find(|s| s.id == id)
    }

    /// Finds a sensor in this subtree by id, mutably.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Sensor> {
        if self.id == id {
            return Some(self);
        }
        self.child_sensors.iter_mut().find_map(|c| c.find_mut(id))
    }

    /// Finds a PV or charger in this subtree by id.
    pub fn component_mut(&mut self, id: &str) -> Option<&mut Component> {
        if let Some(c) = self
            .pvs
            .iter_mut()
            .chain(self.chargers.iter_mut())
            .find(|c| c.id == id)
        {
            return Some(c);
        }
        self.child_sensors
            .iter_mut()
            .find_map(|s| s.component_mut(id))
    }

    /// Sets the limit of this sensor and every descendant.
    pub fn set_all_limits(&mut self, limit: f64) {
        self.limit = limit;
        for child in &mut self.child_sensors {
            child.set_all_limits(limit);
        }
    }

    /// Zeroes every setpoint and all per-round bookkeeping in the subtree.
    pub fn reset(&mut self) {
        self.maximum_flow = 0.0;
        self.net_demand = 0.0;
        self.flow = 0.0;
        self.num_global_pvs = 0;
        self.num_global_chargers = 0;
        self.ignore_during_distribution = false;
        for c in self.pvs.iter_mut().chain(self.chargers.iter_mut()) {
            c.set_point = 0.0;
        }
        for child in &mut self.child_sensors {
            child.reset();
        }
    }

    /// Computes setpoints for every component below this sensor, treating
    /// it as the root of the community.
    ///
    /// Expects [`Sensor::reset`] to have been called since the last round.
    pub fn set_set_points(&mut self) {
        self.calculate_maximum_flow();
        self.flow = 0.0;
        self.distribute_region(0.0);
        self.flow = self.internal_flow();
    }

    /// Bottom-up pass: net demand of the subtree, with every child's
    /// contribution already clamped to that child's limit.
    pub fn calculate_maximum_flow(&mut self) -> f64 {
        let children: f64 = self
            .child_sensors
            .iter_mut()
            .map(Sensor::calculate_maximum_flow)
            .sum();
        let local: f64 = self.chargers.iter().map(|c| c.demand).sum::<f64>()
            - self.pvs.iter().map(|p| p.demand).sum::<f64>();

        self.net_demand = local + children;
        self.maximum_flow = self.net_demand.clamp(-self.limit, self.limit);
        self.maximum_flow
    }

    /// True when the subtree could push at least `limit` through this sensor.
    pub fn is_saturated(&self) -> bool {
        self.limit.is_finite() && self.maximum_flow.abs() >= self.limit - EPSILON
    }

    fn local_flow(&self) -> f64 {
        self.chargers.iter().map(|c| c.set_point).sum::<f64>()
            - self.pvs.iter().map(|p| p.set_point).sum::<f64>()
    }

    /// Net flow of local components plus the running flow of each child.
    fn internal_flow(&self) -> f64 {
        self.local_flow() + self.child_sensors.iter().map(|c| c.flow).sum::<f64>()
    }

    fn distribute_region(&mut self, exchange: f64) {
        let balance = if self.net_demand > exchange + EPSILON {
            Balance::Overconsumption
        } else {
            Balance::Overproduction
        };
        self.pin_saturated_children(balance);

        match balance {
            Balance::Overconsumption => {
                self.commit_full_demand(ComponentKind::Pv);
                self.settle_flows();
                self.resolve_child_overflow(balance);
                let pool = exchange - self.internal_flow();
                self.distribute_pv_production(pool);
            }
            Balance::Overproduction => {
                self.commit_full_demand(ComponentKind::Charger);
                self.settle_flows();
                self.resolve_child_overflow(balance);
                let pool = self.internal_flow() - exchange;
                self.distribute_charger_consumption(pool);
            }
        }

        self.iterate_through_children();
    }

    /// Runs the region of every pinned descendant.
    fn iterate_through_children(&mut self) {
        for child in &mut self.child_sensors {
            if child.ignore_during_distribution {
                let exchange = child.maximum_flow;
                child.distribute_region(exchange);
            } else {
                child.iterate_through_children();
            }
        }
    }

    /// Pins saturated descendants that push in the same direction as the
    /// region's surplus side. A zero limit pins in both directions.
    fn pin_saturated_children(&mut self, balance: Balance) {
        for child in &mut self.child_sensors {
            let pinned = child.is_saturated()
                && match balance {
                    Balance::Overconsumption => child.maximum_flow <= EPSILON,
                    Balance::Overproduction => child.maximum_flow >= -EPSILON,
                };
            child.ignore_during_distribution = pinned;
            if pinned {
                child.flow = child.maximum_flow;
            } else {
                child.pin_saturated_children(balance);
            }
        }
    }

    fn commit_full_demand(&mut self, kind: ComponentKind) {
        for c in self.components_mut(kind) {
            c.set_point = c.demand;
        }
        for child in &mut self.child_sensors {
            if !child.ignore_during_distribution {
                child.commit_full_demand(kind);
            }
        }
    }

    fn settle_flows(&mut self) {
        for child in &mut self.child_sensors {
            if !child.ignore_during_distribution {
                child.settle_flows();
                child.flow = child.internal_flow();
            }
        }
    }

    fn resolve_child_overflow(&mut self, balance: Balance) {
        for child in &mut self.child_sensors {
            if !child.ignore_during_distribution {
                child.resolve_overflow(balance);
            }
        }
    }

    /// Keeps power that cannot leave a sensor inside it, deepest sensors
    /// first. Returns the change of this sensor's flow.
    fn resolve_overflow(&mut self, balance: Balance) -> f64 {
        let mut delta: f64 = self
            .child_sensors
            .iter_mut()
            .filter(|c| !c.ignore_during_distribution)
            .map(|c| c.resolve_overflow(balance))
            .sum();
        self.flow += delta;

        match balance {
            Balance::Overconsumption if self.flow < -self.limit => {
                let absorbed = self.distribute_pv_production(-self.limit - self.flow);
                self.flow += absorbed;
                delta += absorbed;
            }
            Balance::Overproduction if self.flow > self.limit => {
                let absorbed = self.distribute_charger_consumption(self.flow - self.limit);
                self.flow -= absorbed;
                delta -= absorbed;
            }
            _ => {}
        }
        delta
    }

    /// Water-fills `amount` of production over the chargers below this
    /// sensor. Returns how much was placed.
    pub fn distribute_pv_production(&mut self, amount: f64) -> f64 {
        self.distribute(amount, ComponentKind::Charger)
    }

    /// Water-fills `amount` of consumption over the PVs below this sensor.
    /// Returns how much was placed.
    pub fn distribute_charger_consumption(&mut self, amount: f64) -> f64 {
        self.distribute(amount, ComponentKind::Pv)
    }

    fn distribute(&mut self, mut amount: f64, kind: ComponentKind) -> f64 {
        let mut placed = 0.0;
        while amount > EPSILON {
            let eligible = self.count_eligible(kind, true);
            if eligible == 0 {
                debug!(sensor = %self.id, %kind, amount, "no eligible counterpart left");
                break;
            }
            let used = self.hand_out(amount / eligible as f64, kind);
            if used <= EPSILON {
                break;
            }
            placed += used;
            amount -= used;
        }
        placed
    }

    /// Counts components of `kind` that can still take an increment.
    ///
    /// Pinned sensors and sensors without headroom count zero, except the
    /// sensor the distribution starts from.
    fn count_eligible(&mut self, kind: ComponentKind, origin: bool) -> usize {
        let count = if !origin && (self.ignore_during_distribution || self.headroom(kind) <= EPSILON)
        {
            0
        } else {
            let local = self
                .components(kind)
                .iter()
                .filter(|c| c.remaining() > EPSILON)
                .count();
            local
                + self
                    .child_sensors
                    .iter_mut()
                    .map(|c| c.count_eligible(kind, false))
                    .sum::<usize>()
        };
        match kind {
            ComponentKind::Pv => self.num_global_pvs = count,
            ComponentKind::Charger => self.num_global_chargers = count,
        }
        count
    }

    fn eligible(&self, kind: ComponentKind) -> usize {
        match kind {
            ComponentKind::Pv => self.num_global_pvs,
            ComponentKind::Charger => self.num_global_chargers,
        }
    }

    /// Room left before `|flow|` hits the limit in the direction `kind`
    /// moves it.
    fn headroom(&self, kind: ComponentKind) -> f64 {
        match kind {
            ComponentKind::Charger => self.limit - self.flow,
            ComponentKind::Pv => self.flow + self.limit,
        }
    }

    fn hand_out(&mut self, per_unit: f64, kind: ComponentKind) -> f64 {
        let mut used = 0.0;
        for c in self.components_mut(kind) {
            let remaining = c.remaining();
            if remaining > EPSILON {
                let increment = per_unit.min(remaining);
                c.set_point += increment;
                used += increment;
            }
        }
        for child in &mut self.child_sensors {
            if !child.ignore_during_distribution && child.eligible(kind) > 0 {
                used += child.push_increment(per_unit, kind);
            }
        }
        used
    }

    /// Hands `per_unit` to every eligible component of the subtree, scaled
    /// down evenly if the subtree's headroom cannot take it all.
    fn push_increment(&mut self, per_unit: f64, kind: ComponentKind) -> f64 {
        let count = self.eligible(kind) as f64;
        let wanted = per_unit * count;
        let allowed = wanted.min(self.headroom(kind));
        let per_unit = if allowed < wanted {
            allowed / count
        } else {
            per_unit
        };
        let used = self.hand_out(per_unit, kind);
        self.flow += kind.flow_sign() * used;
        used
    }
}

/// Depth-first, pre-order traversal of a sensor subtree.
pub struct Iter<'a> {
    stack: Vec<&'a Sensor>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Sensor;

    fn next(&mut self) -> Option<Self::Item> {
        let sensor = self.stack.pop()?;
        self.stack.extend(sensor.child_sensors.iter().rev());
        Some(sensor)
    }
}
