use std::fmt;

use serde::{Deserialize, Serialize};

/// Which side of the balance a component sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    /// Producer.
    Pv,
    /// Consumer.
    Charger,
}

impl ComponentKind {
    /// Sign of this kind's contribution to sensor flow (consumption positive).
    pub fn flow_sign(self) -> f64 {
        match self {
            Self::Charger => 1.0,
            Self::Pv => -1.0,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pv => write!(f, "pv"),
            Self::Charger => write!(f, "charger"),
        }
    }
}

/// A PV or charger leaf with the power it asks for and the power it was
/// granted for the current round.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: String,
    /// Requested power, never negative.
    pub demand: f64,
    /// Granted power, kept within `0..=demand`.
    pub set_point: f64,
}

impl Component {
    /// Creates a component with zero setpoint.
    ///
    /// # Panics
    ///
    /// Panics if `demand` is negative or NaN.
    pub fn new(id: impl Into<String>, demand: f64) -> Self {
        assert!(demand >= 0.0, "component demand must be non-negative");
        Self {
            id: id.into(),
            demand,
            set_point: 0.0,
        }
    }

    /// Demand not yet covered by the setpoint.
    pub fn remaining(&self) -> f64 {
        (self.demand - self.set_point).max(0.0)
    }
}
