//! Payloads exchanged with components and the grid operator.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::flow::{ComponentKind, ComponentSetPoint, FlowProposal};

/// Power granted to one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPoint {
    pub id: String,
    pub kind: ComponentKind,
    pub value: f64,
}

impl From<&ComponentSetPoint> for SetPoint {
    fn from(row: &ComponentSetPoint) -> Self {
        Self {
            id: row.component_id.clone(),
            kind: row.kind,
            value: row.set_point,
        }
    }
}

/// All setpoints of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPointsMessage {
    pub round: u64,
    pub set_points: Vec<SetPoint>,
}

/// Unconstrained flows per sensor, sent to the grid operator so it can
/// choose limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowProposalsMessage {
    pub proposals: BTreeMap<String, FlowProposal>,
}

/// Limits granted by the grid operator, keyed by sensor id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorLimitsMessage {
    pub sensor_limits: HashMap<String, f64>,
}
