//! Community model and setpoint allocation.

pub mod component;
pub mod proposal;
pub mod sensor;
pub mod topology;

pub use component::{Component, ComponentKind};
pub use proposal::FlowProposal;
pub use sensor::Sensor;
pub use topology::{ComponentSetPoint, ROOT_ID, Topology};
