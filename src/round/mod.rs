//! Round sequencing: leadership, ticking, callbacks and messages.

pub mod automata;
pub mod driver;
/// Allocation algorithms selectable per configuration.
pub mod logic;
pub mod messages;
pub mod ticker;

pub use driver::{DemandSource, Outbound, RoundDriver, RoundHandle, RoundIo, RoundTiming, SetPointSink};
pub use logic::{AllocationLogic, EqualAllocation, Hierarchical};
pub use messages::{FlowProposalsMessage, SensorLimitsMessage, SetPoint, SetPointsMessage};
pub use ticker::Ticker;
