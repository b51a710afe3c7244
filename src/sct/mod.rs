/// Supervisor engine, event queue and tie-break strategies.
pub mod engine;
/// XML schema of automaton description files.
pub mod model;
pub mod supervisor;

pub use engine::{
    Callback, Callbacks, EventSender, FirstByName, SupervisorEngine, TieBreak, UniformRandom,
};
pub use model::Model;
pub use supervisor::{Event, Supervisor};
