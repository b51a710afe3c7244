//! Error types for supervisor construction, round setup and event delivery.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read automaton: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode automaton XML: {0}")]
    Xml(#[from] quick_xml::DeError),
    #[error("automaton {automaton} must have exactly one initial state, found {found}")]
    InitialState { automaton: usize, found: usize },
    #[error("automaton {automaton} references unknown event id \"{event}\"")]
    UnknownEvent { automaton: usize, event: String },
    #[error("automaton {automaton} references unknown state id \"{state}\"")]
    UnknownState { automaton: usize, state: String },
    #[error("controllable event \"{0}\" has no registered callback")]
    MissingCallback(String),
    #[error("unknown allocation algorithm \"{0}\"")]
    UnknownAlgorithm(String),
    #[error("event queue is closed")]
    QueueClosed,
    #[error("event queue is full, dropped \"{0}\"")]
    QueueFull(String),
}
