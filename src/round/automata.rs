//! Built-in automata and loading of custom ones.

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use crate::error::Result;
use crate::sct::Model;

/// Data, calculation and publication run in that order, one round at a time.
pub const ROUND_SEQUENCE: &str = include_str!("../../automata/round_sequence.xml");
/// Same sequence, bound to the equal-share calculation.
pub const EQUAL_ALLOCATION: &str = include_str!("../../automata/equal_allocation.xml");
/// Setpoints are only sent after fresh data arrived.
pub const DATA_GUARD: &str = include_str!("../../automata/data_guard.xml");
/// A flow proposal request is answered by one calculation and one send.
pub const FLOW_PROPOSAL: &str = include_str!("../../automata/flow_proposal.xml");

/// Parses the built-in automata around a round sequence.
///
/// # Errors
///
/// Fails if any description is malformed.
pub fn builtin(round_sequence: &str) -> Result<Vec<Model>> {
    [round_sequence, DATA_GUARD, FLOW_PROPOSAL]
        .into_iter()
        .map(Model::from_xml_str)
        .collect()
}

/// Parses automaton description files in order.
///
/// # Errors
///
/// Fails on the first file that cannot be opened or decoded.
pub fn load(paths: &[PathBuf]) -> Result<Vec<Model>> {
    paths
        .iter()
        .map(|path| Model::from_reader(BufReader::new(File::open(path)?)))
        .collect()
}
