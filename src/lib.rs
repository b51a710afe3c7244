//! Round controller for an energy community.
//!
//! Rounds are sequenced by a decentralized supervisor engine ([`sct`]) and
//! allocate PV production and charger consumption over a tree of
//! capacity-limited sensors ([`flow`]).

pub mod config;
pub mod error;
pub mod flow;
pub mod io;
/// Leadership, ticking, round callbacks and messages.
pub mod round;
pub mod sct;
