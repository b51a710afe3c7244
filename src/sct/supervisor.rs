//! A single compiled automaton.

use std::collections::{HashMap, HashSet};

use super::model::Model;
use crate::error::{Error, Result};

/// An event known to the engine. Events are identified by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Event {
    pub name: String,
    pub controllable: bool,
}

/// Arena entry: outgoing transitions keyed by event name.
#[derive(Debug, Clone, Default)]
struct State {
    transitions: HashMap<String, usize>,
}

/// One automaton restricting which controllable events may fire.
///
/// States are stored in an arena and refer to each other by index, so
/// cycles and states reachable over several paths need no shared ownership.
#[derive(Debug, Clone)]
pub struct Supervisor {
    states: Vec<State>,
    current: usize,
    alphabet: HashSet<String>,
}

impl Supervisor {
    /// Compiles a parsed model into a supervisor.
    ///
    /// Only states reachable from the initial state are kept. Returns the
    /// supervisor together with the events declared in the model, in
    /// declaration order.
    ///
    /// # Arguments
    ///
    /// * `automaton` - Position of the model in the engine input, used in errors
    /// * `model` - Parsed automaton description
    ///
    /// # Errors
    ///
    /// Fails if the model does not have exactly one initial state or if a
    /// reachable transition references an undeclared event or state.
    pub fn compile(automaton: usize, model: &Model) -> Result<(Self, Vec<Event>)> {
        let data = &model.data;

        let mut events_by_id = HashMap::new();
        let mut events = Vec::with_capacity(data.events.len());
        for def in &data.events {
            let event = Event {
                name: def.name.clone(),
                controllable: def.is_controllable(),
            };
            events_by_id.insert(def.id.as_str(), event.clone());
            events.push(event);
        }

        let initials: Vec<_> = data.states.iter().filter(|s| s.is_initial()).collect();
        if initials.len() != 1 {
            return Err(Error::InitialState {
                automaton,
                found: initials.len(),
            });
        }
        let declared: HashSet<&str> = data.states.iter().map(|s| s.id.as_str()).collect();

        let mut outgoing: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
        for t in &data.transitions {
            outgoing
                .entry(t.source.as_str())
                .or_default()
                .push((t.event.as_str(), t.target.as_str()));
        }

        // Reachability from the initial state, assigning arena slots in
        // discovery order.
        let mut index: HashMap<&str, usize> = HashMap::new();
        let mut states: Vec<State> = Vec::new();
        let mut stack = vec![initials[0].id.as_str()];
        index.insert(initials[0].id.as_str(), 0);
        states.push(State::default());

        while let Some(source) = stack.pop() {
            let slot = index[source];
            for &(event_id, target) in outgoing.get(source).into_iter().flatten() {
                let event = events_by_id.get(event_id).ok_or_else(|| Error::UnknownEvent {
                    automaton,
                    event: event_id.to_string(),
                })?;
                if !declared.contains(target) {
                    return Err(Error::UnknownState {
                        automaton,
                        state: target.to_string(),
                    });
                }
                let target_slot = match index.get(target) {
                    Some(&existing) => existing,
                    None => {
                        let next = states.len();
                        index.insert(target, next);
                        states.push(State::default());
                        stack.push(target);
                        next
                    }
                };
                states[slot]
                    .transitions
                    .insert(event.name.clone(), target_slot);
            }
        }

        let alphabet = events.iter().map(|e| e.name.clone()).collect();
        Ok((
            Self {
                states,
                current: 0,
                alphabet,
            },
            events,
        ))
    }

    /// Follows the transition for `event`, or stays put if there is none.
    pub fn change_state(&mut self, event: &str) {
        if let Some(&next) = self.states[self.current].transitions.get(event) {
            self.current = next;
        }
    }

    /// Returns `true` if `event` belongs to this automaton's alphabet.
    pub fn defines(&self, event: &str) -> bool {
        self.alphabet.contains(event)
    }

    /// Returns `true` if the current state has a transition for `event`.
    pub fn is_enabled(&self, event: &str) -> bool {
        self.states[self.current].transitions.contains_key(event)
    }

    /// Returns `true` unless this automaton defines `event` and currently
    /// disables it.
    pub fn permits(&self, event: &str) -> bool {
        !self.defines(event) || self.is_enabled(event)
    }

    /// Arena index of the current state.
    pub fn current_state(&self) -> usize {
        self.current
    }

    /// Number of states reachable from the initial state.
    pub fn state_count(&self) -> usize {
        self.states.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(xml: &str) -> Model {
        Model::from_xml_str(xml).expect("test model should parse")
    }

    const CYCLE: &str = r#"<model><data>
        <state id="a" name="a" initial="True"/>
        <state id="b" name="b" initial="False"/>
        <state id="c" name="c" initial="False"/>
        <state id="orphan" name="orphan" initial="False"/>
        <event id="1" name="go" controllable="True"/>
        <event id="2" name="back" controllable="False"/>
        <event id="3" name="skip" controllable="True"/>
        <transition source="a" target="b" event="1"/>
        <transition source="b" target="a" event="2"/>
        <transition source="a" target="c" event="3"/>
        <transition source="c" target="b" event="1"/>
        <transition source="orphan" target="a" event="1"/>
    </data></model>"#;

    #[test]
    fn compiles_reachable_states_once() {
        let (sup, events) = Supervisor::compile(0, &model(CYCLE)).expect("compiles");
        // orphan is unreachable, b is shared by two paths
        assert_eq!(sup.state_count(), 3);
        assert_eq!(events.len(), 3);
        assert!(events[0].controllable);
        assert!(!events[1].controllable);
    }

    #[test]
    fn change_state_follows_transitions_and_cycles() {
        let (mut sup, _) = Supervisor::compile(0, &model(CYCLE)).expect("compiles");
        let start = sup.current_state();
        assert!(sup.is_enabled("go"));
        sup.change_state("go");
        assert!(sup.is_enabled("back"));
        assert!(!sup.is_enabled("go"));
        sup.change_state("back");
        assert_eq!(sup.current_state(), start);
    }

    #[test]
    fn change_state_without_transition_is_noop() {
        let (mut sup, _) = Supervisor::compile(0, &model(CYCLE)).expect("compiles");
        let start = sup.current_state();
        sup.change_state("back");
        sup.change_state("unknown");
        assert_eq!(sup.current_state(), start);
    }

    #[test]
    fn permits_only_vetoes_defined_events() {
        let (mut sup, _) = Supervisor::compile(0, &model(CYCLE)).expect("compiles");
        assert!(sup.permits("go"));
        assert!(sup.permits("not_in_alphabet"));
        sup.change_state("go");
        assert!(!sup.permits("go"));
        assert!(!sup.permits("skip"));
        assert!(sup.permits("not_in_alphabet"));
    }

    #[test]
    fn missing_initial_state_is_rejected() {
        let xml = CYCLE.replace(r#"initial="True""#, r#"initial="False""#);
        let err = Supervisor::compile(3, &model(&xml)).unwrap_err();
        assert!(matches!(err, Error::InitialState { automaton: 3, found: 0 }));
    }

    #[test]
    fn two_initial_states_are_rejected() {
        let xml = CYCLE.replace(
            r#"<state id="b" name="b" initial="False"/>"#,
            r#"<state id="b" name="b" initial="True"/>"#,
        );
        let err = Supervisor::compile(0, &model(&xml)).unwrap_err();
        assert!(matches!(err, Error::InitialState { found: 2, .. }));
    }

    #[test]
    fn unknown_event_id_is_rejected() {
        let xml = CYCLE.replace(
            r#"source="b" target="a" event="2""#,
            r#"source="b" target="a" event="99""#,
        );
        let err = Supervisor::compile(0, &model(&xml)).unwrap_err();
        assert!(matches!(err, Error::UnknownEvent { .. }));
    }

    #[test]
    fn unknown_target_state_is_rejected() {
        let xml = CYCLE.replace(r#"source="a" target="c""#, r#"source="a" target="zz""#);
        let err = Supervisor::compile(0, &model(&xml)).unwrap_err();
        assert!(matches!(err, Error::UnknownState { .. }));
    }
}
