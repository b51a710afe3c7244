//! Serde schema for automaton description files.
//!
//! A file looks like:
//!
//! ```xml
//! <model><data>
//!   <state id="0" name="idle" initial="True" marked="True" x="0" y="0"/>
//!   <event id="0" name="newRound" controllable="False" observable="True"/>
//!   <transition source="0" target="1" event="0"/>
//! </data></model>
//! ```

use std::io::BufRead;

use serde::Deserialize;

use crate::error::Result;

/// Root `<model>` element.
#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub data: Data,
}

/// The `<data>` element holding states, events and transitions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Data {
    #[serde(rename = "state", default)]
    pub states: Vec<StateDef>,
    #[serde(rename = "event", default)]
    pub events: Vec<EventDef>,
    #[serde(rename = "transition", default)]
    pub transitions: Vec<TransitionDef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StateDef {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@name", default)]
    pub name: String,
    /// Only the exact string `"True"` marks the initial state.
    #[serde(rename = "@initial", default)]
    pub initial: String,
    #[serde(rename = "@marked", default)]
    pub marked: String,
    #[serde(rename = "@x", default)]
    pub x: String,
    #[serde(rename = "@y", default)]
    pub y: String,
}

impl StateDef {
    pub fn is_initial(&self) -> bool {
        self.initial == "True"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventDef {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@name")]
    pub name: String,
    #[serde(rename = "@controllable", default)]
    pub controllable: String,
    #[serde(rename = "@observable", default)]
    pub observable: String,
}

impl EventDef {
    pub fn is_controllable(&self) -> bool {
        self.controllable == "True"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransitionDef {
    #[serde(rename = "@source")]
    pub source: String,
    #[serde(rename = "@target")]
    pub target: String,
    #[serde(rename = "@event")]
    pub event: String,
}

impl Model {
    /// Decodes a model from any buffered reader.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Xml`] if the document is malformed or
    /// misses required attributes.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        Ok(quick_xml::de::from_reader(reader)?)
    }

    /// Decodes a model from a string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Xml`] if the document is malformed.
    pub fn from_xml_str(xml: &str) -> Result<Self> {
        Ok(quick_xml::de::from_str(xml)?)
    }
}
