//! Declarative phases and their static effects on the status record.
//!
//! A phase in the configuration names several optional effects; the first one
//! that is set wins. The choice is made once when the configuration is
//! deserialized (`PhaseConfig` -> [`Phase`]), so the engine only ever matches
//! on a closed set of variants.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::core::status::StatusRecord;

/// Raw phase as written in the YAML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PhaseConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub http_url: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub write_file: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub static_list: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub static_map: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub static_value: String,
}

/// One unit of work applied to the status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PhaseConfig", into = "PhaseConfig")]
pub enum Phase {
    /// Run a shell command that may rewrite the whole status.
    Command(String),
    /// Dump the status as JSON to a file.
    WriteFile(PathBuf),
    /// Reserved: posting the status to a URL is not implemented and does nothing.
    HttpUrl(String),
    StaticValue(String),
    StaticList(Vec<String>),
    StaticMap(BTreeMap<String, String>),
    /// Nothing was set.
    Noop,
}

impl From<PhaseConfig> for Phase {
    fn from(raw: PhaseConfig) -> Self {
        if !raw.command.is_empty() {
            Phase::Command(raw.command)
        } else if !raw.write_file.is_empty() {
            Phase::WriteFile(PathBuf::from(raw.write_file))
        } else if !raw.http_url.is_empty() {
            Phase::HttpUrl(raw.http_url)
        } else if !raw.static_value.is_empty() {
            Phase::StaticValue(raw.static_value)
        } else if !raw.static_list.is_empty() {
            Phase::StaticList(raw.static_list)
        } else if !raw.static_map.is_empty() {
            Phase::StaticMap(raw.static_map)
        } else {
            Phase::Noop
        }
    }
}

impl From<Phase> for PhaseConfig {
    fn from(phase: Phase) -> Self {
        let mut raw = PhaseConfig::default();
        match phase {
            Phase::Command(command) => raw.command = command,
            Phase::WriteFile(path) => raw.write_file = path.to_string_lossy().into_owned(),
            Phase::HttpUrl(url) => raw.http_url = url,
            Phase::StaticValue(value) => raw.static_value = value,
            Phase::StaticList(list) => raw.static_list = list,
            Phase::StaticMap(map) => raw.static_map = map,
            Phase::Noop => {}
        }
        raw
    }
}

impl Phase {
    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Phase::Command(_) => "command",
            Phase::WriteFile(_) => "write-file",
            Phase::HttpUrl(_) => "http-url",
            Phase::StaticValue(_) => "static-value",
            Phase::StaticList(_) => "static-list",
            Phase::StaticMap(_) => "static-map",
            Phase::Noop => "noop",
        }
    }
}

/// Scalar status fields a stage can expose to its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarField {
    Action,
    RunStatus,
}

/// List status fields a stage can expose to its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayField {
    Provides,
    BrokenProvides,
}

/// Map status fields a stage can expose to its phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapField {
    RequiredTestAttributes,
}

/// Output targets a stage binds for static phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Slots {
    pub scalar: Option<ScalarField>,
    pub array: Option<ArrayField>,
    pub map: Option<MapField>,
}

impl Slots {
    pub const NONE: Slots = Slots {
        scalar: None,
        array: None,
        map: None,
    };

    pub const fn scalar(field: ScalarField) -> Self {
        Slots {
            scalar: Some(field),
            array: None,
            map: None,
        }
    }

    pub const fn array(field: ArrayField) -> Self {
        Slots {
            scalar: None,
            array: Some(field),
            map: None,
        }
    }

    pub const fn map(field: MapField) -> Self {
        Slots {
            scalar: None,
            array: None,
            map: Some(field),
        }
    }
}

/// Apply a static phase (value, list, map) to the bound slots.
///
/// Scalar values go to the scalar slot, or are appended to the array slot when
/// no scalar slot is bound. Lists only append to the array slot. Maps merge
/// into the map slot and are silently dropped when the stage binds none,
/// unlike values and lists which report an error. Non-static phases are left
/// to the caller and return `Ok` here.
pub fn apply_static(phase: &Phase, status: &mut StatusRecord, slots: Slots) -> Result<(), String> {
    match phase {
        Phase::StaticValue(value) => {
            if let Some(field) = slots.scalar {
                set_scalar(status, field, value);
                Ok(())
            } else if let Some(field) = slots.array {
                array_mut(status, field).push(value.clone());
                Ok(())
            } else {
                Err(format!(
                    "static value {value:?} is not valid during this stage (no scalar or list slot)"
                ))
            }
        }
        Phase::StaticList(list) => match slots.array {
            Some(field) => {
                array_mut(status, field).extend(list.iter().cloned());
                Ok(())
            }
            None => Err(format!(
                "static list {list:?} is not valid during this stage (no list slot)"
            )),
        },
        Phase::StaticMap(map) => {
            if let Some(field) = slots.map {
                let target = map_mut(status, field);
                for (key, value) in map {
                    target.insert(key.clone(), value.clone());
                }
            }
            Ok(())
        }
        Phase::Command(_) | Phase::WriteFile(_) | Phase::HttpUrl(_) | Phase::Noop => Ok(()),
    }
}

fn set_scalar(status: &mut StatusRecord, field: ScalarField, value: &str) {
    match field {
        ScalarField::Action => status.action = value.to_string(),
        ScalarField::RunStatus => status.run_status = value.into(),
    }
}

fn array_mut(status: &mut StatusRecord, field: ArrayField) -> &mut Vec<String> {
    match field {
        ArrayField::Provides => &mut status.provides,
        ArrayField::BrokenProvides => &mut status.broken_provides,
    }
}

fn map_mut(status: &mut StatusRecord, field: MapField) -> &mut BTreeMap<String, String> {
    match field {
        MapField::RequiredTestAttributes => &mut status.required_test_attributes,
    }
}
