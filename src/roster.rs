//! Declarative jail rosters
//!
//! A roster lists jails with fixed slots, either as TOML:
//!
//! ```toml
//! [[jails]]
//! name = "web"
//! slot = 1
//! version = "14.1-RELEASE"
//! devfs_ruleset = 4
//! ```
//!
//! or as JSON (`{"jails": [{"name": "web", "number": 1, ...}]}`). Keys other
//! than `name`, `slot`/`number` and `version` become extra template fields.

use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// One declared jail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JailSpec {
    pub name: String,
    pub slot: u32,
    pub version: String,
    pub extra: BTreeMap<String, String>,
}

/// All jails declared in one document, in document order
#[derive(Debug, Clone, Default)]
pub struct Roster {
    pub jails: Vec<JailSpec>,
}

impl Roster {
    /// Load a roster, choosing the format by extension
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(Error::RosterParse(format!(
                "{}: expected a .toml or .json file",
                path.display()
            ))),
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(content)
            .map_err(|e| Error::RosterParse(format!("invalid JSON: {}", e)))?;
        Self::from_value(doc)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let doc: Value = toml::from_str(content)
            .map_err(|e| Error::RosterParse(format!("invalid TOML: {}", e)))?;
        Self::from_value(doc)
    }

    fn from_value(doc: Value) -> Result<Self> {
        let entries = match doc.get("jails") {
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(Error::RosterParse("'jails' must be a list".into())),
            None => return Err(Error::RosterParse("missing 'jails' list".into())),
        };

        let mut jails = Vec::with_capacity(entries.len());
        let mut names = BTreeSet::new();
        let mut slots = BTreeMap::new();

        for (index, entry) in entries.iter().enumerate() {
            let spec = parse_entry(index, entry)?;

            if !names.insert(spec.name.clone()) {
                return Err(Error::Validation(format!(
                    "jail '{}' is declared more than once",
                    spec.name
                )));
            }
            if let Some(other) = slots.insert(spec.slot, spec.name.clone()) {
                return Err(Error::Validation(format!(
                    "slot {} is declared for both '{}' and '{}'",
                    spec.slot, other, spec.name
                )));
            }

            jails.push(spec);
        }

        Ok(Self { jails })
    }

    /// Find a declared jail by name
    pub fn find(&self, name: &str) -> Option<&JailSpec> {
        self.jails.iter().find(|j| j.name == name)
    }

    /// Restrict to one jail
    pub fn only(mut self, name: &str) -> Result<Self> {
        self.jails.retain(|j| j.name == name);
        if self.jails.is_empty() {
            return Err(Error::JailNotFound(name.to_string()));
        }
        Ok(self)
    }
}

fn entry_label(index: usize, entry: &Map<String, Value>) -> String {
    match entry.get("name").and_then(Value::as_str) {
        Some(name) => format!("{} ('{}')", index + 1, name),
        None => (index + 1).to_string(),
    }
}

fn parse_entry(index: usize, entry: &Value) -> Result<JailSpec> {
    let Some(obj) = entry.as_object() else {
        return Err(Error::RosterParse(format!(
            "jail entry {} must be a table",
            index + 1
        )));
    };
    let label = entry_label(index, obj);

    let missing = |field: &str| Error::MissingField {
        entry: label.clone(),
        field: field.to_string(),
    };
    let wrong = |field: &str, expected: &str| Error::FieldType {
        entry: label.clone(),
        field: field.to_string(),
        expected: expected.to_string(),
    };

    let name = obj
        .get("name")
        .ok_or_else(|| missing("name"))?
        .as_str()
        .ok_or_else(|| wrong("name", "a string"))?
        .to_string();

    let (slot_key, slot_value) = match (obj.get("slot"), obj.get("number")) {
        (Some(_), Some(_)) => {
            return Err(Error::Validation(format!(
                "jail entry {}: give either 'slot' or 'number', not both",
                label
            )));
        }
        (Some(v), None) => ("slot", v),
        (None, Some(v)) => ("number", v),
        (None, None) => return Err(missing("slot")),
    };
    let slot = as_slot(slot_value).ok_or_else(|| wrong(slot_key, "a positive integer"))?;

    let version = obj
        .get("version")
        .ok_or_else(|| missing("version"))?
        .as_str()
        .ok_or_else(|| wrong("version", "a string"))?
        .to_string();

    let mut extra = BTreeMap::new();
    for (key, value) in obj {
        if matches!(key.as_str(), "name" | "slot" | "number" | "version") {
            continue;
        }
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => return Err(wrong(key.as_str(), "a string, number or boolean")),
        };
        extra.insert(key.clone(), text);
    }

    Ok(JailSpec {
        name,
        slot,
        version,
        extra,
    })
}

/// JSON writers often emit integers as floats; accept those when integral
fn as_slot(value: &Value) -> Option<u32> {
    let n = match value.as_u64() {
        Some(n) => n,
        None => {
            let f = value.as_f64()?;
            if f.fract() != 0.0 || f < 1.0 || f > f64::from(u32::MAX) {
                return None;
            }
            f as u64
        }
    };
    u32::try_from(n).ok().filter(|n| *n > 0)
}
