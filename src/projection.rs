//! Search filters and attribute projection.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::client::Entry;

/// Projection of one directory attribute into the result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeMapping {
    /// Directory attribute name. Defaults to `result_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Key under which the value is returned.
    pub result_key: String,
}

impl AttributeMapping {
    pub fn new(source: impl Into<String>, result_key: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            result_key: result_key.into(),
        }
    }

    /// Name of the attribute to request from the directory.
    pub fn source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.result_key)
    }
}

/// Projected attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Single(String),
    Multi(Vec<String>),
}

impl AttributeValue {
    fn from_values(mut values: Vec<String>) -> Option<Self> {
        match values.len() {
            0 => None,
            1 => values.pop().map(AttributeValue::Single),
            _ => Some(AttributeValue::Multi(values)),
        }
    }
}

/// Attributes to request for a mapping, without duplicates.
pub fn requested_attributes(map: &[AttributeMapping]) -> Vec<String> {
    let mut attributes: Vec<String> = Vec::with_capacity(map.len());
    for mapping in map {
        if !attributes
            .iter()
            .any(|attr| attr.eq_ignore_ascii_case(mapping.source()))
        {
            attributes.push(mapping.source().to_owned());
        }
    }
    attributes
}

/// Copy the mapped attributes of `entry`, keyed by result key.
///
/// Attributes missing from the entry are left out.
pub fn project(entry: &Entry, map: &[AttributeMapping]) -> BTreeMap<String, AttributeValue> {
    map.iter()
        .filter_map(|mapping| {
            lookup(&entry.attributes, mapping.source())
                .and_then(|values| AttributeValue::from_values(values.clone()))
                .map(|value| (mapping.result_key.clone(), value))
        })
        .collect()
}

// Attribute names are case insensitive.
fn lookup<'a>(attributes: &'a HashMap<String, Vec<String>>, name: &str) -> Option<&'a Vec<String>> {
    attributes.get(name).or_else(|| {
        attributes
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values)
    })
}

/// AND-compose `base` with one equality clause per constraint.
pub fn compose_filter(base: &str, constraints: &BTreeMap<String, String>) -> String {
    if constraints.is_empty() {
        return base.to_owned();
    }

    let clauses: String = constraints
        .iter()
        .map(|(key, value)| format!("({key}={})", escape_filter_value(value)))
        .collect();

    format!("(&{base}{clauses})")
}

/// Escape a value for use in a search filter (RFC 4515).
pub fn escape_filter_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '*' => out.push_str(r"\2a"),
            '(' => out.push_str(r"\28"),
            ')' => out.push_str(r"\29"),
            '\\' => out.push_str(r"\5c"),
            '\0' => out.push_str(r"\00"),
            c => out.push(c),
        }
    }
    out
}
