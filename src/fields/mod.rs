//! Raw editable fields of a single step
//!
//! The field set is the source of truth for a step. Everything else
//! (step records, previews, branch suggestions) is derived from it.

use indexmap::IndexMap;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::FieldNameError;

/* ===================== Field Names ===================== */

#[derive(Parser)]
#[grammar = "fields/field_name.pest"]
struct FieldNameParser;

/// Name prefix some editors wrap every field in (`step[title]`).
const WRAPPER: &str = "step";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Parsed field name, with any `step[...]` wrapper already removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    pub segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, FieldNameError> {
        let invalid = |message: String| FieldNameError {
            name: raw.to_string(),
            message,
        };

        let mut pairs = FieldNameParser::parse(Rule::field_name, raw)
            .map_err(|e| invalid(e.variant.message().to_string()))?;
        let root = pairs
            .next()
            .ok_or_else(|| invalid("empty parse".to_string()))?;

        let mut segments = Vec::new();
        for pair in root.into_inner() {
            match pair.as_rule() {
                Rule::ident => segments.push(PathSegment::Key(pair.as_str().to_string())),
                Rule::index => {
                    let idx = pair
                        .as_str()
                        .parse::<usize>()
                        .map_err(|e| invalid(e.to_string()))?;
                    segments.push(PathSegment::Index(idx));
                }
                _ => {}
            }
        }

        if segments.len() > 1 && segments[0] == PathSegment::Key(WRAPPER.to_string()) {
            segments.remove(0);
        }

        Ok(FieldPath { segments })
    }

    /// `name[i][key]` members of a repeated group.
    fn group_member(&self) -> Option<(&str, usize, &str)> {
        match self.segments.as_slice() {
            [PathSegment::Key(group), PathSegment::Index(i), PathSegment::Key(key)] => {
                Some((group.as_str(), *i, key.as_str()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match (i, seg) {
                (0, PathSegment::Key(k)) => write!(f, "{}", k)?,
                (0, PathSegment::Index(n)) => write!(f, "{}", n)?,
                (_, PathSegment::Key(k)) => write!(f, "[{}]", k)?,
                (_, PathSegment::Index(n)) => write!(f, "[{}]", n)?,
            }
        }
        Ok(())
    }
}

/// Canonical spelling of a raw field name. Names outside the grammar are
/// kept verbatim and behave as opaque scalar fields.
pub fn canonical_name(raw: &str) -> String {
    match FieldPath::parse(raw) {
        Ok(path) => path.to_string(),
        Err(_) => raw.to_string(),
    }
}

pub fn group_field(group: &str, index: usize, key: &str) -> String {
    format!("{}[{}][{}]", group, index, key)
}

/* ===================== Field Values ===================== */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Checked(bool),
    Text(String),
}

impl FieldValue {
    pub fn as_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Checked(b) => b.to_string(),
        }
    }

    pub fn is_checked(&self) -> bool {
        match self {
            FieldValue::Checked(b) => *b,
            FieldValue::Text(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "on" | "yes"
            ),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Checked(b)
    }
}

/* ===================== Field Set ===================== */

/// Insertion-ordered map of canonical field name to current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, FieldValue>", into = "IndexMap<String, FieldValue>")]
pub struct FieldSet {
    entries: IndexMap<String, FieldValue>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn insert(&mut self, name: &str, value: impl Into<FieldValue>) -> Option<FieldValue> {
        self.entries.insert(canonical_name(name), value.into())
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.insert(name, FieldValue::Text(value.into()));
    }

    pub fn set_checked(&mut self, name: &str, value: bool) {
        self.insert(name, FieldValue::Checked(value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries.get(&canonical_name(name))
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.entries.shift_remove(&canonical_name(name))
    }

    /// Text of a field, `""` when absent.
    pub fn text(&self, name: &str) -> String {
        self.get(name).map(FieldValue::as_text).unwrap_or_default()
    }

    /// Checkbox state of a field, `false` when absent.
    pub fn checked(&self, name: &str) -> bool {
        self.get(name).map(FieldValue::is_checked).unwrap_or(false)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Members of the repeated group `name[i][key]`, keyed and ordered by
    /// their explicit index. Indices with no member are simply absent.
    pub fn group(&self, name: &str) -> BTreeMap<usize, IndexMap<String, String>> {
        let mut out: BTreeMap<usize, IndexMap<String, String>> = BTreeMap::new();

        for (raw, value) in &self.entries {
            let Ok(path) = FieldPath::parse(raw) else {
                continue;
            };
            if let Some((group, idx, key)) = path.group_member() {
                if group == name {
                    out.entry(idx)
                        .or_default()
                        .insert(key.to_string(), value.as_text());
                }
            }
        }

        out
    }

    /// Drop every member of the repeated group `name[i][key]`.
    pub fn remove_group(&mut self, name: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|raw, _| match FieldPath::parse(raw) {
            Ok(path) => !matches!(path.group_member(), Some((group, _, _)) if group == name),
            Err(_) => true,
        });
        before - self.entries.len()
    }
}

impl From<IndexMap<String, FieldValue>> for FieldSet {
    fn from(map: IndexMap<String, FieldValue>) -> Self {
        map.into_iter().collect()
    }
}

impl From<FieldSet> for IndexMap<String, FieldValue> {
    fn from(set: FieldSet) -> Self {
        set.entries
    }
}

impl<K: AsRef<str>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = FieldSet::new();
        set.extend(iter);
        set
    }
}

impl<K: AsRef<str>, V: Into<FieldValue>> Extend<(K, V)> for FieldSet {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (k, v) in iter {
            self.insert(k.as_ref(), v);
        }
    }
}
