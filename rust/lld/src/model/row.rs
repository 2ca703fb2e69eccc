/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! Discovery rows and the per-run arena that gives them stable identities.

use crate::error::{LldError, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Position of a row in its [`RowArena`]. Only meaningful within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub usize);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One discovered entity: LLD macro values plus the raw JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryRow {
    id: RowId,
    macros: BTreeMap<String, String>,
    raw: Value,
}

impl DiscoveryRow {
    pub fn id(&self) -> RowId {
        self.id
    }

    /// Value of an LLD macro such as `{#FSNAME}`.
    pub fn macro_value(&self, name: &str) -> Option<&str> {
        self.macros.get(name).map(String::as_str)
    }

    pub fn macros(&self) -> impl Iterator<Item = (&str, &str)> {
        self.macros.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

/// All discovery rows of one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowArena {
    rows: Vec<DiscoveryRow>,
}

impl RowArena {
    /// Parses an LLD payload: either `{"data": [...]}` or a bare array of
    /// objects. Invalid UTF-8 is replaced rather than rejected.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(payload);
        let value: Value = serde_json::from_str(&text)?;
        let entries = match value {
            Value::Array(entries) => entries,
            Value::Object(mut object) => match object.remove("data") {
                Some(Value::Array(entries)) => entries,
                _ => {
                    return Err(LldError::DiscoveryData(
                        "cannot find the \"data\" array in the received JSON object".into(),
                    ))
                }
            },
            _ => {
                return Err(LldError::DiscoveryData(
                    "discovery data must be an array or an object with a \"data\" array".into(),
                ))
            }
        };

        let mut arena = Self::default();
        for entry in entries {
            match entry {
                Value::Object(object) => arena.push_object(object),
                other => tracing::warn!(value = %other, "skipping non-object discovery row"),
            }
        }
        Ok(arena)
    }

    /// Builds an arena from macro/value pairs, one slice per row.
    pub fn from_pairs<'a, I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut arena = Self::default();
        for row in rows {
            let object = row
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect::<Map<String, Value>>();
            arena.push_object(object);
        }
        arena
    }

    fn push_object(&mut self, object: Map<String, Value>) {
        let macros = object
            .iter()
            .filter(|(key, _)| key.starts_with("{#") && key.ends_with('}'))
            .map(|(key, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                (key.clone(), text)
            })
            .collect();
        let id = RowId(self.rows.len());
        self.rows.push(DiscoveryRow {
            id,
            macros,
            raw: Value::Object(object),
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, id: RowId) -> Option<&DiscoveryRow> {
        self.rows.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DiscoveryRow> {
        self.rows.iter()
    }

    pub fn ids(&self) -> impl Iterator<Item = RowId> + '_ {
        self.rows.iter().map(DiscoveryRow::id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_data_wrapper() {
        let arena = RowArena::from_json(
            br#"{"data":[{"{#FSNAME}":"/","{#FSTYPE}":"ext4"},{"{#FSNAME}":"/var","{#SIZE}":42}]}"#,
        )
        .unwrap();
        assert_eq!(arena.len(), 2);
        let second = arena.get(RowId(1)).unwrap();
        assert_eq!(second.macro_value("{#FSNAME}"), Some("/var"));
        assert_eq!(second.macro_value("{#SIZE}"), Some("42"));
        assert_eq!(second.macro_value("{#FSTYPE}"), None);
    }

    #[test]
    fn parses_bare_array_and_skips_scalars() {
        let arena = RowArena::from_json(br#"[{"{#IFNAME}":"eth0","other":1}, 5]"#).unwrap();
        assert_eq!(arena.len(), 1);
        let row = arena.get(RowId(0)).unwrap();
        assert_eq!(row.macros().count(), 1);
        assert_eq!(row.raw()["other"], 1);
    }

    #[test]
    fn rejects_object_without_data() {
        let err = RowArena::from_json(br#"{"rows":[]}"#).unwrap_err();
        assert!(matches!(err, LldError::DiscoveryData(_)));
    }

    #[test]
    fn replaces_invalid_utf8() {
        let mut payload = br#"[{"{#NAME}":"a"#.to_vec();
        payload.push(0xff);
        payload.extend_from_slice(br#"b"}]"#);
        let arena = RowArena::from_json(&payload).unwrap();
        let value = arena.get(RowId(0)).unwrap().macro_value("{#NAME}").unwrap();
        assert_eq!(value, "a\u{fffd}b");
    }
}
