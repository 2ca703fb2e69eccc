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

#![allow(dead_code)]

//! Rule fixtures shared by the integration tests.

use lld::db::Row;
use lld::model::ItemField;
use lld::testing::item_columns;

pub use lld::testing::ScriptedDb;

pub const RULE_ID: u64 = 1;
pub const HOST_ID: u64 = 3;
pub const PROTOTYPE_ID: u64 = 10;

fn columns(values: &[(ItemField, &str)]) -> impl Iterator<Item = Option<String>> {
    item_columns(values).into_iter().map(Some)
}

/// Columns of the filesystem prototype or of an item created from it.
pub fn filesystem_fields<'a>(name: &'a str, key: &'a str) -> Vec<(ItemField, &'a str)> {
    vec![
        (ItemField::Name, name),
        (ItemField::Key, key),
        (ItemField::Type, "0"),
        (ItemField::ValueType, "3"),
        (ItemField::Delay, "1m"),
        (ItemField::History, "90d"),
        (ItemField::Trends, "365d"),
    ]
}

/// Row of the item prototype query.
pub fn prototype_row(itemid: u64, fields: &[(ItemField, &str)]) -> Row {
    let mut values = vec![Some(itemid.to_string()), Some("0".into()), None];
    values.extend(columns(fields));
    Row::new(values)
}

/// Row of the discovered item query.
pub fn discovered_row(
    itemid: u64,
    key_proto: &str,
    lastcheck: i64,
    ts_delete: i64,
    fields: &[(ItemField, &str)],
) -> Row {
    let mut values = vec![
        Some(itemid.to_string()),
        Some(PROTOTYPE_ID.to_string()),
        Some(key_proto.to_string()),
        Some(lastcheck.to_string()),
        Some(ts_delete.to_string()),
        None,
    ];
    values.extend(columns(fields));
    Row::new(values)
}

/// Database holding the rule, one prototype and the given previously
/// discovered items.
pub fn rule_with_prototype(
    lifetime: &str,
    prototype: &[(ItemField, &str)],
    discovered: Vec<Row>,
) -> ScriptedDb {
    ScriptedDb::new()
        .on(
            "SELECT hostid,lifetime",
            vec![Row::of([HOST_ID.to_string(), lifetime.to_string()])],
        )
        .on("SELECT i.itemid,i.status", vec![prototype_row(PROTOTYPE_ID, prototype)])
        .on("SELECT id.itemid,id.parent_itemid", discovered)
}

/// Database holding the rule, its filesystem prototype and the given
/// previously discovered items.
pub fn filesystem_rule(lifetime: &str, discovered: Vec<Row>) -> ScriptedDb {
    rule_with_prototype(
        lifetime,
        &filesystem_fields("Free space on {#FSNAME}", "fs[{#FSNAME}]"),
        discovered,
    )
}
