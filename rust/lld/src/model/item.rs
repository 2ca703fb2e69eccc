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

//! Item prototypes, discovered items and their preprocessing steps.

use super::application::ApplicationRef;
use super::field::{ColumnKind, ItemField, ItemType};
use super::row::RowId;
use super::tracked::Tracked;
use crate::preprocessing::PreprocType;
use std::collections::{BTreeMap, HashMap};

/// Position of an item in the reconciled item list.
pub type ItemHandle = usize;

/// Step template of an item prototype.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocTemplate {
    pub step: i32,
    pub step_type: PreprocType,
    pub params: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemPrototype {
    pub itemid: u64,
    pub fields: BTreeMap<ItemField, String>,
    pub status: i64,
    /// Master item of a dependent prototype; either a prototype or a real item.
    pub master_itemid: u64,
    pub preprocessing: Vec<PreprocTemplate>,
    pub applications: Vec<ApplicationRef>,
}

impl ItemPrototype {
    /// Prototype with neutral defaults, mostly useful for building fixtures.
    pub fn new(itemid: u64) -> Self {
        let fields = ItemField::ALL
            .iter()
            .map(|field| (*field, default_value(*field).to_string()))
            .collect();
        Self {
            itemid,
            fields,
            status: 0,
            master_itemid: 0,
            preprocessing: Vec::new(),
            applications: Vec::new(),
        }
    }

    pub fn with(mut self, field: ItemField, value: impl Into<String>) -> Self {
        self.fields.insert(field, value.into());
        self
    }

    pub fn field(&self, field: ItemField) -> &str {
        self.fields.get(&field).map(String::as_str).unwrap_or("")
    }

    pub fn key(&self) -> &str {
        self.field(ItemField::Key)
    }

    pub fn item_type(&self) -> Option<ItemType> {
        ItemType::from_code(self.field(ItemField::Type))
    }
}

fn default_value(field: ItemField) -> &'static str {
    match field {
        ItemField::ValueType => "3",
        ItemField::Delay => "1m",
        ItemField::History => "90d",
        ItemField::Trends => "365d",
        ItemField::Timeout => "3s",
        ItemField::StatusCodes => "200",
        ItemField::FollowRedirects => "1",
        _ => match field.policy().kind {
            ColumnKind::Text => "",
            ColumnKind::Int | ColumnKind::NullableId => "0",
        },
    }
}

/// Binary search over prototypes sorted by id.
pub fn find_prototype(prototypes: &[ItemPrototype], itemid: u64) -> Option<&ItemPrototype> {
    prototypes
        .binary_search_by_key(&itemid, |p| p.itemid)
        .ok()
        .map(|idx| &prototypes[idx])
}

/// Tracked values of every item column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldSet {
    values: BTreeMap<ItemField, Tracked<String>>,
}

impl FieldSet {
    pub fn from_fn(mut value: impl FnMut(ItemField) -> String) -> Self {
        let values = ItemField::ALL
            .iter()
            .map(|field| (*field, Tracked::new(value(*field))))
            .collect();
        Self { values }
    }

    pub fn get(&self, field: ItemField) -> &str {
        self.values
            .get(&field)
            .map(|v| v.get().as_str())
            .unwrap_or("")
    }

    pub fn original(&self, field: ItemField) -> Option<&str> {
        self.values
            .get(&field)
            .and_then(|v| v.original())
            .map(String::as_str)
    }

    pub fn set(&mut self, field: ItemField, value: String) -> bool {
        self.values.entry(field).or_default().set(value)
    }

    pub fn is_dirty(&self, field: ItemField) -> bool {
        self.values.get(&field).is_some_and(Tracked::is_dirty)
    }

    pub fn dirty_fields(&self) -> impl Iterator<Item = ItemField> + '_ {
        self.values
            .iter()
            .filter(|(_, v)| v.is_dirty())
            .map(|(field, _)| *field)
    }

    pub fn has_changes(&self) -> bool {
        self.values.values().any(Tracked::is_dirty)
    }

    pub fn rollback(&mut self, field: ItemField) {
        if let Some(value) = self.values.get_mut(&field) {
            value.rollback();
        }
    }

    pub fn rollback_all(&mut self) {
        self.values.values_mut().for_each(Tracked::rollback);
    }

    pub fn mark_persisted(&mut self) {
        self.values.values_mut().for_each(Tracked::mark_persisted);
    }

    /// Replaces a value in place without dirtying it.
    #[cfg(test)]
    pub(crate) fn replace_clean(&mut self, field: ItemField, value: String) {
        self.values.insert(field, Tracked::new(value));
    }
}

/// Master item of a dependent item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasterRef {
    #[default]
    None,
    /// Persisted master.
    Id(u64),
    /// Master created in this run; its id is known only after insertion.
    Item(ItemHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreprocStep {
    pub item_preprocid: u64,
    pub step: Tracked<i32>,
    pub step_type: Tracked<PreprocType>,
    pub params: Tracked<String>,
    pub discovered: bool,
}

impl PreprocStep {
    pub fn new(step: i32, step_type: PreprocType, params: String) -> Self {
        Self {
            item_preprocid: 0,
            step: Tracked::new(step),
            step_type: Tracked::new(step_type),
            params: Tracked::new(params),
            discovered: true,
        }
    }

    pub fn is_new(&self) -> bool {
        self.item_preprocid == 0
    }

    pub fn has_changes(&self) -> bool {
        self.step.is_dirty() || self.step_type.is_dirty() || self.params.is_dirty()
    }

    pub fn rollback(&mut self) {
        self.step.rollback();
        self.step_type.rollback();
        self.params.rollback();
    }

    pub fn mark_persisted(&mut self) {
        self.step.mark_persisted();
        self.step_type.mark_persisted();
        self.params.mark_persisted();
    }
}

/// A discovered item, either loaded from storage or created in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    /// `0` until the item is inserted.
    pub itemid: u64,
    pub parent_itemid: u64,
    /// Discovery row bound in this run.
    pub row: Option<RowId>,
    pub fields: FieldSet,
    /// Prototype key the item was discovered with.
    pub key_proto: Tracked<String>,
    pub status: i64,
    pub master: Tracked<MasterRef>,
    pub lastcheck: i64,
    pub ts_delete: i64,
    pub discovered: bool,
    pub preprocessing: Vec<PreprocStep>,
}

impl Item {
    /// New item bound to a prototype and row.
    pub fn discovered_from(prototype: &ItemPrototype, row: RowId, fields: FieldSet) -> Self {
        Self {
            itemid: 0,
            parent_itemid: prototype.itemid,
            row: Some(row),
            fields,
            key_proto: Tracked::new(prototype.key().to_string()),
            status: prototype.status,
            master: Tracked::new(MasterRef::None),
            lastcheck: 0,
            ts_delete: 0,
            discovered: true,
            preprocessing: Vec::new(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.itemid == 0
    }

    pub fn key(&self) -> &str {
        self.fields.get(ItemField::Key)
    }

    pub fn item_type(&self) -> Option<ItemType> {
        ItemType::from_code(self.fields.get(ItemField::Type))
    }

    /// Whether any item column or the master reference must be written.
    pub fn has_changes(&self) -> bool {
        self.fields.has_changes() || self.master.is_dirty()
    }

    /// Reverts one column. The stored prototype key follows the key, so the
    /// item is still matched by the template it was created from.
    pub fn rollback_field(&mut self, field: ItemField) {
        self.fields.rollback(field);
        if field == ItemField::Key {
            self.key_proto.rollback();
        }
    }

    /// Reverts every column change, leaving the item discovered.
    pub fn rollback_all(&mut self) {
        self.fields.rollback_all();
        self.master.rollback();
        self.key_proto.rollback();
    }

    /// Label used in validation messages.
    pub fn label(&self) -> &str {
        match self.fields.original(ItemField::Key) {
            Some(original) if !self.is_new() => original,
            _ => self.key(),
        }
    }
}

/// `(prototype id, discovery row)` to item lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemIndex {
    entries: HashMap<(u64, RowId), ItemHandle>,
}

impl ItemIndex {
    pub fn build(items: &[Item]) -> Self {
        let entries = items
            .iter()
            .enumerate()
            .filter_map(|(handle, item)| item.row.map(|row| ((item.parent_itemid, row), handle)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, parent_itemid: u64, row: RowId) -> Option<ItemHandle> {
        self.entries.get(&(parent_itemid, row)).copied()
    }

    pub fn insert(&mut self, parent_itemid: u64, row: RowId, handle: ItemHandle) {
        self.entries.insert((parent_itemid, row), handle);
    }

    pub fn contains(&self, parent_itemid: u64, row: RowId) -> bool {
        self.entries.contains_key(&(parent_itemid, row))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_set_tracks_changes() {
        let mut fields = FieldSet::from_fn(|f| format!("{f}-old"));
        assert!(!fields.has_changes());
        fields.set(ItemField::Name, "new".into());
        fields.set(ItemField::Units, "B".into());
        assert_eq!(
            fields.dirty_fields().collect::<Vec<_>>(),
            vec![ItemField::Name, ItemField::Units]
        );
        fields.rollback(ItemField::Name);
        assert_eq!(fields.get(ItemField::Name), "name-old");
        assert_eq!(fields.dirty_fields().count(), 1);
    }

    #[test]
    fn prototypes_are_found_by_id() {
        let prototypes = vec![ItemPrototype::new(3), ItemPrototype::new(7), ItemPrototype::new(9)];
        assert_eq!(find_prototype(&prototypes, 7).map(|p| p.itemid), Some(7));
        assert!(find_prototype(&prototypes, 8).is_none());
    }

    #[test]
    fn index_skips_unbound_items() {
        let proto = ItemPrototype::new(1);
        let bound = Item::discovered_from(&proto, RowId(0), FieldSet::default());
        let mut unbound = bound.clone();
        unbound.row = None;
        let index = ItemIndex::build(&[unbound, bound]);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(1, RowId(0)), Some(1));
    }

    #[test]
    fn label_prefers_persisted_key() {
        let proto = ItemPrototype::new(1);
        let mut item = Item::discovered_from(
            &proto,
            RowId(0),
            FieldSet::from_fn(|f| if f == ItemField::Key { "k[a]".into() } else { String::new() }),
        );
        item.itemid = 10;
        item.fields.set(ItemField::Key, "k[b]".into());
        assert_eq!(item.label(), "k[a]");
    }
}
