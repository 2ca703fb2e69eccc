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

use crate::error::ErrorSink;
use crate::expand::{MacroContext, MacroExpander};
use crate::model::{
    find_prototype, trim_whitespace, DiscoveryRow, Expansion, FieldSet, Item, ItemField,
    ItemHandle, ItemIndex, ItemPrototype, ItemType, MasterRef, RowArena, RowId, POST_TYPE_JSON,
    POST_TYPE_XML,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// Items after matching, sorted by id (new items first), and their index.
#[derive(Debug, Clone, Default)]
pub struct ItemReconciliation {
    pub items: Vec<Item>,
    pub index: ItemIndex,
}

/// Expands one column of a prototype for a discovery row.
pub fn expand_field(
    field: ItemField,
    prototype: &ItemPrototype,
    row: &DiscoveryRow,
    expander: &dyn MacroExpander,
) -> Result<String, String> {
    let policy = field.policy();
    let template = prototype.field(field);
    let context = match policy.expansion {
        Expansion::Verbatim => return Ok(template.to_string()),
        Expansion::Macros(context) => context,
        Expansion::Params if prototype.item_type() == Some(ItemType::Calculated) => {
            MacroContext::Formula
        }
        Expansion::Params => MacroContext::Any,
        Expansion::Posts => match prototype.field(ItemField::PostType) {
            POST_TYPE_JSON => MacroContext::Json,
            POST_TYPE_XML => MacroContext::Xml,
            _ => MacroContext::Any,
        },
    };
    let value = expander
        .expand(template, row, context)
        .map_err(|err| format!("cannot expand {field}: {err}"))?;
    Ok(if policy.trim {
        trim_whitespace(&value).to_string()
    } else {
        value
    })
}

fn expand_key(template: &str, row: &DiscoveryRow, expander: &dyn MacroExpander) -> Option<String> {
    expander
        .expand(template, row, MacroContext::Key)
        .ok()
        .map(|key| trim_whitespace(&key).to_string())
}

fn build_fields(
    prototype: &ItemPrototype,
    row: &DiscoveryRow,
    expander: &dyn MacroExpander,
) -> Result<FieldSet, String> {
    let mut values = ItemField::ALL
        .iter()
        .map(|field| Ok((*field, expand_field(*field, prototype, row, expander)?)))
        .collect::<Result<BTreeMap<_, _>, String>>()?;
    Ok(FieldSet::from_fn(|field| values.remove(&field).unwrap_or_default()))
}

fn update_item(
    item: &mut Item,
    prototype: &ItemPrototype,
    row: &DiscoveryRow,
    expander: &dyn MacroExpander,
    errors: &mut ErrorSink,
) {
    for field in ItemField::ALL {
        match expand_field(field, prototype, row, expander) {
            Ok(value) => {
                item.fields.set(field, value);
            }
            Err(err) => errors.push(format!("Cannot update item \"{}\": {err}.", item.label())),
        }
    }
    item.key_proto.set(prototype.key().to_string());
    item.discovered = true;
}

/// Binds existing items of one prototype to candidate rows.
///
/// The current key template is tried for every item before the stored
/// prototype key, so a fallback match never takes a row an exact match needs.
fn bind_existing(
    prototype: &ItemPrototype,
    rows: &RowArena,
    items: &mut [Item],
    candidates: &mut BTreeSet<RowId>,
    expander: &dyn MacroExpander,
) -> Vec<ItemHandle> {
    let expanded: HashMap<RowId, String> = rows
        .iter()
        .filter_map(|row| expand_key(prototype.key(), row, expander).map(|key| (row.id(), key)))
        .collect();

    let mut bound = Vec::new();
    for fallback in [false, true] {
        for handle in (0..items.len()).rev() {
            let item = &items[handle];
            if item.parent_itemid != prototype.itemid || item.row.is_some() {
                continue;
            }
            if fallback && item.key_proto.get() == prototype.key() {
                continue;
            }
            let matched = candidates.iter().copied().find(|row_id| {
                if fallback {
                    rows.get(*row_id)
                        .and_then(|row| expand_key(item.key_proto.get(), row, expander))
                        .is_some_and(|key| key == item.key())
                } else {
                    expanded.get(row_id).is_some_and(|key| key == item.key())
                }
            });
            if let Some(row_id) = matched {
                candidates.remove(&row_id);
                items[handle].row = Some(row_id);
                bound.push(handle);
            }
        }
    }
    bound
}

/// Matches discovery rows to existing items and creates items for the rest.
pub fn reconcile_items(
    prototypes: &[ItemPrototype],
    rows: &RowArena,
    existing: Vec<Item>,
    expander: &dyn MacroExpander,
    errors: &mut ErrorSink,
) -> ItemReconciliation {
    let mut items = existing;
    let mut bound = Vec::new();
    let mut unmatched = Vec::new();

    for prototype in prototypes {
        let mut candidates: BTreeSet<RowId> = rows.ids().collect();
        bound.extend(bind_existing(prototype, rows, &mut items, &mut candidates, expander));
        unmatched.extend(candidates.into_iter().map(|row_id| (prototype, row_id)));
    }

    for handle in bound {
        let item = &mut items[handle];
        let (Some(prototype), Some(row)) = (
            find_prototype(prototypes, item.parent_itemid),
            item.row.and_then(|id| rows.get(id)),
        ) else {
            continue;
        };
        update_item(item, prototype, row, expander, errors);
    }

    let mut index = ItemIndex::build(&items);
    for (prototype, row_id) in unmatched {
        let Some(row) = rows.get(row_id) else {
            continue;
        };
        if let Some(handle) = index.get(prototype.itemid, row_id) {
            warn!(itemid = prototype.itemid, row = %row_id, "row already bound, updating in place");
            update_item(&mut items[handle], prototype, row, expander, errors);
            continue;
        }
        match build_fields(prototype, row, expander) {
            Ok(fields) => {
                index.insert(prototype.itemid, row_id, items.len());
                items.push(Item::discovered_from(prototype, row_id, fields));
            }
            Err(err) => errors.push(format!("Cannot create item: {err}.")),
        }
    }

    items.sort_by_key(|item| item.itemid);
    let index = ItemIndex::build(&items);
    resolve_masters(prototypes, &mut items, &index);

    debug!(
        items = items.len(),
        discovered = items.iter().filter(|i| i.discovered).count(),
        "reconciled items"
    );
    ItemReconciliation { items, index }
}

/// Points dependent items at their master: the item the master prototype
/// produced for the same row, or the real master item.
fn resolve_masters(prototypes: &[ItemPrototype], items: &mut [Item], index: &ItemIndex) {
    for handle in 0..items.len() {
        let item = &items[handle];
        let Some(row) = item.row.filter(|_| item.discovered) else {
            continue;
        };
        let Some(prototype) = find_prototype(prototypes, item.parent_itemid) else {
            continue;
        };

        let resolved = if prototype.master_itemid == 0 {
            Some(MasterRef::None)
        } else if find_prototype(prototypes, prototype.master_itemid).is_some() {
            index
                .get(prototype.master_itemid, row)
                .filter(|master| items[*master].discovered)
                .map(|master| match items[master].itemid {
                    0 => MasterRef::Item(master),
                    itemid => MasterRef::Id(itemid),
                })
        } else {
            Some(MasterRef::Id(prototype.master_itemid))
        };

        let master = match resolved {
            Some(master) => master,
            // a new item without its master is dropped during validation
            None if item.is_new() => MasterRef::None,
            None => continue,
        };
        items[handle].master.set(master);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::LldMacroExpander;
    use crate::model::Tracked;
    use pretty_assertions::assert_eq;

    fn fs_prototype() -> ItemPrototype {
        ItemPrototype::new(10)
            .with(ItemField::Key, "fs[{#FSNAME}]")
            .with(ItemField::Name, "Free space on {#FSNAME} ")
    }

    fn existing(itemid: u64, prototype: &ItemPrototype, key: &str, name: &str) -> Item {
        let mut item = Item::discovered_from(prototype, RowId(0), FieldSet::from_fn(|field| {
            match field {
                ItemField::Key => key.to_string(),
                ItemField::Name => name.to_string(),
                other => prototype.field(other).to_string(),
            }
        }));
        item.itemid = itemid;
        item.row = None;
        item.discovered = false;
        item
    }

    fn rows(names: &[&'static str]) -> RowArena {
        RowArena::from_pairs(names.iter().map(|name| [("{#FSNAME}", *name)]))
    }

    #[test]
    fn first_run_creates_one_item_per_row() {
        let mut errors = ErrorSink::new();
        let result = reconcile_items(
            &[fs_prototype()],
            &rows(&["/", "/var"]),
            Vec::new(),
            &LldMacroExpander,
            &mut errors,
        );

        assert!(errors.is_empty());
        let keys = result.items.iter().map(Item::key).collect::<Vec<_>>();
        assert_eq!(keys, vec!["fs[/]", "fs[/var]"]);
        assert!(result.items.iter().all(|item| item.is_new() && item.discovered));
        assert_eq!(result.items[1].fields.get(ItemField::Name), "Free space on /var");
        assert_eq!(result.index.get(10, RowId(1)), Some(1));
    }

    #[test]
    fn rerun_without_changes_dirties_nothing() {
        let prototype = fs_prototype();
        let items = vec![
            existing(101, &prototype, "fs[/]", "Free space on /"),
            existing(102, &prototype, "fs[/var]", "Free space on /var"),
        ];
        let mut errors = ErrorSink::new();
        let result = reconcile_items(
            &[prototype],
            &rows(&["/var", "/"]),
            items,
            &LldMacroExpander,
            &mut errors,
        );

        assert_eq!(result.items.len(), 2);
        assert!(result.items.iter().all(|item| item.discovered && !item.has_changes()));
        assert_eq!(result.items[0].row, Some(RowId(1)));
        assert_eq!(result.items[1].row, Some(RowId(0)));
    }

    #[test]
    fn identity_survives_name_changes() {
        let prototype = fs_prototype().with(ItemField::Name, "Disk {#FSNAME}");
        let items = vec![existing(101, &prototype, "fs[/]", "Free space on /")];
        let mut errors = ErrorSink::new();
        let result = reconcile_items(
            &[prototype],
            &rows(&["/"]),
            items,
            &LldMacroExpander,
            &mut errors,
        );

        let item = &result.items[0];
        assert_eq!(item.itemid, 101);
        assert_eq!(item.fields.get(ItemField::Name), "Disk /");
        assert_eq!(item.fields.dirty_fields().collect::<Vec<_>>(), vec![ItemField::Name]);
    }

    #[test]
    fn absent_rows_leave_items_undiscovered() {
        let prototype = fs_prototype();
        let items = vec![
            existing(101, &prototype, "fs[/]", "Free space on /"),
            existing(102, &prototype, "fs[/var]", "Free space on /var"),
        ];
        let mut errors = ErrorSink::new();
        let result = reconcile_items(&[prototype], &rows(&["/"]), items, &LldMacroExpander, &mut errors);

        assert!(result.items[0].discovered);
        assert!(!result.items[1].discovered);
        assert_eq!(result.items[1].row, None);
    }

    #[test]
    fn falls_back_to_stored_prototype_key() {
        let old = fs_prototype();
        let mut item = existing(101, &old, "fs[/]", "Free space on /");
        item.key_proto = Tracked::new("fs[{#FSNAME}]".to_string());
        let prototype = fs_prototype().with(ItemField::Key, "vfs.fs[{#FSNAME}]");

        let mut errors = ErrorSink::new();
        let result = reconcile_items(&[prototype], &rows(&["/"]), vec![item], &LldMacroExpander, &mut errors);

        assert_eq!(result.items.len(), 1);
        let item = &result.items[0];
        assert_eq!(item.itemid, 101);
        assert_eq!(item.key(), "vfs.fs[/]");
        assert!(item.fields.is_dirty(ItemField::Key));
        assert_eq!(item.key_proto.get(), "vfs.fs[{#FSNAME}]");
    }

    #[test]
    fn key_expansion_failure_is_reported_per_row() {
        let prototype = fs_prototype();
        let arena = RowArena::from_pairs([[("{#FSNAME}", "/")], [("{#FSNAME}", "a,b\\")]]);
        let mut errors = ErrorSink::new();
        let result = reconcile_items(&[prototype], &arena, Vec::new(), &LldMacroExpander, &mut errors);

        assert_eq!(result.items.len(), 1);
        assert_eq!(errors.len(), 1);
        assert!(errors.contains("Cannot create item"));
    }

    #[test]
    fn dependents_point_at_master_of_same_row() {
        let master = fs_prototype();
        let mut dependent = ItemPrototype::new(11)
            .with(ItemField::Key, "fs.used[{#FSNAME}]")
            .with(ItemField::Type, "18");
        dependent.master_itemid = 10;
        let mut static_dependent = ItemPrototype::new(12).with(ItemField::Key, "x[{#FSNAME}]");
        static_dependent.master_itemid = 500;

        let mut errors = ErrorSink::new();
        let result = reconcile_items(
            &[master, dependent, static_dependent],
            &rows(&["/", "/var"]),
            Vec::new(),
            &LldMacroExpander,
            &mut errors,
        );

        let master_of_var = result.index.get(10, RowId(1)).unwrap();
        let dependent_of_var = result.index.get(11, RowId(1)).unwrap();
        assert_eq!(
            *result.items[dependent_of_var].master.get(),
            MasterRef::Item(master_of_var)
        );
        let static_of_root = result.index.get(12, RowId(0)).unwrap();
        assert_eq!(*result.items[static_of_root].master.get(), MasterRef::Id(500));
    }

    #[test]
    fn calculated_params_use_formula_context() {
        let prototype = ItemPrototype::new(10)
            .with(ItemField::Key, "calc[{#FSNAME}]")
            .with(ItemField::Type, "15")
            .with(ItemField::Params, "last(\"fs[{#FSNAME}]\")");
        let arena = RowArena::from_pairs([[("{#FSNAME}", "a\"b")]]);
        let mut errors = ErrorSink::new();
        let result = reconcile_items(&[prototype], &arena, Vec::new(), &LldMacroExpander, &mut errors);
        assert_eq!(result.items[0].fields.get(ItemField::Params), "last(\"fs[a\\\"b]\")");
    }
}
