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

use super::reject_item;
use crate::dependency::{Dependency, DependencyGraph};
use crate::error::ErrorSink;
use crate::model::{find_prototype, Item, ItemHandle, ItemPrototype, MasterRef};
use std::collections::HashSet;

/// Graph node of an item that has no id yet.
const PENDING_NODE: u64 = 1 << 62;

fn node(items: &[Item], handle: ItemHandle) -> u64 {
    match items[handle].itemid {
        0 => PENDING_NODE | handle as u64,
        itemid => itemid,
    }
}

fn master_node(items: &[Item], master: MasterRef) -> Option<u64> {
    match master {
        MasterRef::None => None,
        MasterRef::Id(itemid) => Some(itemid),
        MasterRef::Item(handle) => Some(node(items, handle)),
    }
}

fn needs_check(item: &Item) -> bool {
    item.discovered && (item.is_new() || item.master.is_dirty()) && *item.master.get() != MasterRef::None
}

/// Drops new items whose master item is not going to exist and enforces the
/// dependency limits for new or re-pointed dependent items. Accepted items
/// are added to the graph so later ones see them.
pub fn validate_dependent_items(
    prototypes: &[ItemPrototype],
    items: &mut [Item],
    graph: &mut DependencyGraph,
    errors: &mut ErrorSink,
) {
    for handle in 0..items.len() {
        let item = &items[handle];
        if !item.discovered || !item.is_new() || *item.master.get() != MasterRef::None {
            continue;
        }
        let has_master = find_prototype(prototypes, item.parent_itemid)
            .is_some_and(|prototype| prototype.master_itemid != 0);
        if has_master {
            reject_item(&mut items[handle], None, "master item is not discovered", errors);
        }
    }

    let mut pending: Vec<ItemHandle> = (0..items.len()).filter(|h| needs_check(&items[*h])).collect();
    while !pending.is_empty() {
        let waiting: HashSet<ItemHandle> = pending.iter().copied().collect();
        let (ready, rest): (Vec<_>, Vec<_>) = pending.into_iter().partition(|handle| {
            !matches!(*items[*handle].master.get(), MasterRef::Item(master) if waiting.contains(&master))
        });
        if ready.is_empty() {
            // only cycles are left
            for handle in rest {
                reject_item(&mut items[handle], None, "circular item dependency", errors);
            }
            break;
        }
        for handle in ready {
            check(items, handle, graph, errors);
        }
        pending = rest;
    }
}

fn check(items: &mut [Item], handle: ItemHandle, graph: &mut DependencyGraph, errors: &mut ErrorSink) {
    let master = *items[handle].master.get();
    if let MasterRef::Item(master_handle) = master {
        if !items[master_handle].discovered {
            reject_item(&mut items[handle], None, "master item is not discovered", errors);
            return;
        }
    }
    let Some(master_itemid) = master_node(items, master) else {
        return;
    };

    let itemid = node(items, handle);
    let previous = items[handle]
        .master
        .original()
        .and_then(|old| master_node(items, *old));
    graph.add(Dependency {
        itemid,
        master_itemid,
        is_prototype: false,
    });

    if let Err(limit) = graph.count_dependencies(graph.top_master(itemid)) {
        graph.remove(itemid);
        if let Some(previous) = previous {
            graph.add(Dependency {
                itemid,
                master_itemid: previous,
                is_prototype: false,
            });
        }
        reject_item(&mut items[handle], None, &limit.to_string(), errors);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::MAX_DEPENDENT_ITEMS;
    use crate::model::{FieldSet, ItemField, RowId};

    fn new_item(prototype: &ItemPrototype, row: usize, master: MasterRef) -> Item {
        let mut item = Item::discovered_from(
            prototype,
            RowId(row),
            FieldSet::from_fn(|f| if f == ItemField::Key { format!("k[{row}]") } else { String::new() }),
        );
        item.master.set(master);
        item
    }

    #[test]
    fn dependents_of_missing_masters_are_dropped() {
        let master_proto = ItemPrototype::new(10);
        let mut dependent_proto = ItemPrototype::new(11);
        dependent_proto.master_itemid = 10;
        let mut grandchild_proto = ItemPrototype::new(12);
        grandchild_proto.master_itemid = 11;

        let mut master = new_item(&master_proto, 0, MasterRef::None);
        master.discovered = false;
        let mut items = vec![
            master,
            new_item(&dependent_proto, 0, MasterRef::Item(0)),
            new_item(&grandchild_proto, 0, MasterRef::Item(1)),
            new_item(&dependent_proto, 1, MasterRef::None),
        ];
        let prototypes = [master_proto, dependent_proto, grandchild_proto];
        let mut graph = DependencyGraph::default();
        let mut errors = ErrorSink::new();
        validate_dependent_items(&prototypes, &mut items, &mut graph, &mut errors);

        assert!(items.iter().all(|item| !item.discovered));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn limit_applies_to_the_whole_batch() {
        let master_proto = ItemPrototype::new(10);
        let mut dependent_proto = ItemPrototype::new(11);
        dependent_proto.master_itemid = 500;

        let mut graph = DependencyGraph::default();
        for itemid in 1000..(1000 + MAX_DEPENDENT_ITEMS as u64 - 2) {
            graph.add(Dependency {
                itemid,
                master_itemid: 500,
                is_prototype: false,
            });
        }
        let mut items = vec![
            new_item(&dependent_proto, 0, MasterRef::Id(500)),
            new_item(&dependent_proto, 1, MasterRef::Id(500)),
        ];
        let mut errors = ErrorSink::new();
        validate_dependent_items(&[master_proto, dependent_proto], &mut items, &mut graph, &mut errors);

        assert!(items[0].discovered);
        assert!(!items[1].discovered);
        assert!(errors.contains("maximum count of dependent items reached"));
    }

    #[test]
    fn chains_of_new_items_are_checked_masters_first() {
        let root_proto = ItemPrototype::new(10);
        let mut level1 = ItemPrototype::new(11);
        level1.master_itemid = 10;
        let mut level2 = ItemPrototype::new(12);
        level2.master_itemid = 11;

        let mut items = vec![
            new_item(&level2, 0, MasterRef::Item(2)),
            new_item(&root_proto, 0, MasterRef::None),
            new_item(&level1, 0, MasterRef::Item(1)),
        ];
        let mut graph = DependencyGraph::default();
        let mut errors = ErrorSink::new();
        validate_dependent_items(&[root_proto, level1, level2], &mut items, &mut graph, &mut errors);

        assert!(errors.is_empty());
        assert_eq!(graph.top_master(PENDING_NODE), PENDING_NODE | 1);
    }
}
