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

use super::CommitSummary;
use crate::config::CommitOptions;
use crate::db::{in_clause, quote, Database, InsertBuilder, SqlBatch, SqlValue};
use crate::error::{LldError, Result};
use crate::model::{ColumnKind, Item, ItemField, ItemHandle, MasterRef, PreprocStep, ITEM_FLAG_DISCOVERED};
use anyhow::anyhow;
use std::collections::HashMap;

fn step_pending(step: &PreprocStep) -> bool {
    if step.discovered {
        step.is_new() || step.has_changes()
    } else {
        !step.is_new()
    }
}

pub(super) fn has_pending_writes(item: &Item) -> bool {
    item.discovered
        && (item.is_new()
            || item.has_changes()
            || item.key_proto.is_dirty()
            || item.preprocessing.iter().any(step_pending))
}

/// Hands out consecutive ids from `first` in the order of `handles`.
pub fn assign_ids(handles: &[ItemHandle], first: u64) -> HashMap<ItemHandle, u64> {
    handles
        .iter()
        .enumerate()
        .map(|(offset, handle)| (*handle, first + offset as u64))
        .collect()
}

/// Orders new items so that every master precedes its dependents.
pub fn insert_order(items: &[Item], created: &[ItemHandle]) -> Vec<ItemHandle> {
    let depth = |mut handle: ItemHandle| {
        let mut depth = 0;
        while let MasterRef::Item(master) = *items[handle].master.get() {
            depth += 1;
            if depth > items.len() {
                break;
            }
            handle = master;
        }
        depth
    };
    let mut order = created.to_vec();
    order.sort_by_key(|handle| depth(*handle));
    order
}

/// Rewrites references to masters created in this run into their new ids.
pub fn cascade_master_ids(items: &mut [Item], ids: &HashMap<ItemHandle, u64>) -> Result<()> {
    for handle in 0..items.len() {
        if !items[handle].discovered {
            continue;
        }
        let MasterRef::Item(master) = *items[handle].master.get() else {
            continue;
        };
        let master_itemid = match ids.get(&master) {
            Some(itemid) => *itemid,
            None if items[master].itemid != 0 => items[master].itemid,
            None => {
                return Err(LldError::Internal(anyhow!(
                    "master of item \"{}\" was not created",
                    items[handle].key()
                )))
            }
        };
        items[handle].master.set(MasterRef::Id(master_itemid));
    }
    Ok(())
}

fn master_itemid(item: &Item) -> u64 {
    match *item.master.get() {
        MasterRef::Id(itemid) => itemid,
        MasterRef::None | MasterRef::Item(_) => 0,
    }
}

fn field_value(field: ItemField, value: &str) -> Result<SqlValue> {
    let raw = value.trim();
    let decode = || LldError::Decode {
        column: field.column(),
        value: value.to_string(),
    };
    Ok(match field.policy().kind {
        ColumnKind::Text => SqlValue::Text(value.to_string()),
        ColumnKind::Int if raw.is_empty() => SqlValue::Int(0),
        ColumnKind::Int => SqlValue::Int(raw.parse().map_err(|_| decode())?),
        ColumnKind::NullableId if raw.is_empty() => SqlValue::NullableId(0),
        ColumnKind::NullableId => SqlValue::NullableId(raw.parse().map_err(|_| decode())?),
    })
}

/// Column-level UPDATE for a persisted item, `None` when nothing changed.
fn item_update(item: &Item) -> Result<Option<String>> {
    let mut sets = Vec::new();
    for field in item.fields.dirty_fields() {
        let value = field_value(field, item.fields.get(field))?;
        sets.push(format!("{}={}", field.column(), value.render()));
    }
    if item.master.is_dirty() {
        sets.push(format!(
            "master_itemid={}",
            SqlValue::NullableId(master_itemid(item)).render()
        ));
    }
    if sets.is_empty() {
        return Ok(None);
    }
    Ok(Some(format!(
        "UPDATE items SET {} WHERE itemid={}",
        sets.join(","),
        item.itemid
    )))
}

pub(super) async fn write_items(
    db: &mut dyn Database,
    batch: &mut SqlBatch,
    host_id: u64,
    items: &mut [Item],
    now: i64,
    options: &CommitOptions,
    summary: &mut CommitSummary,
) -> Result<()> {
    let created = (0..items.len())
        .filter(|handle| items[*handle].discovered && items[*handle].is_new())
        .collect::<Vec<_>>();
    let order = insert_order(items, &created);

    let first = db.reserve_ids("items", "itemid", order.len()).await?;
    let ids = assign_ids(&order, first);
    for (handle, itemid) in &ids {
        items[*handle].itemid = *itemid;
    }
    cascade_master_ids(items, &ids)?;

    if !order.is_empty() {
        let mut columns = vec!["itemid", "hostid", "flags", "status", "master_itemid"];
        columns.extend(ItemField::ALL.iter().map(|field| field.column()));
        let mut insert = InsertBuilder::new("items", &columns);
        let mut discovery = InsertBuilder::new(
            "item_discovery",
            &["itemdiscoveryid", "itemid", "parent_itemid", "key_", "lastcheck", "ts_delete"],
        );
        let first_discovery = db
            .reserve_ids("item_discovery", "itemdiscoveryid", order.len())
            .await?;

        for (offset, handle) in order.iter().enumerate() {
            let item = &mut items[*handle];
            let mut row = vec![
                SqlValue::Id(item.itemid),
                SqlValue::Id(host_id),
                SqlValue::Int(ITEM_FLAG_DISCOVERED),
                SqlValue::Int(item.status),
                SqlValue::NullableId(master_itemid(item)),
            ];
            for field in ItemField::ALL {
                row.push(field_value(field, item.fields.get(field))?);
            }
            insert.add_row(row);
            discovery.add_row(vec![
                SqlValue::Id(first_discovery + offset as u64),
                SqlValue::Id(item.itemid),
                SqlValue::Id(item.parent_itemid),
                SqlValue::Text(item.key_proto.get().clone()),
                SqlValue::Int(now),
                SqlValue::Int(0),
            ]);
            item.lastcheck = now;
        }
        insert.execute(db, batch, options.insert_batch_rows).await?;
        discovery.execute(db, batch, options.insert_batch_rows).await?;
    }

    // after the inserts, a persisted item may now point at a new master
    let mut updated = 0;
    for (handle, item) in items.iter().enumerate() {
        if !item.discovered || ids.contains_key(&handle) {
            continue;
        }
        if let Some(statement) = item_update(item)? {
            batch.push(db, &statement).await?;
            updated += 1;
        }
        if item.key_proto.is_dirty() {
            let statement = format!(
                "UPDATE item_discovery SET key_={} WHERE itemid={}",
                quote(item.key_proto.get()),
                item.itemid
            );
            batch.push(db, &statement).await?;
        }
    }
    batch.flush(db).await?;

    for item in items.iter_mut().filter(|item| item.discovered) {
        item.fields.mark_persisted();
        item.master.mark_persisted();
        item.key_proto.mark_persisted();
    }
    summary.items_created += order.len();
    summary.items_updated += updated;
    Ok(())
}

fn step_update(step: &PreprocStep) -> String {
    let mut sets = Vec::new();
    if step.step.is_dirty() {
        sets.push(format!("step={}", step.step.get()));
    }
    if step.step_type.is_dirty() {
        sets.push(format!("type={}", step.step_type.get().0));
    }
    if step.params.is_dirty() {
        sets.push(format!("params={}", quote(step.params.get())));
    }
    format!(
        "UPDATE item_preproc SET {} WHERE item_preprocid={}",
        sets.join(","),
        step.item_preprocid
    )
}

/// Writes step changes of discovered items: removed steps first, then
/// changed ones, then new ones.
pub(super) async fn write_preprocessing(
    db: &mut dyn Database,
    batch: &mut SqlBatch,
    items: &mut [Item],
    options: &CommitOptions,
    summary: &mut CommitSummary,
) -> Result<()> {
    let mut removed = Vec::new();
    let mut created = 0;
    for item in items.iter().filter(|item| item.discovered) {
        for step in &item.preprocessing {
            match (step.discovered, step.is_new()) {
                (false, false) => removed.push(step.item_preprocid),
                (true, true) => created += 1,
                (true, false) if step.has_changes() => {
                    batch.push(db, &step_update(step)).await?;
                    summary.steps_updated += 1;
                }
                _ => {}
            }
        }
    }
    if !removed.is_empty() {
        let statement = format!(
            "DELETE FROM item_preproc WHERE {}",
            in_clause("item_preprocid", &removed)
        );
        batch.push(db, &statement).await?;
    }

    let mut next = db.reserve_ids("item_preproc", "item_preprocid", created).await?;
    let mut insert = InsertBuilder::new(
        "item_preproc",
        &["item_preprocid", "itemid", "step", "type", "params"],
    );
    for item in items.iter_mut().filter(|item| item.discovered) {
        let itemid = item.itemid;
        for step in item.preprocessing.iter_mut().filter(|s| s.discovered && s.is_new()) {
            step.item_preprocid = next;
            next += 1;
            insert.add_row(vec![
                SqlValue::Id(step.item_preprocid),
                SqlValue::Id(itemid),
                SqlValue::Int(i64::from(*step.step.get())),
                SqlValue::Int(i64::from(step.step_type.get().0)),
                SqlValue::Text(step.params.get().clone()),
            ]);
        }
    }
    insert.execute(db, batch, options.insert_batch_rows).await?;
    batch.flush(db).await?;

    for item in items.iter_mut().filter(|item| item.discovered) {
        item.preprocessing.retain(|step| step.discovered);
        item.preprocessing.iter_mut().for_each(PreprocStep::mark_persisted);
    }
    summary.steps_created += created;
    summary.steps_deleted += removed.len();
    Ok(())
}
