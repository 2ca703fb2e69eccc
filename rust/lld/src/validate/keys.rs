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
use crate::db::{in_clause_text, Database};
use crate::error::{ErrorSink, Result};
use crate::model::{Item, ItemField};
use std::collections::{BTreeSet, HashSet};

fn writes_key(item: &Item) -> bool {
    item.discovered && (item.is_new() || item.fields.is_dirty(ItemField::Key))
}

fn reject_duplicate(item: &mut Item, errors: &mut ErrorSink) {
    let reason = format!("item with the same key \"{}\" already exists", item.key());
    reject_item(item, Some(ItemField::Key), &reason, errors);
}

/// Rejects keys claimed twice inside the batch. Renamed items claim before
/// new ones. A rejected rename falls back to its persisted key, which may
/// collide again, so the pass repeats until nothing changes.
fn reject_batch_duplicates(items: &mut [Item], errors: &mut ErrorSink) {
    loop {
        let mut claimed: HashSet<String> = items
            .iter()
            .filter(|item| !item.is_new() && !item.fields.is_dirty(ItemField::Key))
            .map(|item| item.key().to_string())
            .collect();
        let writers = items
            .iter()
            .enumerate()
            .filter(|(_, item)| writes_key(item))
            .map(|(handle, item)| (item.is_new(), handle))
            .collect::<BTreeSet<_>>();

        let mut rejected = false;
        for (_, handle) in writers {
            if !claimed.insert(items[handle].key().to_string()) {
                reject_duplicate(&mut items[handle], errors);
                rejected = true;
            }
        }
        if !rejected {
            return;
        }
    }
}

/// Rejects keys used twice in the batch or already used by another item of
/// the host. Keys that are not being written keep their claim.
pub async fn validate_item_keys(
    db: &mut dyn Database,
    host_id: u64,
    items: &mut [Item],
    errors: &mut ErrorSink,
) -> Result<()> {
    reject_batch_duplicates(items, errors);

    let keys = items
        .iter()
        .filter(|item| writes_key(item))
        .map(|item| item.key().to_string())
        .collect::<Vec<_>>();
    if keys.is_empty() {
        return Ok(());
    }

    let own = items
        .iter()
        .filter(|item| !item.is_new())
        .map(|item| item.itemid)
        .collect::<HashSet<_>>();
    let sql = format!(
        "SELECT itemid,key_ FROM items WHERE hostid={host_id} AND {}",
        in_clause_text("key_", &keys)
    );
    let mut taken = HashSet::new();
    for row in db.select(&sql).await? {
        if !own.contains(&row.id(0, "itemid")?) {
            taken.insert(row.text(1).to_string());
        }
    }

    let mut renames_rejected = false;
    for item in items.iter_mut().filter(|item| writes_key(item)) {
        if taken.contains(item.key()) {
            renames_rejected |= !item.is_new();
            reject_duplicate(item, errors);
        }
    }
    // restored keys belong to this host already; only the batch can clash
    if renames_rejected {
        reject_batch_duplicates(items, errors);
    }
    Ok(())
}
