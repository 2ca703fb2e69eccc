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

//! Writes a reconciled run in one transaction.
//!
//! The host row and the item prototypes are locked first; if any of them is
//! gone the whole commit is abandoned. New rows get ids from reserved blocks,
//! so the statements can be rendered without round trips in between.

mod applications;
mod items;
mod links;

pub use items::{assign_ids, cascade_master_ids, insert_order};

use crate::config::CommitOptions;
use crate::db::{Database, SqlBatch};
use crate::error::{LldError, Result};
use crate::model::{Application, Item, ItemApplicationLink, ItemPrototype};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Everything a run wants persisted.
#[derive(Debug)]
pub struct CommitSet<'a> {
    pub host_id: u64,
    pub items: &'a mut [Item],
    pub item_prototypes: &'a [ItemPrototype],
    pub applications: &'a mut [Application],
    pub links: &'a mut [ItemApplicationLink],
    /// Timestamp written as `lastcheck` of created discovery links.
    pub now: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub items_created: usize,
    pub items_updated: usize,
    pub steps_created: usize,
    pub steps_updated: usize,
    pub steps_deleted: usize,
    pub applications_created: usize,
    pub applications_updated: usize,
    pub applications_removed: usize,
    pub application_links_created: usize,
    pub links_created: usize,
}

impl CommitSet<'_> {
    fn has_changes(&self) -> bool {
        self.items.iter().any(items::has_pending_writes)
            || self.applications.iter().any(applications::has_pending_writes)
            || self.links.iter().any(|link| link.discovered && link.is_new())
    }
}

pub async fn commit(
    db: &mut dyn Database,
    set: CommitSet<'_>,
    options: &CommitOptions,
) -> Result<CommitSummary> {
    if !set.has_changes() {
        debug!(host_id = set.host_id, "nothing to commit");
        return Ok(CommitSummary::default());
    }

    db.begin().await?;
    match write(db, set, options).await {
        Ok(summary) => {
            db.commit().await?;
            info!(
                items_created = summary.items_created,
                items_updated = summary.items_updated,
                applications_created = summary.applications_created,
                links_created = summary.links_created,
                "committed discovery results"
            );
            Ok(summary)
        }
        Err(err) => {
            if let Err(rollback_err) = db.rollback().await {
                warn!(error = %rollback_err, "rollback after failed commit failed");
            }
            Err(err)
        }
    }
}

async fn write(
    db: &mut dyn Database,
    set: CommitSet<'_>,
    options: &CommitOptions,
) -> Result<CommitSummary> {
    if !db.lock_rows_by_id("hosts", "hostid", &[set.host_id]).await? {
        return Err(LldError::ConcurrentlyRemoved { table: "hosts" });
    }
    let prototype_ids = set
        .item_prototypes
        .iter()
        .map(|p| p.itemid)
        .collect::<Vec<_>>();
    if !db.lock_rows_by_id("items", "itemid", &prototype_ids).await? {
        return Err(LldError::ConcurrentlyRemoved { table: "items" });
    }

    let mut batch = SqlBatch::new(options.sql_batch_bytes);
    let mut summary = CommitSummary::default();

    items::write_items(db, &mut batch, set.host_id, set.items, set.now, options, &mut summary)
        .await?;
    items::write_preprocessing(db, &mut batch, set.items, options, &mut summary).await?;
    applications::write_applications(
        db,
        &mut batch,
        set.host_id,
        set.applications,
        set.now,
        options,
        &mut summary,
    )
    .await?;
    links::write_links(
        db,
        &mut batch,
        set.items,
        set.applications,
        set.links,
        options,
        &mut summary,
    )
    .await?;

    debug!(statements = batch.flushed_statements(), "commit statements flushed");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldSet, ItemField, MasterRef, RowId};
    use crate::testing::ScriptedDb;

    fn new_item() -> (ItemPrototype, Item) {
        let prototype = ItemPrototype::new(10).with(ItemField::Key, "fs[{#FSNAME}]");
        let item = Item::discovered_from(
            &prototype,
            RowId(0),
            FieldSet::from_fn(|f| prototype.field(f).replace("{#FSNAME}", "/")),
        );
        (prototype, item)
    }

    #[tokio::test]
    async fn nothing_to_write_skips_the_transaction() {
        let mut db = ScriptedDb::new();
        let set = CommitSet {
            host_id: 1,
            items: &mut [],
            item_prototypes: &[],
            applications: &mut [],
            links: &mut [],
            now: 0,
        };
        let summary = commit(&mut db, set, &CommitOptions::default()).await.unwrap();
        assert_eq!(summary, CommitSummary::default());
        assert!(db.transactions.is_empty());
    }

    #[tokio::test]
    async fn vanished_host_aborts() {
        let (prototype, item) = new_item();
        let mut items = vec![item];
        let mut db = ScriptedDb::new();
        db.vanished_tables.push("hosts");
        let set = CommitSet {
            host_id: 1,
            items: &mut items,
            item_prototypes: std::slice::from_ref(&prototype),
            applications: &mut [],
            links: &mut [],
            now: 0,
        };
        let err = commit(&mut db, set, &CommitOptions::default()).await.unwrap_err();
        assert!(matches!(err, LldError::ConcurrentlyRemoved { table: "hosts" }));
        assert_eq!(db.transactions, vec!["begin", "rollback"]);
        assert!(db.executed.is_empty());
        assert!(items[0].is_new());
    }

    #[tokio::test]
    async fn new_item_is_inserted_with_its_discovery_link() {
        let (prototype, item) = new_item();
        let mut items = vec![item];
        let mut db = ScriptedDb::new()
            .with_next_id("items", 500)
            .with_next_id("item_discovery", 70);
        let set = CommitSet {
            host_id: 1,
            items: &mut items,
            item_prototypes: std::slice::from_ref(&prototype),
            applications: &mut [],
            links: &mut [],
            now: 1000,
        };
        let summary = commit(&mut db, set, &CommitOptions::default()).await.unwrap();

        assert_eq!(summary.items_created, 1);
        assert_eq!(db.transactions, vec!["begin", "commit"]);
        assert_eq!(items[0].itemid, 500);
        assert_eq!(items[0].lastcheck, 1000);
        let inserts = db.statements_containing("INSERT INTO items ");
        assert_eq!(inserts.len(), 1);
        assert!(inserts[0].starts_with("INSERT INTO items (itemid,hostid,flags,status,master_itemid,name,key_,"));
        assert!(inserts[0].contains("VALUES (500,1,4,0,NULL,'','fs[/]',0,3,'1m'"));
        assert_eq!(
            db.statements_containing("INSERT INTO item_discovery"),
            vec![
                "INSERT INTO item_discovery (itemdiscoveryid,itemid,parent_itemid,key_,lastcheck,ts_delete) \
                 VALUES (70,500,10,'fs[{#FSNAME}]',1000,0)"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn existing_dependent_is_repointed_after_its_new_master_is_inserted() {
        let (prototype, master) = new_item();
        let (_, mut dependent) = new_item();
        dependent.itemid = 100;
        dependent.master.set(MasterRef::Item(1));
        let mut items = vec![dependent, master];
        let mut db = ScriptedDb::new()
            .with_next_id("items", 500)
            .with_next_id("item_discovery", 70);
        let set = CommitSet {
            host_id: 1,
            items: &mut items,
            item_prototypes: std::slice::from_ref(&prototype),
            applications: &mut [],
            links: &mut [],
            now: 1000,
        };
        let summary = commit(&mut db, set, &CommitOptions::default()).await.unwrap();

        let statements = db.statements();
        let insert = statements
            .iter()
            .position(|s| s.starts_with("INSERT INTO items "))
            .unwrap();
        let update = statements
            .iter()
            .position(|s| s == "UPDATE items SET master_itemid=500 WHERE itemid=100")
            .unwrap();
        assert!(insert < update);
        assert_eq!(summary.items_created, 1);
        assert_eq!(summary.items_updated, 1);
        assert_eq!(*items[0].master.get(), MasterRef::Id(500));
        assert!(!items[0].master.is_dirty());
    }
}
