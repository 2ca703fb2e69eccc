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

//! Lifetime handling of entities a rule no longer discovers.
//!
//! A lost entity is deleted once `lastcheck + lifetime` has passed. Until
//! then the deadline is kept in `ts_delete`, and it is cleared again when the
//! entity comes back.

use crate::config::CommitOptions;
use crate::db::{in_clause, Database, SqlBatch};
use crate::error::Result;
use crate::model::{Application, Item};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub refreshed: usize,
    pub lost: usize,
    pub deleted: usize,
}

/// Metadata writes and deletions decided for one entity kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepPlan {
    /// Still discovered, only `lastcheck` moves.
    pub refresh: Vec<u64>,
    /// Discovered again; `ts_delete` is cleared as well.
    pub recovered: Vec<u64>,
    /// Lost with a new deadline.
    pub deadlines: Vec<(u64, i64)>,
    pub expired: Vec<u64>,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.refresh.is_empty()
            && self.recovered.is_empty()
            && self.deadlines.is_empty()
            && self.expired.is_empty()
    }

    fn add(&mut self, id: u64, discovered: bool, lastcheck: i64, ts_delete: i64, lifetime: u64, now: i64) {
        if discovered {
            if ts_delete != 0 {
                self.recovered.push(id);
            } else if lastcheck != now {
                self.refresh.push(id);
            }
            return;
        }
        let deadline = lastcheck.saturating_add(i64::try_from(lifetime).unwrap_or(i64::MAX));
        if now >= deadline {
            self.expired.push(id);
        } else if deadline != ts_delete {
            self.deadlines.push((id, deadline));
        }
    }
}

/// Plans item lifetimes. Items that were never written are ignored.
pub fn plan_item_sweep(items: &[Item], lifetime: u64, now: i64) -> SweepPlan {
    let mut plan = SweepPlan::default();
    for item in items.iter().filter(|item| !item.is_new()) {
        plan.add(item.itemid, item.discovered, item.lastcheck, item.ts_delete, lifetime, now);
    }
    plan
}

/// Plans application lifetimes, keyed by discovery link id. Applications
/// already unlinked or removed by the commit are ignored.
pub fn plan_application_sweep(applications: &[Application], lifetime: u64, now: i64) -> SweepPlan {
    let mut plan = SweepPlan::default();
    for app in applications
        .iter()
        .filter(|app| app.application_discoveryid != 0 && !app.is_removal())
    {
        plan.add(
            app.application_discoveryid,
            app.discovered,
            app.lastcheck,
            app.ts_delete,
            lifetime,
            now,
        );
    }
    plan
}

async fn write_metadata(
    db: &mut dyn Database,
    batch: &mut SqlBatch,
    table: &str,
    id_column: &str,
    plan: &SweepPlan,
    now: i64,
) -> Result<()> {
    if !plan.refresh.is_empty() {
        let statement = format!(
            "UPDATE {table} SET lastcheck={now} WHERE {}",
            in_clause(id_column, &plan.refresh)
        );
        batch.push(db, &statement).await?;
    }
    if !plan.recovered.is_empty() {
        let statement = format!(
            "UPDATE {table} SET lastcheck={now},ts_delete=0 WHERE {}",
            in_clause(id_column, &plan.recovered)
        );
        batch.push(db, &statement).await?;
    }
    for (id, deadline) in &plan.deadlines {
        let statement = format!("UPDATE {table} SET ts_delete={deadline} WHERE {id_column}={id}");
        batch.push(db, &statement).await?;
    }
    batch.flush(db).await
}

async fn delete_rows(
    db: &mut dyn Database,
    batch: &mut SqlBatch,
    table: &str,
    id_column: &str,
    ids: &[u64],
    chunk: usize,
) -> Result<()> {
    for ids in ids.chunks(chunk.max(1)) {
        let statement = format!("DELETE FROM {table} WHERE {}", in_clause(id_column, ids));
        batch.push(db, &statement).await?;
    }
    batch.flush(db).await
}

/// Commits the sweep transaction, or rolls it back when the work failed.
async fn finish(db: &mut dyn Database, result: Result<()>) -> Result<()> {
    match result {
        Ok(()) => db.commit().await,
        Err(err) => {
            if let Err(rollback_err) = db.rollback().await {
                warn!(error = %rollback_err, "rollback after failed sweep failed");
            }
            Err(err)
        }
    }
}

async fn write_item_sweep(
    db: &mut dyn Database,
    plan: &SweepPlan,
    now: i64,
    options: &CommitOptions,
) -> Result<()> {
    let mut batch = SqlBatch::new(options.sql_batch_bytes);
    write_metadata(db, &mut batch, "item_discovery", "itemid", plan, now).await?;
    delete_rows(db, &mut batch, "items", "itemid", &plan.expired, options.insert_batch_rows).await
}

/// `targets` pairs the expired discovery link ids with their applications.
async fn write_application_sweep(
    db: &mut dyn Database,
    rule_id: u64,
    plan: &SweepPlan,
    targets: &[(u64, u64)],
    now: i64,
    options: &CommitOptions,
) -> Result<()> {
    let mut batch = SqlBatch::new(options.sql_batch_bytes);
    write_metadata(
        db,
        &mut batch,
        "application_discovery",
        "application_discoveryid",
        plan,
        now,
    )
    .await?;
    if targets.is_empty() {
        return Ok(());
    }

    let ids = targets.iter().map(|(_, id)| *id).collect::<Vec<_>>();
    let sql = format!(
        "SELECT DISTINCT ad.applicationid FROM application_discovery ad \
         JOIN application_prototype ap ON ap.application_prototypeid=ad.application_prototypeid \
         WHERE ap.itemid<>{rule_id} AND {}",
        in_clause("ad.applicationid", &ids)
    );
    let mut owned_elsewhere = HashSet::new();
    for row in db.select(&sql).await? {
        owned_elsewhere.insert(row.id(0, "applicationid")?);
    }

    let (unlink, delete): (Vec<_>, Vec<_>) = targets
        .iter()
        .partition(|(_, applicationid)| owned_elsewhere.contains(applicationid));
    let unlink = unlink.iter().map(|(link, _)| *link).collect::<Vec<_>>();
    let delete = delete.iter().map(|(_, id)| *id).collect::<Vec<_>>();
    debug!(unlinked = unlink.len(), deleted = delete.len(), "expired applications");

    delete_rows(
        db,
        &mut batch,
        "application_discovery",
        "application_discoveryid",
        &unlink,
        options.insert_batch_rows,
    )
    .await?;
    delete_rows(
        db,
        &mut batch,
        "applications",
        "applicationid",
        &delete,
        options.insert_batch_rows,
    )
    .await
}

/// Refreshes discovered items and ages out lost ones.
pub async fn sweep_lost_items(
    db: &mut dyn Database,
    items: &mut [Item],
    lifetime: u64,
    now: i64,
    options: &CommitOptions,
) -> Result<SweepSummary> {
    let plan = plan_item_sweep(items, lifetime, now);
    if plan.is_empty() {
        return Ok(SweepSummary::default());
    }

    db.begin().await?;
    let result = write_item_sweep(db, &plan, now, options).await;
    finish(db, result).await?;

    let deadlines = plan.deadlines.iter().copied().collect::<HashMap<_, _>>();
    for item in items.iter_mut().filter(|item| !item.is_new()) {
        if item.discovered {
            item.lastcheck = now;
            item.ts_delete = 0;
        } else if let Some(deadline) = deadlines.get(&item.itemid) {
            item.ts_delete = *deadline;
        }
    }

    let summary = SweepSummary {
        refreshed: plan.refresh.len() + plan.recovered.len(),
        lost: plan.deadlines.len(),
        deleted: plan.expired.len(),
    };
    if summary.deleted > 0 || summary.lost > 0 {
        info!(lost = summary.lost, deleted = summary.deleted, "swept lost items");
    }
    Ok(summary)
}

/// Refreshes discovered applications and ages out lost ones. An expired
/// application that another rule still discovers only loses this rule's link.
pub async fn sweep_lost_applications(
    db: &mut dyn Database,
    rule_id: u64,
    applications: &mut [Application],
    lifetime: u64,
    now: i64,
    options: &CommitOptions,
) -> Result<SweepSummary> {
    let plan = plan_application_sweep(applications, lifetime, now);
    if plan.is_empty() {
        return Ok(SweepSummary::default());
    }

    let expired: HashSet<u64> = plan.expired.iter().copied().collect();
    let targets = applications
        .iter()
        .filter(|app| expired.contains(&app.application_discoveryid))
        .map(|app| (app.application_discoveryid, app.applicationid))
        .collect::<Vec<_>>();

    db.begin().await?;
    let result = write_application_sweep(db, rule_id, &plan, &targets, now, options).await;
    finish(db, result).await?;

    for app in applications
        .iter_mut()
        .filter(|app| app.application_discoveryid != 0 && !app.is_removal())
    {
        if app.discovered {
            app.lastcheck = now;
            app.ts_delete = 0;
        } else if let Some((_, deadline)) = plan
            .deadlines
            .iter()
            .find(|(id, _)| *id == app.application_discoveryid)
        {
            app.ts_delete = *deadline;
        }
    }

    let summary = SweepSummary {
        refreshed: plan.refresh.len() + plan.recovered.len(),
        lost: plan.deadlines.len(),
        deleted: plan.expired.len(),
    };
    if summary.deleted > 0 || summary.lost > 0 {
        info!(lost = summary.lost, deleted = summary.deleted, "swept lost applications");
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Row;
    use crate::model::{ApplicationPrototype, FieldSet, ItemPrototype, RowId};
    use crate::testing::ScriptedDb;
    use pretty_assertions::assert_eq;

    const DAY: u64 = 86_400;

    fn item(itemid: u64, discovered: bool, lastcheck: i64, ts_delete: i64) -> Item {
        let mut item = Item::discovered_from(&ItemPrototype::new(10), RowId(0), FieldSet::default());
        item.itemid = itemid;
        item.discovered = discovered;
        item.lastcheck = lastcheck;
        item.ts_delete = ts_delete;
        item
    }

    #[test]
    fn lifecycle_round_trip() {
        let lifetime = 7 * DAY;
        let t0 = 1_700_000_000;

        // lost right after the run that last saw it
        let plan = plan_item_sweep(&[item(1, false, t0, 0)], lifetime, t0 + 60);
        assert_eq!(plan.deadlines, vec![(1, t0 + lifetime as i64)]);

        // one second short of the lifetime, then seen again
        let waiting = item(1, false, t0, t0 + lifetime as i64);
        let plan = plan_item_sweep(std::slice::from_ref(&waiting), lifetime, t0 + lifetime as i64 - 1);
        assert!(plan.is_empty());
        let plan = plan_item_sweep(
            &[item(1, true, t0, t0 + lifetime as i64)],
            lifetime,
            t0 + lifetime as i64 - 1,
        );
        assert_eq!(plan.recovered, vec![1]);
        assert!(plan.expired.is_empty());

        // absent for the whole lifetime
        let plan = plan_item_sweep(&[waiting], lifetime, t0 + lifetime as i64);
        assert_eq!(plan.expired, vec![1]);
    }

    #[test]
    fn lifetime_change_moves_the_deadline() {
        let plan = plan_item_sweep(&[item(1, false, 1000, 1000 + DAY as i64)], 2 * DAY, 2000);
        assert_eq!(plan.deadlines, vec![(1, 1000 + 2 * DAY as i64)]);
    }

    #[test]
    fn new_and_fresh_items_are_left_alone() {
        let plan = plan_item_sweep(&[item(0, false, 0, 0), item(5, true, 3000, 0)], DAY, 3000);
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn metadata_is_written_before_deletes() {
        let mut items = vec![
            item(1, true, 100, 0),
            item(2, true, 100, 500),
            item(3, false, 100, 0),
            item(4, false, 100, 0),
        ];
        items[3].lastcheck = -(DAY as i64);
        let mut db = ScriptedDb::new();
        let summary = sweep_lost_items(&mut db, &mut items, DAY, 1000, &CommitOptions::default())
            .await
            .unwrap();

        assert_eq!(db.transactions, vec!["begin", "commit"]);
        assert_eq!(
            db.statements(),
            vec![
                "UPDATE item_discovery SET lastcheck=1000 WHERE itemid=1".to_string(),
                "UPDATE item_discovery SET lastcheck=1000,ts_delete=0 WHERE itemid=2".to_string(),
                "UPDATE item_discovery SET ts_delete=86500 WHERE itemid=3".to_string(),
                "DELETE FROM items WHERE itemid=4".to_string(),
            ]
        );
        assert_eq!(db.executed.len(), 2);
        assert_eq!(summary, SweepSummary { refreshed: 2, lost: 1, deleted: 1 });
        assert_eq!(items[1].ts_delete, 0);
        assert_eq!(items[2].ts_delete, 86_500);
    }

    #[tokio::test]
    async fn expired_applications_owned_elsewhere_only_lose_the_link() {
        let prototype = ApplicationPrototype {
            application_prototypeid: 7,
            name: "FS {#FSNAME}".into(),
        };
        let lost = |applicationid: u64| {
            let mut app = Application::new(&prototype, format!("FS {applicationid}"), RowId(0));
            app.applicationid = applicationid;
            app.application_discoveryid = applicationid + 100;
            app.discovered = false;
            app.lastcheck = 0;
            app
        };
        let mut applications = vec![lost(50), lost(51)];
        let mut db = ScriptedDb::new().on("SELECT DISTINCT ad.applicationid", vec![Row::of(["51"])]);
        let summary = sweep_lost_applications(
            &mut db,
            9,
            &mut applications,
            DAY,
            DAY as i64,
            &CommitOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(summary.deleted, 2);
        assert!(db.selects[0].contains("ap.itemid<>9"));
        assert_eq!(
            db.statements(),
            vec![
                "DELETE FROM application_discovery WHERE application_discoveryid=151".to_string(),
                "DELETE FROM applications WHERE applicationid=50".to_string(),
            ]
        );
    }
}
