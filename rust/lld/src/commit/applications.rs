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
use crate::error::Result;
use crate::model::{Application, APPLICATION_DISCOVERY_CREATED};

pub(super) fn has_pending_writes(app: &Application) -> bool {
    app.is_removal()
        || (app.discovered
            && (app.is_new() || app.add_discovery || app.name.is_dirty() || app.name_proto.is_dirty()))
}

pub(super) async fn write_applications(
    db: &mut dyn Database,
    batch: &mut SqlBatch,
    host_id: u64,
    applications: &mut [Application],
    now: i64,
    options: &CommitOptions,
    summary: &mut CommitSummary,
) -> Result<()> {
    let unlinked = applications
        .iter()
        .filter(|app| app.remove_discovery && !app.remove && app.application_discoveryid != 0)
        .map(|app| app.application_discoveryid)
        .collect::<Vec<_>>();
    if !unlinked.is_empty() {
        let statement = format!(
            "DELETE FROM application_discovery WHERE {}",
            in_clause("application_discoveryid", &unlinked)
        );
        batch.push(db, &statement).await?;
    }
    let removed = applications
        .iter()
        .filter(|app| app.remove && !app.is_new())
        .map(|app| app.applicationid)
        .collect::<Vec<_>>();
    if !removed.is_empty() {
        let statement = format!(
            "DELETE FROM applications WHERE {}",
            in_clause("applicationid", &removed)
        );
        batch.push(db, &statement).await?;
    }

    for app in applications
        .iter()
        .filter(|app| app.discovered && !app.is_new() && !app.add_discovery)
    {
        let mut touched = false;
        if app.name.is_dirty() {
            let statement = format!(
                "UPDATE applications SET name={} WHERE applicationid={}",
                quote(app.name.get()),
                app.applicationid
            );
            batch.push(db, &statement).await?;
            touched = true;
        }
        if app.name_proto.is_dirty() && app.application_discoveryid != 0 {
            let statement = format!(
                "UPDATE application_discovery SET name={} WHERE application_discoveryid={}",
                quote(app.name_proto.get()),
                app.application_discoveryid
            );
            batch.push(db, &statement).await?;
            touched = true;
        }
        if touched {
            summary.applications_updated += 1;
        }
    }

    let created = applications
        .iter()
        .filter(|app| app.discovered && app.is_new())
        .count();
    let mut next = db.reserve_ids("applications", "applicationid", created).await?;
    let mut insert = InsertBuilder::new("applications", &["applicationid", "hostid", "name", "flags"]);
    for app in applications.iter_mut().filter(|app| app.discovered && app.is_new()) {
        app.applicationid = next;
        next += 1;
        insert.add_row(vec![
            SqlValue::Id(app.applicationid),
            SqlValue::Id(host_id),
            SqlValue::Text(app.name.get().clone()),
            SqlValue::Int(APPLICATION_DISCOVERY_CREATED),
        ]);
        // the discovery link is written below like any other missing link
        app.add_discovery = true;
    }
    insert.execute(db, batch, options.insert_batch_rows).await?;

    let linked = applications
        .iter()
        .filter(|app| app.discovered && app.add_discovery)
        .count();
    let mut next = db
        .reserve_ids("application_discovery", "application_discoveryid", linked)
        .await?;
    let mut discovery = InsertBuilder::new(
        "application_discovery",
        &[
            "application_discoveryid",
            "applicationid",
            "application_prototypeid",
            "name",
            "lastcheck",
            "ts_delete",
        ],
    );
    for app in applications.iter_mut().filter(|app| app.discovered && app.add_discovery) {
        app.application_discoveryid = next;
        next += 1;
        discovery.add_row(vec![
            SqlValue::Id(app.application_discoveryid),
            SqlValue::Id(app.applicationid),
            SqlValue::Id(app.application_prototypeid),
            SqlValue::Text(app.name_proto.get().clone()),
            SqlValue::Int(now),
            SqlValue::Int(0),
        ]);
        app.add_discovery = false;
        app.lastcheck = now;
        app.ts_delete = 0;
    }
    discovery.execute(db, batch, options.insert_batch_rows).await?;
    batch.flush(db).await?;

    for app in applications.iter_mut().filter(|app| app.discovered) {
        app.name.mark_persisted();
        app.name_proto.mark_persisted();
    }
    summary.applications_created += created;
    summary.applications_removed += removed.len();
    summary.application_links_created += linked;
    Ok(())
}
