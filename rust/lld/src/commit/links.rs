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
use crate::db::{Database, InsertBuilder, SqlBatch, SqlValue};
use crate::error::Result;
use crate::model::{AppRef, Application, Item, ItemApplicationLink, ItemRef};
use tracing::debug;

fn link_ids(
    link: &ItemApplicationLink,
    items: &[Item],
    applications: &[Application],
) -> Option<(u64, u64)> {
    let itemid = match link.item {
        ItemRef::Id(itemid) => itemid,
        ItemRef::Item(handle) if items[handle].discovered => items[handle].itemid,
        ItemRef::Item(_) => 0,
    };
    let applicationid = match link.application {
        AppRef::Id(applicationid) => applicationid,
        AppRef::Application(handle) if applications[handle].discovered => {
            applications[handle].applicationid
        }
        AppRef::Application(_) => 0,
    };
    (itemid != 0 && applicationid != 0).then_some((itemid, applicationid))
}

/// Inserts the new links, resolving handles to the ids assigned earlier in
/// the commit.
pub(super) async fn write_links(
    db: &mut dyn Database,
    batch: &mut SqlBatch,
    items: &[Item],
    applications: &[Application],
    links: &mut [ItemApplicationLink],
    options: &CommitOptions,
    summary: &mut CommitSummary,
) -> Result<()> {
    let mut wanted = Vec::new();
    for (idx, link) in links.iter().enumerate() {
        if !link.discovered || !link.is_new() {
            continue;
        }
        match link_ids(link, items, applications) {
            Some(ids) => wanted.push((idx, ids)),
            None => debug!(?link, "skipping link to an entity that was not written"),
        }
    }
    if wanted.is_empty() {
        return Ok(());
    }

    let first = db
        .reserve_ids("items_applications", "itemappid", wanted.len())
        .await?;
    let mut insert = InsertBuilder::new("items_applications", &["itemappid", "applicationid", "itemid"]);
    for (offset, (idx, (itemid, applicationid))) in wanted.iter().enumerate() {
        let itemappid = first + offset as u64;
        insert.add_row(vec![
            SqlValue::Id(itemappid),
            SqlValue::Id(*applicationid),
            SqlValue::Id(*itemid),
        ]);
        links[*idx].itemappid = itemappid;
        links[*idx].item = ItemRef::Id(*itemid);
        links[*idx].application = AppRef::Id(*applicationid);
    }
    insert.execute(db, batch, options.insert_batch_rows).await?;
    batch.flush(db).await?;

    summary.links_created += wanted.len();
    Ok(())
}
