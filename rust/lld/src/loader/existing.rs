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

//! Entities a rule discovered in earlier runs. Everything is loaded as not
//! discovered; the reconcilers mark what this run still sees.

use super::read_fields;
use crate::db::{in_clause, Database};
use crate::error::Result;
use crate::model::{
    AppRef, Application, FieldSet, Item, ItemApplicationLink, ItemField, ItemPrototype, ItemRef,
    MasterRef, PreprocStep, Tracked,
};
use crate::preprocessing::PreprocType;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, error};

pub async fn load_items(
    db: &mut dyn Database,
    prototypes: &[ItemPrototype],
) -> Result<Vec<Item>> {
    if prototypes.is_empty() {
        return Ok(Vec::new());
    }
    let parent_ids = prototypes.iter().map(|p| p.itemid).collect::<Vec<_>>();
    let parents = in_clause("id.parent_itemid", &parent_ids);

    let sql = format!(
        "SELECT id.itemid,id.parent_itemid,id.key_,id.lastcheck,id.ts_delete,i.master_itemid,{} \
         FROM item_discovery id JOIN items i ON i.itemid=id.itemid \
         WHERE {parents} ORDER BY id.itemid",
        ItemField::select_list("i.")
    );
    let mut items = Vec::new();
    for row in db.select(&sql).await? {
        let mut values: BTreeMap<ItemField, String> = read_fields(&row, 6)?.into_iter().collect();
        let master_itemid = row.id(5, "master_itemid")?;
        items.push(Item {
            itemid: row.id(0, "itemid")?,
            parent_itemid: row.id(1, "parent_itemid")?,
            row: None,
            fields: FieldSet::from_fn(|field| values.remove(&field).unwrap_or_default()),
            key_proto: Tracked::new(row.text(2).to_string()),
            status: 0,
            master: Tracked::new(if master_itemid == 0 {
                MasterRef::None
            } else {
                MasterRef::Id(master_itemid)
            }),
            lastcheck: row.int(3, "lastcheck")?,
            ts_delete: row.int(4, "ts_delete")?,
            discovered: false,
            preprocessing: Vec::new(),
        });
    }
    items.sort_by_key(|item| item.itemid);

    let sql = format!(
        "SELECT ip.item_preprocid,ip.itemid,ip.step,ip.type,ip.params \
         FROM item_preproc ip JOIN item_discovery id ON id.itemid=ip.itemid \
         WHERE {parents} ORDER BY ip.itemid,ip.step"
    );
    for row in db.select(&sql).await? {
        let itemid = row.id(1, "itemid")?;
        let Ok(idx) = items.binary_search_by_key(&itemid, |item| item.itemid) else {
            error!(itemid, "preprocessing step of an item that was not loaded");
            continue;
        };
        let mut step = PreprocStep::new(
            row.int(2, "step")? as i32,
            PreprocType(row.int(3, "type")? as i32),
            row.text(4).to_string(),
        );
        step.item_preprocid = row.id(0, "item_preprocid")?;
        step.discovered = false;
        items[idx].preprocessing.push(step);
    }
    for item in &mut items {
        item.preprocessing.sort_by_key(|step| *step.step.get());
    }

    debug!(count = items.len(), "loaded discovered items");
    Ok(items)
}

/// Applications this rule discovered, flagged `shared` when another rule has
/// a discovery link to the same application.
pub async fn load_applications(db: &mut dyn Database, rule_id: u64) -> Result<Vec<Application>> {
    let sql = format!(
        "SELECT a.applicationid,a.name,ad.application_discoveryid,ad.application_prototypeid,\
         ad.name,ad.lastcheck,ad.ts_delete \
         FROM applications a \
         JOIN application_discovery ad ON ad.applicationid=a.applicationid \
         JOIN application_prototype ap ON ap.application_prototypeid=ad.application_prototypeid \
         WHERE ap.itemid={rule_id} ORDER BY a.applicationid"
    );
    let mut applications = Vec::new();
    for row in db.select(&sql).await? {
        applications.push(Application {
            applicationid: row.id(0, "applicationid")?,
            application_prototypeid: row.id(3, "application_prototypeid")?,
            application_discoveryid: row.id(2, "application_discoveryid")?,
            name: Tracked::new(row.text(1).to_string()),
            name_proto: Tracked::new(row.text(4).to_string()),
            lastcheck: row.int(5, "lastcheck")?,
            ts_delete: row.int(6, "ts_delete")?,
            shared: false,
            discovered: false,
            add_discovery: false,
            remove_discovery: false,
            remove: false,
            rows: Vec::new(),
        });
    }
    applications.sort_by_key(|app| app.applicationid);

    if !applications.is_empty() {
        let ids = applications
            .iter()
            .map(|app| app.applicationid)
            .collect::<Vec<_>>();
        let sql = format!(
            "SELECT DISTINCT ad.applicationid FROM application_discovery ad \
             JOIN application_prototype ap ON ap.application_prototypeid=ad.application_prototypeid \
             WHERE ap.itemid<>{rule_id} AND {}",
            in_clause("ad.applicationid", &ids)
        );
        let shared = db
            .select(&sql)
            .await?
            .iter()
            .map(|row| row.id(0, "applicationid"))
            .collect::<Result<HashSet<_>>>()?;
        for application in &mut applications {
            application.shared = shared.contains(&application.applicationid);
        }
    }

    debug!(rule_id, count = applications.len(), "loaded discovered applications");
    Ok(applications)
}

/// Application links of the items this rule discovered.
pub async fn load_item_application_links(
    db: &mut dyn Database,
    rule_id: u64,
) -> Result<Vec<ItemApplicationLink>> {
    let sql = format!(
        "SELECT ia.itemappid,ia.itemid,ia.applicationid \
         FROM items_applications ia \
         JOIN item_discovery id ON id.itemid=ia.itemid \
         JOIN item_discovery pd ON pd.itemid=id.parent_itemid \
         WHERE pd.parent_itemid={rule_id} ORDER BY ia.itemappid"
    );
    db.select(&sql)
        .await?
        .into_iter()
        .map(|row| {
            Ok(ItemApplicationLink {
                itemappid: row.id(0, "itemappid")?,
                item: ItemRef::Id(row.id(1, "itemid")?),
                application: AppRef::Id(row.id(2, "applicationid")?),
                discovered: false,
            })
        })
        .collect()
}
