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

use super::read_fields;
use crate::db::Database;
use crate::error::{LldError, Result};
use crate::model::{
    ApplicationPrototype, ApplicationRef, ItemField, ItemPrototype, PreprocTemplate,
};
use crate::preprocessing::PreprocType;
use tracing::{debug, error};

fn prototype_mut(prototypes: &mut [ItemPrototype], itemid: u64) -> Option<&mut ItemPrototype> {
    prototypes
        .binary_search_by_key(&itemid, |p| p.itemid)
        .ok()
        .map(|idx| &mut prototypes[idx])
}

/// The discovery rule itself: its host and the configured lifetime text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRule {
    pub itemid: u64,
    pub host_id: u64,
    pub lifetime: String,
}

pub async fn load_rule(db: &mut dyn Database, rule_id: u64) -> Result<DiscoveryRule> {
    let sql = format!("SELECT hostid,lifetime FROM items WHERE itemid={rule_id}");
    let rows = db.select(&sql).await?;
    let row = rows.first().ok_or(LldError::RuleNotFound(rule_id))?;
    Ok(DiscoveryRule {
        itemid: rule_id,
        host_id: row.id(0, "hostid")?,
        lifetime: row.text(1).to_string(),
    })
}

/// Item prototypes of a rule, sorted by id, with their preprocessing
/// templates sorted by step.
pub async fn load_item_prototypes(
    db: &mut dyn Database,
    rule_id: u64,
) -> Result<Vec<ItemPrototype>> {
    let sql = format!(
        "SELECT i.itemid,i.status,i.master_itemid,{} \
         FROM items i JOIN item_discovery id ON id.itemid=i.itemid \
         WHERE id.parent_itemid={rule_id} ORDER BY i.itemid",
        ItemField::select_list("i.")
    );

    let mut prototypes = Vec::new();
    for row in db.select(&sql).await? {
        let mut prototype = ItemPrototype::new(row.id(0, "itemid")?);
        prototype.status = row.int(1, "status")?;
        prototype.master_itemid = row.id(2, "master_itemid")?;
        prototype.fields = read_fields(&row, 3)?.into_iter().collect();
        prototypes.push(prototype);
    }
    prototypes.sort_by_key(|p| p.itemid);

    let sql = format!(
        "SELECT ip.itemid,ip.step,ip.type,ip.params \
         FROM item_preproc ip JOIN item_discovery id ON id.itemid=ip.itemid \
         WHERE id.parent_itemid={rule_id} ORDER BY ip.itemid,ip.step"
    );
    for row in db.select(&sql).await? {
        let itemid = row.id(0, "itemid")?;
        let Some(prototype) = prototype_mut(&mut prototypes, itemid) else {
            error!(rule_id, itemid, "preprocessing step references unknown item prototype");
            continue;
        };
        prototype.preprocessing.push(PreprocTemplate {
            step: row.int(1, "step")? as i32,
            step_type: PreprocType(row.int(2, "type")? as i32),
            params: row.text(3).to_string(),
        });
    }
    for prototype in &mut prototypes {
        prototype.preprocessing.sort_by_key(|step| step.step);
    }

    debug!(rule_id, count = prototypes.len(), "loaded item prototypes");
    Ok(prototypes)
}

pub async fn load_application_prototypes(
    db: &mut dyn Database,
    rule_id: u64,
) -> Result<Vec<ApplicationPrototype>> {
    let sql = format!(
        "SELECT application_prototypeid,name FROM application_prototype \
         WHERE itemid={rule_id} ORDER BY application_prototypeid"
    );
    let mut prototypes = db
        .select(&sql)
        .await?
        .into_iter()
        .map(|row| {
            Ok(ApplicationPrototype {
                application_prototypeid: row.id(0, "application_prototypeid")?,
                name: row.text(1).to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    prototypes.sort_by_key(|p| p.application_prototypeid);
    Ok(prototypes)
}

/// Attaches application references to item prototypes: application
/// prototypes of the rule and regular host applications.
pub async fn load_item_application_prototype_links(
    db: &mut dyn Database,
    rule_id: u64,
    item_prototypes: &mut [ItemPrototype],
    application_prototypes: &[ApplicationPrototype],
) -> Result<()> {
    let sql = format!(
        "SELECT iap.itemid,iap.application_prototypeid \
         FROM item_application_prototype iap \
         JOIN application_prototype ap ON ap.application_prototypeid=iap.application_prototypeid \
         WHERE ap.itemid={rule_id}"
    );
    for row in db.select(&sql).await? {
        let itemid = row.id(0, "itemid")?;
        let application_prototypeid = row.id(1, "application_prototypeid")?;
        if application_prototypes
            .binary_search_by_key(&application_prototypeid, |p| p.application_prototypeid)
            .is_err()
        {
            error!(rule_id, application_prototypeid, "unknown application prototype");
            continue;
        }
        match prototype_mut(item_prototypes, itemid) {
            Some(prototype) => prototype
                .applications
                .push(ApplicationRef::Prototype(application_prototypeid)),
            None => error!(rule_id, itemid, "application prototype link to unknown item prototype"),
        }
    }

    let sql = format!(
        "SELECT ia.itemid,ia.applicationid \
         FROM items_applications ia JOIN item_discovery id ON id.itemid=ia.itemid \
         WHERE id.parent_itemid={rule_id}"
    );
    for row in db.select(&sql).await? {
        let itemid = row.id(0, "itemid")?;
        let applicationid = row.id(1, "applicationid")?;
        match prototype_mut(item_prototypes, itemid) {
            Some(prototype) => prototype
                .applications
                .push(ApplicationRef::Existing(applicationid)),
            None => error!(rule_id, itemid, "application link to unknown item prototype"),
        }
    }

    for prototype in item_prototypes.iter_mut() {
        prototype.applications.sort_by_key(|app| match app {
            ApplicationRef::Existing(id) => (0, *id),
            ApplicationRef::Prototype(id) => (1, *id),
        });
        prototype.applications.dedup();
    }
    Ok(())
}
