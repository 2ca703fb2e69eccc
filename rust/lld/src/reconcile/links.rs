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

use crate::model::{
    find_prototype, AppRef, Application, ApplicationIndex, ApplicationRef, Item,
    ItemApplicationLink, ItemPrototype, ItemRef,
};
use std::collections::HashMap;

/// Builds the item/application links of every discovered item. Existing
/// links are kept (and marked discovered when still wanted); links no longer
/// wanted are left to the lifecycle of their item.
pub fn resolve_links(
    prototypes: &[ItemPrototype],
    items: &[Item],
    applications: &[Application],
    application_index: &ApplicationIndex,
    existing: Vec<ItemApplicationLink>,
) -> Vec<ItemApplicationLink> {
    let mut links = existing;
    let mut known: HashMap<(ItemRef, AppRef), usize> = links
        .iter()
        .enumerate()
        .map(|(idx, link)| ((link.item, link.application), idx))
        .collect();

    for (handle, item) in items.iter().enumerate() {
        let Some(row) = item.row.filter(|_| item.discovered) else {
            continue;
        };
        let Some(prototype) = find_prototype(prototypes, item.parent_itemid) else {
            continue;
        };
        let item_ref = match item.itemid {
            0 => ItemRef::Item(handle),
            itemid => ItemRef::Id(itemid),
        };

        for reference in &prototype.applications {
            let app_ref = match reference {
                ApplicationRef::Existing(applicationid) => AppRef::Id(*applicationid),
                ApplicationRef::Prototype(prototypeid) => {
                    let Some(app) = application_index.get(*prototypeid, row) else {
                        continue;
                    };
                    match applications[app].applicationid {
                        0 => AppRef::Application(app),
                        applicationid => AppRef::Id(applicationid),
                    }
                }
            };

            match known.get(&(item_ref, app_ref)) {
                Some(idx) => links[*idx].discovered = true,
                None => {
                    known.insert((item_ref, app_ref), links.len());
                    links.push(ItemApplicationLink {
                        itemappid: 0,
                        item: item_ref,
                        application: app_ref,
                        discovered: true,
                    });
                }
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApplicationPrototype, FieldSet, ItemField, RowId};
    use pretty_assertions::assert_eq;

    #[test]
    fn links_new_and_existing_entities() {
        let mut prototype = ItemPrototype::new(10).with(ItemField::Key, "fs[{#FSNAME}]");
        prototype.applications = vec![ApplicationRef::Existing(300), ApplicationRef::Prototype(7)];

        let mut persisted = Item::discovered_from(&prototype, RowId(0), FieldSet::default());
        persisted.itemid = 101;
        let fresh = Item::discovered_from(&prototype, RowId(1), FieldSet::default());
        let items = vec![fresh, persisted];

        let app_proto = ApplicationPrototype {
            application_prototypeid: 7,
            name: "Filesystem {#FSNAME}".into(),
        };
        let mut existing_app = Application::new(&app_proto, "Filesystem /".into(), RowId(0));
        existing_app.applicationid = 50;
        let new_app = Application::new(&app_proto, "Filesystem /var".into(), RowId(1));
        let applications = vec![new_app, existing_app];
        let index = ApplicationIndex::build(&applications);

        let existing_links = vec![
            ItemApplicationLink {
                itemappid: 900,
                item: ItemRef::Id(101),
                application: AppRef::Id(50),
                discovered: false,
            },
            ItemApplicationLink {
                itemappid: 901,
                item: ItemRef::Id(101),
                application: AppRef::Id(49),
                discovered: false,
            },
        ];

        let links = resolve_links(&[prototype], &items, &applications, &index, existing_links);
        let summary = links
            .iter()
            .map(|l| (l.itemappid, l.item, l.application, l.discovered))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (900, ItemRef::Id(101), AppRef::Id(50), true),
                (901, ItemRef::Id(101), AppRef::Id(49), false),
                (0, ItemRef::Item(0), AppRef::Id(300), true),
                (0, ItemRef::Item(0), AppRef::Application(0), true),
                (0, ItemRef::Id(101), AppRef::Id(300), true),
            ]
        );
    }
}
