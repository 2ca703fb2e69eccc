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

use super::item::ItemHandle;
use super::row::RowId;
use super::tracked::Tracked;
use std::collections::HashMap;

/// Position of an application in the reconciled application list.
pub type ApplicationHandle = usize;

/// `applications.flags` value for rows created by discovery.
pub const APPLICATION_DISCOVERY_CREATED: i64 = 4;

/// Application an item prototype is linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplicationRef {
    /// A regular application of the host.
    Existing(u64),
    /// An application prototype, resolved per discovery row.
    Prototype(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationPrototype {
    pub application_prototypeid: u64,
    pub name: String,
}

/// A discovered application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Application {
    /// `0` until inserted (or adopted).
    pub applicationid: u64,
    pub application_prototypeid: u64,
    /// Discovery link of this rule; `0` when the link does not exist yet.
    pub application_discoveryid: u64,
    pub name: Tracked<String>,
    /// Prototype name template stored on the discovery link.
    pub name_proto: Tracked<String>,
    pub lastcheck: i64,
    pub ts_delete: i64,
    /// Another discovery rule also links to this application.
    pub shared: bool,
    pub discovered: bool,
    /// Insert a discovery link for an application owned by another rule.
    pub add_discovery: bool,
    pub remove_discovery: bool,
    pub remove: bool,
    /// Rows bound to this application in this run.
    pub rows: Vec<RowId>,
}

impl Application {
    pub fn new(prototype: &ApplicationPrototype, name: String, row: RowId) -> Self {
        Self {
            applicationid: 0,
            application_prototypeid: prototype.application_prototypeid,
            application_discoveryid: 0,
            name: Tracked::new(name),
            name_proto: Tracked::new(prototype.name.clone()),
            lastcheck: 0,
            ts_delete: 0,
            shared: false,
            discovered: true,
            add_discovery: false,
            remove_discovery: false,
            remove: false,
            rows: vec![row],
        }
    }

    pub fn is_new(&self) -> bool {
        self.applicationid == 0
    }

    pub fn is_renamed(&self) -> bool {
        !self.is_new() && self.name.is_dirty()
    }

    /// Scheduled for deletion of its link or of the whole row.
    pub fn is_removal(&self) -> bool {
        self.remove || self.remove_discovery
    }
}

/// `(application prototype id, discovery row)` to application lookup. Several
/// rows may resolve to the same application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplicationIndex {
    entries: HashMap<(u64, RowId), ApplicationHandle>,
}

impl ApplicationIndex {
    pub fn build(applications: &[Application]) -> Self {
        let mut index = Self::default();
        for (handle, application) in applications.iter().enumerate() {
            if !application.discovered {
                continue;
            }
            for row in &application.rows {
                index.insert(application.application_prototypeid, *row, handle);
            }
        }
        index
    }

    pub fn get(&self, application_prototypeid: u64, row: RowId) -> Option<ApplicationHandle> {
        self.entries.get(&(application_prototypeid, row)).copied()
    }

    pub fn insert(&mut self, application_prototypeid: u64, row: RowId, handle: ApplicationHandle) {
        self.entries.insert((application_prototypeid, row), handle);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Item side of an item/application link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemRef {
    Id(u64),
    Item(ItemHandle),
}

/// Application side of an item/application link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AppRef {
    Id(u64),
    Application(ApplicationHandle),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemApplicationLink {
    /// `0` for links created in this run.
    pub itemappid: u64,
    pub item: ItemRef,
    pub application: AppRef,
    pub discovered: bool,
}

impl ItemApplicationLink {
    pub fn is_new(&self) -> bool {
        self.itemappid == 0
    }
}
