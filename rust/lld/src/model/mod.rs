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

//! In-memory entities of a discovery run.

mod application;
mod field;
mod item;
mod row;
mod tracked;

pub use application::{
    AppRef, Application, ApplicationHandle, ApplicationIndex, ApplicationPrototype,
    ApplicationRef, ItemApplicationLink, ItemRef, APPLICATION_DISCOVERY_CREATED,
};
pub use field::{
    trim_whitespace, ColumnKind, Expansion, FieldPolicy, ItemField, ItemType, POST_TYPE_JSON,
    POST_TYPE_XML,
};
pub use item::{
    find_prototype, FieldSet, Item, ItemHandle, ItemIndex, ItemPrototype, MasterRef,
    PreprocStep, PreprocTemplate,
};
pub use row::{DiscoveryRow, RowArena, RowId};
pub use tracked::Tracked;

/// `flags` of an item prototype.
pub const ITEM_FLAG_PROTOTYPE: i64 = 2;
/// `flags` of a discovered item.
pub const ITEM_FLAG_DISCOVERED: i64 = 4;
