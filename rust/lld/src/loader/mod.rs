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

//! Loaders for the prototypes of a rule and the entities it discovered before.

pub mod existing;
pub mod prototypes;

pub use existing::{load_applications, load_item_application_links, load_items};
pub use prototypes::{
    load_application_prototypes, load_item_application_prototype_links, load_item_prototypes,
    load_rule, DiscoveryRule,
};

use crate::db::Row;
use crate::error::Result;
use crate::model::{ColumnKind, ItemField};

/// Reads the tracked item columns starting at `offset`, in [`ItemField::ALL`]
/// order. NULL foreign keys read as `0`.
pub(crate) fn read_fields(
    row: &Row,
    offset: usize,
) -> Result<Vec<(ItemField, String)>> {
    ItemField::ALL
        .iter()
        .enumerate()
        .map(|(idx, field)| {
            let policy = field.policy();
            let value = match policy.kind {
                ColumnKind::Text => row.text(offset + idx).to_string(),
                ColumnKind::Int => row.int(offset + idx, policy.column)?.to_string(),
                ColumnKind::NullableId => row.id(offset + idx, policy.column)?.to_string(),
            };
            Ok((*field, value))
        })
        .collect()
}
