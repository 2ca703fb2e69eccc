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

//! Validation of reconciled items.
//!
//! A new item that fails validation is not created. An existing item keeps
//! its persisted value for whatever failed, and stays discovered.

mod dependent;
mod field;
mod keys;
mod preprocessing;

pub use dependent::validate_dependent_items;
pub use field::validate_field;
pub use keys::validate_item_keys;
pub use preprocessing::validate_preprocessing;

use crate::error::ErrorSink;
use crate::expand::IntervalValidator;
use crate::model::{Item, ItemField};
use crate::preprocessing::PreprocessorValidator;

/// Collaborators used by the item checks.
#[derive(Clone, Copy)]
pub struct Validators<'a> {
    pub interval: &'a dyn IntervalValidator,
    pub preprocessor: &'a dyn PreprocessorValidator,
}

/// Runs the field checks on every item, then its preprocessing steps.
pub fn validate_items(items: &mut [Item], validators: Validators<'_>, errors: &mut ErrorSink) {
    for item in items.iter_mut() {
        for field in ItemField::ALL {
            validate_field(item, field, validators, errors);
        }
    }
    validate_preprocessing(items, validators.preprocessor, errors);
}

/// Reports a failed item and applies the rollback policy for `field`:
/// `None` reverts every change of an existing item.
pub(crate) fn reject_item(
    item: &mut Item,
    field: Option<ItemField>,
    reason: &str,
    errors: &mut ErrorSink,
) {
    if item.is_new() {
        errors.push(format!("Cannot create item \"{}\": {reason}.", item.key()));
        item.discovered = false;
        return;
    }
    errors.push(format!("Cannot update item \"{}\": {reason}.", item.label()));
    match field {
        Some(field) => item.rollback_field(field),
        None => item.rollback_all(),
    }
}
