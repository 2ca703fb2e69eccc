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

use crate::error::ErrorSink;
use crate::model::Item;
use crate::preprocessing::PreprocessorValidator;

/// Checks new and changed steps. A failure drops a new item, or restores
/// the persisted pipeline of an existing one.
pub fn validate_preprocessing(
    items: &mut [Item],
    validator: &dyn PreprocessorValidator,
    errors: &mut ErrorSink,
) {
    for item in items.iter_mut().filter(|item| item.discovered) {
        let failure = item
            .preprocessing
            .iter()
            .filter(|step| step.discovered && (step.is_new() || step.has_changes()))
            .find_map(|step| {
                validator
                    .validate(*step.step_type.get(), step.params.get())
                    .err()
                    .map(|err| (*step.step.get(), err))
            });
        let Some((step, err)) = failure else {
            continue;
        };

        if item.is_new() {
            errors.push(format!(
                "Cannot create item \"{}\": invalid preprocessing step #{step}: {err}.",
                item.key()
            ));
            item.discovered = false;
            continue;
        }

        errors.push(format!(
            "Cannot update item \"{}\": invalid preprocessing step #{step}: {err}.",
            item.label()
        ));
        for step in &mut item.preprocessing {
            if step.is_new() {
                step.discovered = false;
            } else {
                step.rollback();
                step.discovered = true;
            }
        }
    }
}
