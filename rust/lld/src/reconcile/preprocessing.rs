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
use crate::expand::{is_user_macro, MacroContext, MacroExpander};
use crate::model::{find_prototype, DiscoveryRow, Item, ItemPrototype, PreprocStep, PreprocTemplate, RowArena};
use tracing::warn;

fn expand_params(
    template: &PreprocTemplate,
    row: &DiscoveryRow,
    expander: &dyn MacroExpander,
) -> Result<String, String> {
    let params = template.params.as_str();
    if is_user_macro(params) {
        return Ok(params.to_string());
    }
    if template.step_type.has_pattern_and_output() {
        if let Some((pattern, output)) = params.split_once('\n') {
            let pattern = expander.expand(pattern, row, MacroContext::RegexPattern)?;
            let output = expander.expand(output, row, MacroContext::RegexOutput)?;
            return Ok(format!("{pattern}\n{output}"));
        }
    }
    let context = if template.step_type.is_xpath() {
        MacroContext::XPath
    } else {
        MacroContext::Any
    };
    expander.expand(params, row, context)
}

/// Aligns the preprocessing steps of every discovered item with its
/// prototype, by position.
pub fn reconcile_preprocessing(
    prototypes: &[ItemPrototype],
    items: &mut [Item],
    rows: &RowArena,
    expander: &dyn MacroExpander,
    errors: &mut ErrorSink,
) {
    for item in items.iter_mut().filter(|item| item.discovered) {
        let (Some(prototype), Some(row)) = (
            find_prototype(prototypes, item.parent_itemid),
            item.row.and_then(|id| rows.get(id)),
        ) else {
            continue;
        };

        for (position, template) in prototype.preprocessing.iter().enumerate() {
            let params = match expand_params(template, row, expander) {
                Ok(params) => params,
                Err(err) => {
                    errors.push(format!(
                        "Cannot {} item \"{}\": cannot expand preprocessing step #{}: {err}.",
                        if item.is_new() { "create" } else { "update" },
                        item.label(),
                        template.step
                    ));
                    if item.is_new() {
                        item.discovered = false;
                        break;
                    }
                    if let Some(step) = item.preprocessing.get_mut(position) {
                        step.discovered = true;
                    }
                    continue;
                }
            };

            match item.preprocessing.get_mut(position) {
                Some(step) => {
                    if *step.step.get() != template.step {
                        warn!(
                            itemid = item.itemid,
                            expected = template.step,
                            found = *step.step.get(),
                            "unexpected preprocessing step order"
                        );
                        step.step.set(template.step);
                    }
                    step.step_type.set(template.step_type);
                    step.params.set(params);
                    step.discovered = true;
                }
                None => item
                    .preprocessing
                    .push(PreprocStep::new(template.step, template.step_type, params)),
            }
        }

        for step in item.preprocessing.iter_mut().skip(prototype.preprocessing.len()) {
            step.discovered = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::LldMacroExpander;
    use crate::model::{FieldSet, ItemField, RowId};
    use crate::preprocessing::PreprocType;
    use pretty_assertions::assert_eq;

    fn template(step: i32, step_type: PreprocType, params: &str) -> PreprocTemplate {
        PreprocTemplate {
            step,
            step_type,
            params: params.to_string(),
        }
    }

    fn persisted(id: u64, step: i32, step_type: PreprocType, params: &str) -> PreprocStep {
        let mut step = PreprocStep::new(step, step_type, params.to_string());
        step.item_preprocid = id;
        step.discovered = false;
        step
    }

    fn setup(templates: Vec<PreprocTemplate>) -> (Vec<ItemPrototype>, RowArena, Item) {
        let mut prototype = ItemPrototype::new(10).with(ItemField::Key, "k[{#IF}]");
        prototype.preprocessing = templates;
        let rows = RowArena::from_pairs([[("{#IF}", "eth0.1")]]);
        let item = Item::discovered_from(&prototype, RowId(0), FieldSet::default());
        (vec![prototype], rows, item)
    }

    #[test]
    fn new_items_get_expanded_steps() {
        let (prototypes, rows, item) = setup(vec![
            template(1, PreprocType::REGSUB, "{#IF}: (.*)\n{#IF} \\1"),
            template(2, PreprocType::XPATH, "//if[@name=\"{#IF}\"]"),
            template(3, PreprocType::MULTIPLIER, "{$MULTIPLIER}"),
        ]);
        let mut items = vec![item];
        let mut errors = ErrorSink::new();
        reconcile_preprocessing(&prototypes, &mut items, &rows, &LldMacroExpander, &mut errors);

        let params = items[0]
            .preprocessing
            .iter()
            .map(|s| s.params.get().as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            params,
            vec!["eth0\\.1: (.*)\neth0.1 \\1", "//if[@name=\"eth0.1\"]", "{$MULTIPLIER}"]
        );
        assert!(items[0].preprocessing.iter().all(|s| s.is_new() && s.discovered));
    }

    #[test]
    fn existing_steps_match_by_position() {
        let (prototypes, rows, mut item) = setup(vec![
            template(1, PreprocType::MULTIPLIER, "8"),
            template(2, PreprocType::TRIM, " "),
        ]);
        item.itemid = 100;
        item.preprocessing = vec![
            persisted(1, 1, PreprocType::MULTIPLIER, "8"),
            persisted(2, 2, PreprocType::RTRIM, " "),
            persisted(3, 3, PreprocType::DELTA_SPEED, ""),
        ];
        let mut items = vec![item];
        let mut errors = ErrorSink::new();
        reconcile_preprocessing(&prototypes, &mut items, &rows, &LldMacroExpander, &mut errors);

        let steps = &items[0].preprocessing;
        assert!(steps[0].discovered && !steps[0].has_changes());
        assert!(steps[1].discovered && steps[1].step_type.is_dirty());
        assert!(!steps[1].params.is_dirty());
        assert!(!steps[2].discovered);
    }

    #[test]
    fn missing_steps_are_appended() {
        let (prototypes, rows, mut item) = setup(vec![
            template(1, PreprocType::MULTIPLIER, "8"),
            template(2, PreprocType::DELTA_SPEED, ""),
        ]);
        item.itemid = 100;
        item.preprocessing = vec![persisted(1, 1, PreprocType::MULTIPLIER, "8")];
        let mut items = vec![item];
        let mut errors = ErrorSink::new();
        reconcile_preprocessing(&prototypes, &mut items, &rows, &LldMacroExpander, &mut errors);

        assert_eq!(items[0].preprocessing.len(), 2);
        assert!(items[0].preprocessing[1].is_new());
        assert_eq!(*items[0].preprocessing[1].step.get(), 2);
    }
}
