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

use super::{reject_item, Validators};
use crate::error::ErrorSink;
use crate::expand::{is_user_macro, parse_time_suffix, SEC_PER_DAY, SEC_PER_HOUR};
use crate::model::{Item, ItemField, ItemType};

const MAX_RETENTION: u64 = 25 * 365 * SEC_PER_DAY;

/// Checks one field of an item and applies the rollback policy on failure.
/// Only fields with a length limit are checked.
pub fn validate_field(
    item: &mut Item,
    field: ItemField,
    validators: Validators<'_>,
    errors: &mut ErrorSink,
) {
    if !item.discovered {
        return;
    }
    if !item.is_new() && !item.fields.is_dirty(field) && !item.fields.is_dirty(ItemField::Type) {
        return;
    }
    let Some(max_len) = field.policy().max_len else {
        return;
    };

    let value = item.fields.get(field);
    if value.contains(char::REPLACEMENT_CHARACTER) {
        // reported, but the replaced value is still used
        errors.push(format!(
            "Value \"{value}\" of item \"{}\" field \"{field}\" has invalid UTF-8 sequence.",
            item.label()
        ));
    }

    let result = if value.chars().count() > max_len {
        Err(format!(
            "value for field \"{field}\" is too long, maximum is {max_len} characters"
        ))
    } else {
        check_rules(field, value, item.item_type(), validators)
    };

    if let Err(reason) = result {
        let scope = if field == ItemField::Delay { None } else { Some(field) };
        reject_item(item, scope, &reason, errors);
    }
}

fn check_rules(
    field: ItemField,
    value: &str,
    item_type: Option<ItemType>,
    validators: Validators<'_>,
) -> Result<(), String> {
    match field {
        ItemField::Name if value.is_empty() => Err("name cannot be empty".into()),
        ItemField::Delay if item_type.map_or(true, ItemType::polls_on_schedule) => validators
            .interval
            .validate_interval(value)
            .map_err(|err| err.trim_end_matches('.').to_string()),
        ItemField::History => retention(value, "history storage period", SEC_PER_HOUR),
        ItemField::Trends => retention(value, "trends storage period", SEC_PER_DAY),
        _ => Ok(()),
    }
}

/// A user macro, `0`, or a time suffixed value within `[min, 25y]`.
fn retention(value: &str, what: &str, min: u64) -> Result<(), String> {
    if is_user_macro(value) {
        return Ok(());
    }
    match parse_time_suffix(value) {
        Some(0) => Ok(()),
        Some(seconds) if (min..=MAX_RETENTION).contains(&seconds) => Ok(()),
        Some(_) => Err(format!(
            "invalid {what} \"{value}\": must be between {min} and {MAX_RETENTION} seconds"
        )),
        None => Err(format!("invalid {what} \"{value}\"")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expand::UpdateIntervalValidator;
    use crate::model::{FieldSet, ItemPrototype, RowId};
    use crate::preprocessing::StepValidator;

    fn validators() -> Validators<'static> {
        Validators {
            interval: &UpdateIntervalValidator,
            preprocessor: &StepValidator,
        }
    }

    fn existing_item() -> Item {
        let prototype = ItemPrototype::new(10).with(ItemField::Key, "k");
        let mut item = Item::discovered_from(
            &prototype,
            RowId(0),
            FieldSet::from_fn(|field| prototype.field(field).to_string()),
        );
        item.itemid = 100;
        item.fields.set(ItemField::Name, "n".into());
        item.fields.mark_persisted();
        item
    }

    #[test]
    fn invalid_field_rolls_back_only_that_field() {
        let mut item = existing_item();
        item.fields.set(ItemField::History, "5m".into());
        item.fields.set(ItemField::Units, "B".into());
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::History, validators(), &mut errors);

        assert_eq!(item.fields.get(ItemField::History), "90d");
        assert_eq!(item.fields.get(ItemField::Units), "B");
        assert!(item.discovered);
        assert!(errors.contains("invalid history storage period \"5m\""));
    }

    #[test]
    fn invalid_delay_rolls_back_whole_item() {
        let mut item = existing_item();
        item.fields.set(ItemField::Delay, "2d".into());
        item.fields.set(ItemField::Units, "B".into());
        item.key_proto.set("k[{#NAME}]".into());
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::Delay, validators(), &mut errors);

        assert!(!item.has_changes());
        assert!(!item.key_proto.is_dirty());
        assert!(item.discovered);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn rejected_key_keeps_the_stored_prototype_key() {
        let mut item = existing_item();
        item.fields.set(ItemField::Key, format!("k[{}]", "x".repeat(300)));
        item.key_proto.set("k[{#LONG}]".into());
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::Key, validators(), &mut errors);

        assert_eq!(item.key(), "k");
        assert_eq!(item.key_proto.get(), "k");
        assert!(!item.key_proto.is_dirty());
        assert!(item.discovered);
        assert!(errors.contains("is too long, maximum is 255 characters"));
    }

    #[test]
    fn new_item_failure_undiscovers() {
        let prototype = ItemPrototype::new(10).with(ItemField::Key, "k");
        let mut item = Item::discovered_from(
            &prototype,
            RowId(0),
            FieldSet::from_fn(|field| match field {
                ItemField::Name => String::new(),
                other => prototype.field(other).to_string(),
            }),
        );
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::Name, validators(), &mut errors);
        assert!(!item.discovered);
        assert!(errors.contains("Cannot create item \"k\": name cannot be empty"));
    }

    #[test]
    fn unchanged_fields_of_existing_items_are_skipped() {
        let mut item = existing_item();
        item.fields.replace_clean(ItemField::History, "bogus".into());
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::History, validators(), &mut errors);
        assert!(errors.is_empty());

        item.fields.set(ItemField::Type, "2".into());
        validate_field(&mut item, ItemField::History, validators(), &mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn trapper_items_skip_delay_checks() {
        let mut item = existing_item();
        item.fields.set(ItemField::Type, "2".into());
        item.fields.set(ItemField::Delay, "0".into());
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::Delay, validators(), &mut errors);
        assert!(errors.is_empty());
    }

    #[test]
    fn length_counts_characters() {
        let mut item = existing_item();
        item.fields.set(ItemField::Units, "é".repeat(255));
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::Units, validators(), &mut errors);
        assert!(errors.is_empty());

        item.fields.set(ItemField::Units, "é".repeat(256));
        validate_field(&mut item, ItemField::Units, validators(), &mut errors);
        assert!(errors.contains("too long"));
        assert_eq!(item.fields.get(ItemField::Units), "");
    }

    #[test]
    fn invalid_utf8_is_reported_but_kept() {
        let mut item = existing_item();
        item.fields.set(ItemField::Units, "a\u{fffd}b".into());
        let mut errors = ErrorSink::new();
        validate_field(&mut item, ItemField::Units, validators(), &mut errors);
        assert!(errors.contains("invalid UTF-8"));
        assert_eq!(item.fields.get(ItemField::Units), "a\u{fffd}b");
    }

    #[test]
    fn retention_bounds() {
        assert!(retention("0", "history", SEC_PER_HOUR).is_ok());
        assert!(retention("1h", "history", SEC_PER_HOUR).is_ok());
        assert!(retention("{$HISTORY}", "history", SEC_PER_HOUR).is_ok());
        assert!(retention("59m", "history", SEC_PER_HOUR).is_err());
        assert!(retention("26w", "trends", SEC_PER_DAY).is_ok());
        assert!(retention("23h", "trends", SEC_PER_DAY).is_err());
        assert!(retention("9200d", "trends", SEC_PER_DAY).is_err());
        assert!(retention("abc", "trends", SEC_PER_DAY).is_err());
    }
}
