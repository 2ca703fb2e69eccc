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

//! Item value preprocessing step types and their parameter checks.

use crate::expand::{is_user_macro, parse_time_suffix};
use regex::Regex;
use std::fmt;

/// Preprocessing step type as stored in `item_preproc.type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PreprocType(pub i32);

impl PreprocType {
    pub const MULTIPLIER: Self = Self(1);
    pub const RTRIM: Self = Self(2);
    pub const LTRIM: Self = Self(3);
    pub const TRIM: Self = Self(4);
    pub const REGSUB: Self = Self(5);
    pub const BOOL2DEC: Self = Self(6);
    pub const OCT2DEC: Self = Self(7);
    pub const HEX2DEC: Self = Self(8);
    pub const DELTA_VALUE: Self = Self(9);
    pub const DELTA_SPEED: Self = Self(10);
    pub const XPATH: Self = Self(11);
    pub const JSONPATH: Self = Self(12);
    pub const VALIDATE_RANGE: Self = Self(13);
    pub const VALIDATE_REGEX: Self = Self(14);
    pub const VALIDATE_NOT_REGEX: Self = Self(15);
    pub const ERROR_FIELD_JSON: Self = Self(16);
    pub const ERROR_FIELD_XML: Self = Self(17);
    pub const ERROR_FIELD_REGEX: Self = Self(18);
    pub const THROTTLE_VALUE: Self = Self(19);
    pub const THROTTLE_TIMED_VALUE: Self = Self(20);

    /// Parameters are `pattern\noutput`.
    pub fn has_pattern_and_output(self) -> bool {
        matches!(self, Self::REGSUB | Self::ERROR_FIELD_REGEX)
    }

    pub fn is_xpath(self) -> bool {
        matches!(self, Self::XPATH | Self::ERROR_FIELD_XML)
    }
}

impl fmt::Display for PreprocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Checks the parameters of a preprocessing step.
pub trait PreprocessorValidator: Send + Sync {
    fn validate(&self, step_type: PreprocType, params: &str) -> Result<(), String>;
}

/// Built-in parameter checks for every known step type.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepValidator;

impl PreprocessorValidator for StepValidator {
    fn validate(&self, step_type: PreprocType, params: &str) -> Result<(), String> {
        match step_type {
            PreprocType::MULTIPLIER => number(params).map(|_| ()),
            PreprocType::RTRIM | PreprocType::LTRIM | PreprocType::TRIM => {
                if params.is_empty() {
                    Err("list of characters to trim cannot be empty".into())
                } else {
                    Ok(())
                }
            }
            PreprocType::REGSUB | PreprocType::ERROR_FIELD_REGEX => {
                let (pattern, output) = params
                    .split_once('\n')
                    .ok_or("expected regular expression and output template")?;
                if output.is_empty() {
                    return Err("output template cannot be empty".into());
                }
                pattern_compiles(pattern)
            }
            PreprocType::VALIDATE_REGEX | PreprocType::VALIDATE_NOT_REGEX => {
                pattern_compiles(params)
            }
            PreprocType::JSONPATH | PreprocType::ERROR_FIELD_JSON => {
                if params.starts_with('$') || has_user_macro(params) {
                    Ok(())
                } else {
                    Err(format!("invalid JSONPath \"{params}\""))
                }
            }
            PreprocType::XPATH | PreprocType::ERROR_FIELD_XML => {
                if params.trim().is_empty() {
                    Err("XPath expression cannot be empty".into())
                } else {
                    Ok(())
                }
            }
            PreprocType::VALIDATE_RANGE => validate_range(params),
            PreprocType::THROTTLE_TIMED_VALUE => {
                if is_user_macro(params) {
                    return Ok(());
                }
                match parse_time_suffix(params) {
                    Some(seconds) if seconds > 0 => Ok(()),
                    _ => Err(format!("invalid heartbeat interval \"{params}\"")),
                }
            }
            PreprocType::BOOL2DEC
            | PreprocType::OCT2DEC
            | PreprocType::HEX2DEC
            | PreprocType::DELTA_VALUE
            | PreprocType::DELTA_SPEED
            | PreprocType::THROTTLE_VALUE => Ok(()),
            other => Err(format!("unknown preprocessing step type {other}")),
        }
    }
}

fn has_user_macro(text: &str) -> bool {
    text.contains("{$")
}

fn pattern_compiles(pattern: &str) -> Result<(), String> {
    if pattern.is_empty() {
        return Err("regular expression cannot be empty".into());
    }
    if has_user_macro(pattern) {
        return Ok(());
    }
    Regex::new(pattern)
        .map(|_| ())
        .map_err(|err| format!("invalid regular expression \"{pattern}\": {err}"))
}

/// Parses a numeric parameter. User macros are accepted as unknown (`None`).
fn number(value: &str) -> Result<Option<f64>, String> {
    let value = value.trim();
    if is_user_macro(value) {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(Some)
        .ok_or_else(|| format!("invalid numeric value \"{value}\""))
}

fn validate_range(params: &str) -> Result<(), String> {
    let (min, max) = params.split_once('\n').unwrap_or((params, ""));
    if min.trim().is_empty() && max.trim().is_empty() {
        return Err("at least one of range bounds must be set".into());
    }
    let bound = |value: &str| {
        if value.trim().is_empty() {
            Ok(None)
        } else {
            number(value)
        }
    };
    if let (Some(min), Some(max)) = (bound(min)?, bound(max)?) {
        if min > max {
            return Err(format!("minimum {min} is greater than maximum {max}"));
        }
    }
    Ok(())
}
