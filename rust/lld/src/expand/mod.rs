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

//! LLD macro expansion and update interval checks.

mod interval;
mod lld;

pub use interval::{parse_time_suffix, UpdateIntervalValidator, SEC_PER_DAY, SEC_PER_HOUR};
pub use lld::LldMacroExpander;

use crate::model::DiscoveryRow;

/// Escaping applied to macro values for the place they are substituted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MacroContext {
    Any,
    /// Only numeric values may be substituted.
    Numeric,
    Json,
    Xml,
    RegexPattern,
    RegexOutput,
    XPath,
    /// Item key: values are quoted when they would break parameter syntax.
    Key,
    /// Calculated item formula: values inside string literals are escaped.
    Formula,
    /// SNMP OID, handled as a key when it carries parameters.
    SnmpOid,
}

/// Substitutes discovery row macros into templates.
pub trait MacroExpander: Send + Sync {
    fn expand(&self, text: &str, row: &DiscoveryRow, context: MacroContext)
        -> Result<String, String>;
}

/// Checks update interval expressions (`delay`).
pub trait IntervalValidator: Send + Sync {
    fn validate_interval(&self, delay: &str) -> Result<(), String>;
}

/// `true` when the whole text is one user macro reference such as `{$PERIOD}`
/// or `{$PERIOD:"ctx"}`.
pub fn is_user_macro(text: &str) -> bool {
    let Some(inner) = text.strip_prefix("{$").and_then(|t| t.strip_suffix('}')) else {
        return false;
    };
    let (name, context) = match inner.split_once(':') {
        Some((name, context)) => (name, Some(context)),
        None => (inner, None),
    };
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return false;
    }
    match context {
        None => true,
        Some(context) => {
            let context = context.trim_start();
            if let Some(quoted) = context.strip_prefix('"') {
                quoted.trim_end().ends_with('"')
            } else {
                !context.contains('}')
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_user_macros() {
        assert!(is_user_macro("{$MACRO}"));
        assert!(is_user_macro("{$HISTORY.PERIOD}"));
        assert!(is_user_macro("{$LOW:\"cpu\"}"));
        assert!(is_user_macro("{$LOW:ctx}"));
        assert!(!is_user_macro("{$MACRO}x"));
        assert!(!is_user_macro("{#MACRO}"));
        assert!(!is_user_macro("{$lower}"));
        assert!(!is_user_macro("{$}"));
    }
}
