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

use super::{MacroContext, MacroExpander};
use crate::model::DiscoveryRow;

/// Built-in expander for `{#MACRO}` references.
///
/// Macros missing from the row are left in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct LldMacroExpander;

impl MacroExpander for LldMacroExpander {
    fn expand(
        &self,
        text: &str,
        row: &DiscoveryRow,
        context: MacroContext,
    ) -> Result<String, String> {
        match context {
            MacroContext::Key => expand_key(text, row),
            MacroContext::SnmpOid if text.contains('[') => expand_key(text, row),
            MacroContext::Formula => expand_formula(text, row),
            other => substitute(text, row, |name, value| escape(other, name, value)),
        }
    }
}

fn escape(context: MacroContext, name: &str, value: &str) -> Result<String, String> {
    Ok(match context {
        MacroContext::Numeric => {
            if value.trim().parse::<f64>().is_err() {
                return Err(format!(
                    "cannot substitute macro \"{name}\": value \"{value}\" is not numeric"
                ));
            }
            value.to_string()
        }
        MacroContext::Json => {
            let quoted = serde_json::Value::String(value.to_string()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        }
        MacroContext::Xml => xml_escape(value),
        MacroContext::RegexPattern => regex::escape(value),
        MacroContext::RegexOutput => value.replace('\\', "\\\\"),
        MacroContext::XPath => value.replace('"', "\\\""),
        _ => value.to_string(),
    })
}

fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}

/// Length of an LLD macro token at the start of `text`, if there is one.
fn macro_token_len(text: &str) -> Option<usize> {
    let rest = text.strip_prefix("{#")?;
    let end = rest.find('}')?;
    let name = &rest[..end];
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_' || c == '.')
    {
        return None;
    }
    Some(end + 3)
}

fn substitute<F>(text: &str, row: &DiscoveryRow, mut escape: F) -> Result<String, String>
where
    F: FnMut(&str, &str) -> Result<String, String>,
{
    let mut out = String::with_capacity(text.len());
    let mut pos = 0;
    while let Some(offset) = text[pos..].find("{#") {
        let start = pos + offset;
        out.push_str(&text[pos..start]);
        match macro_token_len(&text[start..]) {
            Some(len) => {
                let token = &text[start..start + len];
                match row.macro_value(token) {
                    Some(value) => out.push_str(&escape(token, value)?),
                    None => out.push_str(token),
                }
                pos = start + len;
            }
            None => {
                out.push_str("{#");
                pos = start + 2;
            }
        }
    }
    out.push_str(&text[pos..]);
    Ok(out)
}

fn expand_formula(text: &str, row: &DiscoveryRow) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pos = 0;
    let bytes = text.as_bytes();

    while pos < text.len() {
        if bytes[pos] == b'{' {
            if let Some(len) = macro_token_len(&text[pos..]) {
                let token = &text[pos..pos + len];
                match row.macro_value(token) {
                    Some(value) if in_string => out.push_str(&value.replace('"', "\\\"")),
                    Some(value) => out.push_str(value),
                    None => out.push_str(token),
                }
                pos += len;
                continue;
            }
        }

        let ch = text[pos..].chars().next().unwrap_or_default();
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
        } else if ch == '"' {
            in_string = true;
        }
        out.push(ch);
        pos += ch.len_utf8();
    }
    Ok(out)
}

/// Expands macros in an item key, quoting parameters when the substituted
/// value would otherwise change the parameter structure.
fn expand_key(key: &str, row: &DiscoveryRow) -> Result<String, String> {
    let (name, params) = match key.find('[') {
        Some(idx) => (&key[..idx], Some(&key[idx..])),
        None => (key, None),
    };
    if name.is_empty() {
        return Err(format!("invalid item key \"{key}\": missing key name"));
    }

    let mut out = substitute(name, row, |_, value| Ok(value.to_string()))?;
    if let Some(params) = params {
        let mut parser = KeyParser {
            src: params,
            pos: 0,
            row,
        };
        out.push_str(&parser.array(0).map_err(|err| format!("invalid item key \"{key}\": {err}"))?);
        if parser.pos != params.len() {
            return Err(format!(
                "invalid item key \"{key}\": unexpected characters after parameters"
            ));
        }
    }
    Ok(out)
}

struct KeyParser<'a> {
    src: &'a str,
    pos: usize,
    row: &'a DiscoveryRow,
}

impl KeyParser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_spaces(&mut self, out: &mut String) {
        while self.peek() == Some(' ') {
            self.bump();
            out.push(' ');
        }
    }

    /// Parses `[p1,p2,...]` starting at the opening bracket.
    fn array(&mut self, depth: usize) -> Result<String, String> {
        if depth > 1 {
            return Err("nested parameter arrays are not allowed".into());
        }
        if self.bump() != Some('[') {
            return Err("expected '['".into());
        }
        let mut out = String::from("[");
        loop {
            self.skip_spaces(&mut out);
            match self.peek() {
                Some('"') => out.push_str(&self.quoted()?),
                Some('[') => out.push_str(&self.array(depth + 1)?),
                Some(_) => out.push_str(&self.unquoted()?),
                None => return Err("unterminated parameter list".into()),
            }
            self.skip_spaces(&mut out);
            match self.bump() {
                Some(',') => out.push(','),
                Some(']') => {
                    out.push(']');
                    return Ok(out);
                }
                Some(other) => return Err(format!("unexpected character '{other}'")),
                None => return Err("unterminated parameter list".into()),
            }
        }
    }

    fn quoted(&mut self) -> Result<String, String> {
        self.bump();
        let start = self.pos;
        let mut escaped = false;
        loop {
            match self.bump() {
                None => return Err("unterminated quoted parameter".into()),
                Some('\\') if !escaped => escaped = true,
                Some('"') if !escaped => break,
                Some(_) => escaped = false,
            }
        }
        let inner = &self.src[start..self.pos - 1];
        let expanded = substitute(inner, self.row, |_, value| Ok(value.replace('"', "\\\"")))?;
        Ok(format!("\"{expanded}\""))
    }

    fn unquoted(&mut self) -> Result<String, String> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == ',' || ch == ']' {
                break;
            }
            self.bump();
        }
        let raw = &self.src[start..self.pos];
        let mut substituted = false;
        let expanded = substitute(raw, self.row, |_, value| {
            substituted = true;
            Ok(value.to_string())
        })?;
        if substituted && needs_quoting(&expanded) {
            quote_param(&expanded)
        } else {
            Ok(expanded)
        }
    }
}

fn needs_quoting(value: &str) -> bool {
    value.starts_with('"')
        || value.starts_with(' ')
        || value.starts_with('[')
        || value.contains(',')
        || value.contains(']')
}

fn quote_param(value: &str) -> Result<String, String> {
    if value.ends_with('\\') {
        return Err(format!("cannot quote parameter \"{value}\" ending with a backslash"));
    }
    Ok(format!("\"{}\"", value.replace('"', "\\\"")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RowArena, RowId};

    fn arena(pairs: &[(&'static str, &'static str)]) -> RowArena {
        RowArena::from_pairs([pairs.iter().copied()])
    }

    fn expand(text: &str, pairs: &[(&'static str, &'static str)], ctx: MacroContext) -> Result<String, String> {
        let rows = arena(pairs);
        LldMacroExpander.expand(text, rows.get(RowId(0)).unwrap(), ctx)
    }

    #[test]
    fn substitutes_and_keeps_unknown_macros() {
        assert_eq!(
            expand("Free space on {#FSNAME} ({#MISSING})", &[("{#FSNAME}", "/var")], MacroContext::Any).unwrap(),
            "Free space on /var ({#MISSING})"
        );
        assert_eq!(expand("{#lower} {#", &[], MacroContext::Any).unwrap(), "{#lower} {#");
    }

    #[test]
    fn escapes_per_context() {
        let pairs = [("{#V}", "a\"b<c>\\d.e")];
        assert_eq!(expand("{#V}", &pairs, MacroContext::Json).unwrap(), "a\\\"b<c>\\\\d.e");
        assert_eq!(expand("{#V}", &pairs, MacroContext::Xml).unwrap(), "a&quot;b&lt;c&gt;\\d.e");
        assert_eq!(expand("{#V}", &pairs, MacroContext::RegexPattern).unwrap(), "a\"b<c>\\\\d\\.e");
        assert_eq!(expand("{#V}", &pairs, MacroContext::RegexOutput).unwrap(), "a\"b<c>\\\\d.e");
        assert_eq!(expand("{#V}", &pairs, MacroContext::XPath).unwrap(), "a\\\"b<c>\\d.e");
    }

    #[test]
    fn numeric_context_rejects_text() {
        assert_eq!(expand("{#N}", &[("{#N}", "12.5")], MacroContext::Numeric).unwrap(), "12.5");
        assert!(expand("{#N}", &[("{#N}", "abc")], MacroContext::Numeric).is_err());
    }

    #[test]
    fn key_parameters_are_quoted_when_needed() {
        assert_eq!(expand("fs[{#FSNAME}]", &[("{#FSNAME}", "/")], MacroContext::Key).unwrap(), "fs[/]");
        assert_eq!(
            expand("fs[{#FSNAME},free]", &[("{#FSNAME}", "C:, D:")], MacroContext::Key).unwrap(),
            "fs[\"C:, D:\",free]"
        );
        assert_eq!(
            expand("log[\"{#PATH}\"]", &[("{#PATH}", "say \"hi\"")], MacroContext::Key).unwrap(),
            "log[\"say \\\"hi\\\"\"]"
        );
        assert_eq!(
            expand("net.if[{#IF},[in, out]]", &[("{#IF}", "eth0")], MacroContext::Key).unwrap(),
            "net.if[eth0,[in, out]]"
        );
    }

    #[test]
    fn malformed_keys_fail() {
        assert!(expand("fs[{#FSNAME}", &[("{#FSNAME}", "/")], MacroContext::Key).is_err());
        assert!(expand("fs[a]b", &[], MacroContext::Key).is_err());
        assert!(expand("[a]", &[], MacroContext::Key).is_err());
        assert!(expand("fs[{#P}]", &[("{#P}", "a,b\\")], MacroContext::Key).is_err());
    }

    #[test]
    fn snmp_oid_uses_key_rules_only_with_brackets() {
        assert_eq!(
            expand("ifInOctets.{#SNMPINDEX}", &[("{#SNMPINDEX}", "3")], MacroContext::SnmpOid).unwrap(),
            "ifInOctets.3"
        );
        assert_eq!(
            expand("discovery[{#NAME}]", &[("{#NAME}", "a,b")], MacroContext::SnmpOid).unwrap(),
            "discovery[\"a,b\"]"
        );
    }

    #[test]
    fn formula_escapes_inside_string_literals() {
        assert_eq!(
            expand(
                "last(\"vfs.fs.size[{#FS},used]\")/{#TOTAL}",
                &[("{#FS}", "a\"b"), ("{#TOTAL}", "100")],
                MacroContext::Formula
            )
            .unwrap(),
            "last(\"vfs.fs.size[a\\\"b,used]\")/100"
        );
    }
}
