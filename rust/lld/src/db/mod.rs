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

//! Storage access used by the discovery engine.
//!
//! The engine speaks plain SQL text through the [`Database`] trait so that the
//! loaders, the committer and the sweeper can be exercised against a scripted
//! implementation in tests. [`pg::PgDatabase`] is the PostgreSQL backend.

mod batch;
pub mod pg;

pub use batch::{InsertBuilder, SqlBatch, SqlValue};

use crate::error::{LldError, Result};
use async_trait::async_trait;

/// One result row with every column rendered as text (`None` for NULL).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row(Vec<Option<String>>);

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self(values)
    }

    /// Builds a row of non-NULL values.
    pub fn of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(|v| Some(v.into())).collect())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Text value of a column; NULL and missing columns read as empty.
    pub fn text(&self, idx: usize) -> &str {
        self.0.get(idx).and_then(|v| v.as_deref()).unwrap_or("")
    }

    /// Identifier column. NULL reads as `0`, matching "no reference".
    pub fn id(&self, idx: usize, column: &'static str) -> Result<u64> {
        let raw = self.text(idx);
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| LldError::Decode {
            column,
            value: raw.to_string(),
        })
    }

    pub fn int(&self, idx: usize, column: &'static str) -> Result<i64> {
        let raw = self.text(idx);
        if raw.is_empty() {
            return Ok(0);
        }
        raw.parse().map_err(|_| LldError::Decode {
            column,
            value: raw.to_string(),
        })
    }
}

/// Storage collaborator.
///
/// Calls are awaited one at a time; a discovery run never fans out.
#[async_trait]
pub trait Database: Send {
    async fn select(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Executes one or more `;`-separated statements, returning affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Locks the given rows for the rest of the transaction. Returns `false`
    /// when at least one of them no longer exists.
    async fn lock_rows_by_id(
        &mut self,
        table: &'static str,
        id_column: &'static str,
        ids: &[u64],
    ) -> Result<bool> {
        if ids.is_empty() {
            return Ok(true);
        }
        let mut wanted = ids.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        let sql = format!(
            "SELECT {id_column} FROM {table} WHERE {} ORDER BY {id_column} FOR UPDATE",
            in_clause(id_column, &wanted)
        );
        let rows = self.select(&sql).await?;
        Ok(rows.len() == wanted.len())
    }

    /// Reserves `count` consecutive identifiers and returns the first one.
    async fn reserve_ids(
        &mut self,
        table: &'static str,
        id_column: &'static str,
        count: usize,
    ) -> Result<u64> {
        if count == 0 {
            return Ok(0);
        }
        let sql = format!(
            "INSERT INTO ids (table_name,field_name,nextid) \
             VALUES ({table_q},{column_q},(SELECT COALESCE(MAX({id_column}),0) FROM {table})+{count}) \
             ON CONFLICT (table_name,field_name) DO UPDATE SET nextid=ids.nextid+{count} \
             RETURNING nextid",
            table_q = quote(table),
            column_q = quote(id_column),
        );
        let rows = self.select(&sql).await?;
        let row = rows.first().ok_or_else(|| {
            LldError::Database(format!("id reservation for {table} returned no rows"))
        })?;
        let next = row.id(0, "nextid")?;
        Ok(next + 1 - count as u64)
    }
}

/// Quotes a string literal for PostgreSQL with standard conforming strings.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\'' => out.push_str("''"),
            '\0' => {}
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

pub fn id_list(ids: &[u64]) -> String {
    ids.iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// `column IN (...)`; an empty set renders as an always-false condition.
pub fn in_clause(column: &str, ids: &[u64]) -> String {
    if ids.is_empty() {
        return "1=0".to_string();
    }
    if ids.len() == 1 {
        return format!("{column}={}", ids[0]);
    }
    format!("{column} IN ({})", id_list(ids))
}

pub fn in_clause_text(column: &str, values: &[String]) -> String {
    if values.is_empty() {
        return "1=0".to_string();
    }
    let quoted = values
        .iter()
        .map(|v| quote(v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{column} IN ({quoted})")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_single_quotes_and_strips_nul() {
        assert_eq!(quote("it's"), "'it''s'");
        assert_eq!(quote("a\0b"), "'ab'");
        assert_eq!(quote("C:\\path"), "'C:\\path'");
    }

    #[test]
    fn renders_in_clauses() {
        assert_eq!(in_clause("itemid", &[]), "1=0");
        assert_eq!(in_clause("itemid", &[7]), "itemid=7");
        assert_eq!(in_clause("itemid", &[1, 2, 3]), "itemid IN (1,2,3)");
        assert_eq!(
            in_clause_text("name", &["a".into(), "b'c".into()]),
            "name IN ('a','b''c')"
        );
    }

    #[test]
    fn row_decodes_ids_and_nulls() {
        let row = Row::new(vec![Some("42".into()), None, Some("x".into())]);
        assert_eq!(row.id(0, "itemid").unwrap(), 42);
        assert_eq!(row.id(1, "master_itemid").unwrap(), 0);
        assert!(matches!(
            row.id(2, "valuemapid"),
            Err(LldError::Decode { column: "valuemapid", .. })
        ));
        assert_eq!(row.text(9), "");
    }
}
