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

//! Statement accumulation for multi-statement writes.

use super::{quote, Database};
use crate::error::Result;
use tracing::trace;

/// Accumulates SQL statements and sends them to the database once the buffer
/// grows past `threshold` bytes. Callers must `flush` at the end of a phase.
#[derive(Debug)]
pub struct SqlBatch {
    buf: String,
    pending: usize,
    threshold: usize,
    flushed: usize,
}

impl SqlBatch {
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: String::new(),
            pending: 0,
            threshold: threshold.max(1),
            flushed: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pending == 0
    }

    /// Statements sent to the database so far.
    pub fn flushed_statements(&self) -> usize {
        self.flushed
    }

    pub async fn push(&mut self, db: &mut dyn Database, statement: &str) -> Result<()> {
        self.buf.push_str(statement);
        self.buf.push_str(";\n");
        self.pending += 1;
        if self.buf.len() > self.threshold {
            self.flush(db).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self, db: &mut dyn Database) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        trace!(statements = self.pending, bytes = self.buf.len(), "flushing sql batch");
        db.execute(&self.buf).await?;
        self.flushed += self.pending;
        self.buf.clear();
        self.pending = 0;
        Ok(())
    }
}

/// Literal value in an INSERT or UPDATE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Id(u64),
    /// `0` renders as NULL.
    NullableId(u64),
    Int(i64),
    Text(String),
}

impl SqlValue {
    pub fn render(&self) -> String {
        match self {
            SqlValue::Id(id) => id.to_string(),
            SqlValue::NullableId(0) => "NULL".to_string(),
            SqlValue::NullableId(id) => id.to_string(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Text(s) => quote(s),
        }
    }
}

/// Multi-row INSERT rendered in chunks of at most `max_rows` rows.
#[derive(Debug)]
pub struct InsertBuilder {
    table: &'static str,
    columns: Vec<&'static str>,
    rows: Vec<Vec<SqlValue>>,
}

impl InsertBuilder {
    pub fn new(table: &'static str, columns: &[&'static str]) -> Self {
        Self {
            table,
            columns: columns.to_vec(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<SqlValue>) {
        debug_assert_eq!(row.len(), self.columns.len(), "column count mismatch");
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn statements(&self, max_rows: usize) -> Vec<String> {
        let head = format!("INSERT INTO {} ({}) VALUES ", self.table, self.columns.join(","));
        self.rows
            .chunks(max_rows.max(1))
            .map(|chunk| {
                let values = chunk
                    .iter()
                    .map(|row| {
                        let cells = row.iter().map(SqlValue::render).collect::<Vec<_>>();
                        format!("({})", cells.join(","))
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{head}{values}")
            })
            .collect()
    }

    pub async fn execute(
        &self,
        db: &mut dyn Database,
        batch: &mut SqlBatch,
        max_rows: usize,
    ) -> Result<()> {
        for statement in self.statements(max_rows) {
            batch.push(db, &statement).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_values() {
        assert_eq!(SqlValue::NullableId(0).render(), "NULL");
        assert_eq!(SqlValue::NullableId(5).render(), "5");
        assert_eq!(SqlValue::Int(-1).render(), "-1");
        assert_eq!(SqlValue::Text("o'k".into()).render(), "'o''k'");
    }

    #[test]
    fn insert_builder_chunks_rows() {
        let mut insert = InsertBuilder::new("item_preproc", &["item_preprocid", "itemid", "params"]);
        for id in 1..=3 {
            insert.add_row(vec![
                SqlValue::Id(id),
                SqlValue::Id(100),
                SqlValue::Text(format!("p{id}")),
            ]);
        }

        let statements = insert.statements(2);
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0],
            "INSERT INTO item_preproc (item_preprocid,itemid,params) VALUES (1,100,'p1'),(2,100,'p2')"
        );
        assert_eq!(
            statements[1],
            "INSERT INTO item_preproc (item_preprocid,itemid,params) VALUES (3,100,'p3')"
        );
    }
}
