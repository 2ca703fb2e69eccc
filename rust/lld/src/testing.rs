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

//! Scripted storage for tests.

use crate::db::{Database, Row};
use crate::error::Result;
use crate::model::ItemField;
use async_trait::async_trait;
use std::collections::HashMap;

/// Answers selects from canned rows keyed by a SQL fragment and records every
/// statement it receives.
#[derive(Debug, Default)]
pub struct ScriptedDb {
    responses: Vec<(String, Vec<Row>)>,
    pub selects: Vec<String>,
    pub executed: Vec<String>,
    pub transactions: Vec<&'static str>,
    pub vanished_tables: Vec<&'static str>,
    next_ids: HashMap<&'static str, u64>,
}

impl ScriptedDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned by the first select containing `fragment`.
    pub fn on(mut self, fragment: &str, rows: Vec<Row>) -> Self {
        self.responses.push((fragment.to_string(), rows));
        self
    }

    pub fn with_next_id(mut self, table: &'static str, next: u64) -> Self {
        self.next_ids.insert(table, next);
        self
    }

    /// Executed statements, split out of their batches.
    pub fn statements(&self) -> Vec<String> {
        self.executed
            .iter()
            .flat_map(|batch| batch.split(";\n"))
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn statements_containing(&self, fragment: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.contains(fragment))
            .collect()
    }
}

#[async_trait]
impl Database for ScriptedDb {
    async fn select(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.selects.push(sql.to_string());
        Ok(self
            .responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.executed.push(sql.to_string());
        Ok(1)
    }

    async fn begin(&mut self) -> Result<()> {
        self.transactions.push("begin");
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.transactions.push("commit");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.transactions.push("rollback");
        Ok(())
    }

    async fn lock_rows_by_id(
        &mut self,
        table: &'static str,
        _id_column: &'static str,
        _ids: &[u64],
    ) -> Result<bool> {
        Ok(!self.vanished_tables.contains(&table))
    }

    async fn reserve_ids(
        &mut self,
        table: &'static str,
        _id_column: &'static str,
        count: usize,
    ) -> Result<u64> {
        let next = self.next_ids.entry(table).or_insert(1);
        let first = *next;
        *next += count as u64;
        Ok(first)
    }
}

/// Item column values in `ItemField::ALL` order, empty unless overridden.
pub fn item_columns(overrides: &[(ItemField, &str)]) -> Vec<String> {
    ItemField::ALL
        .iter()
        .map(|field| {
            overrides
                .iter()
                .find(|(f, _)| f == field)
                .map(|(_, v)| v.to_string())
                .unwrap_or_default()
        })
        .collect()
}
