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

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_pool_size: u32,
    pub pg_ssl_root_cert: Option<String>,
    pub pg_ssl_cert: Option<String>,
    pub pg_ssl_key: Option<String>,
    pub commit: CommitOptions,
}

/// Limits for the statement batches written by the committer and sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOptions {
    /// Accumulated SQL is flushed once it grows past this many bytes.
    pub sql_batch_bytes: usize,
    /// Rows per multi-row INSERT statement.
    pub insert_batch_rows: usize,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            sql_batch_bytes: default_sql_batch_bytes(),
            insert_batch_rows: default_insert_batch_rows(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    lld_database_url: Option<String>,
    #[serde(default)]
    database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    lld_max_pool_size: u32,
    #[serde(default = "default_sql_batch_bytes")]
    lld_sql_batch_bytes: usize,
    #[serde(default = "default_insert_batch_rows")]
    lld_insert_batch_rows: usize,
    #[serde(default)]
    pgsslrootcert: Option<String>,
    #[serde(default)]
    pgsslcert: Option<String>,
    #[serde(default)]
    pgsslkey: Option<String>,
}

const fn default_pool_size() -> u32 {
    2
}

const fn default_sql_batch_bytes() -> usize {
    512 * 1024
}

const fn default_insert_batch_rows() -> usize {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let raw: RawConfig =
            envy::from_env().context("failed to parse LLD_* environment variables")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let database_url = raw
            .lld_database_url
            .or(raw.database_url)
            .or_else(|| env::var("DATABASE_URL").ok())
            .context("LLD_DATABASE_URL or DATABASE_URL must be set")?;

        Ok(Self {
            database_url,
            max_pool_size: raw.lld_max_pool_size.max(1),
            pg_ssl_root_cert: raw.pgsslrootcert,
            pg_ssl_cert: raw.pgsslcert,
            pg_ssl_key: raw.pgsslkey,
            commit: CommitOptions {
                sql_batch_bytes: raw.lld_sql_batch_bytes.max(1024),
                insert_batch_rows: raw.lld_insert_batch_rows.max(1),
            },
        })
    }
}
