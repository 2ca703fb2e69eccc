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

//! Low-level discovery reconciliation.
//!
//! A run matches the rows of a discovery payload against the prototypes of a
//! rule and the items and applications it created before, validates the
//! result, writes it in one transaction and ages out what is no longer
//! discovered.

pub mod commit;
pub mod config;
pub mod db;
pub mod dependency;
pub mod engine;
pub mod error;
pub mod expand;
pub mod loader;
pub mod model;
pub mod preprocessing;
pub mod reconcile;
pub mod sweep;
pub mod telemetry;
pub mod validate;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{LldEngine, RunReport};
pub use error::{LldError, Result};

use crate::config::AppConfig;
use crate::db::pg::{connect_pool, PgDatabase};
use crate::model::RowArena;

/// Runs one discovery rule against the configured database.
pub async fn run(rule_id: u64, payload: &[u8], now: i64) -> anyhow::Result<RunReport> {
    let config = AppConfig::from_env()?;
    let rows = RowArena::from_json(payload)?;
    let pool = connect_pool(&config).await?;
    let mut db = PgDatabase::acquire(&pool).await?;
    let engine = LldEngine::new(config.commit);
    Ok(engine.run(&mut db, rule_id, &rows, now).await?)
}
