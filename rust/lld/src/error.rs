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

//! Error types for discovery runs.
//!
//! Run-level failures (storage, locking, malformed rows) are `LldError` values
//! and abort the run. Per-entity validation problems are not errors in this
//! sense: they are collected as text in an [`ErrorSink`] and reported once at
//! the end of the run.

use thiserror::Error;

/// Result type for discovery run operations.
pub type Result<T> = std::result::Result<T, LldError>;

#[derive(Error, Debug)]
pub enum LldError {
    /// A statement or query failed in the storage layer.
    #[error("database error: {0}")]
    Database(String),

    /// A locked row disappeared between load and commit.
    #[error("{table} rows were removed while discovery was running")]
    ConcurrentlyRemoved { table: &'static str },

    /// A column could not be decoded into the expected type.
    #[error("cannot decode column {column}: {value:?}")]
    Decode { column: &'static str, value: String },

    #[error("discovery rule {0} not found")]
    RuleNotFound(u64),

    #[error("invalid discovery data: {0}")]
    DiscoveryData(String),

    #[error("invalid lifetime \"{0}\"")]
    InvalidLifetime(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<tokio_postgres::Error> for LldError {
    fn from(err: tokio_postgres::Error) -> Self {
        LldError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for LldError {
    fn from(err: serde_json::Error) -> Self {
        LldError::DiscoveryData(err.to_string())
    }
}

/// Accumulates user-facing validation messages for one discovery run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ErrorSink {
    lines: Vec<String>,
}

impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(%message, "discovery validation error");
        self.lines.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines.iter().any(|line| line.contains(needle))
    }

    /// Multi-line report, one message per line.
    pub fn to_report(&self) -> Option<String> {
        if self.lines.is_empty() {
            None
        } else {
            Some(self.lines.join("\n"))
        }
    }
}
