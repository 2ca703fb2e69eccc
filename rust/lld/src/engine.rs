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

//! One reconciliation run of a discovery rule.

use crate::commit::{commit, CommitSet, CommitSummary};
use crate::config::CommitOptions;
use crate::db::Database;
use crate::dependency::DependencyGraph;
use crate::error::{ErrorSink, LldError, Result};
use crate::expand::{
    is_user_macro, parse_time_suffix, IntervalValidator, LldMacroExpander, MacroExpander,
    UpdateIntervalValidator,
};
use crate::loader::{
    load_application_prototypes, load_applications, load_item_application_links,
    load_item_application_prototype_links, load_item_prototypes, load_items, load_rule,
};
use crate::model::RowArena;
use crate::preprocessing::{PreprocessorValidator, StepValidator};
use crate::reconcile::{
    reconcile_applications, reconcile_items, reconcile_preprocessing, resolve_links,
    validate_applications,
};
use crate::sweep::{sweep_lost_applications, sweep_lost_items, SweepSummary};
use crate::validate::{validate_dependent_items, validate_item_keys, validate_items, Validators};
use serde::Serialize;
use tracing::{debug, info};

/// Outcome of a run. Validation problems do not fail a run; they are listed
/// in `errors`, one per line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub rule_id: u64,
    pub host_id: u64,
    pub rows: usize,
    pub committed: CommitSummary,
    pub items: SweepSummary,
    pub applications: SweepSummary,
    pub errors: Option<String>,
}

/// Parses the rule lifetime. Unresolved user macros are not accepted here.
pub fn parse_lifetime(lifetime: &str) -> Result<u64> {
    let lifetime = lifetime.trim();
    if is_user_macro(lifetime) {
        return Err(LldError::InvalidLifetime(lifetime.to_string()));
    }
    parse_time_suffix(lifetime).ok_or_else(|| LldError::InvalidLifetime(lifetime.to_string()))
}

pub struct LldEngine<'a> {
    expander: &'a dyn MacroExpander,
    validators: Validators<'a>,
    options: CommitOptions,
}

impl LldEngine<'static> {
    /// Engine with the built-in expander and validators.
    pub fn new(options: CommitOptions) -> Self {
        Self::with_collaborators(&LldMacroExpander, &UpdateIntervalValidator, &StepValidator, options)
    }
}

impl<'a> LldEngine<'a> {
    pub fn with_collaborators(
        expander: &'a dyn MacroExpander,
        interval: &'a dyn IntervalValidator,
        preprocessor: &'a dyn PreprocessorValidator,
        options: CommitOptions,
    ) -> Self {
        Self {
            expander,
            validators: Validators {
                interval,
                preprocessor,
            },
            options,
        }
    }

    /// Reconciles `rows` against what the rule discovered before, commits the
    /// result and ages out lost entities.
    pub async fn run(
        &self,
        db: &mut dyn Database,
        rule_id: u64,
        rows: &RowArena,
        now: i64,
    ) -> Result<RunReport> {
        let rule = load_rule(db, rule_id).await?;
        info!(rule_id, host_id = rule.host_id, rows = rows.len(), "starting discovery run");
        let mut errors = ErrorSink::new();

        let mut item_prototypes = load_item_prototypes(db, rule_id).await?;
        let application_prototypes = load_application_prototypes(db, rule_id).await?;
        load_item_application_prototype_links(
            db,
            rule_id,
            &mut item_prototypes,
            &application_prototypes,
        )
        .await?;
        let existing_items = load_items(db, &item_prototypes).await?;
        let existing_applications = load_applications(db, rule_id).await?;
        let existing_links = load_item_application_links(db, rule_id).await?;
        debug!(
            item_prototypes = item_prototypes.len(),
            application_prototypes = application_prototypes.len(),
            items = existing_items.len(),
            applications = existing_applications.len(),
            "loaded rule state"
        );

        let mut items =
            reconcile_items(&item_prototypes, rows, existing_items, self.expander, &mut errors).items;
        reconcile_preprocessing(&item_prototypes, &mut items, rows, self.expander, &mut errors);

        let mut graph = DependencyGraph::build(db, &item_prototypes).await?;
        validate_items(&mut items, self.validators, &mut errors);
        validate_item_keys(db, rule.host_id, &mut items, &mut errors).await?;
        // last, so that masters dropped above take their dependents with them
        validate_dependent_items(&item_prototypes, &mut items, &mut graph, &mut errors);

        let mut applications = reconcile_applications(
            &application_prototypes,
            rows,
            existing_applications,
            self.expander,
            &mut errors,
        );
        validate_applications(db, rule.host_id, &mut applications, &mut errors).await?;
        let mut links = resolve_links(
            &item_prototypes,
            &items,
            &applications.applications,
            &applications.index,
            existing_links,
        );

        let committed = commit(
            db,
            CommitSet {
                host_id: rule.host_id,
                items: &mut items,
                item_prototypes: &item_prototypes,
                applications: &mut applications.applications,
                links: &mut links,
                now,
            },
            &self.options,
        )
        .await?;

        let mut report = RunReport {
            rule_id,
            host_id: rule.host_id,
            rows: rows.len(),
            committed,
            ..RunReport::default()
        };
        match parse_lifetime(&rule.lifetime) {
            Ok(lifetime) => {
                report.items = sweep_lost_items(db, &mut items, lifetime, now, &self.options).await?;
                report.applications = sweep_lost_applications(
                    db,
                    rule_id,
                    &mut applications.applications,
                    lifetime,
                    now,
                    &self.options,
                )
                .await?;
            }
            Err(err) => errors.push(format!("{}.", capitalize(&err.to_string()))),
        }

        report.errors = errors.to_report();
        info!(
            rule_id,
            items_created = report.committed.items_created,
            items_deleted = report.items.deleted,
            errors = errors.len(),
            "discovery run finished"
        );
        Ok(report)
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Row;
    use crate::testing::ScriptedDb;

    #[test]
    fn lifetimes_use_time_suffixes() {
        assert_eq!(parse_lifetime("30d").unwrap(), 30 * 86_400);
        assert_eq!(parse_lifetime(" 3600 ").unwrap(), 3600);
        assert!(matches!(
            parse_lifetime("{$LLD_LIFETIME}"),
            Err(LldError::InvalidLifetime(_))
        ));
        assert!(parse_lifetime("soon").is_err());
    }

    #[tokio::test]
    async fn unknown_rule_fails_the_run() {
        let mut db = ScriptedDb::new();
        let engine = LldEngine::new(CommitOptions::default());
        let err = engine
            .run(&mut db, 7, &RowArena::default(), 1000)
            .await
            .unwrap_err();
        assert!(matches!(err, LldError::RuleNotFound(7)));
    }

    #[tokio::test]
    async fn invalid_lifetime_skips_the_sweep() {
        let mut db = ScriptedDb::new().on("SELECT hostid,lifetime", vec![Row::of(["3", "forever"])]);
        let engine = LldEngine::new(CommitOptions::default());
        let report = engine
            .run(&mut db, 7, &RowArena::default(), 1000)
            .await
            .unwrap();
        assert_eq!(report.errors.as_deref(), Some("Invalid lifetime \"forever\"."));
        assert!(db.transactions.is_empty());
    }
}
