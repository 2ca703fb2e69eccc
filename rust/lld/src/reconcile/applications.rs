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

//! Application matching and name collision handling.
//!
//! Rows resolve to applications by exact name first, then by re-expanding the
//! stored name template (a rename), and only then create new applications.
//! Rows producing the same name under one prototype share one application.

use crate::db::{in_clause_text, Database};
use crate::error::{ErrorSink, Result};
use crate::expand::{MacroContext, MacroExpander};
use crate::model::{
    trim_whitespace, Application, ApplicationIndex, ApplicationPrototype, RowArena, RowId,
    Tracked, APPLICATION_DISCOVERY_CREATED,
};
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct ApplicationReconciliation {
    pub applications: Vec<Application>,
    pub index: ApplicationIndex,
}

fn bind(application: &mut Application, prototype: &ApplicationPrototype, row: RowId) {
    application.discovered = true;
    application.rows.push(row);
    application.name_proto.set(prototype.name.clone());
}

pub fn reconcile_applications(
    prototypes: &[ApplicationPrototype],
    rows: &RowArena,
    existing: Vec<Application>,
    expander: &dyn MacroExpander,
    errors: &mut ErrorSink,
) -> ApplicationReconciliation {
    let mut applications = existing;

    for prototype in prototypes {
        let prototypeid = prototype.application_prototypeid;
        let mut pending = Vec::new();
        for row in rows.iter() {
            match expander.expand(&prototype.name, row, MacroContext::Any) {
                Ok(name) => {
                    let name = trim_whitespace(&name).to_string();
                    if name.is_empty() {
                        errors.push(format!(
                            "Cannot create application: prototype \"{}\" produced an empty name.",
                            prototype.name
                        ));
                        continue;
                    }
                    pending.push((row.id(), name));
                }
                Err(err) => errors.push(format!(
                    "Cannot create application: cannot expand \"{}\": {err}.",
                    prototype.name
                )),
            }
        }

        // exact name
        pending.retain(|(row_id, name)| {
            match applications
                .iter_mut()
                .rev()
                .find(|app| app.application_prototypeid == prototypeid && app.name.get() == name)
            {
                Some(app) => {
                    bind(app, prototype, *row_id);
                    false
                }
                None => true,
            }
        });

        // rename: the stored template still produces the stored name
        pending.retain(|(row_id, name)| {
            let Some(row) = rows.get(*row_id) else {
                return false;
            };
            if let Some(app) = applications.iter_mut().find(|app| {
                app.application_prototypeid == prototypeid && app.discovered && app.name.get() == name
            }) {
                bind(app, prototype, *row_id);
                return false;
            }
            let renamed = applications.iter_mut().rev().find(|app| {
                app.application_prototypeid == prototypeid
                    && !app.discovered
                    && !app.is_new()
                    && expander
                        .expand(app.name_proto.get(), row, MacroContext::Any)
                        .is_ok_and(|old| trim_whitespace(&old) == app.name.get())
            });
            match renamed {
                Some(app) => {
                    app.name.set(name.clone());
                    bind(app, prototype, *row_id);
                    false
                }
                None => true,
            }
        });

        for (row_id, name) in pending {
            match applications.iter_mut().find(|app| {
                app.application_prototypeid == prototypeid && app.discovered && *app.name.get() == name
            }) {
                Some(app) => app.rows.push(row_id),
                None => applications.push(Application::new(prototype, name, row_id)),
            }
        }
    }

    applications.sort_by_key(|app| app.applicationid);
    let index = ApplicationIndex::build(&applications);
    debug!(applications = applications.len(), "reconciled applications");
    ApplicationReconciliation {
        applications,
        index,
    }
}

fn reject(application: &mut Application, reason: &str, errors: &mut ErrorSink) {
    if application.is_new() {
        errors.push(format!(
            "Cannot create application \"{}\": {reason}.",
            application.name.get()
        ));
        application.discovered = false;
        application.rows.clear();
    } else {
        errors.push(format!(
            "Cannot rename application \"{}\" to \"{}\": {reason}.",
            application.name.persisted(),
            application.name.get()
        ));
        application.name.rollback();
        application.name_proto.rollback();
    }
}

/// Replaces `old` with a fresh discovered application carrying its new name
/// and rows; `old` keeps its persisted name and is no longer discovered.
fn split_off(old: &mut Application) -> Application {
    let fresh = Application {
        applicationid: 0,
        application_prototypeid: old.application_prototypeid,
        application_discoveryid: 0,
        name: Tracked::new(old.name.get().clone()),
        name_proto: Tracked::new(old.name_proto.get().clone()),
        lastcheck: 0,
        ts_delete: 0,
        shared: false,
        discovered: true,
        add_discovery: false,
        remove_discovery: false,
        remove: false,
        rows: std::mem::take(&mut old.rows),
    };
    old.name.rollback();
    old.name_proto.rollback();
    old.discovered = false;
    fresh
}

fn is_written_name(application: &Application) -> bool {
    application.discovered && (application.is_new() || application.is_renamed())
}

/// Resolves name collisions of new and renamed applications inside the batch
/// and against other applications of the host. The first application in
/// batch order keeps a contested name.
pub async fn validate_applications(
    db: &mut dyn Database,
    host_id: u64,
    reconciliation: &mut ApplicationReconciliation,
    errors: &mut ErrorSink,
) -> Result<()> {
    let applications = &mut reconciliation.applications;

    let mut claimed: HashMap<String, u64> = HashMap::new();
    for app in applications.iter().filter(|app| !app.is_new() && !app.is_renamed()) {
        claimed
            .entry(app.name.get().clone())
            .or_insert(app.application_prototypeid);
    }
    for app in applications.iter_mut().filter(|app| is_written_name(app)) {
        match claimed.get(app.name.get()) {
            Some(prototypeid) if *prototypeid != app.application_prototypeid => {
                reject(app, "application with the same name already exists", errors);
            }
            _ => {
                claimed.insert(app.name.get().clone(), app.application_prototypeid);
            }
        }
    }

    // a shared application is never renamed in place
    let mut split = Vec::new();
    for app in applications.iter_mut() {
        if app.discovered && app.is_renamed() && app.shared {
            split.push(split_off(app));
            app.remove_discovery = true;
        }
    }
    applications.extend(split);

    let names = applications
        .iter()
        .filter(|app| is_written_name(app))
        .map(|app| app.name.get().clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    if !names.is_empty() {
        let own = applications
            .iter()
            .filter(|app| !app.is_new())
            .map(|app| app.applicationid)
            .collect::<HashSet<_>>();
        let sql = format!(
            "SELECT applicationid,name,flags FROM applications WHERE hostid={host_id} AND {} \
             ORDER BY applicationid",
            in_clause_text("name", &names)
        );
        let mut adopted = Vec::new();
        for row in db.select(&sql).await? {
            let applicationid = row.id(0, "applicationid")?;
            if own.contains(&applicationid) {
                continue;
            }
            let name = row.text(1);
            let flags = row.int(2, "flags")?;
            let Some(app) = applications
                .iter_mut()
                .find(|app| is_written_name(app) && app.name.get() == name)
            else {
                continue;
            };

            if flags != APPLICATION_DISCOVERY_CREATED {
                reject(app, "application with the same name already exists", errors);
            } else if app.is_new() {
                debug!(applicationid, name, "adopting application created by another rule");
                app.applicationid = applicationid;
                app.add_discovery = true;
                app.shared = true;
            } else {
                let mut fresh = split_off(app);
                app.remove = true;
                fresh.applicationid = applicationid;
                fresh.add_discovery = true;
                fresh.shared = true;
                adopted.push(fresh);
            }
        }
        applications.extend(adopted);
    }

    reconciliation.index = ApplicationIndex::build(applications);
    Ok(())
}
