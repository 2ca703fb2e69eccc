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

//! Master/dependent item graph used to enforce dependency limits.

use crate::db::{in_clause, Database};
use crate::error::Result;
use crate::model::{ItemPrototype, ITEM_FLAG_PROTOTYPE};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error};

/// Levels of dependent items below a master item.
pub const MAX_DEPENDENCY_LEVELS: usize = 3;
/// Dependent items one master item tree may carry.
pub const MAX_DEPENDENT_ITEMS: usize = 999;

/// Rows fetched per graph expansion query.
const QUERY_BATCH: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub itemid: u64,
    pub master_itemid: u64,
    pub is_prototype: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DependencyLimit {
    #[error("maximum dependent item level reached")]
    TooDeep,
    #[error("maximum count of dependent items reached")]
    TooMany,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DependencyCount {
    /// Non-prototype dependents in the tree.
    pub count: usize,
    /// Deepest dependent level found.
    pub depth: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependents: HashMap<u64, Vec<Dependency>>,
    masters: HashMap<u64, Dependency>,
}

impl DependencyGraph {
    /// Loads every dependency reachable from the prototypes that have a
    /// master item, walking both towards masters and towards dependents.
    pub async fn build(db: &mut dyn Database, prototypes: &[ItemPrototype]) -> Result<Self> {
        let mut graph = Self::default();
        let mut up: BTreeSet<u64> = BTreeSet::new();
        let mut down: BTreeSet<u64> = BTreeSet::new();
        let mut seen_up = HashSet::new();
        let mut seen_down = HashSet::new();

        for prototype in prototypes.iter().filter(|p| p.master_itemid != 0) {
            graph.add(Dependency {
                itemid: prototype.itemid,
                master_itemid: prototype.master_itemid,
                is_prototype: true,
            });
            up.insert(prototype.master_itemid);
            down.insert(prototype.itemid);
            down.insert(prototype.master_itemid);
        }

        let mut queries = 0;
        while !up.is_empty() || !down.is_empty() {
            let up_batch = take_batch(&mut up, &mut seen_up);
            let down_batch = take_batch(&mut down, &mut seen_down);
            if up_batch.is_empty() && down_batch.is_empty() {
                continue;
            }

            let sql = format!(
                "SELECT itemid,master_itemid,flags FROM items WHERE {} OR {}",
                in_clause("itemid", &up_batch),
                in_clause("master_itemid", &down_batch)
            );
            queries += 1;
            for row in db.select(&sql).await? {
                let itemid = row.id(0, "itemid")?;
                let master_itemid = row.id(1, "master_itemid")?;
                if master_itemid == 0 {
                    continue;
                }
                graph.add(Dependency {
                    itemid,
                    master_itemid,
                    is_prototype: row.int(2, "flags")? & ITEM_FLAG_PROTOTYPE != 0,
                });
                for id in [itemid, master_itemid] {
                    if !seen_down.contains(&id) {
                        down.insert(id);
                    }
                }
                if !seen_up.contains(&master_itemid) {
                    up.insert(master_itemid);
                }
            }
        }

        debug!(edges = graph.masters.len(), queries, "built item dependency graph");
        Ok(graph)
    }

    /// Adds or replaces the master edge of `dependency.itemid`.
    pub fn add(&mut self, dependency: Dependency) {
        if self.masters.get(&dependency.itemid) == Some(&dependency) {
            return;
        }
        self.remove(dependency.itemid);
        self.masters.insert(dependency.itemid, dependency);
        self.dependents
            .entry(dependency.master_itemid)
            .or_default()
            .push(dependency);
    }

    pub fn remove(&mut self, itemid: u64) {
        if let Some(old) = self.masters.remove(&itemid) {
            if let Some(siblings) = self.dependents.get_mut(&old.master_itemid) {
                siblings.retain(|dep| dep.itemid != itemid);
            }
        }
    }

    pub fn master_of(&self, itemid: u64) -> Option<u64> {
        self.masters.get(&itemid).map(|dep| dep.master_itemid)
    }

    /// Root of the master chain `itemid` belongs to.
    pub fn top_master(&self, itemid: u64) -> u64 {
        let mut current = itemid;
        let mut visited = HashSet::from([itemid]);
        while let Some(master) = self.master_of(current) {
            if !visited.insert(master) {
                error!(itemid, "item dependency cycle detected");
                break;
            }
            current = master;
        }
        current
    }

    /// Counts the dependents below `itemid`, failing once a limit is hit.
    pub fn count_dependencies(&self, itemid: u64) -> std::result::Result<DependencyCount, DependencyLimit> {
        let mut visited = HashSet::from([itemid]);
        let mut total = DependencyCount::default();
        self.walk(itemid, 0, &mut visited, &mut total)?;
        Ok(total)
    }

    fn walk(
        &self,
        itemid: u64,
        level: usize,
        visited: &mut HashSet<u64>,
        total: &mut DependencyCount,
    ) -> std::result::Result<(), DependencyLimit> {
        let Some(dependents) = self.dependents.get(&itemid) else {
            return Ok(());
        };
        for dependency in dependents {
            if !visited.insert(dependency.itemid) {
                continue;
            }
            let level = level + 1;
            if level > MAX_DEPENDENCY_LEVELS {
                error!(
                    itemid = dependency.itemid,
                    master_itemid = itemid,
                    "dependent item exceeds the dependency level limit"
                );
                return Err(DependencyLimit::TooDeep);
            }
            total.depth = total.depth.max(level);
            if !dependency.is_prototype {
                total.count += 1;
                if total.count >= MAX_DEPENDENT_ITEMS {
                    return Err(DependencyLimit::TooMany);
                }
            }
            self.walk(dependency.itemid, level, visited, total)?;
        }
        Ok(())
    }
}

fn take_batch(queue: &mut BTreeSet<u64>, seen: &mut HashSet<u64>) -> Vec<u64> {
    let mut batch = Vec::new();
    while batch.len() < QUERY_BATCH {
        let Some(id) = queue.pop_first() else {
            break;
        };
        if seen.insert(id) {
            batch.push(id);
        }
    }
    batch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Row;
    use crate::testing::ScriptedDb;

    fn edge(itemid: u64, master_itemid: u64) -> Dependency {
        Dependency {
            itemid,
            master_itemid,
            is_prototype: false,
        }
    }

    #[test]
    fn counts_levels_and_items() {
        let mut graph = DependencyGraph::default();
        graph.add(edge(2, 1));
        graph.add(edge(3, 2));
        graph.add(edge(4, 3));
        graph.add(Dependency {
            itemid: 5,
            master_itemid: 1,
            is_prototype: true,
        });

        assert_eq!(
            graph.count_dependencies(1),
            Ok(DependencyCount { count: 3, depth: 3 })
        );
        assert_eq!(graph.top_master(4), 1);

        graph.add(edge(6, 4));
        assert_eq!(graph.count_dependencies(1), Err(DependencyLimit::TooDeep));
        graph.remove(6);
        assert!(graph.count_dependencies(1).is_ok());
    }

    #[test]
    fn stops_at_the_count_limit() {
        let mut graph = DependencyGraph::default();
        for itemid in 2..(2 + MAX_DEPENDENT_ITEMS as u64 - 1) {
            graph.add(edge(itemid, 1));
        }
        assert_eq!(graph.count_dependencies(1).map(|c| c.count), Ok(MAX_DEPENDENT_ITEMS - 1));
        graph.add(edge(5000, 1));
        assert_eq!(graph.count_dependencies(1), Err(DependencyLimit::TooMany));
    }

    #[test]
    fn shared_descendants_are_counted_once() {
        let mut graph = DependencyGraph::default();
        graph.add(edge(2, 1));
        graph.add(edge(3, 1));
        // 4 hangs below both 2 and 3 in the stored rows; the later edge wins
        graph.add(edge(4, 2));
        graph.add(edge(4, 3));
        assert_eq!(graph.count_dependencies(1).map(|c| c.count), Ok(3));
        assert_eq!(graph.master_of(4), Some(3));
    }

    #[tokio::test]
    async fn build_walks_both_directions() {
        let mut db = ScriptedDb::new().on(
            "FROM items WHERE",
            vec![
                Row::of(["100", "50", "4"]),
                Row::of(["50", "0", "0"]),
                Row::of(["101", "100", "4"]),
            ],
        );
        let mut prototype = ItemPrototype::new(20);
        prototype.master_itemid = 50;

        let graph = DependencyGraph::build(&mut db, &[prototype]).await.unwrap();
        assert_eq!(graph.top_master(20), 50);
        assert_eq!(graph.top_master(101), 50);
        assert_eq!(graph.count_dependencies(50).map(|c| c.count), Ok(2));
        assert!(db.selects[0].contains("itemid=50 OR master_itemid IN (20,50)"));
        assert!(db.selects.len() >= 2);
    }
}
