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

//! Matching discovery rows against prototypes and previously discovered
//! entities.
//!
//! Every prototype starts with all rows as candidates. Rows matched to an
//! existing entity are removed from the candidate set and whatever remains
//! becomes a new entity.

pub mod applications;
pub mod items;
pub mod links;
pub mod preprocessing;

pub use applications::{reconcile_applications, validate_applications, ApplicationReconciliation};
pub use items::{expand_field, reconcile_items, ItemReconciliation};
pub use links::resolve_links;
pub use preprocessing::reconcile_preprocessing;
