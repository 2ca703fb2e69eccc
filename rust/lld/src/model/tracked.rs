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

/// A value with its last persisted state.
///
/// The value is dirty exactly when an original is recorded, and an original
/// is only kept while it differs from the current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracked<T> {
    current: T,
    original: Option<T>,
}

impl<T: Clone + PartialEq> Tracked<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: value,
            original: None,
        }
    }

    pub fn get(&self) -> &T {
        &self.current
    }

    /// Persisted value, whether or not the field is dirty.
    pub fn persisted(&self) -> &T {
        self.original.as_ref().unwrap_or(&self.current)
    }

    pub fn original(&self) -> Option<&T> {
        self.original.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.original.is_some()
    }

    /// Assigns a new value. Returns `true` when the value changed.
    pub fn set(&mut self, value: T) -> bool {
        if value == self.current {
            return false;
        }
        let previous = std::mem::replace(&mut self.current, value);
        match &self.original {
            Some(original) if *original == self.current => self.original = None,
            Some(_) => {}
            None => self.original = Some(previous),
        }
        true
    }

    /// Restores the persisted value and clears the dirty state.
    pub fn rollback(&mut self) {
        if let Some(original) = self.original.take() {
            self.current = original;
        }
    }

    /// Accepts the current value as persisted.
    pub fn mark_persisted(&mut self) {
        self.original = None;
    }
}

impl<T: Clone + PartialEq + Default> Default for Tracked<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
