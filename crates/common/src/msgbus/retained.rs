// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! The bounded retained-message store.
//!
//! One entry per topic, iterated in insertion order for replay. Overwriting a
//! topic moves its entry to the end, so eviction on overflow is strictly
//! least-recently-inserted-or-updated.

use indexmap::IndexMap;

use super::{
    envelope::Message,
    matching::CompiledPattern,
    mstr::{MStr, Topic},
};

/// Maps each concrete topic to its last retained message, bounded by capacity.
#[derive(Debug, Default)]
pub struct RetainedStore {
    entries: IndexMap<MStr<Topic>, Message>,
    capacity: usize,
}

impl RetainedStore {
    /// Creates a new [`RetainedStore`] with the given capacity.
    ///
    /// A capacity of zero disables retention entirely.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity.min(1_024)),
            capacity,
        }
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the retained message for the topic, if any.
    #[must_use]
    pub fn get(&self, topic: &MStr<Topic>) -> Option<&Message> {
        self.entries.get(topic)
    }

    /// Inserts or overwrites the retained entry for the topic, returning the
    /// number of entries evicted to stay within capacity.
    ///
    /// Overwrite moves the entry to the end of the insertion order.
    pub fn insert(&mut self, topic: MStr<Topic>, message: Message) -> u64 {
        if self.capacity == 0 {
            return 0;
        }

        if self.entries.contains_key(&topic) {
            self.entries.shift_remove(&topic);
        }
        self.entries.insert(topic, message);

        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.shift_remove_index(0);
            evicted += 1;
        }
        evicted
    }

    /// Removes the retained entry for the topic.
    pub fn remove(&mut self, topic: &MStr<Topic>) -> Option<Message> {
        self.entries.shift_remove(topic)
    }

    /// Removes all retained entries, returning the number removed.
    pub fn clear(&mut self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Removes retained entries whose topic matches the pattern, returning
    /// the number removed.
    pub fn clear_matching(&mut self, pattern: &CompiledPattern) -> usize {
        let before = self.entries.len();
        self.entries.retain(|topic, _| !pattern.matches(*topic));
        before - self.entries.len()
    }

    /// Collects the retained messages whose topic matches any of the given
    /// patterns, in insertion order, each entry at most once.
    #[must_use]
    pub fn matching(&self, patterns: &[CompiledPattern]) -> Vec<Message> {
        self.entries
            .iter()
            .filter(|(topic, _)| patterns.iter().any(|p| p.matches(**topic)))
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Returns the retained topics in insertion order.
    #[must_use]
    pub fn topics(&self) -> Vec<MStr<Topic>> {
        self.entries.keys().copied().collect()
    }
}
