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

//! Pattern matching for message bus topic subscriptions.
//!
//! Matching is anchored and segment-based, never substring:
//!
//! 1. A pattern equal to the topic matches.
//! 2. The bare global wildcard `*` matches any topic.
//! 3. Otherwise both sides split on `.`; the segment counts must be equal and
//!    every pattern segment either equals the topic segment or is `*`.
//!
//! Patterns are pre-split at subscribe time ([`CompiledPattern`]) so the
//! publish hot path compares interned segments without re-parsing.

use smallvec::SmallVec;
use ustr::Ustr;

use super::mstr::{MStr, Pattern, Topic, WILDCARD};

/// Inline capacity for topic segment buffers before heap allocation.
pub(crate) const SEGMENT_BUFFER_CAP: usize = 8;

/// Match a topic against a pattern with wildcard support.
#[must_use]
pub fn is_matching(topic: MStr<Topic>, pattern: MStr<Pattern>) -> bool {
    is_matching_str(topic.as_ref(), pattern.as_ref())
}

/// Match topic and pattern strings directly.
///
/// Exposed for callers which dedupe or filter messages client-side when
/// wildcard-subscribed; the inputs are not required to be valid bus strings.
#[must_use]
pub fn is_matching_str(topic: &str, pattern: &str) -> bool {
    // Fast path for exact matches (no wildcards)
    if topic == pattern {
        return true;
    }
    if pattern == WILDCARD {
        return true;
    }

    let mut topic_segments = topic.split('.');
    let mut pattern_segments = pattern.split('.');

    loop {
        match (topic_segments.next(), pattern_segments.next()) {
            (Some(t), Some(p)) => {
                if p != WILDCARD && p != t {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false, // Length mismatch
        }
    }
}

/// A single pre-split pattern segment.
#[derive(Clone, Debug, PartialEq, Eq)]
enum PatternSegment {
    Literal(Ustr),
    Any,
}

/// A subscription pattern pre-split into segments at subscribe time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledPattern {
    raw: MStr<Pattern>,
    kind: PatternKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum PatternKind {
    /// No wildcard segments; matches by interned pointer comparison.
    Exact(Ustr),
    /// The bare `*` pattern.
    Global,
    /// At least one `*` segment.
    Segments(Vec<PatternSegment>),
}

impl CompiledPattern {
    /// Compiles the pattern for repeated matching.
    #[must_use]
    pub fn compile(pattern: MStr<Pattern>) -> Self {
        let kind = if pattern.is_global() {
            PatternKind::Global
        } else if !pattern.as_ref().contains('*') {
            PatternKind::Exact(pattern.inner())
        } else {
            PatternKind::Segments(
                pattern
                    .as_ref()
                    .split('.')
                    .map(|seg| {
                        if seg == WILDCARD {
                            PatternSegment::Any
                        } else {
                            PatternSegment::Literal(Ustr::from(seg))
                        }
                    })
                    .collect(),
            )
        };

        Self { raw: pattern, kind }
    }

    /// Returns the raw pattern string.
    #[must_use]
    pub const fn raw(&self) -> MStr<Pattern> {
        self.raw
    }

    /// Matches against a topic, splitting it on demand.
    #[must_use]
    pub fn matches(&self, topic: MStr<Topic>) -> bool {
        let segments: SmallVec<[&str; SEGMENT_BUFFER_CAP]> = topic.as_ref().split('.').collect();
        self.matches_parts(topic.inner(), &segments)
    }

    /// Matches against a topic whose segments were already split by the caller.
    ///
    /// The hot path splits the topic once per publish and reuses the segments
    /// across every candidate subscription.
    #[must_use]
    pub fn matches_parts(&self, topic: Ustr, topic_segments: &[&str]) -> bool {
        match &self.kind {
            PatternKind::Exact(value) => *value == topic,
            PatternKind::Global => true,
            PatternKind::Segments(segments) => {
                segments.len() == topic_segments.len()
                    && segments.iter().zip(topic_segments).all(|(p, t)| match p {
                        PatternSegment::Any => true,
                        PatternSegment::Literal(lit) => lit.as_str() == *t,
                    })
            }
        }
    }
}
