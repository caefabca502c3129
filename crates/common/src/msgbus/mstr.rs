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

//! Type-safe string wrappers for message bus topics and patterns.

use std::{fmt::Display, ops::Deref};

use busbar_core::correctness::{FAILED, check_valid_string};
use serde::{Deserialize, Serialize};
use ustr::Ustr;

/// The maximum length in bytes for a topic or pattern string.
pub const MAX_TOPIC_LEN: usize = 256;

/// The wildcard segment, and on its own the global wildcard pattern.
pub const WILDCARD: &str = "*";

/// Check that a string contains no wildcard characters.
#[inline(always)]
fn check_no_wildcards(value: &Ustr, key: &str) -> anyhow::Result<()> {
    if value.as_bytes().contains(&b'*') {
        anyhow::bail!("{key} `value` contained wildcard characters, was {value}");
    }
    Ok(())
}

#[inline(always)]
fn check_topic_shape(value: &str, key: &str) -> anyhow::Result<()> {
    check_valid_string(value, key)?;
    if value.len() > MAX_TOPIC_LEN {
        anyhow::bail!(
            "{key} `value` exceeded maximum length of {MAX_TOPIC_LEN}, was {} bytes",
            value.len()
        );
    }
    Ok(())
}

/// Marker for subscription patterns. Allows `*` segments.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pattern;

/// Marker for publish topics. No wildcards allowed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Topic;

/// A message bus string type parameterized by marker type.
///
/// - `MStr<Topic>` - concrete dot-separated identifier used on publish.
/// - `MStr<Pattern>` - topic-shaped string which may contain `*` segments,
///   used on subscribe.
///
/// Values are interned, so copies are pointer-sized and comparisons are cheap
/// on the publish hot path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MStr<T> {
    value: Ustr,
    #[serde(skip)]
    _marker: std::marker::PhantomData<T>,
}

impl<T> Display for MStr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T> Deref for MStr<T> {
    type Target = Ustr;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

impl<T> AsRef<str> for MStr<T> {
    fn as_ref(&self) -> &str {
        self.value.as_str()
    }
}

impl<T> MStr<T> {
    /// Returns the underlying interned string.
    #[must_use]
    pub const fn inner(&self) -> Ustr {
        self.value
    }
}

impl MStr<Pattern> {
    /// Create a new pattern from a string.
    ///
    /// Interning only; structural validation (segment shape, policy gating)
    /// happens at subscribe time.
    pub fn pattern<T: AsRef<str>>(value: T) -> Self {
        Self {
            value: Ustr::from(value.as_ref()),
            _marker: std::marker::PhantomData,
        }
    }

    /// Returns whether this pattern is the bare global wildcard `*`.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.value.as_str() == WILDCARD
    }
}

impl From<&str> for MStr<Pattern> {
    fn from(value: &str) -> Self {
        Self::pattern(value)
    }
}

impl From<String> for MStr<Pattern> {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<Ustr> for MStr<Pattern> {
    fn from(value: Ustr) -> Self {
        Self::pattern(value.as_str())
    }
}

impl From<MStr<Topic>> for MStr<Pattern> {
    fn from(value: MStr<Topic>) -> Self {
        Self {
            value: value.value,
            _marker: std::marker::PhantomData,
        }
    }
}

impl MStr<Topic> {
    /// Create a new topic from a fully qualified string.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is empty, all whitespace, longer than
    /// [`MAX_TOPIC_LEN`], or contains control or wildcard characters.
    pub fn topic<T: AsRef<str>>(value: T) -> anyhow::Result<Self> {
        let topic = Ustr::from(value.as_ref());
        check_topic_shape(value.as_ref(), stringify!(Topic))?;
        check_no_wildcards(&topic, stringify!(Topic))?;

        Ok(Self {
            value: topic,
            _marker: std::marker::PhantomData,
        })
    }

    /// Create a topic from an already-interned Ustr.
    ///
    /// # Errors
    ///
    /// Returns an error if the topic is empty, all whitespace, longer than
    /// [`MAX_TOPIC_LEN`], or contains control or wildcard characters.
    pub fn topic_from_ustr(value: Ustr) -> anyhow::Result<Self> {
        check_topic_shape(value.as_str(), stringify!(Topic))?;
        check_no_wildcards(&value, stringify!(Topic))?;

        Ok(Self {
            value,
            _marker: std::marker::PhantomData,
        })
    }
}

impl From<&str> for MStr<Topic> {
    fn from(value: &str) -> Self {
        Self::topic(value).expect(FAILED)
    }
}

impl From<String> for MStr<Topic> {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<Ustr> for MStr<Topic> {
    fn from(value: Ustr) -> Self {
        Self::topic_from_ustr(value).expect(FAILED)
    }
}
