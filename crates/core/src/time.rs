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

//! A `UnixMillis` timestamp: milliseconds since the UNIX epoch.
//!
//! Milliseconds are the wire contract's time unit; every message timestamp and
//! every clock deadline in the workspace uses this type.

use std::{
    fmt::Display,
    ops::{Add, AddAssign, Sub},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a timestamp in milliseconds since the UNIX epoch.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UnixMillis(u64);

impl UnixMillis {
    /// Creates a new [`UnixMillis`] instance from the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying value as `u64`.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the milliseconds elapsed since `earlier`, or zero if `earlier`
    /// is in the future.
    #[must_use]
    pub const fn millis_since(&self, earlier: Self) -> u64 {
        self.0.saturating_sub(earlier.0)
    }

    /// Returns the timestamp saturating-subtracted by `millis`.
    #[must_use]
    pub const fn saturating_sub_millis(&self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Converts the timestamp to a `chrono` UTC datetime.
    ///
    /// Returns `None` if the value is out of the representable range.
    #[must_use]
    pub fn to_datetime_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(i64::try_from(self.0).ok()?)
    }
}

impl From<u64> for UnixMillis {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<UnixMillis> for u64 {
    fn from(value: UnixMillis) -> Self {
        value.0
    }
}

impl From<DateTime<Utc>> for UnixMillis {
    fn from(value: DateTime<Utc>) -> Self {
        Self(u64::try_from(value.timestamp_millis()).unwrap_or_default())
    }
}

impl Add<u64> for UnixMillis {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for UnixMillis {
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl Sub for UnixMillis {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl Display for UnixMillis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<u64> for UnixMillis {
    fn eq(&self, other: &u64) -> bool {
        self.0 == *other
    }
}
