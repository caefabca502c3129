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

//! The switchboard of built-in system topic names.

use std::sync::OnceLock;

use ustr::Ustr;

use super::mstr::{MStr, Topic};

/// Prefix shared by all bus-originated system topics.
pub const SYS_PREFIX: &str = "sys.";

static SYS_READY_TOPIC: OnceLock<MStr<Topic>> = OnceLock::new();
static SYS_ERROR_TOPIC: OnceLock<MStr<Topic>> = OnceLock::new();
static SYS_STATS_TOPIC: OnceLock<MStr<Topic>> = OnceLock::new();
static SYS_CLEAR_RETAINED_TOPIC: OnceLock<MStr<Topic>> = OnceLock::new();

/// The topic announcing bus readiness.
#[inline]
#[must_use]
pub fn sys_ready() -> MStr<Topic> {
    *SYS_READY_TOPIC.get_or_init(|| "sys.ready".into())
}

/// The topic carrying system errors.
#[inline]
#[must_use]
pub fn sys_error() -> MStr<Topic> {
    *SYS_ERROR_TOPIC.get_or_init(|| "sys.error".into())
}

/// The topic answering counter requests.
#[inline]
#[must_use]
pub fn sys_stats() -> MStr<Topic> {
    *SYS_STATS_TOPIC.get_or_init(|| "sys.stats".into())
}

/// The topic requesting retained-store clearing.
#[inline]
#[must_use]
pub fn sys_clear_retained() -> MStr<Topic> {
    *SYS_CLEAR_RETAINED_TOPIC.get_or_init(|| "sys.clear-retained".into())
}

/// Returns whether the topic is a bus-originated system topic.
#[must_use]
pub fn is_system_topic<T: AsRef<str>>(topic: T) -> bool {
    topic.as_ref().starts_with(SYS_PREFIX)
}

/// Derives the ephemeral reply topic for a client's correlated request.
#[must_use]
pub fn reply_topic(client_id: Ustr, correlation_id: &str) -> MStr<Topic> {
    MStr::<Topic>::topic(format!("reply.{client_id}.{correlation_id}"))
        .unwrap_or_else(|_| "reply.invalid".into())
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_system_topics() {
        assert_eq!(sys_ready().as_ref(), "sys.ready");
        assert_eq!(sys_error().as_ref(), "sys.error");
        assert_eq!(sys_stats().as_ref(), "sys.stats");
        assert_eq!(sys_clear_retained().as_ref(), "sys.clear-retained");
    }

    #[rstest]
    #[case("sys.ready", true)]
    #[case("sys.error", true)]
    #[case("users.created", false)]
    #[case("system.users", false)]
    fn test_is_system_topic(#[case] topic: &str, #[case] expected: bool) {
        assert_eq!(is_system_topic(topic), expected);
    }

    #[rstest]
    fn test_reply_topic_format() {
        let topic = reply_topic(Ustr::from("client-1"), "abc-123");
        assert_eq!(topic.as_ref(), "reply.client-1.abc-123");
    }
}
