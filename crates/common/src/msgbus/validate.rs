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

//! Stateless validation for topics, patterns, and messages.
//!
//! Every failure carries a stable wire code; the offending operation is
//! dropped by the router and a single `sys.error` is emitted, with no side
//! effects (no retained write, no subscription created).

use busbar_core::correctness::check_valid_string;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use thiserror::Error;
use ustr::Ustr;

use super::{
    BusConfig,
    envelope::Message,
    mstr::{MAX_TOPIC_LEN, MStr, Pattern, Topic, WILDCARD},
};

/// Stable error codes surfaced on `sys.error`.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MessageInvalid,
    TopicInvalid,
    SubscriptionInvalid,
    MessageTooLarge,
    PayloadTooLarge,
    RateLimitExceeded,
    DeliveryFailed,
}

/// A bus-level error with a stable wire code.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BusError {
    /// The stable wire code.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl BusError {
    /// Creates a new [`BusError`] instance.
    #[must_use]
    pub fn new<S: Into<String>>(code: ErrorCode, message: S) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Validates a concrete publish topic.
///
/// # Errors
///
/// Returns a `TOPIC_INVALID` error if the topic is empty, overlength, or
/// contains control or wildcard characters.
pub fn validate_topic(topic: Ustr) -> Result<MStr<Topic>, BusError> {
    MStr::<Topic>::topic_from_ustr(topic)
        .map_err(|e| BusError::new(ErrorCode::TopicInvalid, e.to_string()))
}

/// Validates a subscription pattern.
///
/// The bare `*` is gated by `allow_global_wildcard`; a `*` inside a segment
/// (`us*rs`) is rejected - wildcards match whole segments only.
///
/// # Errors
///
/// Returns a `SUBSCRIPTION_INVALID` error if the pattern is malformed or the
/// global wildcard is disallowed by policy.
pub fn validate_pattern(
    pattern: Ustr,
    allow_global_wildcard: bool,
) -> Result<MStr<Pattern>, BusError> {
    let invalid = |message: String| BusError::new(ErrorCode::SubscriptionInvalid, message);

    check_valid_string(pattern.as_str(), stringify!(Pattern)).map_err(|e| invalid(e.to_string()))?;

    if pattern.len() > MAX_TOPIC_LEN {
        return Err(invalid(format!(
            "pattern exceeded maximum length of {MAX_TOPIC_LEN}, was {} bytes",
            pattern.len()
        )));
    }

    let pattern = MStr::<Pattern>::pattern(pattern.as_str());

    if pattern.is_global() {
        if !allow_global_wildcard {
            return Err(invalid(
                "global wildcard '*' disallowed by policy".to_string(),
            ));
        }
        return Ok(pattern);
    }

    for segment in pattern.as_ref().split('.') {
        if segment.contains('*') && segment != WILDCARD {
            return Err(invalid(format!(
                "wildcards match whole segments only, was '{pattern}'"
            )));
        }
    }

    Ok(pattern)
}

/// Checks the value is encodable under structured-value semantics and returns
/// its encoded size in bytes.
///
/// # Errors
///
/// Returns a `MESSAGE_INVALID` error if the value cannot be encoded.
pub fn check_serializable(value: &Value) -> Result<usize, BusError> {
    serde_json::to_vec(value)
        .map(|encoded| encoded.len())
        .map_err(|e| {
            BusError::new(
                ErrorCode::MessageInvalid,
                format!("payload not serializable: {e}"),
            )
        })
}

/// Returns an encoded-size upper bound for the value.
#[must_use]
pub fn estimate_size(value: &Value) -> usize {
    check_serializable(value).unwrap_or(usize::MAX)
}

/// Returns an encoded-size upper bound for the whole message.
#[must_use]
pub fn estimate_message_size(message: &Message) -> usize {
    serde_json::to_vec(message).map_or(usize::MAX, |encoded| encoded.len())
}

/// Validates a message against the topic rules and the configured size limits.
///
/// # Errors
///
/// Returns the first failing check as a coded [`BusError`].
pub fn validate_message(message: &Message, config: &BusConfig) -> Result<MStr<Topic>, BusError> {
    let topic = validate_topic(message.topic)?;

    if let Some(reply_to) = message.reply_to {
        validate_topic(reply_to).map_err(|e| {
            BusError::new(
                ErrorCode::MessageInvalid,
                format!("invalid reply topic: {}", e.message),
            )
        })?;
    }

    let payload_size = check_serializable(&message.data)?;
    if payload_size > config.max_payload_size {
        return Err(BusError::new(
            ErrorCode::PayloadTooLarge,
            format!(
                "payload size {payload_size} exceeded limit {}",
                config.max_payload_size
            ),
        ));
    }

    let message_size = estimate_message_size(message);
    if message_size > config.max_message_size {
        return Err(BusError::new(
            ErrorCode::MessageTooLarge,
            format!(
                "message size {message_size} exceeded limit {}",
                config.max_message_size
            ),
        ));
    }

    Ok(topic)
}
