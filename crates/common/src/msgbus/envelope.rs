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

//! The bus message and the tagged ingress envelope.

use busbar_core::{UUID4, UnixMillis};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ustr::Ustr;

use super::handler::WeakHandler;

/// The unit of bus traffic.
///
/// Payloads are structured values (`serde_json::Value`), which gives the
/// structured-copy guarantee by construction: no functions, no host handles,
/// no cycles. `id` and `timestamp` are assigned by the bus on ingress when
/// absent; every delivered message carries both.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// The concrete dot-separated topic the message is published on.
    pub topic: Ustr,
    /// The structured payload.
    pub data: Value,
    /// Unique message identifier, bus-assigned on ingress if absent.
    #[serde(default)]
    pub id: Option<UUID4>,
    /// Milliseconds since epoch, bus-assigned on ingress if absent.
    #[serde(default)]
    pub timestamp: Option<UnixMillis>,
    /// Whether the message becomes the retained value for its topic.
    #[serde(default)]
    pub retain: bool,
    /// Reply topic; marks the message as a request.
    #[serde(default)]
    pub reply_to: Option<Ustr>,
    /// Opaque correlation identifier, echoed on replies.
    #[serde(default)]
    pub correlation_id: Option<Ustr>,
    /// Optional string metadata.
    #[serde(default)]
    pub headers: Option<IndexMap<String, String>>,
    /// The logical client the message originated from; the rate limiter's
    /// accounting key. Absent on bus-originated traffic.
    #[serde(default)]
    pub client_id: Option<Ustr>,
}

impl Message {
    /// Creates a new [`Message`] instance with the given topic and payload.
    #[must_use]
    pub fn new<T: AsRef<str>>(topic: T, data: Value) -> Self {
        Self {
            topic: Ustr::from(topic.as_ref()),
            data,
            id: None,
            timestamp: None,
            retain: false,
            reply_to: None,
            correlation_id: None,
            headers: None,
            client_id: None,
        }
    }

    /// Creates a retained [`Message`] instance with the given topic and payload.
    #[must_use]
    pub fn retained<T: AsRef<str>>(topic: T, data: Value) -> Self {
        let mut msg = Self::new(topic, data);
        msg.retain = true;
        msg
    }

    /// Returns whether the message expects a reply.
    #[must_use]
    pub const fn is_request(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Creates the reply to this message with the given payload.
    ///
    /// Targets the request's reply topic and echoes its correlation id.
    /// Returns `None` when the message carries no reply topic.
    #[must_use]
    pub fn reply(&self, data: Value) -> Option<Self> {
        let reply_to = self.reply_to?;
        let mut msg = Self::new(reply_to, data);
        msg.correlation_id = self.correlation_id;
        Some(msg)
    }
}

/// Distinguishes the message-bearing ingress operations for routing and logs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    Publish,
    Request,
    Reply,
}

/// A subscribe operation: patterns plus the weakly-held delivery handler.
///
/// The bus never keeps a subscriber alive; the owning client holds the strong
/// handler reference and the periodic sweep reaps subscriptions whose owner
/// has gone away.
#[derive(Clone, Debug)]
pub struct SubscribeRequest {
    /// The logical client subscribing.
    pub client_id: Ustr,
    /// The patterns to subscribe, validated by the bus.
    pub patterns: Vec<Ustr>,
    /// Whether matching retained entries are delivered at subscribe time.
    pub retained: bool,
    /// The delivery handler, weakly held.
    pub handler: WeakHandler,
}

/// The tagged ingress envelope: every operation a client can address to the
/// bus is one variant, and the router is a dispatch over the tag.
///
/// Counter and clear requests travel as ordinary [`Envelope::Request`] /
/// [`Envelope::Publish`] messages on the `sys.stats` and `sys.clear-retained`
/// topics; the router answers them off the topic after normal fanout.
#[derive(Clone, Debug)]
pub enum Envelope {
    /// Publish a message to its topic.
    Publish(Message),
    /// Publish a message which expects a reply on `reply_to`.
    Request(Message),
    /// Publish a reply targeting a request's reply topic.
    Reply(Message),
    /// Record subscriptions for a client.
    Subscribe(SubscribeRequest),
    /// Remove `(client_id, pattern)` subscriptions.
    Unsubscribe { client_id: Ustr, patterns: Vec<Ustr> },
    /// Register a client in the directory.
    Hello {
        client_id: Ustr,
        capabilities: Vec<String>,
    },
    /// Remove retained entries matching the pattern, or all if absent.
    ClearRetained { pattern: Option<Ustr> },
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn test_new_message_defaults() {
        let msg = Message::new("users.created", json!({"id": 1}));

        assert_eq!(msg.topic.as_str(), "users.created");
        assert_eq!(msg.data, json!({"id": 1}));
        assert!(msg.id.is_none());
        assert!(msg.timestamp.is_none());
        assert!(!msg.retain);
        assert!(!msg.is_request());
    }

    #[rstest]
    fn test_retained_constructor() {
        let msg = Message::retained("users.list.state", json!({"items": []}));
        assert!(msg.retain);
    }

    #[rstest]
    fn test_reply_echoes_correlation() {
        let mut request = Message::new("users.get", json!({"id": 1}));
        request.reply_to = Some(Ustr::from("reply.client-1.abc"));
        request.correlation_id = Some(Ustr::from("abc"));

        let reply = request.reply(json!({"name": "Alice"})).unwrap();
        assert_eq!(reply.topic.as_str(), "reply.client-1.abc");
        assert_eq!(reply.correlation_id, Some(Ustr::from("abc")));
        assert!(!reply.retain);
    }

    #[rstest]
    fn test_reply_without_reply_to() {
        let msg = Message::new("users.created", json!({}));
        assert!(msg.reply(json!({})).is_none());
    }

    #[rstest]
    fn test_serde_round_trip() {
        let mut msg = Message::new("users.created", json!({"id": 1}));
        msg.id = Some(UUID4::new());
        msg.timestamp = Some(UnixMillis::new(1_700_000_000_000));
        msg.headers = Some(IndexMap::from([("source".to_string(), "test".to_string())]));

        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }
}
