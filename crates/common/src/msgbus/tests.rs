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

//! End-to-end message bus scenarios.
//!
//! Each test runs on its own thread and therefore its own thread-local bus.

use std::{cell::RefCell, rc::Rc};

use busbar_core::UnixMillis;
use rstest::rstest;
use serde_json::json;
use ustr::Ustr;

use crate::clock::Clock;

use super::{
    core::{BusConfig, BusState, MessageBus},
    envelope::Message,
    handler::ShareableHandler,
    stubs::{
        TEST_EPOCH_MS, get_call_check_handler, get_failing_handler, get_recording_handler,
        register_test_bus, register_test_bus_with,
    },
};
use crate::clock::{TestClock, advance_and_fire};

fn subscriber() -> Ustr {
    Ustr::from("subscriber-1")
}

fn publisher() -> Ustr {
    Ustr::from("publisher-1")
}

fn publish_from<T: AsRef<str>>(client_id: Ustr, topic: T, data: serde_json::Value) {
    let mut message = Message::new(topic, data);
    message.client_id = Some(client_id);
    super::publish(message);
}

#[rstest]
fn test_bare_publish_deliver() {
    let (_bus, _clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.created")], &handler, false);
    publish_from(publisher(), "users.created", json!({"id": 1}));

    let messages = recorder.messages();
    assert_eq!(messages.len(), 1);

    let delivered = &messages[0];
    assert_eq!(delivered.topic.as_str(), "users.created");
    assert_eq!(delivered.data, json!({"id": 1}));
    assert!(delivered.id.is_some());
    assert!(delivered.timestamp.unwrap() > UnixMillis::new(0));
}

#[rstest]
fn test_single_segment_wildcard() {
    let (_bus, _clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    publish_from(publisher(), "users.created", json!({}));
    publish_from(publisher(), "users.list.state", json!({}));

    assert_eq!(recorder.topics(), vec!["users.created"]);
}

#[rstest]
fn test_retained_late_subscriber() {
    let (_bus, _clock) = register_test_bus();

    let mut message = Message::retained("users.list.state", json!({"items": []}));
    message.client_id = Some(publisher());
    super::publish(message);

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(
        subscriber(),
        vec![Ustr::from("users.list.state")],
        &handler,
        true,
    );

    // Replay is synchronous: the delivery happened during subscribe
    let messages = recorder.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data, json!({"items": []}));

    // A subscriber which does not request retained replay receives nothing
    let (quiet_handler, quiet) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("subscriber-2"),
        vec![Ustr::from("users.list.state")],
        &quiet_handler,
        false,
    );
    assert_eq!(quiet.count(), 0);
}

#[rstest]
fn test_retained_idempotence() {
    let (bus, _clock) = register_test_bus();

    publish_retained("users.list.state", json!({"rev": 1}));
    publish_retained("users.list.state", json!({"rev": 2}));

    let retained = bus
        .borrow()
        .retained_message("users.list.state".into())
        .unwrap();
    assert_eq!(retained.data, json!({"rev": 2}));
    assert_eq!(super::stats().retained, 1);

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(
        subscriber(),
        vec![Ustr::from("users.list.state")],
        &handler,
        true,
    );
    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.messages()[0].data, json!({"rev": 2}));
}

fn publish_retained<T: AsRef<str>>(topic: T, data: serde_json::Value) {
    let mut message = Message::retained(topic, data);
    message.client_id = Some(publisher());
    super::publish(message);
}

#[rstest]
fn test_lru_eviction() {
    let (_bus, _clock) = register_test_bus_with(BusConfig {
        max_retained: 2,
        ..Default::default()
    });

    publish_retained("a", json!(1));
    publish_retained("b", json!(2));
    publish_retained("c", json!(3));

    let (evicted_handler, evicted) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("a")], &evicted_handler, true);
    assert_eq!(evicted.count(), 0);

    let (kept_handler, kept) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("subscriber-2"),
        vec![Ustr::from("b"), Ustr::from("c")],
        &kept_handler,
        true,
    );
    assert_eq!(kept.topics(), vec!["b", "c"]);

    let stats = super::stats();
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.retained, 2);
}

#[rstest]
fn test_fanout_in_subscription_order() {
    let (_bus, _clock) = register_test_bus();
    let order = Rc::new(RefCell::new(Vec::new()));

    let order_a = order.clone();
    let handler_a = ShareableHandler::from_fn_with_id("a", move |_| order_a.borrow_mut().push("a"));
    let order_b = order.clone();
    let handler_b = ShareableHandler::from_fn_with_id("b", move |_| order_b.borrow_mut().push("b"));
    let order_c = order.clone();
    let handler_c = ShareableHandler::from_fn_with_id("c", move |_| order_c.borrow_mut().push("c"));

    // Interleave clients to show ordering follows subscription, not client
    super::subscribe(Ustr::from("client-1"), vec![Ustr::from("users.*")], &handler_a, false);
    super::subscribe(Ustr::from("client-2"), vec![Ustr::from("users.created")], &handler_b, false);
    super::subscribe(Ustr::from("client-1"), vec![Ustr::from("*")], &handler_c, false);

    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(*order.borrow(), vec!["a", "b", "c"]);
}

#[rstest]
fn test_same_publisher_ordering() {
    let (_bus, _clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    publish_from(publisher(), "users.created", json!({"seq": 1}));
    publish_from(publisher(), "users.deleted", json!({"seq": 2}));

    let data: Vec<_> = recorder.messages().iter().map(|m| m.data.clone()).collect();
    assert_eq!(data, vec![json!({"seq": 1}), json!({"seq": 2})]);
}

#[rstest]
fn test_unsubscribe_is_synchronous() {
    let (bus, _clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    publish_from(publisher(), "users.created", json!({}));

    super::unsubscribe(subscriber(), vec![Ustr::from("users.*")]);
    assert!(!bus.borrow().is_subscribed(subscriber(), "users.*"));

    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(recorder.count(), 1);
}

#[rstest]
fn test_duplicate_subscription_ignored() {
    let (_bus, _clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);

    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(recorder.count(), 1);
    assert_eq!(super::subscriptions_count("users.created"), 1);
}

#[rstest]
fn test_request_reply_round_trip() {
    let (_bus, _clock) = register_test_bus();

    // Responder replies from within delivery (re-entrant publish)
    let responder = ShareableHandler::from_fn(|request: &Message| {
        if let Some(reply) = request.reply(json!({"name": "Alice"})) {
            super::reply(reply);
        }
    });
    super::subscribe(
        Ustr::from("responder"),
        vec![Ustr::from("users.get")],
        &responder,
        false,
    );

    let (reply_handler, replies) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("caller"),
        vec![Ustr::from("reply.caller.c1")],
        &reply_handler,
        false,
    );

    let mut request = Message::new("users.get", json!({"id": 1}));
    request.reply_to = Some(Ustr::from("reply.caller.c1"));
    request.correlation_id = Some(Ustr::from("c1"));
    request.client_id = Some(Ustr::from("caller"));
    super::request(request);

    let messages = replies.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data, json!({"name": "Alice"}));
    assert_eq!(messages[0].correlation_id, Some(Ustr::from("c1")));
}

#[rstest]
fn test_invalid_topic_emits_sys_error() {
    let (_bus, _clock) = register_test_bus();
    let (error_handler, errors) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("sys-watch"),
        vec![Ustr::from("sys.error")],
        &error_handler,
        false,
    );

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("*")], &handler, false);

    publish_from(publisher(), "users.*", json!({}));

    // No subscriber observed the invalid message
    let delivered_topics = recorder.topics();
    assert_eq!(delivered_topics, vec!["sys.error"]);

    assert_eq!(errors.count(), 1);
    assert_eq!(errors.messages()[0].data["code"], json!("TOPIC_INVALID"));
    assert_eq!(super::stats().dropped, 1);
}

#[rstest]
fn test_oversize_payload_dropped() {
    let (_bus, _clock) = register_test_bus_with(BusConfig {
        max_payload_size: 32,
        ..Default::default()
    });
    let (error_handler, errors) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("sys-watch"),
        vec![Ustr::from("sys.error")],
        &error_handler,
        false,
    );

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("users.created")], &handler, false);

    publish_from(publisher(), "users.created", json!({"blob": "x".repeat(64)}));

    assert_eq!(recorder.count(), 0);
    assert_eq!(errors.messages()[0].data["code"], json!("PAYLOAD_TOO_LARGE"));
}

#[rstest]
fn test_oversize_message_dropped() {
    let (_bus, _clock) = register_test_bus_with(BusConfig {
        max_payload_size: 4_096,
        max_message_size: 256,
        ..Default::default()
    });
    let (error_handler, errors) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("sys-watch"),
        vec![Ustr::from("sys.error")],
        &error_handler,
        false,
    );

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("users.created")], &handler, false);

    publish_from(publisher(), "users.created", json!({"blob": "x".repeat(512)}));

    assert_eq!(recorder.count(), 0);
    assert_eq!(errors.messages()[0].data["code"], json!("MESSAGE_TOO_LARGE"));
    assert_eq!(super::stats().retained, 0);
}

#[rstest]
fn test_rate_limit_drops_excess() {
    let (_bus, _clock) = register_test_bus_with(BusConfig {
        rate_limit: 2,
        ..Default::default()
    });
    let (error_handler, errors) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("sys-watch"),
        vec![Ustr::from("sys.error")],
        &error_handler,
        false,
    );

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);

    for i in 0..3 {
        publish_from(publisher(), "users.created", json!({"seq": i}));
    }

    assert_eq!(recorder.count(), 2);
    assert_eq!(errors.count(), 1);
    assert_eq!(
        errors.messages()[0].data["code"],
        json!("RATE_LIMIT_EXCEEDED")
    );

    // A different client is unaffected
    publish_from(Ustr::from("publisher-2"), "users.created", json!({}));
    assert_eq!(recorder.count(), 3);
}

#[rstest]
fn test_global_wildcard_policy() {
    let (bus, _clock) = register_test_bus_with(BusConfig {
        allow_global_wildcard: false,
        ..Default::default()
    });

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("*")], &handler, false);
    assert!(!bus.borrow().is_subscribed(subscriber(), "*"));

    // Segment wildcards remain allowed
    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    assert!(bus.borrow().is_subscribed(subscriber(), "users.*"));

    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(recorder.count(), 1);
}

#[rstest]
fn test_handler_failure_is_isolated() {
    let (bus, _clock) = register_test_bus();
    let failing = get_failing_handler(Some(Ustr::from("failing")));
    super::subscribe(Ustr::from("client-1"), vec![Ustr::from("users.*")], &failing, false);

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(Ustr::from("client-2"), vec![Ustr::from("users.*")], &handler, false);

    let (error_handler, errors) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("sys-watch"),
        vec![Ustr::from("sys.error")],
        &error_handler,
        false,
    );

    publish_from(publisher(), "users.created", json!({}));

    // Fanout continued past the failing subscriber
    assert_eq!(recorder.count(), 1);
    assert_eq!(errors.messages()[0].data["code"], json!("DELIVERY_FAILED"));
    // The failing subscription stays until its owner goes away
    assert!(bus.borrow().is_subscribed(Ustr::from("client-1"), "users.*"));
}

#[rstest]
fn test_dead_owner_skipped_then_swept() {
    let (bus, clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);

    drop(handler);
    drop(recorder);

    // Dead owner receives nothing even before the sweep
    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(super::stats().delivered, 0);
    assert_eq!(super::stats().subscriptions, 1);

    // The periodic sweep reaps the dead entry
    let interval = bus.borrow().config().cleanup_interval_ms;
    let now = clock.borrow().timestamp_ms();
    advance_and_fire(&clock, now + interval);

    let stats = super::stats();
    assert_eq!(stats.subscriptions, 0);
    assert_eq!(stats.swept, 1);
}

#[rstest]
fn test_clear_retained_with_pattern() {
    let (_bus, _clock) = register_test_bus();

    publish_retained("users.item.1", json!(1));
    publish_retained("users.item.2", json!(2));
    publish_retained("orders.item.1", json!(3));

    super::clear_retained(Some(Ustr::from("users.*.*")));
    assert_eq!(super::stats().retained, 1);

    super::clear_retained(None);
    assert_eq!(super::stats().retained, 0);
}

#[rstest]
fn test_clear_retained_via_system_topic() {
    let (_bus, _clock) = register_test_bus();

    publish_retained("users.item.1", json!(1));
    publish_retained("orders.item.1", json!(2));

    publish_from(
        publisher(),
        "sys.clear-retained",
        json!({"pattern": "users.*.*"}),
    );
    assert_eq!(super::stats().retained, 1);
}

#[rstest]
fn test_stats_request_reply() {
    let (_bus, _clock) = register_test_bus();
    super::hello(Ustr::from("client-1"), vec!["tables".to_string()]);

    let (reply_handler, replies) = get_recording_handler(None);
    super::subscribe(
        Ustr::from("client-1"),
        vec![Ustr::from("reply.client-1.s1")],
        &reply_handler,
        false,
    );

    // A stats request is an ordinary request on the sys.stats topic; the
    // bus answers on its reply topic
    let mut request = Message::new("sys.stats", json!({}));
    request.reply_to = Some(Ustr::from("reply.client-1.s1"));
    request.correlation_id = Some(Ustr::from("s1"));
    request.client_id = Some(Ustr::from("client-1"));
    super::request(request);

    let messages = replies.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].correlation_id, Some(Ustr::from("s1")));
    assert_eq!(messages[0].data["clients"], json!(1));
    assert_eq!(messages[0].data["subscriptions"], json!(1));
    assert!(messages[0].data["published"].as_u64().unwrap() >= 1);
}

#[rstest]
fn test_publish_before_ready_dropped_silently() {
    let clock = Rc::new(RefCell::new(TestClock::new()));
    clock.borrow_mut().set_time(UnixMillis::new(TEST_EPOCH_MS));
    let bus = MessageBus::new(BusConfig::default(), clock.clone()).register_message_bus();
    assert_eq!(bus.borrow().state(), BusState::Uninitialized);

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);

    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(recorder.count(), 0);
    assert_eq!(super::stats().dropped, 1);

    // After start the same publish succeeds
    super::start();
    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(recorder.count(), 1);
}

#[rstest]
fn test_sys_ready_announced_on_start() {
    let clock = Rc::new(RefCell::new(TestClock::new()));
    clock.borrow_mut().set_time(UnixMillis::new(TEST_EPOCH_MS));
    let _bus = MessageBus::new(BusConfig::default(), clock.clone()).register_message_bus();

    let (handler, recorder) = get_recording_handler(None);
    super::subscribe(subscriber(), vec![Ustr::from("sys.ready")], &handler, false);

    super::start();

    let messages = recorder.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].data["enhanced"], json!(true));
    assert_eq!(messages[0].data["config"]["maxRetained"], json!(1_000));
}

#[rstest]
fn test_nested_publish_completes_before_outer_resumes() {
    let (_bus, _clock) = register_test_bus();
    let order = Rc::new(RefCell::new(Vec::new()));

    let order_nested = order.clone();
    let nested_record = ShareableHandler::from_fn_with_id("nested-record", move |_| {
        order_nested.borrow_mut().push("nested");
    });
    super::subscribe(
        Ustr::from("client-n"),
        vec![Ustr::from("nested.topic")],
        &nested_record,
        false,
    );

    // First subscriber publishes a nested message during delivery
    let publisher_id = publisher();
    let nested_publisher = ShareableHandler::from_fn_with_id("outer-a", move |_| {
        let mut nested = Message::new("nested.topic", json!({}));
        nested.client_id = Some(publisher_id);
        super::publish(nested);
    });
    super::subscribe(
        Ustr::from("client-1"),
        vec![Ustr::from("outer.topic")],
        &nested_publisher,
        false,
    );

    let order_outer = order.clone();
    let outer_b = ShareableHandler::from_fn_with_id("outer-b", move |_| {
        order_outer.borrow_mut().push("outer-b");
    });
    super::subscribe(
        Ustr::from("client-2"),
        vec![Ustr::from("outer.topic")],
        &outer_b,
        false,
    );

    publish_from(publisher(), "outer.topic", json!({}));

    // The nested fanout ran to completion before the outer fanout resumed
    assert_eq!(*order.borrow(), vec!["nested", "outer-b"]);
}

#[rstest]
fn test_release_client_removes_everything() {
    let (bus, _clock) = register_test_bus();
    let (handler, recorder) = get_recording_handler(None);

    super::hello(subscriber(), vec![]);
    super::subscribe(
        subscriber(),
        vec![Ustr::from("users.*"), Ustr::from("orders.*")],
        &handler,
        false,
    );
    assert_eq!(super::stats().subscriptions, 2);
    assert_eq!(super::stats().clients, 1);

    super::release_client(subscriber());

    let stats = super::stats();
    assert_eq!(stats.subscriptions, 0);
    assert_eq!(stats.clients, 0);
    assert!(bus.borrow().patterns().is_empty());

    publish_from(publisher(), "users.created", json!({}));
    assert_eq!(recorder.count(), 0);
}

#[rstest]
fn test_counters_track_activity() {
    let (_bus, _clock) = register_test_bus();
    let (handler, _recorder) = get_recording_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    publish_from(publisher(), "users.created", json!({}));
    publish_from(publisher(), "users.deleted", json!({}));

    let stats = super::stats();
    // sys.ready plus the two publishes
    assert_eq!(stats.published, 3);
    assert_eq!(stats.delivered, 2);
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.errors, 0);
}

#[rstest]
fn test_call_check_handler_stub() {
    let (_bus, _clock) = register_test_bus();
    let (handler, checker) = get_call_check_handler(None);

    super::subscribe(subscriber(), vec![Ustr::from("users.*")], &handler, false);
    assert!(!checker.was_called());

    publish_from(publisher(), "users.created", json!({}));
    assert!(checker.was_called());
}
