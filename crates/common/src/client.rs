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

//! The per-component client facade.
//!
//! A [`BusClient`] hides the raw envelope from its hosting component: it
//! carries a stable generated client id, defers every operation until the bus
//! announces readiness, tracks the strong handler references its
//! subscriptions depend on (the bus holds only weak ones), correlates
//! request/reply exchanges with clock-driven timeouts, and tears everything
//! down on disposal.
//!
//! Completion surfaces are continuation callbacks, resolved synchronously by
//! bus events and clock alerts - the cooperative single-threaded model has no
//! executor to park a future on.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    fmt::Debug,
    rc::{Rc, Weak},
};

use ahash::AHashMap;
use busbar_core::UUID4;
use serde_json::Value;
use thiserror::Error;
use ustr::Ustr;

use crate::{
    msgbus::{self, Message, ShareableHandler, is_matching_str, switchboard},
    timer::TimeEventCallback,
};

/// Options for [`BusClient::subscribe`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Whether matching retained entries are delivered at subscribe time.
    pub retained: bool,
    /// External signal which, when tripped, cancels the subscription.
    pub cancel: Option<CancelToken>,
}

impl SubscribeOptions {
    /// Options requesting retained replay.
    #[must_use]
    pub fn retained() -> Self {
        Self {
            retained: true,
            cancel: None,
        }
    }
}

/// Options for [`BusClient::request`].
#[derive(Clone, Debug)]
pub struct RequestOptions {
    /// How long to wait for the reply before failing with a timeout.
    pub timeout_ms: u64,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self { timeout_ms: 5_000 }
    }
}

/// Failure modes for a correlated request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No matching reply arrived before the deadline.
    #[error("request on '{topic}' timed out after {timeout_ms} ms")]
    Timeout { topic: Ustr, timeout_ms: u64 },
    /// The client was disposed while the request was pending.
    #[error("client disposed while request pending")]
    Disposed,
}

/// Continuation invoked with the reply or the failure.
pub type ReplyCallback = Box<dyn FnOnce(Result<Message, RequestError>)>;

/// An external cancellation handle for subscriptions.
///
/// Tripping the token cancels every subscription it was passed to; further
/// trips are no-ops.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Rc<RefCell<CancelInner>>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: bool,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

impl CancelToken {
    /// Creates a new untripped [`CancelToken`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether the token has been tripped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.borrow().cancelled
    }

    /// Trips the token, running every registered cancellation.
    pub fn cancel(&self) {
        let callbacks = {
            let mut inner = self.inner.borrow_mut();
            if inner.cancelled {
                return;
            }
            inner.cancelled = true;
            std::mem::take(&mut inner.callbacks)
        };
        for callback in callbacks {
            callback();
        }
    }

    fn on_cancel(&self, callback: Box<dyn FnOnce()>) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.cancelled {
                inner.callbacks.push(callback);
                return;
            }
        }
        // Already tripped: cancel immediately
        callback();
    }
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(CancelToken))
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancels a subscription created through a [`BusClient`].
///
/// Cancellation is synchronous: on return the subscription is out of the
/// routing table and no further deliveries occur.
#[derive(Clone)]
pub struct SubscriptionGuard {
    inner: Weak<RefCell<ClientInner>>,
    patterns: Vec<Ustr>,
    handler_id: Ustr,
    active: Rc<Cell<bool>>,
}

impl SubscriptionGuard {
    /// Returns whether the subscription is still active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    /// Cancels the subscription; repeated calls are no-ops.
    pub fn cancel(&self) {
        if !self.active.replace(false) {
            return;
        }
        let Some(inner_rc) = self.inner.upgrade() else {
            return;
        };

        let client_id = {
            let mut inner = inner_rc.borrow_mut();
            inner
                .subscriptions
                .retain(|handler| handler.id() != self.handler_id);
            inner.deferred.retain(|op| {
                !matches!(op, DeferredOp::Subscribe { handler, .. } if handler.id() == self.handler_id)
            });
            inner.client_id
        };

        msgbus::unsubscribe(client_id, self.patterns.clone());
    }
}

impl Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(SubscriptionGuard))
            .field("handler_id", &self.handler_id)
            .field("active", &self.active.get())
            .finish()
    }
}

enum DeferredOp {
    Publish(Message),
    Subscribe {
        patterns: Vec<Ustr>,
        handler: ShareableHandler,
        retained: bool,
    },
    Request {
        topic: Ustr,
        data: Value,
        options: RequestOptions,
        callback: ReplyCallback,
    },
}


struct PendingRequest {
    reply_topic: Ustr,
    timer_name: String,
    // Keeps the ephemeral reply subscription alive
    #[allow(dead_code)]
    handler: ShareableHandler,
    callback: ReplyCallback,
}

struct ClientInner {
    client_id: Ustr,
    capabilities: Vec<String>,
    ready: bool,
    disposed: bool,
    ready_handler: Option<ShareableHandler>,
    ready_waiters: Vec<Box<dyn FnOnce()>>,
    deferred: VecDeque<DeferredOp>,
    // Strong handler references keeping bus subscriptions alive
    subscriptions: Vec<ShareableHandler>,
    pending: AHashMap<Ustr, PendingRequest>,
}

impl ClientInner {
    fn on_bus_ready(inner_rc: &Rc<RefCell<Self>>) {
        let (client_id, capabilities, deferred, waiters, had_watch) = {
            let mut inner = inner_rc.borrow_mut();
            if inner.ready || inner.disposed {
                return;
            }
            inner.ready = true;
            (
                inner.client_id,
                inner.capabilities.clone(),
                std::mem::take(&mut inner.deferred),
                std::mem::take(&mut inner.ready_waiters),
                inner.ready_handler.take().is_some(),
            )
        };

        if had_watch {
            msgbus::unsubscribe(client_id, vec![Ustr::from("sys.ready")]);
        }
        msgbus::hello(client_id, capabilities);

        for op in deferred {
            match op {
                DeferredOp::Publish(message) => msgbus::publish(message),
                DeferredOp::Subscribe {
                    patterns,
                    handler,
                    retained,
                } => msgbus::subscribe(client_id, patterns, &handler, retained),
                DeferredOp::Request {
                    topic,
                    data,
                    options,
                    callback,
                } => BusClient::start_request(inner_rc, topic, data, &options, callback),
            }
        }
        for waiter in waiters {
            waiter();
        }
    }

    /// Settles a pending request; late or mismatched settlements are no-ops.
    fn resolve(
        inner_rc: &Rc<RefCell<Self>>,
        correlation_id: Ustr,
        result: Result<Message, RequestError>,
    ) {
        let (client_id, pending) = {
            let mut inner = inner_rc.borrow_mut();
            let Some(pending) = inner.pending.remove(&correlation_id) else {
                return;
            };
            (inner.client_id, pending)
        };

        msgbus::unsubscribe(client_id, vec![pending.reply_topic]);
        msgbus::clock().borrow_mut().cancel_timer(&pending.timer_name);
        (pending.callback)(result);
    }

    fn dispose(inner_rc: &Rc<RefCell<Self>>) {
        let (client_id, subscriptions, pending, deferred) = {
            let mut inner = inner_rc.borrow_mut();
            if inner.disposed {
                return;
            }
            inner.disposed = true;
            inner.ready_handler = None;
            inner.ready_waiters.clear();
            (
                inner.client_id,
                std::mem::take(&mut inner.subscriptions),
                std::mem::take(&mut inner.pending),
                std::mem::take(&mut inner.deferred),
            )
        };

        // Requests which never left the deferral queue still settle
        for op in deferred {
            if let DeferredOp::Request { callback, .. } = op {
                callback(Err(RequestError::Disposed));
            }
        }

        let clock = msgbus::clock();
        for (_, request) in pending {
            clock.borrow_mut().cancel_timer(&request.timer_name);
            msgbus::unsubscribe(client_id, vec![request.reply_topic]);
            (request.callback)(Err(RequestError::Disposed));
        }

        // Releases the strong handler references
        drop(subscriptions);
        msgbus::release_client(client_id);
        log::debug!("Client '{client_id}' disposed");
    }
}

/// The per-component bus facade.
///
/// Every operation implicitly awaits bus readiness: anything invoked before
/// `sys.ready` is queued and flushed in order once the bus announces itself.
pub struct BusClient {
    inner: Rc<RefCell<ClientInner>>,
}

impl BusClient {
    /// Creates a new [`BusClient`] with a generated stable client id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capabilities(Vec::new())
    }

    /// Creates a new [`BusClient`] announcing the given capabilities.
    #[must_use]
    pub fn with_capabilities(capabilities: Vec<String>) -> Self {
        let client_id = Ustr::from(&format!("client-{}", UUID4::new()));
        let inner = Rc::new(RefCell::new(ClientInner {
            client_id,
            capabilities,
            ready: false,
            disposed: false,
            ready_handler: None,
            ready_waiters: Vec::new(),
            deferred: VecDeque::new(),
            subscriptions: Vec::new(),
            pending: AHashMap::new(),
        }));

        if msgbus::is_ready() {
            ClientInner::on_bus_ready(&inner);
        } else {
            let weak = Rc::downgrade(&inner);
            let handler =
                ShareableHandler::from_fn_with_id(format!("{client_id}.ready"), move |_| {
                    if let Some(inner) = weak.upgrade() {
                        ClientInner::on_bus_ready(&inner);
                    }
                });
            msgbus::subscribe(client_id, vec![Ustr::from("sys.ready")], &handler, false);
            inner.borrow_mut().ready_handler = Some(handler);
        }

        Self { inner }
    }

    /// Returns the stable client id.
    #[must_use]
    pub fn client_id(&self) -> Ustr {
        self.inner.borrow().client_id
    }

    /// Returns whether the bus has announced readiness to this client.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.inner.borrow().ready
    }

    /// Returns whether the client has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.borrow().disposed
    }

    /// Invokes the callback once the bus is ready; immediately if it already
    /// is. Safe to call any number of times.
    pub fn ready<F: FnOnce() + 'static>(&self, callback: F) {
        let mut inner = self.inner.borrow_mut();
        if inner.ready {
            drop(inner);
            callback();
        } else {
            inner.ready_waiters.push(Box::new(callback));
        }
    }

    /// Publishes a message on the topic. Fire-and-forget.
    pub fn publish<T: AsRef<str>>(&self, topic: T, data: Value) {
        self.publish_message(Message::new(topic, data));
    }

    /// Publishes a fully-formed message (retain flag, headers, ...).
    ///
    /// The message is enriched with this client's id before it reaches the
    /// bus.
    pub fn publish_message(&self, mut message: Message) {
        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            log::warn!("Publish on disposed client '{}'", inner.client_id);
            return;
        }
        message.client_id = Some(inner.client_id);

        if inner.ready {
            drop(inner);
            msgbus::publish(message);
        } else {
            inner.deferred.push_back(DeferredOp::Publish(message));
        }
    }

    /// Publishes the reply to a request message, echoing its correlation id.
    pub fn reply(&self, request: &Message, data: Value) {
        let Some(mut reply) = request.reply(data) else {
            log::warn!("Reply to message without reply topic ignored");
            return;
        };

        let mut inner = self.inner.borrow_mut();
        if inner.disposed {
            return;
        }
        reply.client_id = Some(inner.client_id);

        if inner.ready {
            drop(inner);
            msgbus::reply(reply);
        } else {
            inner.deferred.push_back(DeferredOp::Publish(reply));
        }
    }

    /// Subscribes the callback to the patterns, returning a cancellation
    /// guard.
    ///
    /// The callback is invoked synchronously on each delivery with the full
    /// message.
    pub fn subscribe<F>(
        &self,
        patterns: &[&str],
        callback: F,
        options: SubscribeOptions,
    ) -> SubscriptionGuard
    where
        F: Fn(&Message) + 'static,
    {
        let patterns: Vec<Ustr> = patterns.iter().map(|&p| Ustr::from(p)).collect();
        let handler = ShareableHandler::from_fn(callback);
        let handler_id = handler.id();

        let guard = SubscriptionGuard {
            inner: Rc::downgrade(&self.inner),
            patterns: patterns.clone(),
            handler_id,
            active: Rc::new(Cell::new(true)),
        };

        let live = {
            let mut inner = self.inner.borrow_mut();
            if inner.disposed {
                log::warn!("Subscribe on disposed client '{}'", inner.client_id);
                guard.active.set(false);
                return guard;
            }
            inner.subscriptions.push(handler.clone());
            if !inner.ready {
                inner.deferred.push_back(DeferredOp::Subscribe {
                    patterns: patterns.clone(),
                    handler: handler.clone(),
                    retained: options.retained,
                });
            }
            inner.ready
        };

        if live {
            msgbus::subscribe(self.client_id(), patterns, &handler, options.retained);
        }

        if let Some(token) = &options.cancel {
            let guard_for_token = guard.clone();
            token.on_cancel(Box::new(move || guard_for_token.cancel()));
        }

        guard
    }

    /// Issues a correlated request and invokes `on_reply` with the first
    /// matching reply, or with a timeout error once the deadline passes.
    ///
    /// The ephemeral reply subscription and the timeout timer are cleaned up
    /// in both outcomes.
    pub fn request<T: AsRef<str>, F>(
        &self,
        topic: T,
        data: Value,
        options: RequestOptions,
        on_reply: F,
    ) where
        F: FnOnce(Result<Message, RequestError>) + 'static,
    {
        let topic = Ustr::from(topic.as_ref());
        let (disposed, ready) = {
            let inner = self.inner.borrow();
            (inner.disposed, inner.ready)
        };

        if disposed {
            on_reply(Err(RequestError::Disposed));
            return;
        }
        if !ready {
            self.inner.borrow_mut().deferred.push_back(DeferredOp::Request {
                topic,
                data,
                options,
                callback: Box::new(on_reply),
            });
            return;
        }

        Self::start_request(&self.inner, topic, data, &options, Box::new(on_reply));
    }

    fn start_request(
        inner_rc: &Rc<RefCell<ClientInner>>,
        topic: Ustr,
        data: Value,
        options: &RequestOptions,
        callback: ReplyCallback,
    ) {
        let client_id = inner_rc.borrow().client_id;
        let correlation_id = Ustr::from(UUID4::new().as_str());
        let reply_topic = switchboard::reply_topic(client_id, correlation_id.as_str());
        let timer_name = format!("request.{client_id}.{correlation_id}");

        // Resolve on the first reply with a matching correlation id; all
        // others are ignored
        let weak = Rc::downgrade(inner_rc);
        let handler = ShareableHandler::from_fn_with_id(
            format!("{client_id}.reply.{correlation_id}"),
            move |message: &Message| {
                if message.correlation_id != Some(correlation_id) {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    ClientInner::resolve(&inner, correlation_id, Ok(message.clone()));
                }
            },
        );
        msgbus::subscribe(client_id, vec![reply_topic.inner()], &handler, false);

        inner_rc.borrow_mut().pending.insert(
            correlation_id,
            PendingRequest {
                reply_topic: reply_topic.inner(),
                timer_name: timer_name.clone(),
                handler,
                callback,
            },
        );

        let timeout_ms = options.timeout_ms;
        let clock = msgbus::clock();
        let deadline = clock.borrow().timestamp_ms() + timeout_ms;
        let weak = Rc::downgrade(inner_rc);
        let timeout_callback = TimeEventCallback::from(move |_| {
            if let Some(inner) = weak.upgrade() {
                ClientInner::resolve(
                    &inner,
                    correlation_id,
                    Err(RequestError::Timeout { topic, timeout_ms }),
                );
            }
        });
        if let Err(e) = clock
            .borrow_mut()
            .set_time_alert_ms(&timer_name, deadline, timeout_callback)
        {
            log::error!("Failed to schedule request timeout '{timer_name}': {e}");
        }

        let mut message = Message::new(topic.as_str(), data);
        message.reply_to = Some(reply_topic.inner());
        message.correlation_id = Some(correlation_id);
        message.client_id = Some(client_id);
        msgbus::request(message);
    }

    /// Returns whether the topic matches the pattern (anchored,
    /// segment-based). Pure; useful for deduping under wildcard
    /// subscriptions.
    #[must_use]
    pub fn matches(topic: &str, pattern: &str) -> bool {
        is_matching_str(topic, pattern)
    }

    /// Disposes the client: cancels every tracked subscription and fails
    /// every pending request with a disposed error.
    pub fn dispose(&self) {
        ClientInner::dispose(&self.inner);
    }
}

impl Default for BusClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for BusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct(stringify!(BusClient))
            .field("client_id", &inner.client_id)
            .field("ready", &inner.ready)
            .field("disposed", &inner.disposed)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use busbar_core::UnixMillis;
    use rstest::rstest;
    use serde_json::json;

    use super::*;
    use crate::clock::Clock;
    use crate::{
        clock::advance_and_fire,
        msgbus::{
            core::{BusConfig, MessageBus},
            stubs::{TEST_EPOCH_MS, register_test_bus},
        },
    };

    type ReplySlot = Rc<RefCell<Option<Result<Message, RequestError>>>>;

    fn reply_slot() -> (ReplySlot, impl FnOnce(Result<Message, RequestError>)) {
        let slot: ReplySlot = Rc::new(RefCell::new(None));
        let slot_clone = slot.clone();
        (slot, move |result| *slot_clone.borrow_mut() = Some(result))
    }

    #[rstest]
    fn test_client_ready_on_started_bus() {
        let (_bus, _clock) = register_test_bus();
        let client = BusClient::new();

        assert!(client.is_ready());

        let called = Rc::new(Cell::new(false));
        let called_clone = called.clone();
        client.ready(move || called_clone.set(true));
        assert!(called.get());
    }

    #[rstest]
    fn test_client_registers_in_directory() {
        let (bus, _clock) = register_test_bus();
        let client = BusClient::with_capabilities(vec!["tables".to_string()]);

        let record = bus.borrow().get_client(&client.client_id()).cloned();
        assert_eq!(record.unwrap().capabilities, vec!["tables".to_string()]);
    }

    #[rstest]
    fn test_publish_and_subscribe_round_trip() {
        let (_bus, _clock) = register_test_bus();
        let publisher = BusClient::new();
        let subscriber = BusClient::new();

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _guard = subscriber.subscribe(
            &["users.*"],
            move |message| received_clone.borrow_mut().push(message.clone()),
            SubscribeOptions::default(),
        );

        publisher.publish("users.created", json!({"id": 1}));

        let messages = received.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].client_id, Some(publisher.client_id()));
        assert!(messages[0].id.is_some());
    }

    #[rstest]
    fn test_subscription_guard_cancel() {
        let (_bus, _clock) = register_test_bus();
        let publisher = BusClient::new();
        let subscriber = BusClient::new();

        let count = Rc::new(Cell::new(0u32));
        let count_clone = count.clone();
        let guard = subscriber.subscribe(
            &["users.*"],
            move |_| count_clone.set(count_clone.get() + 1),
            SubscribeOptions::default(),
        );

        publisher.publish("users.created", json!({}));
        assert_eq!(count.get(), 1);

        guard.cancel();
        assert!(!guard.is_active());

        publisher.publish("users.created", json!({}));
        assert_eq!(count.get(), 1);
    }

    #[rstest]
    fn test_cancel_token_trips_subscription() {
        let (_bus, _clock) = register_test_bus();
        let publisher = BusClient::new();
        let subscriber = BusClient::new();

        let token = CancelToken::new();
        let count = Rc::new(Cell::new(0u32));
        let count_clone = count.clone();
        let guard = subscriber.subscribe(
            &["users.*"],
            move |_| count_clone.set(count_clone.get() + 1),
            SubscribeOptions {
                retained: false,
                cancel: Some(token.clone()),
            },
        );

        publisher.publish("users.created", json!({}));
        token.cancel();

        publisher.publish("users.created", json!({}));
        assert_eq!(count.get(), 1);
        assert!(!guard.is_active());
        assert!(token.is_cancelled());
    }

    #[rstest]
    fn test_retained_replay_for_client() {
        let (_bus, _clock) = register_test_bus();
        let publisher = BusClient::new();

        publisher.publish_message(Message::retained("users.list.state", json!({"items": []})));

        let subscriber = BusClient::new();
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _guard = subscriber.subscribe(
            &["users.list.state"],
            move |message| received_clone.borrow_mut().push(message.data.clone()),
            SubscribeOptions::retained(),
        );

        assert_eq!(*received.borrow(), vec![json!({"items": []})]);
    }

    #[rstest]
    fn test_request_reply_happy_path() {
        let (_bus, _clock) = register_test_bus();
        let responder = BusClient::new();
        let caller = BusClient::new();

        // Respond from delivery with the caller's correlation echoed
        let replier = BusClient::new();
        let _guard = responder.subscribe(
            &["users.get"],
            move |request| replier.reply(request, json!({"name": "Alice"})),
            SubscribeOptions::default(),
        );

        let (slot, on_reply) = reply_slot();
        caller.request(
            "users.get",
            json!({"id": 1}),
            RequestOptions { timeout_ms: 500 },
            on_reply,
        );

        let result = slot.borrow_mut().take().unwrap();
        let reply = result.unwrap();
        assert_eq!(reply.data["name"], json!("Alice"));
    }

    #[rstest]
    fn test_request_timeout() {
        let (bus, clock) = register_test_bus();
        let caller = BusClient::new();

        let (slot, on_reply) = reply_slot();
        caller.request(
            "nobody.listens",
            json!({}),
            RequestOptions { timeout_ms: 50 },
            on_reply,
        );
        assert!(slot.borrow().is_none());

        let now = clock.borrow().timestamp_ms();
        advance_and_fire(&clock, now + 50);

        let result = slot.borrow_mut().take().unwrap();
        assert_eq!(
            result.unwrap_err(),
            RequestError::Timeout {
                topic: Ustr::from("nobody.listens"),
                timeout_ms: 50,
            }
        );

        // No pending entry or reply subscription remains; only the bus sweep
        // timer survives
        assert!(caller.inner.borrow().pending.is_empty());
        assert_eq!(bus.borrow().subscriptions().len(), 0);
        assert_eq!(clock.borrow().timer_count(), 1);
    }

    #[rstest]
    fn test_mismatched_correlation_ignored() {
        let (_bus, _clock) = register_test_bus();
        let responder = BusClient::new();
        let caller = BusClient::new();

        // Responder replies with a wrong correlation id first, then the right one
        let responder_facade = BusClient::new();
        let _guard = responder.subscribe(
            &["users.get"],
            move |request| {
                let mut bogus = request.reply(json!({"name": "Mallory"})).unwrap();
                bogus.correlation_id = Some(Ustr::from("bogus"));
                responder_facade.publish_message(bogus);
                responder_facade.reply(request, json!({"name": "Alice"}));
            },
            SubscribeOptions::default(),
        );

        let (slot, on_reply) = reply_slot();
        caller.request(
            "users.get",
            json!({}),
            RequestOptions::default(),
            on_reply,
        );

        let reply = slot.borrow_mut().take().unwrap().unwrap();
        assert_eq!(reply.data["name"], json!("Alice"));
    }

    #[rstest]
    fn test_late_reply_after_timeout_has_no_effect() {
        let (bus, clock) = register_test_bus();
        let caller = BusClient::new();

        // Catch the request so the late reply can target its reply topic
        let seen: Rc<RefCell<Option<Message>>> = Rc::new(RefCell::new(None));
        let seen_clone = seen.clone();
        let catcher = BusClient::new();
        let _guard = catcher.subscribe(
            &["users.get"],
            move |request| *seen_clone.borrow_mut() = Some(request.clone()),
            SubscribeOptions::default(),
        );

        let (slot, on_reply) = reply_slot();
        caller.request(
            "users.get",
            json!({}),
            RequestOptions { timeout_ms: 50 },
            on_reply,
        );

        let now = clock.borrow().timestamp_ms();
        advance_and_fire(&clock, now + 50);

        // The reply arriving after the deadline triggers no side effect
        let request = seen.borrow().clone().unwrap();
        let responder = BusClient::new();
        responder.reply(&request, json!({"name": "Too late"}));

        assert_eq!(
            slot.borrow_mut().take().unwrap().unwrap_err(),
            RequestError::Timeout {
                topic: Ustr::from("users.get"),
                timeout_ms: 50,
            }
        );
        assert!(caller.inner.borrow().pending.is_empty());
        assert!(
            bus.borrow()
                .subscriptions()
                .iter()
                .all(|sub| sub.client_id != caller.client_id())
        );
    }

    #[rstest]
    fn test_dispose_cancels_subscriptions_and_requests() {
        let (bus, clock) = register_test_bus();
        let publisher = BusClient::new();
        let client = BusClient::new();

        let count = Rc::new(Cell::new(0u32));
        let count_clone = count.clone();
        let _guard = client.subscribe(
            &["users.*"],
            move |_| count_clone.set(count_clone.get() + 1),
            SubscribeOptions::default(),
        );

        let (slot, on_reply) = reply_slot();
        client.request(
            "users.get",
            json!({}),
            RequestOptions::default(),
            on_reply,
        );

        client.dispose();
        assert!(client.is_disposed());

        // Pending request settled with the disposed error
        assert_eq!(
            slot.borrow_mut().take().unwrap().unwrap_err(),
            RequestError::Disposed
        );

        // No subscription from this client remains in the routing table
        assert!(
            bus.borrow()
                .subscriptions()
                .iter()
                .all(|sub| sub.client_id != client.client_id())
        );

        publisher.publish("users.created", json!({}));
        assert_eq!(count.get(), 0);

        // The timeout timer was cancelled: advancing fires nothing
        let now = clock.borrow().timestamp_ms();
        advance_and_fire(&clock, now + 10_000);
    }

    #[rstest]
    fn test_operations_deferred_until_ready() {
        // Register but do not start the bus
        let clock = Rc::new(RefCell::new(crate::clock::TestClock::new()));
        clock.borrow_mut().set_time(UnixMillis::new(TEST_EPOCH_MS));
        let _bus = MessageBus::new(BusConfig::default(), clock.clone()).register_message_bus();

        let client = BusClient::new();
        assert!(!client.is_ready());

        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let _guard = client.subscribe(
            &["users.*"],
            move |message| received_clone.borrow_mut().push(message.topic.to_string()),
            SubscribeOptions::default(),
        );

        let other = BusClient::new();
        other.publish("users.created", json!({}));

        let ready_order = Rc::new(RefCell::new(Vec::new()));
        let order_clone = ready_order.clone();
        client.ready(move || order_clone.borrow_mut().push("ready"));

        // Nothing happened yet
        assert!(received.borrow().is_empty());
        assert!(ready_order.borrow().is_empty());

        crate::msgbus::start();

        assert!(client.is_ready());
        assert_eq!(*ready_order.borrow(), vec!["ready"]);
        // The deferred subscribe flushed before the other client's deferred
        // publish, so the delivery was observed
        assert_eq!(*received.borrow(), vec!["users.created".to_string()]);
    }

    #[rstest]
    fn test_matches_exposed() {
        assert!(BusClient::matches("users.created", "users.*"));
        assert!(!BusClient::matches("users.item.state", "users.*"));
    }
}
