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

//! Public API functions for interacting with the message bus.
//!
//! Free-standing functions wrap the thread-local bus, realizing the
//! boundary-crossing substrate: any component on the thread can publish,
//! subscribe, or issue the system operations without holding a bus
//! reference. [`dispatch`] is the router - one match over the envelope tag.
//!
//! Fanout never holds the bus borrow across a handler call: the handler
//! buffer is taken from thread-local storage, filled under a short borrow,
//! and the borrow released before any handler runs. A handler which
//! publishes re-enters through a fresh (empty) buffer and its nested publish
//! completes fully before the outer fanout resumes.

use std::{cell::RefCell, rc::Rc};

use serde_json::{Value, json};
use smallvec::SmallVec;
use ustr::Ustr;

use super::{
    HANDLER_BUFFER, HANDLER_BUFFER_CAP,
    core::{BusState, BusStats},
    envelope::{Envelope, Message, MessageKind, SubscribeRequest},
    get_message_bus,
    handler::ShareableHandler,
    matching::CompiledPattern,
    mstr::{MStr, Pattern, Topic},
    switchboard,
    validate::{BusError, ErrorCode, validate_pattern},
};
use crate::clock::Clock;

type HandlerBuffer = SmallVec<[ShareableHandler; HANDLER_BUFFER_CAP]>;

fn take_handler_buffer() -> HandlerBuffer {
    HANDLER_BUFFER.with_borrow_mut(std::mem::take)
}

fn restore_handler_buffer(mut buffer: HandlerBuffer) {
    buffer.clear(); // Release refs before restore
    HANDLER_BUFFER.with_borrow_mut(|buf| *buf = buffer);
}

/// Starts the thread-local bus, announcing readiness on `sys.ready`.
pub fn start() {
    crate::logging::ensure_logging_initialized();

    let result = get_message_bus().borrow_mut().start();
    match result {
        Ok(ready) => fanout_system(switchboard::sys_ready(), &ready),
        Err(e) => log::error!("Failed to start message bus: {e}"),
    }
}

/// Returns whether the thread-local bus has announced readiness.
#[must_use]
pub fn is_ready() -> bool {
    get_message_bus().borrow().is_ready()
}

/// Returns the clock driving the thread-local bus.
#[must_use]
pub fn clock() -> Rc<RefCell<dyn Clock>> {
    get_message_bus().borrow().clock()
}

/// Publishes a message to its topic.
pub fn publish(message: Message) {
    dispatch(Envelope::Publish(message));
}

/// Publishes a request message; the caller listens on its reply topic.
pub fn request(message: Message) {
    dispatch(Envelope::Request(message));
}

/// Publishes a reply targeting a request's reply topic.
pub fn reply(message: Message) {
    dispatch(Envelope::Reply(message));
}

/// Subscribes the handler to the patterns for the client.
///
/// The bus stores only a weak handler reference; the caller must keep the
/// [`ShareableHandler`] alive for the life of the subscription.
pub fn subscribe(client_id: Ustr, patterns: Vec<Ustr>, handler: &ShareableHandler, retained: bool) {
    dispatch(Envelope::Subscribe(SubscribeRequest {
        client_id,
        patterns,
        retained,
        handler: handler.downgrade(),
    }));
}

/// Removes the `(client_id, pattern)` subscriptions.
pub fn unsubscribe(client_id: Ustr, patterns: Vec<Ustr>) {
    dispatch(Envelope::Unsubscribe {
        client_id,
        patterns,
    });
}

/// Registers the client in the bus directory.
pub fn hello(client_id: Ustr, capabilities: Vec<String>) {
    dispatch(Envelope::Hello {
        client_id,
        capabilities,
    });
}

/// Removes retained entries matching the pattern, or all if absent.
pub fn clear_retained(pattern: Option<Ustr>) {
    dispatch(Envelope::ClearRetained { pattern });
}

/// Returns a snapshot of the bus counters.
#[must_use]
pub fn stats() -> BusStats {
    get_message_bus().borrow().stats_snapshot()
}

/// Runs one maintenance sweep (normally driven by the bus timer).
pub fn sweep() {
    let (reaped, buckets) = get_message_bus().borrow_mut().sweep();
    log::trace!("Sweep complete: {reaped} subscriptions, {buckets} buckets");
}

/// Removes every subscription and the directory entry for a client.
pub fn release_client(client_id: Ustr) {
    let removed = get_message_bus().borrow_mut().release_client(client_id);
    log::debug!("Released client '{client_id}' ({removed} subscriptions)");
}

/// Disposes the thread-local bus.
pub fn dispose_bus() {
    get_message_bus().borrow_mut().dispose();
}

/// Routes an envelope to the bus: the dispatch over the wire contract's tag.
pub fn dispatch(envelope: Envelope) {
    match envelope {
        Envelope::Publish(message) => ingest(message, MessageKind::Publish),
        Envelope::Request(message) => ingest(message, MessageKind::Request),
        Envelope::Reply(message) => ingest(message, MessageKind::Reply),
        Envelope::Subscribe(request) => handle_subscribe(request),
        Envelope::Unsubscribe {
            client_id,
            patterns,
        } => handle_unsubscribe(client_id, &patterns),
        Envelope::Hello {
            client_id,
            capabilities,
        } => get_message_bus().borrow_mut().hello(client_id, capabilities),
        Envelope::ClearRetained { pattern } => handle_clear_retained(pattern),
    }
}

/// Validates, enriches, and fans out a message-bearing ingress operation.
fn ingest(mut message: Message, kind: MessageKind) {
    let bus_rc = get_message_bus();
    let mut handlers = take_handler_buffer();

    let prepared = {
        let mut bus = bus_rc.borrow_mut();
        match bus.prepare(&mut message, kind) {
            Ok(topic) => {
                bus.fill_matching_handlers(topic, &mut handlers);
                Ok(())
            }
            Err(error) => Err(error),
        }
    };

    match prepared {
        Ok(()) => {
            let mut delivered = 0u64;
            let mut failures: Vec<String> = Vec::new();
            for handler in &handlers {
                match handler.handle(&message) {
                    Ok(()) => delivered += 1,
                    Err(e) => {
                        log::error!(
                            "Delivery to handler '{}' for topic '{}' failed: {e}",
                            handler.id(),
                            message.topic
                        );
                        failures.push(format!("handler '{}': {e}", handler.id()));
                    }
                }
            }
            restore_handler_buffer(handlers);

            {
                let mut bus = bus_rc.borrow_mut();
                bus.bump_delivered(delivered);
                bus.bump_errors(failures.len() as u64);
            }
            for failure in failures {
                emit_error(BusError::new(ErrorCode::DeliveryFailed, failure), None);
            }

            handle_system_request(&message);
        }
        Err(Some(error)) => {
            restore_handler_buffer(handlers);
            emit_error(error, Some(json!({"topic": message.topic.as_str()})));
        }
        Err(None) => restore_handler_buffer(handlers),
    }
}

/// Answers the system request topics after their normal fanout.
fn handle_system_request(message: &Message) {
    if message.topic == switchboard::sys_stats().inner() {
        if let Some(reply_to) = message.reply_to {
            answer_stats(reply_to, message.correlation_id);
        }
    } else if message.topic == switchboard::sys_clear_retained().inner() {
        let pattern = message
            .data
            .get("pattern")
            .and_then(Value::as_str)
            .map(Ustr::from);
        handle_clear_retained(pattern);
    }
}

fn handle_subscribe(request: SubscribeRequest) {
    let Some(handler) = request.handler.upgrade() else {
        log::warn!(
            "Subscribe for client '{}' ignored: handler already dropped",
            request.client_id
        );
        return;
    };

    let bus_rc = get_message_bus();
    let mut errors: Vec<BusError> = Vec::new();

    let replay: Vec<Message> = {
        let mut bus = bus_rc.borrow_mut();
        if bus.state() == BusState::Disposed {
            log::warn!(
                "Subscribe for client '{}' ignored: bus disposed",
                request.client_id
            );
            return;
        }

        let mut added: Vec<CompiledPattern> = Vec::new();
        for raw in &request.patterns {
            match validate_pattern(*raw, bus.config().allow_global_wildcard) {
                Ok(pattern) => {
                    if bus.subscribe_one(request.client_id, pattern, &handler) && request.retained
                    {
                        added.push(CompiledPattern::compile(pattern));
                    }
                }
                Err(error) => {
                    bus.bump_errors(1);
                    errors.push(error);
                }
            }
        }

        if added.is_empty() {
            Vec::new()
        } else {
            bus.collect_retained(&added)
        }
    };

    // Retained replay is synchronous: delivery completes before the
    // subscribe operation returns to its caller
    let mut delivered = 0u64;
    let mut failures: Vec<String> = Vec::new();
    for message in &replay {
        match handler.handle(message) {
            Ok(()) => delivered += 1,
            Err(e) => {
                log::error!(
                    "Retained replay to handler '{}' for topic '{}' failed: {e}",
                    handler.id(),
                    message.topic
                );
                failures.push(format!("handler '{}': {e}", handler.id()));
            }
        }
    }

    if delivered > 0 || !failures.is_empty() {
        let mut bus = bus_rc.borrow_mut();
        bus.bump_delivered(delivered);
        bus.bump_errors(failures.len() as u64);
    }
    for failure in failures {
        emit_error(BusError::new(ErrorCode::DeliveryFailed, failure), None);
    }
    for error in errors {
        emit_error(error, None);
    }
}

fn handle_unsubscribe(client_id: Ustr, patterns: &[Ustr]) {
    let bus_rc = get_message_bus();
    let mut bus = bus_rc.borrow_mut();
    for raw in patterns {
        bus.unsubscribe_one(client_id, MStr::<Pattern>::pattern(raw.as_str()));
    }
}

fn handle_clear_retained(pattern: Option<Ustr>) {
    let result = get_message_bus().borrow_mut().clear_retained(pattern);
    match result {
        Ok(removed) => log::debug!("Cleared {removed} retained entries"),
        Err(error) => emit_error(error, None),
    }
}

fn answer_stats(reply_to: Ustr, correlation_id: Option<Ustr>) {
    let snapshot = stats();
    let mut message = Message::new(
        reply_to.as_str(),
        serde_json::to_value(&snapshot).unwrap_or(Value::Null),
    );
    message.correlation_id = correlation_id;
    ingest(message, MessageKind::Reply);
}

/// Emits a `sys.error` event for a dropped operation or failed delivery.
pub(crate) fn emit_error(error: BusError, details: Option<Value>) {
    log::warn!("{error}");

    let message = {
        let bus_rc = get_message_bus();
        let mut bus = bus_rc.borrow_mut();
        let data = json!({
            "code": error.code,
            "message": error.message,
            "details": details,
        });
        let message = bus.new_system_message(switchboard::sys_error(), data);
        bus.bump_published(1);
        message
    };

    fanout_system(switchboard::sys_error(), &message);
}

/// Fans out a bus-originated message without validation or rate limiting.
///
/// Handler failures here are logged only - emitting `sys.error` from the
/// `sys.error` path must not recurse.
fn fanout_system(topic: MStr<Topic>, message: &Message) {
    let bus_rc = get_message_bus();
    let mut handlers = take_handler_buffer();

    {
        let mut bus = bus_rc.borrow_mut();
        bus.fill_matching_handlers(topic, &mut handlers);
    }

    let mut delivered = 0u64;
    for handler in &handlers {
        match handler.handle(message) {
            Ok(()) => delivered += 1,
            Err(e) => log::error!(
                "Delivery of '{topic}' to handler '{}' failed: {e}",
                handler.id()
            ),
        }
    }
    restore_handler_buffer(handlers);

    bus_rc.borrow_mut().bump_delivered(delivered);
}

/// Returns the count of subscriptions matching the topic.
#[must_use]
pub fn subscriptions_count<T: AsRef<str>>(topic: T) -> usize {
    get_message_bus().borrow().subscriptions_count(topic)
}

/// Returns whether the client is subscribed to the pattern.
#[must_use]
pub fn is_subscribed<T: AsRef<str>>(client_id: Ustr, pattern: T) -> bool {
    get_message_bus().borrow().is_subscribed(client_id, pattern)
}
