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

//! In-process publish/subscribe message bus for page components.
//!
//! # Messaging patterns
//!
//! - **Pub/sub**: publish messages to dot-separated topics; subscribers
//!   receive every message matching their pattern, in subscription order.
//! - **Request/reply**: built on pub/sub via an ephemeral reply topic plus a
//!   correlation id (see [`crate::client::BusClient::request`]); the bus
//!   itself is not request-aware.
//! - **Retained messages**: the last retained message per topic replays to
//!   late subscribers which ask for it, from a bounded LRU store.
//!
//! # Architecture
//!
//! The bus uses thread-local storage: each thread gets its own
//! [`MessageBus`] instance, installed once and reached through free
//! functions. Any component on the thread can address the bus without
//! holding a reference - the typed [`Envelope`] is the wire contract and the
//! router is a dispatch over its tag.
//!
//! Fanout is synchronous and completes before the publish call returns.
//! Handler buffers are moved out of thread-local storage during dispatch so
//! handlers can re-enter the bus (nested publishes complete fully before the
//! outer fanout resumes).

mod api;
pub mod core;
pub mod envelope;
pub mod handler;
pub mod limiter;
pub mod matching;
pub mod mstr;
pub mod retained;
pub mod stubs;
pub mod switchboard;
pub mod validate;

#[cfg(test)]
mod tests;

use std::{
    cell::{OnceCell, RefCell},
    rc::Rc,
};

use smallvec::SmallVec;

pub use self::{
    api::*,
    core::{
        BusConfig, BusState, BusStats, ClientRecord, MessageBus, SWEEP_TIMER_NAME, Subscription,
    },
    envelope::{Envelope, Message, MessageKind, SubscribeRequest},
    handler::{CallbackHandler, Handler, ShareableHandler, WeakHandler},
    matching::{CompiledPattern, is_matching, is_matching_str},
    mstr::{MAX_TOPIC_LEN, MStr, Pattern, Topic, WILDCARD},
    validate::{BusError, ErrorCode},
};

/// Inline capacity for handler buffers before heap allocation.
pub(crate) const HANDLER_BUFFER_CAP: usize = 16;

// The MessageBus is designed for single-threaded use; thread-local storage
// gives each thread its own instance without synchronization.
//
// The handler buffer provides zero-allocation publish on the hot path. It is
// moved out (std::mem::take) before handler calls so no RefCell borrow is
// held during dispatch, enabling re-entrant publishes.
thread_local! {
    static MESSAGE_BUS: OnceCell<Rc<RefCell<MessageBus>>> = const { OnceCell::new() };

    static HANDLER_BUFFER: RefCell<SmallVec<[ShareableHandler; HANDLER_BUFFER_CAP]>> =
        RefCell::new(SmallVec::new());
}

/// Sets the thread-local message bus.
///
/// Exactly one bus exists per thread; installing a second is a programming
/// error.
///
/// # Panics
///
/// Panics if a message bus has already been set for this thread.
pub fn set_message_bus(msgbus: Rc<RefCell<MessageBus>>) {
    MESSAGE_BUS.with(|bus| {
        assert!(
            bus.set(msgbus).is_ok(),
            "Failed to set MessageBus: already initialized for this thread"
        );
    });
}

/// Gets the thread-local message bus.
///
/// If no message bus has been set for this thread, a default one is created
/// and installed (uninitialized; call [`start`] before publishing).
pub fn get_message_bus() -> Rc<RefCell<MessageBus>> {
    MESSAGE_BUS.with(|bus| {
        bus.get_or_init(|| Rc::new(RefCell::new(MessageBus::default())))
            .clone()
    })
}
