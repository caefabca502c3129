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

//! Stub handlers and bus fixtures for testing.

use std::{
    cell::{Cell, RefCell},
    rc::Rc,
};

use busbar_core::{UUID4, UnixMillis};
use ustr::Ustr;

use super::{
    core::{BusConfig, MessageBus},
    envelope::Message,
    handler::{Handler, ShareableHandler},
};
use crate::clock::TestClock;

/// Handler that tracks whether it has been called.
#[derive(Clone, Debug)]
pub struct CallCheckHandler {
    id: Ustr,
    called: Rc<Cell<bool>>,
}

impl CallCheckHandler {
    #[must_use]
    pub fn new(id: Option<Ustr>) -> Self {
        let unique_id = id.unwrap_or_else(|| Ustr::from(UUID4::new().as_str()));
        Self {
            id: unique_id,
            called: Rc::new(Cell::new(false)),
        }
    }

    #[must_use]
    pub fn was_called(&self) -> bool {
        self.called.get()
    }

    /// Returns a `ShareableHandler` for subscription.
    #[must_use]
    pub fn handler(&self) -> ShareableHandler {
        ShareableHandler::new(self.clone())
    }
}

impl Handler for CallCheckHandler {
    fn id(&self) -> Ustr {
        self.id
    }

    fn handle(&self, _message: &Message) -> anyhow::Result<()> {
        self.called.set(true);
        Ok(())
    }
}

/// Creates a call-checking handler, returning both the handler for
/// subscription and a clone for checking whether it was called.
#[must_use]
pub fn get_call_check_handler(id: Option<Ustr>) -> (ShareableHandler, CallCheckHandler) {
    let checker = CallCheckHandler::new(id);
    let handler = checker.handler();
    (handler, checker)
}

/// Handler that records every message it receives.
#[derive(Clone, Debug)]
pub struct RecordingHandler {
    id: Ustr,
    messages: Rc<RefCell<Vec<Message>>>,
}

impl RecordingHandler {
    #[must_use]
    pub fn new(id: Option<Ustr>) -> Self {
        let unique_id = id.unwrap_or_else(|| Ustr::from(UUID4::new().as_str()));
        Self {
            id: unique_id,
            messages: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Returns a `ShareableHandler` for subscription.
    ///
    /// Keep the returned handler alive for the life of the subscription; the
    /// bus holds only a weak reference.
    #[must_use]
    pub fn handler(&self) -> ShareableHandler {
        ShareableHandler::new(self.clone())
    }

    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.messages
            .borrow()
            .iter()
            .map(|m| m.topic.to_string())
            .collect()
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.messages.borrow().len()
    }
}

impl Handler for RecordingHandler {
    fn id(&self) -> Ustr {
        self.id
    }

    fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.messages.borrow_mut().push(message.clone());
        Ok(())
    }
}

/// Creates a recording handler, returning both the handler for subscription
/// and a clone for inspecting received messages.
#[must_use]
pub fn get_recording_handler(id: Option<Ustr>) -> (ShareableHandler, RecordingHandler) {
    let recorder = RecordingHandler::new(id);
    let handler = recorder.handler();
    (handler, recorder)
}

/// Returns a handler which fails on every delivery.
#[must_use]
pub fn get_failing_handler(id: Option<Ustr>) -> ShareableHandler {
    let unique_id = id.unwrap_or_else(|| Ustr::from(UUID4::new().as_str()));
    ShareableHandler::new(CallbackFail { id: unique_id })
}

#[derive(Debug)]
struct CallbackFail {
    id: Ustr,
}

impl Handler for CallbackFail {
    fn id(&self) -> Ustr {
        self.id
    }

    fn handle(&self, message: &Message) -> anyhow::Result<()> {
        anyhow::bail!("stub failure handling '{}'", message.topic)
    }
}

/// The timestamp test buses start at (timestamps must be positive).
pub const TEST_EPOCH_MS: u64 = 1_700_000_000_000;

/// Registers a started test bus with the given config on a [`TestClock`].
///
/// Call once per test thread.
#[must_use]
pub fn register_test_bus_with(
    config: BusConfig,
) -> (Rc<RefCell<MessageBus>>, Rc<RefCell<TestClock>>) {
    let clock = Rc::new(RefCell::new(TestClock::new()));
    clock.borrow_mut().set_time(UnixMillis::new(TEST_EPOCH_MS));

    let bus = MessageBus::new(config, clock.clone()).register_message_bus();
    super::start();

    (bus, clock)
}

/// Registers a started test bus with the default config on a [`TestClock`].
#[must_use]
pub fn register_test_bus() -> (Rc<RefCell<MessageBus>>, Rc<RefCell<TestClock>>) {
    register_test_bus_with(BusConfig::default())
}
