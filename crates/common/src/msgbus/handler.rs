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

//! Message handler infrastructure.
//!
//! Handlers are reference-counted and identified by an interned id; equality
//! and hashing go through the id. Subscriptions hold [`WeakHandler`] so the
//! bus never keeps a subscriber alive - the owning client keeps the strong
//! [`ShareableHandler`] and the periodic sweep reaps dead subscriptions.

use std::{
    fmt::Debug,
    rc::{Rc, Weak},
};

use busbar_core::UUID4;
use ustr::Ustr;

use super::envelope::Message;

/// A bus message handler.
///
/// `handle` is fallible so delivery failures can be isolated per subscriber:
/// the bus logs and reports the error, and fanout continues to the remaining
/// subscribers.
pub trait Handler: 'static {
    /// Returns the unique identifier for this handler.
    fn id(&self) -> Ustr;

    /// Handles a delivered message.
    ///
    /// # Errors
    ///
    /// Returns an error if the handler fails to process the message.
    fn handle(&self, message: &Message) -> anyhow::Result<()>;
}

/// A shareable, reference-counted handler.
///
/// Uses `Rc` intentionally (not `Arc`): the bus is single-threaded by
/// contract and handlers never cross threads.
pub struct ShareableHandler(pub Rc<dyn Handler>);

impl ShareableHandler {
    /// Creates a new shareable handler from any type implementing [`Handler`].
    pub fn new<H: Handler>(handler: H) -> Self {
        Self(Rc::new(handler))
    }

    /// Creates a handler from an infallible callback.
    pub fn from_fn<F>(callback: F) -> Self
    where
        F: Fn(&Message) + 'static,
    {
        Self::new(CallbackHandler::new(None::<&str>, move |msg: &Message| {
            callback(msg);
            Ok(())
        }))
    }

    /// Creates a handler from an infallible callback with a custom ID.
    pub fn from_fn_with_id<S: AsRef<str>, F>(id: S, callback: F) -> Self
    where
        F: Fn(&Message) + 'static,
    {
        Self::new(CallbackHandler::new(Some(id), move |msg: &Message| {
            callback(msg);
            Ok(())
        }))
    }

    /// Creates a handler from a fallible callback.
    pub fn from_try_fn<F>(callback: F) -> Self
    where
        F: Fn(&Message) -> anyhow::Result<()> + 'static,
    {
        Self::new(CallbackHandler::new(None::<&str>, callback))
    }

    /// Returns the handler ID.
    #[must_use]
    pub fn id(&self) -> Ustr {
        self.0.id()
    }

    /// Handles a message by delegating to the inner handler.
    ///
    /// # Errors
    ///
    /// Returns an error if the inner handler fails.
    pub fn handle(&self, message: &Message) -> anyhow::Result<()> {
        self.0.handle(message)
    }

    /// Returns a weak handle suitable for storing in a subscription.
    #[must_use]
    pub fn downgrade(&self) -> WeakHandler {
        WeakHandler(Rc::downgrade(&self.0))
    }
}

impl Clone for ShareableHandler {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl Debug for ShareableHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ShareableHandler))
            .field("id", &self.0.id())
            .finish()
    }
}

impl PartialEq for ShareableHandler {
    fn eq(&self, other: &Self) -> bool {
        self.0.id() == other.0.id()
    }
}

impl Eq for ShareableHandler {}

impl std::hash::Hash for ShareableHandler {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.id().hash(state);
    }
}

/// A weak handle to a handler, held by subscriptions.
pub struct WeakHandler(Weak<dyn Handler>);

impl WeakHandler {
    /// Attempts to upgrade to a strong handler.
    #[must_use]
    pub fn upgrade(&self) -> Option<ShareableHandler> {
        self.0.upgrade().map(ShareableHandler)
    }

    /// Returns whether the owning handler is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl Clone for WeakHandler {
    fn clone(&self) -> Self {
        Self(Weak::clone(&self.0))
    }
}

impl Debug for WeakHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(WeakHandler))
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// A callback-based handler implementation.
pub struct CallbackHandler<F>
where
    F: Fn(&Message) -> anyhow::Result<()>,
{
    id: Ustr,
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&Message) -> anyhow::Result<()> + 'static,
{
    /// Creates a new callback handler with an optional custom ID.
    pub fn new<S: AsRef<str>>(id: Option<S>, callback: F) -> Self {
        let id = id.map_or_else(
            || generate_handler_id(&callback),
            |s| Ustr::from(s.as_ref()),
        );

        Self { id, callback }
    }
}

impl<F> Handler for CallbackHandler<F>
where
    F: Fn(&Message) -> anyhow::Result<()> + 'static,
{
    fn id(&self) -> Ustr {
        self.id
    }

    fn handle(&self, message: &Message) -> anyhow::Result<()> {
        (self.callback)(message)
    }
}

impl<F> Debug for CallbackHandler<F>
where
    F: Fn(&Message) -> anyhow::Result<()>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(CallbackHandler))
            .field("id", &self.id)
            .finish()
    }
}

fn generate_handler_id<F>(callback: &F) -> Ustr {
    let callback_ptr = std::ptr::from_ref(callback);
    let uuid = UUID4::new();
    Ustr::from(&format!("<{callback_ptr:?}>-{uuid}"))
}

////////////////////////////////////////////////////////////////////////////////
// Tests
////////////////////////////////////////////////////////////////////////////////
#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    fn test_callback_handler_invoked() {
        let received = Rc::new(RefCell::new(Vec::new()));
        let received_clone = received.clone();
        let handler = ShareableHandler::from_fn(move |msg: &Message| {
            received_clone.borrow_mut().push(msg.topic);
        });

        let msg = Message::new("users.created", json!({}));
        handler.handle(&msg).unwrap();

        assert_eq!(received.borrow().len(), 1);
        assert_eq!(received.borrow()[0].as_str(), "users.created");
    }

    #[rstest]
    fn test_handler_with_custom_id() {
        let handler = ShareableHandler::from_fn_with_id("my-handler", |_| {});
        assert_eq!(handler.id().as_str(), "my-handler");
    }

    #[rstest]
    fn test_generated_ids_unique() {
        let handler1 = ShareableHandler::from_fn(|_| {});
        let handler2 = ShareableHandler::from_fn(|_| {});
        assert_ne!(handler1.id(), handler2.id());
    }

    #[rstest]
    fn test_equality_by_id() {
        let handler = ShareableHandler::from_fn_with_id("h", |_| {});
        let clone = handler.clone();
        assert_eq!(handler, clone);
    }

    #[rstest]
    fn test_fallible_handler_propagates_error() {
        let handler = ShareableHandler::from_try_fn(|_| anyhow::bail!("handler exploded"));
        let msg = Message::new("users.created", json!({}));
        assert!(handler.handle(&msg).is_err());
    }

    #[rstest]
    fn test_weak_handler_lifecycle() {
        let handler = ShareableHandler::from_fn(|_| {});
        let weak = handler.downgrade();

        assert!(weak.is_alive());
        assert!(weak.upgrade().is_some());

        drop(handler);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
