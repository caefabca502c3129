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

//! Core message bus implementation.
//!
//! # Design decisions
//!
//! ## Weak subscriber ownership
//!
//! Subscriptions hold weak handler references; the owning client keeps the
//! strong reference. A dropped client stops receiving messages immediately
//! (its handler no longer upgrades) and the periodic sweep removes the dead
//! table entries. Explicit unsubscribe stays the fast path; the sweep is the
//! backstop for owners which never got disposed.
//!
//! ## Per-topic match cache
//!
//! Pattern matching runs on every publish x subscription pair, so the first
//! publish of a concrete topic memoizes its matching subscriptions in the
//! `topics` map. Subscribe, unsubscribe, release, and sweep all maintain the
//! cached lists, keeping the publish hot path to one map lookup plus weak
//! upgrades.
//!
//! ## Fanout ordering
//!
//! Matching subscriptions are kept in subscription order (a monotonic
//! sequence assigned on insert). Within one publish, subscribers receive the
//! message in the order they subscribed; no ordering holds across
//! independent publishers.

use std::{cell::RefCell, rc::Rc};

use busbar_core::{UUID4, UnixMillis};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smallvec::SmallVec;
use strum::Display;
use ustr::Ustr;

use super::{
    HANDLER_BUFFER_CAP,
    envelope::{Message, MessageKind},
    handler::{ShareableHandler, WeakHandler},
    limiter::RateLimiter,
    matching::{CompiledPattern, SEGMENT_BUFFER_CAP},
    mstr::{MStr, Pattern, Topic},
    retained::RetainedStore,
    set_message_bus, switchboard,
    validate::{BusError, ErrorCode, validate_message, validate_pattern},
};
use crate::{
    clock::{Clock, WallClock},
    timer::{TimeEvent, TimeEventCallback},
};

/// The name of the periodic maintenance timer.
pub const SWEEP_TIMER_NAME: &str = "msgbus-sweep";

/// Process-wide bus configuration.
///
/// Serializes camelCase: the config crosses the wire in the `sys.ready`
/// announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BusConfig {
    /// Capacity of the retained store (zero disables retention).
    pub max_retained: usize,
    /// Upper bound on total encoded message size in bytes.
    pub max_message_size: usize,
    /// Upper bound on encoded payload size in bytes.
    pub max_payload_size: usize,
    /// Per-client messages per second (zero disables limiting).
    pub rate_limit: u32,
    /// Whether the bare `*` pattern is accepted on subscribe.
    pub allow_global_wildcard: bool,
    /// Sweep period in milliseconds (zero disables the sweep timer).
    pub cleanup_interval_ms: u64,
    /// Whether to emit verbose per-message diagnostics.
    pub debug: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_retained: 1_000,
            max_message_size: 1_048_576,
            max_payload_size: 524_288,
            rate_limit: 1_000,
            allow_global_wildcard: true,
            cleanup_interval_ms: 30_000,
            debug: false,
        }
    }
}

/// Bus counters surfaced via `sys.stats`.
///
/// The first six are monotonic; `subscriptions`, `clients`, and `retained`
/// are gauges filled at snapshot time.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub swept: u64,
    pub errors: u64,
    pub subscriptions: u64,
    pub clients: u64,
    pub retained: u64,
}

/// The bus lifecycle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum BusState {
    Uninitialized,
    Ready,
    Disposed,
}

/// Represents a subscription to a particular pattern.
///
/// This is an internal class intended to be used by the message bus to
/// organize patterns and their subscribers. At most one subscription exists
/// per `(client_id, pattern)` pair.
#[derive(Clone, Debug)]
pub struct Subscription {
    /// The logical client owning the subscription.
    pub client_id: Ustr,
    /// The subscribed pattern.
    pub pattern: MStr<Pattern>,
    /// Store a copy of the handler ID for logging and equality checks.
    pub handler_id: Ustr,
    /// The weakly-held delivery handler.
    pub handler: WeakHandler,
    pub(crate) compiled: CompiledPattern,
    pub(crate) seq: u64,
}

impl PartialEq for Subscription {
    fn eq(&self, other: &Self) -> bool {
        self.client_id == other.client_id && self.pattern == other.pattern
    }
}

impl Eq for Subscription {}

/// A record in the client directory, registered via `hello`.
#[derive(Clone, Debug)]
pub struct ClientRecord {
    /// The capabilities the client announced.
    pub capabilities: Vec<String>,
    /// When the client registered.
    pub registered: UnixMillis,
}

/// The in-process message bus: routing, retained store, rate limiting,
/// validation, and subscription lifecycle.
///
/// One bus exists per thread (see [`super::get_message_bus`]); clients reach
/// it through the free-function API without holding a direct reference.
#[derive(Debug)]
pub struct MessageBus {
    /// The instance ID associated with the message bus.
    pub instance_id: UUID4,
    /// The name for the message bus.
    pub name: String,
    config: BusConfig,
    clock: Rc<RefCell<dyn Clock>>,
    state: BusState,
    subscriptions: IndexMap<(Ustr, MStr<Pattern>), Subscription>,
    topics: IndexMap<MStr<Topic>, Vec<Subscription>>,
    retained: RetainedStore,
    limiter: RateLimiter,
    clients: IndexMap<Ustr, ClientRecord>,
    stats: BusStats,
    next_seq: u64,
}

impl Default for MessageBus {
    /// Creates a new default [`MessageBus`] instance on a wall clock.
    fn default() -> Self {
        Self::new(
            BusConfig::default(),
            Rc::new(RefCell::new(WallClock::new())),
        )
    }
}

impl MessageBus {
    /// Creates a new [`MessageBus`] instance.
    #[must_use]
    pub fn new(config: BusConfig, clock: Rc<RefCell<dyn Clock>>) -> Self {
        Self {
            instance_id: UUID4::new(),
            name: stringify!(MessageBus).to_owned(),
            retained: RetainedStore::new(config.max_retained),
            limiter: RateLimiter::new(config.rate_limit),
            config,
            clock,
            state: BusState::Uninitialized,
            subscriptions: IndexMap::new(),
            topics: IndexMap::new(),
            clients: IndexMap::new(),
            stats: BusStats::default(),
            next_seq: 0,
        }
    }

    /// Registers this message bus for the current thread.
    ///
    /// # Panics
    ///
    /// Panics if a message bus has already been registered for this thread.
    pub fn register_message_bus(self) -> Rc<RefCell<Self>> {
        let msgbus = Rc::new(RefCell::new(self));
        set_message_bus(msgbus.clone());
        msgbus
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub const fn state(&self) -> BusState {
        self.state
    }

    /// Returns whether the bus has announced readiness.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == BusState::Ready
    }

    /// Returns the bus configuration.
    #[must_use]
    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Returns the clock driving the bus.
    #[must_use]
    pub fn clock(&self) -> Rc<RefCell<dyn Clock>> {
        self.clock.clone()
    }

    /// Transitions the bus to ready, schedules the periodic sweep, and
    /// returns the `sys.ready` announcement for fanout.
    ///
    /// # Errors
    ///
    /// Returns an error if the bus was already started or disposed, or if the
    /// sweep timer cannot be scheduled.
    pub fn start(&mut self) -> anyhow::Result<Message> {
        match self.state {
            BusState::Uninitialized => {}
            BusState::Ready => anyhow::bail!("message bus already started"),
            BusState::Disposed => anyhow::bail!("message bus disposed"),
        }
        self.state = BusState::Ready;

        if self.config.cleanup_interval_ms > 0 {
            let callback = TimeEventCallback::from(|_: TimeEvent| super::sweep());
            self.clock.borrow_mut().set_timer_ms(
                SWEEP_TIMER_NAME,
                self.config.cleanup_interval_ms,
                None,
                None,
                callback,
            )?;
        }

        let data = json!({
            "enhanced": true,
            "config": serde_json::to_value(&self.config)?,
        });
        let message = self.new_system_message(switchboard::sys_ready(), data);
        self.stats.published += 1;

        log::info!("{} {} ready", self.name, self.instance_id);
        Ok(message)
    }

    /// Disposes the bus: cancels the sweep timer and clears all tables.
    pub fn dispose(&mut self) {
        if self.state == BusState::Disposed {
            return;
        }
        self.state = BusState::Disposed;
        self.clock.borrow_mut().cancel_timer(SWEEP_TIMER_NAME);
        self.subscriptions.clear();
        self.topics.clear();
        self.clients.clear();
        self.retained.clear();
        self.limiter.reset();
        log::info!("{} {} disposed", self.name, self.instance_id);
    }

    /// Validates, rate-limits, enriches, and optionally retains an ingress
    /// message.
    ///
    /// Returns the validated topic when the message should be fanned out;
    /// `Err(Some(_))` when it was dropped with a coded error, `Err(None)`
    /// when it was dropped silently (bus not ready).
    pub(crate) fn prepare(
        &mut self,
        message: &mut Message,
        kind: MessageKind,
    ) -> Result<MStr<Topic>, Option<BusError>> {
        if self.state != BusState::Ready {
            log::warn!(
                "Bus not ready ({}), dropping {kind:?} for topic '{}'",
                self.state,
                message.topic
            );
            self.stats.dropped += 1;
            return Err(None);
        }

        let topic = match validate_message(message, &self.config) {
            Ok(topic) => topic,
            Err(error) => {
                self.stats.dropped += 1;
                self.stats.errors += 1;
                return Err(Some(error));
            }
        };

        if let Some(client_id) = message.client_id {
            let now = self.clock.borrow().timestamp_ms();
            if !self.limiter.try_acquire(client_id, now) {
                self.stats.dropped += 1;
                self.stats.errors += 1;
                return Err(Some(BusError::new(
                    ErrorCode::RateLimitExceeded,
                    format!(
                        "client '{client_id}' exceeded {} msg/s",
                        self.config.rate_limit
                    ),
                )));
            }
        }

        if message.id.is_none() {
            message.id = Some(UUID4::new());
        }
        if message.timestamp.is_none() {
            message.timestamp = Some(self.clock.borrow().timestamp_ms());
        }

        if message.retain {
            self.stats.evicted += self.retained.insert(topic, message.clone());
        }

        self.stats.published += 1;

        if self.config.debug {
            log::debug!("{kind:?} '{topic}' id={:?}", message.id);
        } else {
            log::trace!("{kind:?} '{topic}'");
        }

        Ok(topic)
    }

    /// Creates an enriched bus-originated message (no client id, so exempt
    /// from rate limiting).
    pub(crate) fn new_system_message(&self, topic: MStr<Topic>, data: Value) -> Message {
        let mut message = Message::new(topic.as_ref(), data);
        message.id = Some(UUID4::new());
        message.timestamp = Some(self.clock.borrow().timestamp_ms());
        message
    }

    /// Finds the subscriptions with pattern matching the topic, in
    /// subscription order.
    fn find_topic_matches(&self, topic: MStr<Topic>) -> Vec<Subscription> {
        let segments: SmallVec<[&str; SEGMENT_BUFFER_CAP]> = topic.as_ref().split('.').collect();
        self.subscriptions
            .values()
            .filter(|sub| sub.compiled.matches_parts(topic.inner(), &segments))
            .cloned()
            .collect()
    }

    /// Finds the subscriptions which match the topic and caches the result in
    /// the `topics` map.
    #[must_use]
    pub fn matching_subscriptions(&mut self, topic: MStr<Topic>) -> Vec<Subscription> {
        if let Some(subs) = self.topics.get(&topic) {
            return subs.clone();
        }
        let mut matches = self.find_topic_matches(topic);
        matches.sort_by_key(|sub| sub.seq);
        self.topics.insert(topic, matches.clone());
        matches
    }

    /// Fills a buffer with live handlers matching a topic.
    pub(crate) fn fill_matching_handlers(
        &mut self,
        topic: MStr<Topic>,
        buf: &mut SmallVec<[ShareableHandler; HANDLER_BUFFER_CAP]>,
    ) {
        if !self.topics.contains_key(&topic) {
            let mut matches = self.find_topic_matches(topic);
            matches.sort_by_key(|sub| sub.seq);
            self.topics.insert(topic, matches);
        }

        if let Some(subs) = self.topics.get(&topic) {
            for sub in subs {
                // Dead owners are skipped here and reaped by the sweep
                if let Some(handler) = sub.handler.upgrade() {
                    buf.push(handler);
                }
            }
        }
    }

    /// Records a subscription, updating the cached topic matches.
    ///
    /// Returns `false` when the `(client_id, pattern)` pair already exists.
    pub(crate) fn subscribe_one(
        &mut self,
        client_id: Ustr,
        pattern: MStr<Pattern>,
        handler: &ShareableHandler,
    ) -> bool {
        let key = (client_id, pattern);
        if self.subscriptions.contains_key(&key) {
            log::warn!("Subscription for client '{client_id}' pattern '{pattern}' already exists");
            return false;
        }

        let sub = Subscription {
            client_id,
            pattern,
            handler_id: handler.id(),
            handler: handler.downgrade(),
            compiled: CompiledPattern::compile(pattern),
            seq: self.next_seq,
        };
        self.next_seq += 1;

        // The new seq is the highest, so appending keeps cached lists in
        // subscription order
        for (topic, subs) in &mut self.topics {
            if sub.compiled.matches(*topic) {
                subs.push(sub.clone());
            }
        }

        log::debug!("Subscribed client '{client_id}' to pattern '{pattern}'");
        self.subscriptions.insert(key, sub);
        true
    }

    /// Removes a `(client_id, pattern)` subscription from the routing table
    /// and the cached topic matches.
    pub(crate) fn unsubscribe_one(&mut self, client_id: Ustr, pattern: MStr<Pattern>) -> bool {
        let removed = self
            .subscriptions
            .shift_remove(&(client_id, pattern))
            .is_some();

        if removed {
            for subs in self.topics.values_mut() {
                subs.retain(|s| !(s.client_id == client_id && s.pattern == pattern));
            }
            log::debug!("Unsubscribed client '{client_id}' from pattern '{pattern}'");
        } else {
            log::debug!("No subscription for client '{client_id}' pattern '{pattern}'");
        }
        removed
    }

    /// Removes every subscription and the directory entry for a client,
    /// returning the number of subscriptions removed.
    pub(crate) fn release_client(&mut self, client_id: Ustr) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, sub| sub.client_id != client_id);
        let removed = before - self.subscriptions.len();

        if removed > 0 {
            for subs in self.topics.values_mut() {
                subs.retain(|s| s.client_id != client_id);
            }
        }
        self.clients.shift_remove(&client_id);
        removed
    }

    /// Registers a client in the directory.
    pub(crate) fn hello(&mut self, client_id: Ustr, capabilities: Vec<String>) {
        let registered = self.clock.borrow().timestamp_ms();
        log::debug!("Client '{client_id}' registered with capabilities {capabilities:?}");
        self.clients.insert(
            client_id,
            ClientRecord {
                capabilities,
                registered,
            },
        );
    }

    /// Removes retained entries matching the pattern, or all if absent.
    ///
    /// # Errors
    ///
    /// Returns a `SUBSCRIPTION_INVALID` error for a malformed pattern.
    pub(crate) fn clear_retained(&mut self, pattern: Option<Ustr>) -> Result<usize, BusError> {
        match pattern {
            None => Ok(self.retained.clear()),
            Some(raw) => {
                // Policy gating applies to subscriptions, not clearing
                let pattern = validate_pattern(raw, true)?;
                Ok(self
                    .retained
                    .clear_matching(&CompiledPattern::compile(pattern)))
            }
        }
    }

    /// Collects retained messages matching any of the patterns, in insertion
    /// order.
    pub(crate) fn collect_retained(&self, patterns: &[CompiledPattern]) -> Vec<Message> {
        self.retained.matching(patterns)
    }

    /// Walks the subscription table dropping entries whose owner has gone
    /// away, and decays idle rate-limit buckets.
    ///
    /// Returns `(subscriptions reaped, rate buckets reclaimed)`.
    pub fn sweep(&mut self) -> (usize, usize) {
        let now = self.clock.borrow().timestamp_ms();

        let before = self.subscriptions.len();
        self.subscriptions.retain(|_, sub| sub.handler.is_alive());
        let reaped = before - self.subscriptions.len();

        if reaped > 0 {
            for subs in self.topics.values_mut() {
                subs.retain(|s| s.handler.is_alive());
            }
        }

        let grace_ms = match self.config.cleanup_interval_ms {
            0 => 60_000,
            interval => interval.saturating_mul(2),
        };
        let buckets = self.limiter.sweep(now, grace_ms);

        self.stats.swept += reaped as u64;
        if reaped > 0 || buckets > 0 {
            log::debug!("Sweep reaped {reaped} subscriptions, reclaimed {buckets} rate buckets");
        }
        (reaped, buckets)
    }

    /// Returns the bus counters with the gauge fields filled.
    #[must_use]
    pub fn stats_snapshot(&self) -> BusStats {
        let mut stats = self.stats.clone();
        stats.subscriptions = self.subscriptions.len() as u64;
        stats.clients = self.clients.len() as u64;
        stats.retained = self.retained.len() as u64;
        stats
    }

    pub(crate) fn bump_delivered(&mut self, count: u64) {
        self.stats.delivered += count;
    }

    pub(crate) fn bump_errors(&mut self, count: u64) {
        self.stats.errors += count;
    }

    pub(crate) fn bump_published(&mut self, count: u64) {
        self.stats.published += count;
    }

    /// Returns actively subscribed patterns.
    #[must_use]
    pub fn patterns(&self) -> Vec<&str> {
        self.subscriptions
            .values()
            .map(|sub| sub.pattern.as_ref())
            .collect()
    }

    /// Returns active subscriptions.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<&Subscription> {
        self.subscriptions.values().collect()
    }

    /// Returns the registered client ids.
    #[must_use]
    pub fn clients(&self) -> Vec<&str> {
        self.clients.keys().map(Ustr::as_str).collect()
    }

    /// Returns the directory record for a client.
    #[must_use]
    pub fn get_client(&self, client_id: &Ustr) -> Option<&ClientRecord> {
        self.clients.get(client_id)
    }

    /// Returns whether there are live subscriptions matching the topic.
    #[must_use]
    pub fn has_subscribers<T: AsRef<str>>(&self, topic: T) -> bool {
        self.subscriptions_count(topic) > 0
    }

    /// Returns the count of subscriptions matching the topic.
    ///
    /// # Panics
    ///
    /// Panics if the topic is not a valid topic string.
    #[must_use]
    pub fn subscriptions_count<T: AsRef<str>>(&self, topic: T) -> usize {
        let topic = MStr::<Topic>::topic(topic).expect(busbar_core::correctness::FAILED);
        self.find_topic_matches(topic).len()
    }

    /// Returns whether the client is subscribed to the pattern.
    #[must_use]
    pub fn is_subscribed<T: AsRef<str>>(&self, client_id: Ustr, pattern: T) -> bool {
        self.subscriptions
            .contains_key(&(client_id, MStr::pattern(pattern)))
    }

    /// Returns the retained message for the topic, if any.
    #[must_use]
    pub fn retained_message(&self, topic: MStr<Topic>) -> Option<Message> {
        self.retained.get(&topic).cloned()
    }
}
