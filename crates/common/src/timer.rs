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

//! Named timers and the time events they produce.

use std::{fmt::Debug, rc::Rc};

use busbar_core::{UUID4, UnixMillis, correctness::check_positive_u64};
use ustr::Ustr;

/// A time event produced by a named timer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeEvent {
    /// The name of the timer which produced the event.
    pub name: Ustr,
    /// The unique identifier for the event.
    pub event_id: UUID4,
    /// The time the event was scheduled to occur.
    pub ts_event: UnixMillis,
}

impl TimeEvent {
    /// Creates a new [`TimeEvent`] instance.
    #[must_use]
    pub const fn new(name: Ustr, event_id: UUID4, ts_event: UnixMillis) -> Self {
        Self {
            name,
            event_id,
            ts_event,
        }
    }
}

/// A reference-counted callback invoked with each fired [`TimeEvent`].
#[derive(Clone)]
pub struct TimeEventCallback(Rc<dyn Fn(TimeEvent)>);

impl TimeEventCallback {
    /// Invokes the callback with the event.
    pub fn call(&self, event: TimeEvent) {
        (self.0)(event);
    }
}

impl<F: Fn(TimeEvent) + 'static> From<F> for TimeEventCallback {
    fn from(callback: F) -> Self {
        Self(Rc::new(callback))
    }
}

impl Debug for TimeEventCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(<fn>)", stringify!(TimeEventCallback))
    }
}

/// Pairs a fired event with its timer's callback, ready to run once the clock
/// borrow has been released.
#[derive(Clone, Debug)]
pub struct TimeEventHandler {
    /// The fired event.
    pub event: TimeEvent,
    /// The callback registered for the timer.
    pub callback: TimeEventCallback,
}

impl TimeEventHandler {
    /// Runs the callback with the event.
    pub fn run(self) {
        self.callback.call(self.event);
    }
}

/// A named timer advanced manually by its owning clock.
///
/// A zero interval models a one-shot alert which fires once at `next_time`;
/// a positive interval fires repeatedly until the optional stop time.
#[derive(Clone, Debug)]
pub struct TestTimer {
    /// The timer name.
    pub name: Ustr,
    /// The firing interval (zero for one-shot alerts).
    pub interval_ms: u64,
    /// The optional time the timer stops firing.
    pub stop_time: Option<UnixMillis>,
    next_time: UnixMillis,
    is_expired: bool,
}

impl TestTimer {
    /// Creates a new repeating [`TestTimer`] instance.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval_ms` is not positive.
    pub fn new(
        name: Ustr,
        interval_ms: u64,
        start_time: UnixMillis,
        stop_time: Option<UnixMillis>,
    ) -> anyhow::Result<Self> {
        check_positive_u64(interval_ms, stringify!(interval_ms))?;

        Ok(Self {
            name,
            interval_ms,
            stop_time,
            next_time: start_time + interval_ms,
            is_expired: false,
        })
    }

    /// Creates a one-shot [`TestTimer`] which fires once at `alert_time`.
    #[must_use]
    pub const fn new_alert(name: Ustr, alert_time: UnixMillis) -> Self {
        Self {
            name,
            interval_ms: 0,
            stop_time: Some(alert_time),
            next_time: alert_time,
            is_expired: false,
        }
    }

    /// Returns the next time the timer will fire.
    #[must_use]
    pub const fn next_time(&self) -> UnixMillis {
        self.next_time
    }

    /// Returns whether the timer has finished firing.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        self.is_expired
    }

    /// Advances the timer to `to_time`, collecting every due event.
    pub fn advance(&mut self, to_time: UnixMillis) -> Vec<TimeEvent> {
        let mut events = Vec::new();

        while !self.is_expired && self.next_time <= to_time {
            events.push(TimeEvent::new(self.name, UUID4::new(), self.next_time));

            if self.interval_ms == 0 {
                self.is_expired = true;
                break;
            }

            self.next_time += self.interval_ms;

            if let Some(stop_time) = self.stop_time
                && self.next_time > stop_time
            {
                self.is_expired = true;
            }
        }

        events
    }
}
