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

//! Clocks driving every time-dependent behavior in the runtime.
//!
//! Nothing in the bus reads system time directly; the periodic sweep and
//! request timeouts are named timers on a [`Clock`]. [`TestClock`] is advanced
//! manually and fires deterministically; [`WallClock`] reads system time and
//! fires due timers when the host loop polls [`WallClock::fire_due`]. Both
//! stay within the single-threaded cooperative contract - no timer ever fires
//! from another thread.

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap},
    fmt::Debug,
    rc::Rc,
    time::{SystemTime, UNIX_EPOCH},
};

use busbar_core::UnixMillis;
use ustr::Ustr;

use crate::timer::{TestTimer, TimeEvent, TimeEventCallback, TimeEventHandler};

/// A clock with named one-shot alerts and repeating timers.
pub trait Clock: Debug {
    /// Returns the current timestamp in milliseconds since the UNIX epoch.
    fn timestamp_ms(&self) -> UnixMillis;

    /// Returns the names of the active timers.
    fn timer_names(&self) -> Vec<&str>;

    /// Returns the count of active timers.
    fn timer_count(&self) -> usize;

    /// Returns whether a timer with the given name is active.
    fn timer_exists(&self, name: &str) -> bool {
        self.timer_names().contains(&name)
    }

    /// Sets a one-shot alert to fire at `alert_time_ms`.
    ///
    /// An alert time at or before the current time fires on the next poll or
    /// advance. Any existing timer under the same name is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns an error if the timer cannot be scheduled.
    fn set_time_alert_ms(
        &mut self,
        name: &str,
        alert_time_ms: UnixMillis,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()>;

    /// Sets a repeating timer firing every `interval_ms` from `start_time_ms`
    /// (defaults to now) until the optional stop time.
    ///
    /// Any existing timer under the same name is cancelled first.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval_ms` is not positive.
    fn set_timer_ms(
        &mut self,
        name: &str,
        interval_ms: u64,
        start_time_ms: Option<UnixMillis>,
        stop_time_ms: Option<UnixMillis>,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()>;

    /// Returns the next fire time for the timer, if it exists.
    fn next_time_ms(&self, name: &str) -> Option<UnixMillis>;

    /// Cancels the timer with the given name.
    fn cancel_timer(&mut self, name: &str);

    /// Cancels all timers.
    fn cancel_timers(&mut self);
}

/// Shared timer table for both clock implementations.
#[derive(Debug, Default)]
struct TimerTable {
    // BTreeMap for stable ordering when scanning timers on advance
    timers: BTreeMap<Ustr, TestTimer>,
    callbacks: HashMap<Ustr, TimeEventCallback>,
}

impl TimerTable {
    fn set_alert(&mut self, name: &str, alert_time: UnixMillis, callback: TimeEventCallback) {
        let name = Ustr::from(name);
        self.timers.insert(name, TestTimer::new_alert(name, alert_time));
        self.callbacks.insert(name, callback);
    }

    fn set_timer(
        &mut self,
        name: &str,
        interval_ms: u64,
        start_time: UnixMillis,
        stop_time: Option<UnixMillis>,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()> {
        let name = Ustr::from(name);
        let timer = TestTimer::new(name, interval_ms, start_time, stop_time)?;
        self.timers.insert(name, timer);
        self.callbacks.insert(name, callback);
        Ok(())
    }

    /// Advances all timers to `to_time`, dropping expired ones and returning
    /// the fired events sorted by event time.
    fn advance(&mut self, to_time: UnixMillis) -> Vec<TimeEvent> {
        let mut events = Vec::new();
        self.timers.retain(|_, timer| {
            events.extend(timer.advance(to_time));
            !timer.is_expired()
        });
        self.callbacks
            .retain(|name, _| self.timers.contains_key(name));

        events.sort_by(|a, b| a.ts_event.cmp(&b.ts_event));
        events
    }

    fn match_callbacks(&self, events: Vec<TimeEvent>) -> Vec<TimeEventHandler> {
        events
            .into_iter()
            .filter_map(|event| {
                self.callbacks.get(&event.name).map(|callback| TimeEventHandler {
                    event,
                    callback: callback.clone(),
                })
            })
            .collect()
    }

    fn cancel(&mut self, name: &str) {
        let name = Ustr::from(name);
        self.timers.remove(&name);
        self.callbacks.remove(&name);
    }

    fn cancel_all(&mut self) {
        self.timers.clear();
        self.callbacks.clear();
    }
}

/// A manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct TestClock {
    time: UnixMillis,
    table: TimerTable,
}

impl TestClock {
    /// Creates a new [`TestClock`] instance at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the internal clock without firing timers.
    pub fn set_time(&mut self, to_time: UnixMillis) {
        self.time = to_time;
    }

    /// Advances the clock to `to_time` and collects every fired event.
    ///
    /// Callbacks are *not* invoked here; pair the events with callbacks via
    /// [`TestClock::match_callbacks`] and run them after releasing the clock
    /// borrow (see [`advance_and_fire`]).
    ///
    /// # Panics
    ///
    /// Panics if `to_time` is earlier than the current time.
    pub fn advance_time(&mut self, to_time: UnixMillis, set_time: bool) -> Vec<TimeEvent> {
        assert!(
            to_time >= self.time,
            "`to_time` {to_time} was < current time {}",
            self.time
        );

        if set_time {
            self.time = to_time;
        }

        self.table.advance(to_time)
    }

    /// Pairs fired events with their registered callbacks.
    #[must_use]
    pub fn match_callbacks(&self, events: Vec<TimeEvent>) -> Vec<TimeEventHandler> {
        self.table.match_callbacks(events)
    }
}

impl Clock for TestClock {
    fn timestamp_ms(&self) -> UnixMillis {
        self.time
    }

    fn timer_names(&self) -> Vec<&str> {
        self.table.timers.keys().map(Ustr::as_str).collect()
    }

    fn timer_count(&self) -> usize {
        self.table.timers.len()
    }

    fn set_time_alert_ms(
        &mut self,
        name: &str,
        alert_time_ms: UnixMillis,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()> {
        self.table.set_alert(name, alert_time_ms, callback);
        Ok(())
    }

    fn set_timer_ms(
        &mut self,
        name: &str,
        interval_ms: u64,
        start_time_ms: Option<UnixMillis>,
        stop_time_ms: Option<UnixMillis>,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()> {
        let start_time = start_time_ms.unwrap_or(self.time);
        self.table
            .set_timer(name, interval_ms, start_time, stop_time_ms, callback)
    }

    fn next_time_ms(&self, name: &str) -> Option<UnixMillis> {
        self.table
            .timers
            .get(&Ustr::from(name))
            .map(TestTimer::next_time)
    }

    fn cancel_timer(&mut self, name: &str) {
        self.table.cancel(name);
    }

    fn cancel_timers(&mut self) {
        self.table.cancel_all();
    }
}

/// Advances the clock and runs every fired callback.
///
/// The clock borrow is released before callbacks run, so callbacks may
/// re-enter the clock (cancelling or scheduling timers) and the bus.
pub fn advance_and_fire(clock: &Rc<RefCell<TestClock>>, to_time: UnixMillis) {
    let events = clock.borrow_mut().advance_time(to_time, true);
    let handlers = clock.borrow().match_callbacks(events);
    for handler in handlers {
        handler.run();
    }
}

/// A clock reading system time.
///
/// Timers fire cooperatively: the host loop calls [`WallClock::fire_due`]
/// between events, which runs every callback whose fire time has passed.
#[derive(Debug, Default)]
pub struct WallClock {
    table: TimerTable,
}

impl WallClock {
    /// Creates a new [`WallClock`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects every timer due at the current wall time, ready to run.
    #[must_use]
    pub fn take_due(&mut self) -> Vec<TimeEventHandler> {
        let now = self.timestamp_ms();
        let events = self.table.advance(now);
        self.table.match_callbacks(events)
    }

    /// Runs every timer due at the current wall time.
    ///
    /// The clock reference is the shared handle so the borrow can be released
    /// before callbacks run.
    pub fn fire_due(clock: &Rc<RefCell<Self>>) {
        let handlers = clock.borrow_mut().take_due();
        for handler in handlers {
            handler.run();
        }
    }
}

impl Clock for WallClock {
    fn timestamp_ms(&self) -> UnixMillis {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        UnixMillis::new(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    fn timer_names(&self) -> Vec<&str> {
        self.table.timers.keys().map(Ustr::as_str).collect()
    }

    fn timer_count(&self) -> usize {
        self.table.timers.len()
    }

    fn set_time_alert_ms(
        &mut self,
        name: &str,
        alert_time_ms: UnixMillis,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()> {
        self.table.set_alert(name, alert_time_ms, callback);
        Ok(())
    }

    fn set_timer_ms(
        &mut self,
        name: &str,
        interval_ms: u64,
        start_time_ms: Option<UnixMillis>,
        stop_time_ms: Option<UnixMillis>,
        callback: TimeEventCallback,
    ) -> anyhow::Result<()> {
        let start_time = start_time_ms.unwrap_or_else(|| self.timestamp_ms());
        self.table
            .set_timer(name, interval_ms, start_time, stop_time_ms, callback)
    }

    fn next_time_ms(&self, name: &str) -> Option<UnixMillis> {
        self.table
            .timers
            .get(&Ustr::from(name))
            .map(TestTimer::next_time)
    }

    fn cancel_timer(&mut self, name: &str) {
        self.table.cancel(name);
    }

    fn cancel_timers(&mut self) {
        self.table.cancel_all();
    }
}
