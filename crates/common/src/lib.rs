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

//! The busbar runtime: message bus, client facade, and component autoloader.
//!
//! A page hosts one bus instance per thread; components reach it through
//! [`client::BusClient`] facades without holding a direct reference. The
//! [`loader::Autoloader`] discovers not-yet-defined component tags and
//! resolves them to loadable modules on demand.
//!
//! The whole runtime is single-threaded and cooperative: every bus operation
//! runs to completion without interleaving, and anything time-driven (the
//! periodic sweep, request timeouts) goes through the [`clock::Clock`]
//! abstraction rather than an async runtime.

pub mod client;
pub mod clock;
pub mod loader;
pub mod logging;
pub mod msgbus;
pub mod timer;
