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

//! Core primitives shared across the busbar workspace.
//!
//! This crate carries no messaging logic of its own; it provides the
//! identifier, time, and contract-check building blocks the bus and its
//! clients are assembled from:
//!
//! - [`uuid`]: `UUID4` identifiers for messages, correlations, and clients.
//! - [`time`]: `UnixMillis` millisecond timestamps (the wire contract's unit).
//! - [`correctness`]: design-by-contract condition checks.

pub mod correctness;
pub mod time;
pub mod uuid;

pub use crate::{time::UnixMillis, uuid::UUID4};
