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

//! The logging framework for the busbar runtime.
//!
//! Every module logs through the `log` facade; this module installs the
//! backend. Initialization is lazy: the first bus start configures the
//! logger from the `BUSBAR_LOG` environment variable, falling back to INFO
//! on stdout.

pub mod config;
pub mod logger;

use std::{
    env,
    sync::atomic::{AtomicBool, Ordering},
};

pub use self::{config::LoggerConfig, logger::Logger};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Returns whether the logging subsystem has been initialized.
pub fn logging_is_initialized() -> bool {
    LOGGING_INITIALIZED.load(Ordering::Relaxed)
}

/// Ensures logging is initialized on first use.
///
/// If `BUSBAR_LOG` is set, initializes the logger with the parsed config;
/// otherwise with the default (INFO to stdout). If another logger was
/// already installed the existing one is left in place.
pub fn ensure_logging_initialized() -> bool {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return true;
    }

    let config = env::var("BUSBAR_LOG")
        .ok()
        .and_then(|spec| LoggerConfig::from_spec(&spec).ok())
        .unwrap_or_default();

    // A failure means a logger is already installed, which is fine
    let _ = Logger::init_with_config(config);
    true
}
