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

//! The `log`-facade backend: a synchronous, ANSI-colored line writer.
//!
//! The runtime is single-threaded by contract, so there is no writer thread
//! or flush channel; records go straight to stdout.

use std::io::Write;

use chrono::Utc;
use log::{Level, LevelFilter, Log, Metadata, Record};

use super::config::LoggerConfig;

/// The busbar logger implementation.
#[derive(Debug)]
pub struct Logger {
    config: LoggerConfig,
}

impl Logger {
    /// Installs the logger with the given config.
    ///
    /// # Errors
    ///
    /// Returns an error if another logger is already installed.
    pub fn init_with_config(config: LoggerConfig) -> anyhow::Result<()> {
        if config.print_config {
            println!("{config:?}");
        }

        let max_level = config.max_level();
        log::set_boxed_logger(Box::new(Self { config }))
            .map_err(|e| anyhow::anyhow!("failed to set logger: {e}"))?;
        log::set_max_level(max_level);
        Ok(())
    }

    pub(crate) fn effective_level(&self, target: &str) -> LevelFilter {
        for (prefix, level) in &self.config.module_level {
            if target.starts_with(prefix.as_str()) {
                return *level;
            }
        }
        self.config.stdout_level
    }

    fn color_code(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1b[31m",
            Level::Warn => "\x1b[33m",
            Level::Info => "\x1b[32m",
            Level::Debug => "\x1b[36m",
            Level::Trace => "\x1b[90m",
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.effective_level(metadata.target())
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ");
        let level = record.level();
        let target = record.target();

        if self.config.is_colored {
            let color = Self::color_code(level);
            println!(
                "{timestamp} {color}[{level}]\x1b[0m {target}: {}",
                record.args()
            );
        } else {
            println!("{timestamp} [{level}] {target}: {}", record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stdout().flush();
    }
}
