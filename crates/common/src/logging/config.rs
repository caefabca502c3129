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

//! Logging configuration and spec-string parsing.
//!
//! The `BUSBAR_LOG` environment variable uses a semicolon-separated format:
//!
//! ```text
//! stdout=Info;busbar_common::msgbus=Debug;is_colored=false
//! ```
//!
//! | Key              | Type      | Description                                 |
//! |------------------|-----------|---------------------------------------------|
//! | `stdout`         | Log level | Maximum level for stdout output.            |
//! | `is_colored`     | Boolean   | Enable ANSI colors (default: true).         |
//! | `print_config`   | Boolean   | Print config to stdout at startup.          |
//! | `<module::path>` | Log level | Module-specific log level (prefix match).   |
//!
//! Log levels are case-insensitive (`Off`, `Error`, `Warn`, `Info`, `Debug`,
//! `Trace`). Booleans accept bare flags (`is_colored`) or explicit values
//! (`is_colored=false`, `is_colored=0`, `is_colored=no`).

use std::str::FromStr;

use ahash::AHashMap;
use log::LevelFilter;
use ustr::Ustr;

/// Configuration for the busbar logger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Maximum log level for stdout output.
    pub stdout_level: LevelFilter,
    /// Per-module path log level overrides (prefix match).
    pub module_level: AHashMap<Ustr, LevelFilter>,
    /// Use ANSI color codes in output.
    pub is_colored: bool,
    /// Print configuration to stdout at startup.
    pub print_config: bool,
}

impl Default for LoggerConfig {
    /// Creates a new default [`LoggerConfig`] instance.
    fn default() -> Self {
        Self {
            stdout_level: LevelFilter::Info,
            module_level: AHashMap::new(),
            is_colored: true,
            print_config: false,
        }
    }
}

impl LoggerConfig {
    /// Parses a [`LoggerConfig`] from a spec string.
    ///
    /// # Errors
    ///
    /// Returns an error on an unrecognized level or boolean value.
    pub fn from_spec(spec: &str) -> anyhow::Result<Self> {
        let mut config = Self::default();

        for term in spec.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match term.split_once('=') {
                Some((key, value)) => match key.trim() {
                    "stdout" => config.stdout_level = parse_level(value)?,
                    "is_colored" => config.is_colored = parse_bool(value)?,
                    "print_config" => config.print_config = parse_bool(value)?,
                    module => {
                        config
                            .module_level
                            .insert(Ustr::from(module), parse_level(value)?);
                    }
                },
                None => match term {
                    "is_colored" => config.is_colored = true,
                    "print_config" => config.print_config = true,
                    flag => anyhow::bail!("unrecognized bare flag '{flag}' in log spec"),
                },
            }
        }

        Ok(config)
    }

    /// Returns the most verbose level the config can emit at.
    #[must_use]
    pub fn max_level(&self) -> LevelFilter {
        self.module_level
            .values()
            .copied()
            .chain(std::iter::once(self.stdout_level))
            .max()
            .unwrap_or(LevelFilter::Info)
    }
}

fn parse_level(value: &str) -> anyhow::Result<LevelFilter> {
    LevelFilter::from_str(value.trim())
        .map_err(|_| anyhow::anyhow!("invalid log level '{value}'"))
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => anyhow::bail!("invalid boolean '{other}' in log spec"),
    }
}
