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

//! Module location resolution: a pipeline of fallbacks with declared
//! precedence.
//!
//! 1. Per-element override, if present.
//! 2. Custom resolver callback, if it returns a non-sentinel result.
//! 3. Explicit `component_paths` mapping.
//! 4. Default template: `{base_url}{components_path}{tag}{extension}`.

use ustr::Ustr;

use super::config::{LoaderConfig, Resolution};

/// Resolves the module location for a tag.
#[must_use]
pub fn resolve_location(
    tag: &str,
    module_override: Option<&str>,
    config: &LoaderConfig,
) -> String {
    if let Some(location) = module_override {
        return location.to_string();
    }

    if let Some(resolver) = &config.resolver
        && let Resolution::Location(location) = resolver(tag)
    {
        return location;
    }

    if let Some(location) = config.component_paths.get(&Ustr::from(tag)) {
        return location.clone();
    }

    format!(
        "{}{}{tag}{}",
        config.base_url.as_deref().unwrap_or(""),
        config.components_path,
        config.extension
    )
}
