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

//! Autoloader configuration.

use std::{fmt::Debug, rc::Rc};

use ahash::AHashMap;
use ustr::Ustr;

/// The outcome of a custom resolver callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Load the module from this location.
    Location(String),
    /// Sentinel: fall through to the next resolution source.
    Default,
}

/// A custom resolver callback, taking a tag name.
pub type ResolverFn = Rc<dyn Fn(&str) -> Resolution>;

/// Configuration for the [`Autoloader`](super::Autoloader).
#[derive(Clone)]
pub struct LoaderConfig {
    /// Optional remote origin modules are fetched from.
    pub base_url: Option<String>,
    /// Relative path applied after `base_url`.
    pub components_path: String,
    /// Module file extension.
    pub extension: String,
    /// Proximity-to-viewport threshold in pixels for deferring loads.
    pub root_margin: u32,
    /// Explicit tag -> module location mapping, overriding default
    /// resolution.
    pub component_paths: AHashMap<Ustr, String>,
    /// Optional custom resolver, consulted before `component_paths`.
    pub resolver: Option<ResolverFn>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            components_path: "components/".to_string(),
            extension: ".js".to_string(),
            root_margin: 600,
            component_paths: AHashMap::new(),
            resolver: None,
        }
    }
}

impl Debug for LoaderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(LoaderConfig))
            .field("base_url", &self.base_url)
            .field("components_path", &self.components_path)
            .field("extension", &self.extension)
            .field("root_margin", &self.root_margin)
            .field("component_paths", &self.component_paths)
            .field("resolver", &self.resolver.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
