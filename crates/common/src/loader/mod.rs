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

//! Progressive autoloading of undefined custom-element tags.
//!
//! The host reports discovered elements and viewport proximity; the
//! [`Autoloader`] resolves each undefined tag to a module location through a
//! precedence pipeline, loads it at most once, and binds the exported
//! constructor into the host's element registry.

pub mod autoloader;
pub mod config;
pub mod host;
pub mod resolve;

pub use self::{
    autoloader::{Autoloader, TagState, is_custom_tag},
    config::{LoaderConfig, Resolution, ResolverFn},
    host::{
        DiscoveredElement, ElementCtor, ElementRegistry, LoadError, ModuleExports, ModuleLoader,
        ViewportObserver,
    },
    resolve::resolve_location,
};
