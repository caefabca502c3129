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

//! Host-environment seams for the autoloader.
//!
//! The autoloader owns the per-tag policy (discovery, precedence, at-most-once
//! loading); the host provides the element registry, the module importer, and
//! viewport-proximity notifications through these traits. Between host
//! notifications the autoloader does no work of its own - no polling.

use std::{any::Any, fmt::Debug, rc::Rc};

use thiserror::Error;
use ustr::Ustr;

/// An opaque element constructor exported by a module.
pub type ElementCtor = Rc<dyn Any>;

/// What a loaded module exposes to the autoloader.
pub enum ModuleExports {
    /// A default constructor export; the autoloader registers it under the
    /// tag.
    Constructor(ElementCtor),
    /// The module registered the tag itself as an import side effect; the
    /// autoloader does nothing further.
    SelfRegistering,
}

impl Debug for ModuleExports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constructor(_) => write!(f, "Constructor(..)"),
            Self::SelfRegistering => write!(f, "SelfRegistering"),
        }
    }
}

/// Failure modes when importing a module.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error("module not found at '{0}'")]
    NotFound(String),
    #[error("module at '{0}' failed to initialize: {1}")]
    InitFailed(String, String),
}

/// The host's element definition registry.
pub trait ElementRegistry {
    /// Returns whether the tag already has a definition.
    fn is_defined(&self, tag: &str) -> bool;

    /// Binds the tag to the constructor.
    ///
    /// # Errors
    ///
    /// Returns an error if the tag is already defined or the constructor is
    /// rejected.
    fn define(&mut self, tag: &str, ctor: ElementCtor) -> anyhow::Result<()>;
}

/// Imports a module from a resolved location.
pub trait ModuleLoader {
    /// Imports the module, returning what it exposes.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] when the module cannot be fetched or fails to
    /// initialize.
    fn load(&mut self, location: &str) -> Result<ModuleExports, LoadError>;
}

/// Registers tags for viewport-proximity notifications.
///
/// The host reports back through
/// [`Autoloader::element_near_viewport`](super::Autoloader::element_near_viewport)
/// once an observed element comes within the margin.
pub trait ViewportObserver {
    /// Begins observing the tag with the given proximity margin in pixels.
    fn observe(&mut self, tag: Ustr, root_margin: u32);

    /// Stops observing the tag.
    fn unobserve(&mut self, tag: Ustr);
}

/// An element discovered in the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredElement {
    /// The element's tag name.
    pub tag: Ustr,
    /// Explicit module location carried on the element, taking precedence
    /// over every other resolution source.
    pub module_override: Option<String>,
}

impl DiscoveredElement {
    /// Creates a new [`DiscoveredElement`] instance.
    #[must_use]
    pub fn new<T: AsRef<str>>(tag: T) -> Self {
        Self {
            tag: Ustr::from(tag.as_ref()),
            module_override: None,
        }
    }

    /// Attaches a per-element module location override.
    #[must_use]
    pub fn with_override<S: Into<String>>(mut self, location: S) -> Self {
        self.module_override = Some(location.into());
        self
    }
}
