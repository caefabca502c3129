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

//! The autoloader: progressive resolution of undefined tags to loadable
//! modules.
//!
//! Per tag the loader walks `undiscovered -> pending -> loading -> defined |
//! failed`. Discovery happens on the initial scan and on host mutation
//! notifications; a pending tag becomes a load candidate once the host
//! reports it near the viewport. Each tag loads at most once; a failed tag
//! stays undefined and is retried only when the element is re-added or a
//! reload is requested explicitly.

use ahash::AHashMap;
use strum::{Display, EnumString};
use ustr::Ustr;

use super::{
    config::LoaderConfig,
    host::{DiscoveredElement, ElementRegistry, ModuleExports, ModuleLoader, ViewportObserver},
    resolve::resolve_location,
};

/// The lifecycle state of a discovered tag.
///
/// Undiscovered tags have no state entry at all.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TagState {
    /// Discovered and registered with the viewport observer.
    Pending,
    /// A load is in flight; concurrent candidates share it.
    Loading,
    /// The tag has a definition in the host registry.
    Defined,
    /// The load failed; the tag stays undefined.
    Failed,
}

#[derive(Clone, Debug)]
struct TagEntry {
    state: TagState,
    module_override: Option<String>,
}

/// Returns whether the tag names a custom element (contains a hyphen).
#[must_use]
pub fn is_custom_tag(tag: &str) -> bool {
    tag.contains('-')
}

/// Viewport-aware progressive loader for undefined custom-element tags.
pub struct Autoloader<R, L, V>
where
    R: ElementRegistry,
    L: ModuleLoader,
    V: ViewportObserver,
{
    config: LoaderConfig,
    registry: R,
    loader: L,
    observer: V,
    tags: AHashMap<Ustr, TagEntry>,
}

impl<R, L, V> Autoloader<R, L, V>
where
    R: ElementRegistry,
    L: ModuleLoader,
    V: ViewportObserver,
{
    /// Creates a new [`Autoloader`] instance.
    #[must_use]
    pub fn new(config: LoaderConfig, registry: R, loader: L, observer: V) -> Self {
        Self {
            config,
            registry,
            loader,
            observer,
            tags: AHashMap::new(),
        }
    }

    /// Returns the loader configuration.
    #[must_use]
    pub const fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Returns the host element registry.
    #[must_use]
    pub const fn registry(&self) -> &R {
        &self.registry
    }

    /// Returns the state for a tag, or `None` if undiscovered.
    #[must_use]
    pub fn state(&self, tag: &Ustr) -> Option<TagState> {
        self.tags.get(tag).map(|entry| entry.state)
    }

    /// Considers every element of an initial document scan.
    pub fn scan<I: IntoIterator<Item = DiscoveredElement>>(&mut self, elements: I) {
        for element in elements {
            self.element_added(&element);
        }
    }

    /// Considers a newly added element (the host's mutation notification).
    ///
    /// Re-adding an element whose tag previously failed re-admits it for
    /// loading.
    pub fn element_added(&mut self, element: &DiscoveredElement) {
        let tag = element.tag;
        if !is_custom_tag(tag.as_str()) {
            return;
        }
        if self.registry.is_defined(tag.as_str()) {
            return;
        }

        match self.tags.get_mut(&tag) {
            None => {
                log::debug!("Discovered undefined tag '{tag}'");
                self.tags.insert(
                    tag,
                    TagEntry {
                        state: TagState::Pending,
                        module_override: element.module_override.clone(),
                    },
                );
                self.observer.observe(tag, self.config.root_margin);
            }
            Some(entry) => match entry.state {
                TagState::Failed => {
                    log::debug!("Tag '{tag}' re-added after failure, retrying");
                    entry.state = TagState::Pending;
                    if element.module_override.is_some() {
                        entry.module_override = element.module_override.clone();
                    }
                    self.observer.observe(tag, self.config.root_margin);
                }
                _ => {
                    // Already tracked; pick up an override the first sighting lacked
                    if entry.module_override.is_none() && element.module_override.is_some() {
                        entry.module_override = element.module_override.clone();
                    }
                }
            },
        }
    }

    /// Admits a pending tag for loading (the host's viewport-proximity
    /// notification).
    ///
    /// Loading, defined, and failed tags are left alone - in-flight loads
    /// are shared and each tag loads at most once.
    pub fn element_near_viewport(&mut self, tag: Ustr) {
        if self.state(&tag) == Some(TagState::Pending) {
            self.load_tag(tag);
        }
    }

    /// Re-attempts a failed tag immediately.
    pub fn reload(&mut self, tag: Ustr) {
        match self.state(&tag) {
            Some(TagState::Failed) => {
                log::debug!("Reload requested for '{tag}'");
                self.load_tag(tag);
            }
            Some(state) => log::debug!("Reload for '{tag}' ignored in state {state}"),
            None => log::debug!("Reload for unknown tag '{tag}' ignored"),
        }
    }

    fn load_tag(&mut self, tag: Ustr) {
        let module_override = match self.tags.get_mut(&tag) {
            Some(entry) => {
                entry.state = TagState::Loading;
                entry.module_override.clone()
            }
            None => return,
        };

        let location = resolve_location(tag.as_str(), module_override.as_deref(), &self.config);
        log::debug!("Loading '{tag}' from '{location}'");

        match self.loader.load(&location) {
            Ok(ModuleExports::Constructor(ctor)) => {
                match self.registry.define(tag.as_str(), ctor) {
                    Ok(()) => self.mark_defined(tag),
                    Err(e) => self.mark_failed(tag, &format!("define rejected: {e}")),
                }
            }
            Ok(ModuleExports::SelfRegistering) => self.mark_defined(tag),
            Err(e) => self.mark_failed(tag, &e.to_string()),
        }
    }

    fn mark_defined(&mut self, tag: Ustr) {
        if let Some(entry) = self.tags.get_mut(&tag) {
            entry.state = TagState::Defined;
        }
        self.observer.unobserve(tag);
        log::info!("Defined '{tag}'");
    }

    fn mark_failed(&mut self, tag: Ustr, reason: &str) {
        if let Some(entry) = self.tags.get_mut(&tag) {
            entry.state = TagState::Failed;
        }
        self.observer.unobserve(tag);
        log::error!("Failed to load '{tag}': {reason}");
    }
}
