// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Runtime parameter registry behind `setpar` / `getpar`.
//!
//! Parameters are string-keyed, carry a description for `help`, and may
//! register a synchronous change observer. The observer runs before the new
//! value is stored; if it errors, the change is rejected and the stored
//! value stays untouched. Module-owned parameters are registered during
//! module init and dropped with the module.

use crate::core::error::{Result, VisorError};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Change observer: `(name, old_value, new_value)`, called before the store.
pub type OnChange = Box<dyn FnMut(&str, &str, &str) -> Result<()> + Send>;

/// Who registered a parameter. Module parameters are unregistered when the
/// module is unloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamOwner {
    Engine,
    Module,
}

struct ParamDef {
    value: String,
    description: String,
    owner: ParamOwner,
    on_change: Option<OnChange>,
}

/// String-keyed parameter set with synchronous change notification.
#[derive(Default)]
pub struct ParamSet {
    params: BTreeMap<String, ParamDef>,
}

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parameter without an observer.
    pub fn register(
        &mut self,
        name: &str,
        default: &str,
        description: &str,
        owner: ParamOwner,
    ) -> Result<()> {
        self.register_with_callback(name, default, description, owner, None)
    }

    /// Register a parameter with a change observer.
    ///
    /// The observer is NOT invoked for the default value; it fires on every
    /// subsequent successful `set`.
    pub fn register_with_callback(
        &mut self,
        name: &str,
        default: &str,
        description: &str,
        owner: ParamOwner,
        on_change: Option<OnChange>,
    ) -> Result<()> {
        if self.params.contains_key(name) {
            return Err(VisorError::InvalidValue(format!(
                "Parameter '{name}' is already registered"
            )));
        }
        self.params.insert(
            name.to_string(),
            ParamDef {
                value: default.to_string(),
                description: description.to_string(),
                owner,
                on_change,
            },
        );
        Ok(())
    }

    /// Set a parameter, running its observer first. The stored value is only
    /// replaced when the observer (if any) accepts the change.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        let def = self
            .params
            .get_mut(name)
            .ok_or_else(|| VisorError::UnknownParameter(name.to_string()))?;
        if let Some(cb) = def.on_change.as_mut() {
            cb(name, &def.value, value)?;
        }
        tracing::debug!("Parameter {name}: '{}' -> '{value}'", def.value);
        def.value = value.to_string();
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&str> {
        self.params
            .get(name)
            .map(|d| d.value.as_str())
            .ok_or_else(|| VisorError::UnknownParameter(name.to_string()))
    }

    /// Typed read; a stored value that no longer parses is an `InvalidValue`.
    pub fn get_parsed<T: FromStr>(&self, name: &str) -> Result<T> {
        let raw = self.get(name)?;
        raw.parse().map_err(|_| {
            VisorError::InvalidValue(format!("Parameter '{name}' holds unparseable '{raw}'"))
        })
    }

    /// Drop every module-owned parameter (module unload path).
    pub fn clear_module_params(&mut self) {
        self.params.retain(|_, def| def.owner == ParamOwner::Engine);
    }

    /// `(name, value, description)` triples for `help`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.params
            .iter()
            .map(|(k, d)| (k.as_str(), d.value.as_str(), d.description.as_str()))
    }
}
